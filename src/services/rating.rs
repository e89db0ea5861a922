//! Flat rating rule and winner derivation.

use crate::dao::models::{RoomEntity, Slot};

/// Points moved from loser to winner.
pub const RATING_DELTA: i64 = 15;
/// Ratings never drop below this value.
pub const RATING_FLOOR: i64 = 100;

/// Result of comparing the two scores of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Strictly higher score in `slot`.
    Win(Slot),
    /// Equal scores.
    Draw,
}

impl Outcome {
    /// Compare player 1's score against player 2's.
    pub fn from_scores(player1: i64, player2: i64) -> Self {
        match player1.cmp(&player2) {
            std::cmp::Ordering::Greater => Outcome::Win(Slot::Player1),
            std::cmp::Ordering::Less => Outcome::Win(Slot::Player2),
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }

    /// Outcome of the scores currently stored on `room`.
    pub fn of_room(room: &RoomEntity) -> Self {
        Self::from_scores(room.player1_score, room.player2_score)
    }

    /// Identity of the winner in `room`; `None` on a draw.
    pub fn winner_id(self, room: &RoomEntity) -> Option<String> {
        match self {
            Outcome::Win(slot) => room.player_id(slot).map(str::to_owned),
            Outcome::Draw => None,
        }
    }

    /// New `(player1, player2)` ratings after this outcome.
    pub fn apply(self, player1: i64, player2: i64) -> (i64, i64) {
        let win = |rating: i64| (rating + RATING_DELTA).max(RATING_FLOOR);
        let lose = |rating: i64| (rating - RATING_DELTA).max(RATING_FLOOR);
        match self {
            Outcome::Win(Slot::Player1) => (win(player1), lose(player2)),
            Outcome::Win(Slot::Player2) => (lose(player1), win(player2)),
            Outcome::Draw => (player1, player2),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;
    use crate::dao::models::NewRoom;

    #[test]
    fn winner_follows_strictly_higher_score() {
        assert_eq!(Outcome::from_scores(0, 0), Outcome::Draw);
        assert_eq!(Outcome::from_scores(100, 0), Outcome::Win(Slot::Player1));
        assert_eq!(Outcome::from_scores(0, 100), Outcome::Win(Slot::Player2));
        assert_eq!(Outcome::from_scores(50, 50), Outcome::Draw);
    }

    #[test]
    fn winner_id_reads_the_winning_slot() {
        let mut room = RoomEntity::waiting(
            Uuid::new_v4(),
            NewRoom {
                player1_id: "alice".into(),
                player1_name: "Alice".into(),
                problem_id: "problem_1".into(),
                created_at: SystemTime::now(),
            },
        );
        room.player2_id = Some("bob".into());
        room.player2_score = 10;
        assert_eq!(Outcome::of_room(&room).winner_id(&room), Some("bob".into()));
        room.player1_score = 10;
        assert_eq!(Outcome::of_room(&room).winner_id(&room), None);
    }

    #[test]
    fn flat_delta_with_floor() {
        assert_eq!(Outcome::Win(Slot::Player1).apply(1000, 1000), (1015, 985));
        assert_eq!(Outcome::Win(Slot::Player2).apply(1000, 1000), (985, 1015));
        assert_eq!(Outcome::Draw.apply(1200, 900), (1200, 900));
        // Loser already at the floor stays there; winner still gains.
        assert_eq!(Outcome::Win(Slot::Player2).apply(100, 1000), (100, 1015));
        assert_eq!(Outcome::Win(Slot::Player1).apply(500, 110), (515, 100));
    }
}
