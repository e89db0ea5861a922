use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Rating assigned to a player whose record carries no rating yet.
pub const DEFAULT_RATING: i64 = 1000;

/// Lifecycle of a battle room. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Created by a first player, waiting for an opponent.
    Waiting,
    /// Both players are in and the clock is running.
    Ongoing,
    /// Battle is over; terminal.
    Finished,
    /// Abandoned before anybody joined; terminal.
    Canceled,
}

impl RoomStatus {
    /// Whether `self -> next` is one of the allowed forward transitions.
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Waiting, RoomStatus::Ongoing)
                | (RoomStatus::Waiting, RoomStatus::Canceled)
                | (RoomStatus::Ongoing, RoomStatus::Finished)
        )
    }

    /// Lowercase wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Ongoing => "ongoing",
            RoomStatus::Finished => "finished",
            RoomStatus::Canceled => "canceled",
        }
    }
}

/// A player's position inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Room creator.
    Player1,
    /// Player who joined the waiting room.
    Player2,
}

impl Slot {
    /// The opposite slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }

    /// Fallback display name used when a player has none.
    pub fn default_name(self) -> &'static str {
        match self {
            Slot::Player1 => "Player 1",
            Slot::Player2 => "Player 2",
        }
    }
}

/// Shared document describing one match between two players.
///
/// Field names follow the persisted layout other tooling reads, so they are
/// renamed explicitly rather than derived from the Rust names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Generated room identifier.
    pub id: Uuid,
    /// Current lifecycle status.
    pub status: RoomStatus,
    /// Identity of the room creator.
    #[serde(rename = "player1_uid")]
    pub player1_id: String,
    /// Display name of the room creator.
    #[serde(rename = "player1_displayName")]
    pub player1_name: Option<String>,
    /// Identity of the joining player, absent while waiting.
    #[serde(rename = "player2_uid")]
    pub player2_id: Option<String>,
    /// Display name of the joining player.
    #[serde(rename = "player2_displayName")]
    pub player2_name: Option<String>,
    /// Problem both players race on; immutable after creation.
    #[serde(rename = "problemId")]
    pub problem_id: String,
    /// Creation time, used for FIFO room selection.
    #[serde(rename = "createdAt")]
    pub created_at: SystemTime,
    /// Set once, when the room goes ongoing. Epoch of the shared deadline.
    #[serde(rename = "startTime")]
    pub start_time: Option<SystemTime>,
    /// Set once, when the room goes finished.
    #[serde(rename = "endTime")]
    pub end_time: Option<SystemTime>,
    /// Last score recorded by player 1.
    #[serde(default)]
    pub player1_score: i64,
    /// Last score recorded by player 2.
    #[serde(default)]
    pub player2_score: i64,
    /// Last code submitted by player 1.
    pub player1_submission: Option<String>,
    /// Last code submitted by player 2.
    pub player2_submission: Option<String>,
    /// Winner identity set at finalization; `None` on a draw.
    #[serde(rename = "winner_uid")]
    pub winner_id: Option<String>,
    /// Set together with the rating update of a finished room, so a failed
    /// rating write can be retried and a settled one is never applied twice.
    #[serde(rename = "ratingsSettled", default)]
    pub ratings_settled: bool,
}

impl RoomEntity {
    /// Build a fresh waiting room from a creation request.
    pub fn waiting(id: Uuid, new_room: NewRoom) -> Self {
        Self {
            id,
            status: RoomStatus::Waiting,
            player1_id: new_room.player1_id,
            player1_name: Some(new_room.player1_name),
            player2_id: None,
            player2_name: None,
            problem_id: new_room.problem_id,
            created_at: new_room.created_at,
            start_time: None,
            end_time: None,
            player1_score: 0,
            player2_score: 0,
            player1_submission: None,
            player2_submission: None,
            winner_id: None,
            ratings_settled: false,
        }
    }

    /// Identity stored in `slot`, if any.
    pub fn player_id(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::Player1 => Some(self.player1_id.as_str()),
            Slot::Player2 => self.player2_id.as_deref(),
        }
    }

    /// Display name stored in `slot`, falling back to the slot default.
    pub fn player_name(&self, slot: Slot) -> &str {
        let name = match slot {
            Slot::Player1 => self.player1_name.as_deref(),
            Slot::Player2 => self.player2_name.as_deref(),
        };
        name.unwrap_or(slot.default_name())
    }

    /// Score stored in `slot`.
    pub fn score(&self, slot: Slot) -> i64 {
        match slot {
            Slot::Player1 => self.player1_score,
            Slot::Player2 => self.player2_score,
        }
    }

    /// Resolve which slot `user_id` occupies in this room.
    pub fn slot_of(&self, user_id: &str) -> Option<Slot> {
        if self.player1_id == user_id {
            Some(Slot::Player1)
        } else if self.player2_id.as_deref() == Some(user_id) {
            Some(Slot::Player2)
        } else {
            None
        }
    }
}

/// Creation request for a waiting room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    /// Requester identity.
    pub player1_id: String,
    /// Requester display name.
    pub player1_name: String,
    /// Problem assigned by the problem bank.
    pub problem_id: String,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// Join request applied by the waiting -> ongoing transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoom {
    /// Joining player identity.
    pub player2_id: String,
    /// Joining player display name.
    pub player2_name: String,
    /// Battle start; becomes the shared deadline epoch.
    pub start_time: SystemTime,
}

/// Guarded ongoing -> finished transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishRoom {
    /// Time of the transition.
    pub end_time: SystemTime,
    /// Winner derived from `expected_scores`.
    pub winner_id: Option<String>,
    /// Scores the winner was derived from; a mismatch aborts the write.
    pub expected_scores: (i64, i64),
    /// Whether no rating update follows the transition (draws).
    pub ratings_settled: bool,
}

/// Persisted player profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Opaque identity issued by the identity provider.
    pub id: String,
    /// Name shown to opponents.
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    /// Skill rating; missing means [`DEFAULT_RATING`].
    pub rating: Option<i64>,
    /// Profile creation time.
    #[serde(rename = "createdAt")]
    pub created_at: SystemTime,
}

impl PlayerEntity {
    /// Profile created lazily on first sign-in.
    pub fn new(id: String, display_name: String, created_at: SystemTime) -> Self {
        Self {
            id,
            display_name: Some(display_name),
            rating: Some(DEFAULT_RATING),
            created_at,
        }
    }

    /// Stored rating or the default when the field is missing.
    pub fn rating_or_default(&self) -> i64 {
        self.rating.unwrap_or(DEFAULT_RATING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomEntity {
        RoomEntity::waiting(
            Uuid::new_v4(),
            NewRoom {
                player1_id: "alice".into(),
                player1_name: "Alice".into(),
                problem_id: "problem_1".into(),
                created_at: SystemTime::now(),
            },
        )
    }

    #[test]
    fn status_only_moves_forward() {
        use RoomStatus::*;
        assert!(Waiting.can_transition_to(Ongoing));
        assert!(Waiting.can_transition_to(Canceled));
        assert!(Ongoing.can_transition_to(Finished));

        assert!(!Ongoing.can_transition_to(Waiting));
        assert!(!Finished.can_transition_to(Ongoing));
        assert!(!Finished.can_transition_to(Waiting));
        assert!(!Canceled.can_transition_to(Ongoing));
        assert!(!Waiting.can_transition_to(Finished));
        assert!(!Ongoing.can_transition_to(Ongoing));
    }

    #[test]
    fn slot_resolution_matches_stored_ids() {
        let mut room = room();
        assert_eq!(room.slot_of("alice"), Some(Slot::Player1));
        assert_eq!(room.slot_of("bob"), None);

        room.player2_id = Some("bob".into());
        assert_eq!(room.slot_of("bob"), Some(Slot::Player2));
        assert_eq!(room.player_name(Slot::Player2), "Player 2");
    }

    #[test]
    fn persisted_field_names_are_stable() {
        let value = serde_json::to_value(room()).unwrap();
        for key in [
            "status",
            "player1_uid",
            "player1_displayName",
            "player2_uid",
            "problemId",
            "createdAt",
            "startTime",
            "endTime",
            "player1_score",
            "player2_submission",
            "winner_uid",
        ] {
            assert!(value.get(key).is_some(), "missing `{key}`");
        }
        assert_eq!(value["status"], "waiting");
    }

    #[test]
    fn missing_rating_defaults() {
        let player = PlayerEntity {
            id: "p".into(),
            display_name: None,
            rating: None,
            created_at: SystemTime::now(),
        };
        assert_eq!(player.rating_or_default(), DEFAULT_RATING);
    }
}
