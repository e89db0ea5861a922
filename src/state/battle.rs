//! Per-client battle state machine.
//!
//! The machine is pure: it consumes room snapshots and timer events, and it
//! returns the effects the session runtime must carry out. It never touches
//! storage or clocks itself.

use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::dao::models::{RoomEntity, RoomStatus, Slot};

/// Phases of one client's view of a battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattlePhase {
    /// No snapshot seen yet; the local slot is unknown.
    Initializing,
    /// Slot resolved, waiting for the room's `startTime`.
    WaitingForStart,
    /// Countdown running towards `deadline`.
    Running {
        /// `startTime + battle duration`.
        deadline: SystemTime,
    },
    /// Absorbing terminal phase.
    Ended(SessionResult),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    /// The room reached `finished`; `None` winner means a draw.
    Finished {
        /// Winner recorded on the room.
        winner_id: Option<String>,
    },
    /// The local countdown reached the deadline first.
    Timeout,
    /// The session could not continue.
    Error(String),
}

/// Inputs delivered to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleEvent {
    /// Latest full state of the room.
    Snapshot(RoomEntity),
    /// The room document disappeared.
    RoomMissing,
    /// The change stream failed or closed.
    StreamFailed(String),
    /// The local countdown fired.
    CountdownElapsed,
}

/// Work the runtime must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleEffect {
    /// Fetch the problem statement (best effort).
    LoadProblem(String),
    /// Arm the countdown.
    StartCountdown {
        /// Wall-clock deadline shared by both clients.
        deadline: SystemTime,
    },
    /// Publish both scores from the local point of view.
    Scores {
        /// Score of the local player.
        mine: i64,
        /// Score of the opponent.
        theirs: i64,
    },
    /// Leave the battle: cancel timers, unsubscribe, finalize, report.
    End(SessionResult),
}

/// Which slot belongs to the local player. Resolved once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    /// Local slot.
    pub mine: Slot,
    /// Opponent slot.
    pub theirs: Slot,
}

impl SlotAssignment {
    fn new(mine: Slot) -> Self {
        Self {
            mine,
            theirs: mine.other(),
        }
    }
}

/// Reasons a submission is refused locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    /// The countdown has not started yet.
    #[error("battle has not started yet")]
    NotStarted,
    /// The battle is already over.
    #[error("battle is over")]
    Ended,
}

/// State machine for one `(room, user)` session.
#[derive(Debug, Clone)]
pub struct BattleMachine {
    user_id: String,
    duration: Duration,
    phase: BattlePhase,
    assignment: Option<SlotAssignment>,
}

impl BattleMachine {
    /// Fresh machine in [`BattlePhase::Initializing`].
    pub fn new(user_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            duration,
            phase: BattlePhase::Initializing,
            assignment: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> &BattlePhase {
        &self.phase
    }

    /// Local slot assignment once resolved.
    pub fn assignment(&self) -> Option<SlotAssignment> {
        self.assignment
    }

    /// Whether the machine reached its terminal phase.
    pub fn is_ended(&self) -> bool {
        matches!(self.phase, BattlePhase::Ended(_))
    }

    /// Slot a submission may write to, if submissions are open.
    pub fn ensure_can_submit(&self) -> Result<Slot, SubmitRejected> {
        match (&self.phase, self.assignment) {
            (BattlePhase::Running { .. }, Some(assignment)) => Ok(assignment.mine),
            (BattlePhase::Ended(_), _) => Err(SubmitRejected::Ended),
            _ => Err(SubmitRejected::NotStarted),
        }
    }

    /// Apply one event observed at wall-clock time `now`.
    pub fn handle(&mut self, event: BattleEvent, now: SystemTime) -> Vec<BattleEffect> {
        if self.is_ended() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match event {
            BattleEvent::Snapshot(room) => self.on_snapshot(&room, now, &mut effects),
            BattleEvent::RoomMissing => {
                self.end(SessionResult::Error("room no longer exists".into()), &mut effects)
            }
            BattleEvent::StreamFailed(reason) => {
                self.end(SessionResult::Error(reason), &mut effects)
            }
            BattleEvent::CountdownElapsed => {
                if matches!(self.phase, BattlePhase::Running { .. }) {
                    self.end(SessionResult::Timeout, &mut effects);
                }
            }
        }
        effects
    }

    fn on_snapshot(&mut self, room: &RoomEntity, now: SystemTime, effects: &mut Vec<BattleEffect>) {
        if self.phase == BattlePhase::Initializing {
            let Some(mine) = room.slot_of(&self.user_id) else {
                self.end(
                    SessionResult::Error("you are not a player in this room".into()),
                    effects,
                );
                return;
            };
            self.assignment = Some(SlotAssignment::new(mine));
            effects.push(BattleEffect::LoadProblem(room.problem_id.clone()));
            self.phase = BattlePhase::WaitingForStart;
        }

        if room.status == RoomStatus::Canceled {
            self.end(SessionResult::Error("room was canceled".into()), effects);
            return;
        }

        if self.phase == BattlePhase::WaitingForStart {
            let Some(start_time) = room.start_time else {
                return;
            };
            let Some(deadline) = start_time.checked_add(self.duration) else {
                self.end(
                    SessionResult::Error("battle deadline out of range".into()),
                    effects,
                );
                return;
            };
            // Late join: the deadline passed before this client ever ran.
            if now >= deadline {
                self.end(SessionResult::Timeout, effects);
                return;
            }
            effects.push(BattleEffect::StartCountdown { deadline });
            self.phase = BattlePhase::Running { deadline };
        }

        let Some(assignment) = self.assignment else {
            return;
        };
        effects.push(BattleEffect::Scores {
            mine: room.score(assignment.mine),
            theirs: room.score(assignment.theirs),
        });

        if room.status == RoomStatus::Finished {
            self.end(
                SessionResult::Finished {
                    winner_id: room.winner_id.clone(),
                },
                effects,
            );
        }
    }

    fn end(&mut self, result: SessionResult, effects: &mut Vec<BattleEffect>) {
        self.phase = BattlePhase::Ended(result.clone());
        effects.push(BattleEffect::End(result));
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dao::models::NewRoom;

    const DURATION: Duration = Duration::from_secs(300);

    fn base_time() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn waiting_room() -> RoomEntity {
        RoomEntity::waiting(
            Uuid::new_v4(),
            NewRoom {
                player1_id: "alice".into(),
                player1_name: "Alice".into(),
                problem_id: "problem_3".into(),
                created_at: base_time(),
            },
        )
    }

    fn ongoing_room(start: SystemTime) -> RoomEntity {
        let mut room = waiting_room();
        room.status = RoomStatus::Ongoing;
        room.player2_id = Some("bob".into());
        room.player2_name = Some("Bob".into());
        room.start_time = Some(start);
        room
    }

    #[test]
    fn stranger_ends_with_error() {
        let mut machine = BattleMachine::new("mallory", DURATION);
        let effects = machine.handle(BattleEvent::Snapshot(ongoing_room(base_time())), base_time());
        assert!(matches!(
            effects.as_slice(),
            [BattleEffect::End(SessionResult::Error(_))]
        ));
        assert!(machine.is_ended());
        assert!(machine.assignment().is_none());
    }

    #[test]
    fn creator_waits_then_runs() {
        let mut machine = BattleMachine::new("alice", DURATION);
        let effects = machine.handle(BattleEvent::Snapshot(waiting_room()), base_time());
        assert_eq!(effects, vec![BattleEffect::LoadProblem("problem_3".into())]);
        assert_eq!(machine.phase(), &BattlePhase::WaitingForStart);
        assert_eq!(machine.ensure_can_submit(), Err(SubmitRejected::NotStarted));

        let start = base_time() + Duration::from_secs(10);
        let effects = machine.handle(BattleEvent::Snapshot(ongoing_room(start)), start);
        let deadline = start + DURATION;
        assert_eq!(
            effects,
            vec![
                BattleEffect::StartCountdown { deadline },
                BattleEffect::Scores { mine: 0, theirs: 0 },
            ]
        );
        assert_eq!(machine.ensure_can_submit(), Ok(Slot::Player1));
    }

    #[test]
    fn assignment_is_resolved_once() {
        let mut machine = BattleMachine::new("bob", DURATION);
        let mut room = ongoing_room(base_time());
        machine.handle(BattleEvent::Snapshot(room.clone()), base_time());
        assert_eq!(
            machine.assignment(),
            Some(SlotAssignment {
                mine: Slot::Player2,
                theirs: Slot::Player1
            })
        );

        room.player1_score = 70;
        room.player2_score = 30;
        let effects = machine.handle(BattleEvent::Snapshot(room), base_time());
        assert_eq!(effects, vec![BattleEffect::Scores { mine: 30, theirs: 70 }]);
    }

    #[test]
    fn late_join_times_out_without_countdown() {
        let mut machine = BattleMachine::new("bob", DURATION);
        let start = base_time();
        let now = start + DURATION + Duration::from_secs(1);
        let effects = machine.handle(BattleEvent::Snapshot(ongoing_room(start)), now);
        assert_eq!(
            effects,
            vec![
                BattleEffect::LoadProblem("problem_3".into()),
                BattleEffect::End(SessionResult::Timeout),
            ]
        );
    }

    #[test]
    fn unrepresentable_deadline_ends_with_error() {
        let mut machine = BattleMachine::new("bob", Duration::MAX);
        let effects = machine.handle(BattleEvent::Snapshot(ongoing_room(base_time())), base_time());
        assert_eq!(
            effects,
            vec![
                BattleEffect::LoadProblem("problem_3".into()),
                BattleEffect::End(SessionResult::Error("battle deadline out of range".into())),
            ]
        );
        assert!(machine.is_ended());
    }

    #[test]
    fn late_join_checks_clock_before_finished_status() {
        let mut machine = BattleMachine::new("alice", DURATION);
        let mut room = ongoing_room(base_time());
        room.status = RoomStatus::Finished;
        room.winner_id = Some("alice".into());
        let effects = machine.handle(BattleEvent::Snapshot(room), base_time() + DURATION);
        assert_eq!(effects.last(), Some(&BattleEffect::End(SessionResult::Timeout)));
    }

    #[test]
    fn finished_status_ends_with_winner() {
        let mut machine = BattleMachine::new("alice", DURATION);
        let mut room = ongoing_room(base_time());
        machine.handle(BattleEvent::Snapshot(room.clone()), base_time());

        room.status = RoomStatus::Finished;
        room.player1_score = 100;
        room.player2_score = 50;
        room.winner_id = Some("alice".into());
        let effects = machine.handle(BattleEvent::Snapshot(room), base_time());
        assert_eq!(
            effects,
            vec![
                BattleEffect::Scores {
                    mine: 100,
                    theirs: 50
                },
                BattleEffect::End(SessionResult::Finished {
                    winner_id: Some("alice".into())
                }),
            ]
        );
    }

    #[test]
    fn countdown_only_counts_while_running() {
        let mut machine = BattleMachine::new("alice", DURATION);
        assert!(machine.handle(BattleEvent::CountdownElapsed, base_time()).is_empty());
        machine.handle(BattleEvent::Snapshot(waiting_room()), base_time());
        assert!(machine.handle(BattleEvent::CountdownElapsed, base_time()).is_empty());

        machine.handle(BattleEvent::Snapshot(ongoing_room(base_time())), base_time());
        let effects = machine.handle(BattleEvent::CountdownElapsed, base_time() + DURATION);
        assert_eq!(effects, vec![BattleEffect::End(SessionResult::Timeout)]);
    }

    #[test]
    fn ended_is_absorbing() {
        let mut machine = BattleMachine::new("alice", DURATION);
        machine.handle(BattleEvent::Snapshot(ongoing_room(base_time())), base_time());
        machine.handle(BattleEvent::CountdownElapsed, base_time() + DURATION);

        let mut room = ongoing_room(base_time());
        room.status = RoomStatus::Finished;
        assert!(machine.handle(BattleEvent::Snapshot(room), base_time()).is_empty());
        assert!(machine.handle(BattleEvent::RoomMissing, base_time()).is_empty());
        assert_eq!(machine.phase(), &BattlePhase::Ended(SessionResult::Timeout));
        assert_eq!(machine.ensure_can_submit(), Err(SubmitRejected::Ended));
    }

    #[test]
    fn missing_room_and_stream_failure_end_with_error() {
        let mut machine = BattleMachine::new("alice", DURATION);
        machine.handle(BattleEvent::Snapshot(waiting_room()), base_time());
        let effects = machine.handle(BattleEvent::RoomMissing, base_time());
        assert!(matches!(
            effects.as_slice(),
            [BattleEffect::End(SessionResult::Error(_))]
        ));

        let mut machine = BattleMachine::new("alice", DURATION);
        let effects = machine.handle(BattleEvent::StreamFailed("boom".into()), base_time());
        assert_eq!(
            effects,
            vec![BattleEffect::End(SessionResult::Error("boom".into()))]
        );
    }

    #[test]
    fn canceled_room_ends_with_error() {
        let mut machine = BattleMachine::new("alice", DURATION);
        let mut room = waiting_room();
        room.status = RoomStatus::Canceled;
        let effects = machine.handle(BattleEvent::Snapshot(room), base_time());
        assert_eq!(effects.len(), 2);
        assert!(matches!(
            effects.last(),
            Some(BattleEffect::End(SessionResult::Error(_)))
        ));
    }
}
