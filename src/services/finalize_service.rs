use std::{sync::Arc, time::SystemTime};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{FinishRoom, RoomEntity, RoomStatus},
        storage::{Backend, StorageError},
    },
    error::ServiceError,
    services::rating::Outcome,
    state::SharedState,
};

/// Re-reads tolerated when submissions keep landing between read and finish.
const MAX_FINALIZE_ATTEMPTS: u32 = 5;

/// What a finalize call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call finished the room or settled its ratings.
    Applied {
        /// Winner derived from the final scores; `None` on a draw.
        winner_id: Option<String>,
        /// New `(player1, player2)` ratings, absent on a draw.
        ratings: Option<(i64, i64)>,
    },
    /// The room was already finished and settled when it was read.
    AlreadyFinalized,
    /// Another caller finished or settled the room between read and write.
    LostRace,
    /// The room never started (waiting or canceled); nothing to settle.
    NotStarted,
}

/// Finalize requested explicitly by `user_id`.
///
/// Only a player of the room may ask, and an ongoing battle is only finished
/// once its deadline has passed. Sessions call [`finalize_with`] directly.
pub async fn finalize(
    state: &SharedState,
    room_id: Uuid,
    user_id: &str,
) -> Result<FinalizeOutcome, ServiceError> {
    let backend = state.require_backend().await?;
    let room = backend
        .rooms
        .find_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{room_id}`")))?;
    if room.slot_of(user_id).is_none() {
        return Err(ServiceError::Unauthorized(
            "not a player in this room".into(),
        ));
    }

    if room.status == RoomStatus::Ongoing {
        let deadline = room
            .start_time
            .and_then(|start| start.checked_add(state.config().battle_duration()));
        match deadline {
            Some(deadline) if SystemTime::now() >= deadline => {}
            _ => {
                debug!(room_id = %room_id, user_id, "finalize before the deadline refused");
                return Err(ServiceError::InvalidState("battle is still running".into()));
            }
        }
    }

    finalize_with(&backend, room_id).await
}

/// Mark the room finished and apply the rating change, at most once per room.
///
/// The caller whose guarded write moved the room to finished settles the
/// ratings. A finished room whose settlement failed is settled by the next
/// call; the store's settled marker keeps the rating change single.
pub async fn finalize_with(
    backend: &Backend,
    room_id: Uuid,
) -> Result<FinalizeOutcome, ServiceError> {
    for attempt in 1..=MAX_FINALIZE_ATTEMPTS {
        let room = backend
            .rooms
            .find_room(room_id)
            .await?
            .ok_or_else(|| StorageError::room_not_found(room_id))?;

        match room.status {
            RoomStatus::Finished => return settle_finished(backend, &room).await,
            RoomStatus::Waiting | RoomStatus::Canceled => {
                debug!(room_id = %room_id, status = room.status.as_str(), "nothing to finalize");
                return Ok(FinalizeOutcome::NotStarted);
            }
            RoomStatus::Ongoing => {}
        }

        let outcome = Outcome::of_room(&room);
        let winner_id = outcome.winner_id(&room);
        let finish = FinishRoom {
            end_time: SystemTime::now(),
            winner_id: winner_id.clone(),
            expected_scores: (room.player1_score, room.player2_score),
            ratings_settled: outcome == Outcome::Draw,
        };

        match backend.rooms.finish_room(room_id, finish).await {
            Ok(true) => {
                info!(room_id = %room_id, winner = ?winner_id, "room finished");
            }
            Ok(false) => {
                debug!(room_id = %room_id, "finalize race lost");
                return Ok(FinalizeOutcome::LostRace);
            }
            Err(err @ (StorageError::Conflict { .. } | StorageError::InvalidTransition { .. })) => {
                warn!(room_id = %room_id, attempt, error = %err, "room changed during finalize; re-reading");
                continue;
            }
            Err(err) => return Err(err.into()),
        }

        if outcome == Outcome::Draw {
            return Ok(FinalizeOutcome::Applied {
                winner_id,
                ratings: None,
            });
        }
        return Ok(match settle(backend, &room, outcome).await? {
            Some(ratings) => FinalizeOutcome::Applied {
                winner_id,
                ratings: Some(ratings),
            },
            None => FinalizeOutcome::LostRace,
        });
    }

    Err(ServiceError::Conflict(format!(
        "room `{room_id}` kept changing during finalize"
    )))
}

async fn settle_finished(
    backend: &Backend,
    room: &RoomEntity,
) -> Result<FinalizeOutcome, ServiceError> {
    let outcome = Outcome::of_room(room);
    if room.ratings_settled || outcome == Outcome::Draw {
        debug!(room_id = %room.id, "room already finalized");
        return Ok(FinalizeOutcome::AlreadyFinalized);
    }

    warn!(room_id = %room.id, "finished room has unsettled ratings; settling");
    Ok(match settle(backend, room, outcome).await? {
        Some(ratings) => FinalizeOutcome::Applied {
            winner_id: room.winner_id.clone(),
            ratings: Some(ratings),
        },
        None => FinalizeOutcome::AlreadyFinalized,
    })
}

async fn settle(
    backend: &Backend,
    room: &RoomEntity,
    outcome: Outcome,
) -> Result<Option<(i64, i64)>, ServiceError> {
    let Some(player2_id) = room.player2_id.clone() else {
        warn!(room_id = %room.id, "finished room has no second player; ratings untouched");
        return Ok(None);
    };

    let transform = Arc::new(move |first: i64, second: i64| outcome.apply(first, second));
    let ratings = backend
        .players
        .settle_ratings(room.id, room.player1_id.clone(), player2_id, transform)
        .await
        .inspect_err(|err| {
            error!(room_id = %room.id, error = %err, "rating settlement failed; room stays unsettled");
        })?;
    match ratings {
        Some((player1, player2)) => {
            info!(room_id = %room.id, player1, player2, "ratings updated");
        }
        None => debug!(room_id = %room.id, "ratings settled by another caller"),
    }
    Ok(ratings)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            memory::MemoryStore,
            models::{JoinRoom, NewRoom, PlayerEntity, Slot},
            player_store::{PlayerStore, RatingTransform},
            room_store::RoomStore,
            storage::StorageResult,
        },
        external::Collaborators,
        state::AppState,
    };

    /// Player store whose first rating settlements fail as if the backend dropped.
    struct FlakySettlement {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl PlayerStore for FlakySettlement {
        fn find_player(
            &self,
            id: String,
        ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
            self.inner.find_player(id)
        }

        fn create_player_if_absent(
            &self,
            player: PlayerEntity,
        ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
            self.inner.create_player_if_absent(player)
        }

        fn settle_ratings(
            &self,
            room_id: Uuid,
            first: String,
            second: String,
            transform: RatingTransform,
        ) -> BoxFuture<'static, StorageResult<Option<(i64, i64)>>> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Box::pin(async {
                    Err::<Option<(i64, i64)>, _>(StorageError::unavailable(
                        "connection reset".into(),
                        std::io::Error::other("connection reset"),
                    ))
                });
            }
            self.inner.settle_ratings(room_id, first, second, transform)
        }
    }

    async fn state_with(store: &MemoryStore) -> SharedState {
        let config = AppConfig::default();
        let collaborators = Collaborators::local(&config);
        let state = AppState::new(config, collaborators);
        state.install_backend(Backend::new(store.clone())).await;
        state
    }

    async fn seeded(store: &MemoryStore) -> (Backend, Uuid) {
        let backend = Backend::new(store.clone());
        for id in ["alice", "bob"] {
            backend
                .players
                .create_player_if_absent(PlayerEntity::new(
                    id.into(),
                    id.into(),
                    SystemTime::now(),
                ))
                .await
                .unwrap();
        }
        let room = backend
            .rooms
            .create_room(NewRoom {
                player1_id: "alice".into(),
                player1_name: "alice".into(),
                problem_id: "problem_1".into(),
                created_at: SystemTime::now(),
            })
            .await
            .unwrap();
        backend
            .rooms
            .join_room(
                room.id,
                JoinRoom {
                    player2_id: "bob".into(),
                    player2_name: "bob".into(),
                    start_time: SystemTime::now(),
                },
            )
            .await
            .unwrap();
        (backend, room.id)
    }

    async fn rating(backend: &Backend, id: &str) -> i64 {
        backend
            .players
            .find_player(id.into())
            .await
            .unwrap()
            .unwrap()
            .rating_or_default()
    }

    #[tokio::test]
    async fn concurrent_finalize_applies_ratings_once() {
        let store = MemoryStore::new();
        let (backend, room_id) = seeded(&store).await;
        backend
            .rooms
            .record_submission(room_id, Slot::Player1, 100, "0123456789".into())
            .await
            .unwrap();
        backend
            .rooms
            .record_submission(room_id, Slot::Player2, 50, "01234".into())
            .await
            .unwrap();

        let calls = (0..8).map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move { finalize_with(&backend, room_id).await })
        });
        let outcomes: Vec<_> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let applied: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, FinalizeOutcome::Applied { .. }))
            .collect();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            applied[0],
            &FinalizeOutcome::Applied {
                winner_id: Some("alice".into()),
                ratings: Some((1015, 985)),
            }
        );
        assert_eq!(rating(&backend, "alice").await, 1015);
        assert_eq!(rating(&backend, "bob").await, 985);

        let room = backend.rooms.find_room(room_id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(room.end_time.is_some());
        assert_eq!(room.winner_id.as_deref(), Some("alice"));

        assert_eq!(
            finalize_with(&backend, room_id).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
    }

    #[tokio::test]
    async fn draw_leaves_ratings_untouched() {
        let store = MemoryStore::new();
        let (backend, room_id) = seeded(&store).await;
        let outcome = finalize_with(&backend, room_id).await.unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Applied {
                winner_id: None,
                ratings: None
            }
        );
        assert_eq!(rating(&backend, "alice").await, 1000);
        assert_eq!(rating(&backend, "bob").await, 1000);
    }

    #[tokio::test]
    async fn waiting_room_is_not_finalized() {
        let store = MemoryStore::new();
        let backend = Backend::new(store);
        let room = backend
            .rooms
            .create_room(NewRoom {
                player1_id: "alice".into(),
                player1_name: "alice".into(),
                problem_id: "problem_1".into(),
                created_at: SystemTime::now(),
            })
            .await
            .unwrap();

        assert_eq!(
            finalize_with(&backend, room.id).await.unwrap(),
            FinalizeOutcome::NotStarted
        );
        let room = backend.rooms.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn missing_room_is_not_found() {
        let backend = Backend::new(MemoryStore::new());
        assert!(matches!(
            finalize_with(&backend, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn floor_is_enforced_for_the_loser() {
        let store = MemoryStore::new();
        store
            .create_player_if_absent(PlayerEntity {
                id: "alice".into(),
                display_name: Some("alice".into()),
                rating: Some(100),
                created_at: SystemTime::now(),
            })
            .await
            .unwrap();
        let (backend, room_id) = seeded(&store).await;
        let mut room = backend.rooms.find_room(room_id).await.unwrap().unwrap();
        room.player2_score = 10;
        store.put_room(room);

        let outcome = finalize_with(&backend, room_id).await.unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Applied {
                winner_id: Some("bob".into()),
                ratings: Some((100, 1015)),
            }
        );
    }

    #[tokio::test]
    async fn failed_settlement_is_retried_by_the_next_call() {
        let store = MemoryStore::new();
        let (_, room_id) = seeded(&store).await;
        store
            .record_submission(room_id, Slot::Player1, 100, "0123456789".into())
            .await
            .unwrap();
        let backend = Backend {
            rooms: Arc::new(store.clone()),
            players: Arc::new(FlakySettlement {
                inner: store.clone(),
                failures: AtomicU32::new(1),
            }),
        };

        let err = finalize_with(&backend, room_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        let room = store.find_room(room_id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(!room.ratings_settled);
        assert_eq!(rating(&backend, "alice").await, 1000);

        assert_eq!(
            finalize_with(&backend, room_id).await.unwrap(),
            FinalizeOutcome::Applied {
                winner_id: Some("alice".into()),
                ratings: Some((1015, 985)),
            }
        );
        assert_eq!(
            finalize_with(&backend, room_id).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
        assert_eq!(rating(&backend, "alice").await, 1015);
        assert_eq!(rating(&backend, "bob").await, 985);
    }

    #[tokio::test]
    async fn draws_are_settled_on_finish() {
        let store = MemoryStore::new();
        let (backend, room_id) = seeded(&store).await;
        finalize_with(&backend, room_id).await.unwrap();
        let room = store.find_room(room_id).await.unwrap().unwrap();
        assert!(room.ratings_settled);
        assert_eq!(
            finalize_with(&backend, room_id).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
    }

    #[tokio::test]
    async fn explicit_finalize_rejects_strangers() {
        let store = MemoryStore::new();
        let (_, room_id) = seeded(&store).await;
        let mut room = store.find_room(room_id).await.unwrap().unwrap();
        room.start_time = Some(SystemTime::now() - Duration::from_secs(3600));
        store.put_room(room);
        let state = state_with(&store).await;

        let err = finalize(&state, room_id, "mallory").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        let room = store.find_room(room_id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Ongoing);
    }

    #[tokio::test]
    async fn explicit_finalize_waits_for_the_deadline() {
        let store = MemoryStore::new();
        let (_, room_id) = seeded(&store).await;
        store
            .record_submission(room_id, Slot::Player2, 30, "012".into())
            .await
            .unwrap();
        let state = state_with(&store).await;

        let err = finalize(&state, room_id, "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        let room = store.find_room(room_id).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Ongoing);

        let mut room = room;
        let duration = state.config().battle_duration();
        room.start_time = Some(SystemTime::now() - duration - Duration::from_secs(100));
        store.put_room(room);

        assert_eq!(
            finalize(&state, room_id, "alice").await.unwrap(),
            FinalizeOutcome::Applied {
                winner_id: Some("bob".into()),
                ratings: Some((985, 1015)),
            }
        );
    }

    #[tokio::test]
    async fn explicit_finalize_of_a_missing_room_is_not_found() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        assert!(matches!(
            finalize(&state, Uuid::new_v4(), "alice").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
