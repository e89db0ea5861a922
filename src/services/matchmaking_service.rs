use std::time::{Duration, SystemTime};

use futures::StreamExt;
use tokio::{runtime::Handle, time};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{JoinRoom, NewRoom, RoomStatus, Slot},
        storage::{Backend, StorageError},
    },
    error::ServiceError,
    services::player_service,
    state::SharedState,
};

/// How the requester entered its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRole {
    /// Created a new waiting room; must wait for an opponent.
    Created,
    /// Joined someone else's waiting room; the battle has started.
    Joined,
}

/// Result of a find-or-create cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTicket {
    /// Room the requester now belongs to.
    pub room_id: Uuid,
    /// Created or joined.
    pub role: MatchRole,
    /// Opponent display name, known only when joining.
    pub opponent_name: Option<String>,
    /// Problem assigned to the room.
    pub problem_id: String,
}

/// Join the oldest waiting room of another player, or create one.
///
/// Losing a join race re-runs the whole cycle, up to the configured bound.
pub async fn find_or_create_room(
    state: &SharedState,
    requester_id: &str,
) -> Result<MatchTicket, ServiceError> {
    let backend = state.require_backend().await?;
    let attempts = state.config().join_attempts();

    for attempt in 1..=attempts {
        let Some(candidate) = backend
            .rooms
            .find_oldest_waiting(requester_id.to_owned())
            .await?
        else {
            return create_room(state, &backend, requester_id).await;
        };

        let my_name =
            player_service::display_name_for(&backend, requester_id, Slot::Player2).await?;
        let join = JoinRoom {
            player2_id: requester_id.to_owned(),
            player2_name: my_name,
            start_time: SystemTime::now(),
        };

        match backend.rooms.join_room(candidate.id, join).await {
            Ok(room) => {
                info!(room_id = %room.id, user_id = requester_id, "joined waiting room");
                return Ok(MatchTicket {
                    room_id: room.id,
                    role: MatchRole::Joined,
                    opponent_name: Some(room.player_name(Slot::Player1).to_owned()),
                    problem_id: room.problem_id,
                });
            }
            Err(err @ (StorageError::Conflict { .. } | StorageError::NotFound { .. })) => {
                warn!(room_id = %candidate.id, attempt, error = %err, "lost join race; retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(format!(
        "no room could be joined after {attempts} attempts"
    )))
}

async fn create_room(
    state: &SharedState,
    backend: &Backend,
    requester_id: &str,
) -> Result<MatchTicket, ServiceError> {
    let my_name = player_service::display_name_for(backend, requester_id, Slot::Player1).await?;
    let problem_id = state.collaborators().problems.pick_problem_id().await?;
    let room = backend
        .rooms
        .create_room(NewRoom {
            player1_id: requester_id.to_owned(),
            player1_name: my_name,
            problem_id,
            created_at: SystemTime::now(),
        })
        .await?;

    info!(room_id = %room.id, user_id = requester_id, "created waiting room");
    Ok(MatchTicket {
        room_id: room.id,
        role: MatchRole::Created,
        opponent_name: None,
        problem_id: room.problem_id,
    })
}

/// Block until someone joins `room_id`; returns the opponent's display name.
pub async fn wait_for_opponent(
    state: &SharedState,
    room_id: Uuid,
    requester_id: &str,
) -> Result<String, ServiceError> {
    let backend = state.require_backend().await?;
    let mut snapshots = backend.rooms.watch_room(room_id).await?;

    while let Some(snapshot) = snapshots.next().await {
        let Some(room) = snapshot? else {
            return Err(ServiceError::Canceled(format!("room `{room_id}` disappeared")));
        };
        if room.player1_id != requester_id {
            return Err(ServiceError::Unauthorized(
                "only the room creator waits for an opponent".into(),
            ));
        }

        match room.status {
            RoomStatus::Waiting => debug!(room_id = %room_id, "still waiting for an opponent"),
            RoomStatus::Ongoing if room.player2_id.is_some() => {
                info!(room_id = %room_id, "opponent joined");
                return Ok(room.player_name(Slot::Player2).to_owned());
            }
            RoomStatus::Ongoing => {}
            RoomStatus::Canceled | RoomStatus::Finished => {
                return Err(ServiceError::Canceled(format!(
                    "room `{room_id}` is {}",
                    room.status.as_str()
                )));
            }
        }
    }

    Err(StorageError::StreamClosed { id: room_id }.into())
}

/// [`wait_for_opponent`] bounded by `limit`.
///
/// If the caller goes away before the wait completes, the waiting room is
/// canceled so nobody joins a room without a listener. A timeout leaves the
/// room waiting; the caller may wait again.
pub async fn wait_or_cancel(
    state: &SharedState,
    room_id: Uuid,
    requester_id: &str,
    limit: Duration,
) -> Result<String, ServiceError> {
    let mut guard = CancelOnDrop {
        state: state.clone(),
        room_id,
        requester_id: requester_id.to_owned(),
        armed: true,
    };
    let outcome = time::timeout(limit, wait_for_opponent(state, room_id, requester_id))
        .await
        .unwrap_or(Err(ServiceError::Timeout));
    guard.armed = false;
    outcome
}

struct CancelOnDrop {
    state: SharedState,
    room_id: Uuid,
    requester_id: String,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let state = self.state.clone();
        let room_id = self.room_id;
        let requester_id = std::mem::take(&mut self.requester_id);
        runtime.spawn(async move {
            match cancel_waiting_room(&state, room_id, &requester_id).await {
                Ok(()) => info!(room_id = %room_id, "waiter left; room canceled"),
                Err(err) => debug!(room_id = %room_id, error = %err, "waiter left; room not canceled"),
            }
        });
    }
}

/// Cancel the requester's own waiting room.
pub async fn cancel_waiting_room(
    state: &SharedState,
    room_id: Uuid,
    requester_id: &str,
) -> Result<(), ServiceError> {
    let backend = state.require_backend().await?;
    backend
        .rooms
        .cancel_room(room_id, requester_id.to_owned())
        .await?;
    info!(room_id = %room_id, user_id = requester_id, "waiting room canceled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig, dao::memory::MemoryStore, external::Collaborators, state::AppState,
    };

    async fn state_with(store: &MemoryStore) -> SharedState {
        let config = AppConfig::default();
        let collaborators = Collaborators::local(&config);
        let state = AppState::new(config, collaborators);
        state.install_backend(Backend::new(store.clone())).await;
        state
    }

    #[tokio::test]
    async fn first_requester_creates_second_joins() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;

        let created = find_or_create_room(&state, "alice").await.unwrap();
        assert_eq!(created.role, MatchRole::Created);
        assert!(created.problem_id.starts_with("problem_"));

        // Requesting again must not join one's own room.
        let own = find_or_create_room(&state, "alice").await.unwrap();
        assert_eq!(own.role, MatchRole::Created);
        assert_ne!(own.room_id, created.room_id);

        let joined = find_or_create_room(&state, "bob").await.unwrap();
        assert_eq!(joined.role, MatchRole::Joined);
        assert_eq!(joined.room_id, created.room_id);
        // Profiles were missing when the rooms were created, so defaults apply.
        assert_eq!(joined.opponent_name.as_deref(), Some("Player 1"));

        let room = store_room(&state, joined.room_id).await;
        assert_eq!(room.status, RoomStatus::Ongoing);
        assert_eq!(room.player2_id.as_deref(), Some("bob"));
        assert!(room.start_time.is_some());
        assert_eq!(room.player2_name.as_deref(), Some("Player 2"));
    }

    async fn store_room(state: &SharedState, id: Uuid) -> crate::dao::models::RoomEntity {
        let backend = state.require_backend().await.unwrap();
        backend.rooms.find_room(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn racing_joiners_never_share_a_room() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();

        let joiners = ["bob", "carol", "dave"].map(|user| {
            let state = state.clone();
            tokio::spawn(async move { find_or_create_room(&state, user).await.unwrap() })
        });
        let tickets: Vec<_> = futures::future::join_all(joiners)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let winners: Vec<_> = tickets
            .iter()
            .filter(|t| t.room_id == created.room_id)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].role, MatchRole::Joined);

        let room = store_room(&state, created.room_id).await;
        assert_eq!(room.status, RoomStatus::Ongoing);
    }

    #[tokio::test]
    async fn waiting_creator_learns_opponent_name() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { wait_for_opponent(&state, created.room_id, "alice").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        find_or_create_room(&state, "bob").await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), "Player 2");
    }

    #[tokio::test]
    async fn canceled_room_stops_the_wait() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();

        assert!(matches!(
            cancel_waiting_room(&state, created.room_id, "bob").await,
            Err(ServiceError::Conflict(_))
        ));
        cancel_waiting_room(&state, created.room_id, "alice")
            .await
            .unwrap();

        assert!(matches!(
            wait_for_opponent(&state, created.room_id, "alice").await,
            Err(ServiceError::Canceled(_))
        ));
        // A canceled room is never offered again.
        let next = find_or_create_room(&state, "bob").await.unwrap();
        assert_eq!(next.role, MatchRole::Created);
    }

    #[tokio::test]
    async fn abandoned_wait_cancels_the_room() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                wait_or_cancel(&state, created.room_id, "alice", Duration::from_secs(60)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let room = store_room(&state, created.room_id).await;
        assert_eq!(room.status, RoomStatus::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_wait_keeps_the_room() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();

        assert!(matches!(
            wait_or_cancel(&state, created.room_id, "alice", Duration::from_secs(30)).await,
            Err(ServiceError::Timeout)
        ));
        let room = store_room(&state, created.room_id).await;
        assert_eq!(room.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn removed_room_stops_the_wait() {
        let store = MemoryStore::new();
        let state = state_with(&store).await;
        let created = find_or_create_room(&state, "alice").await.unwrap();
        store.remove_room(created.room_id);

        assert!(matches!(
            wait_for_opponent(&state, created.room_id, "alice").await,
            Err(ServiceError::Canceled(_))
        ));
    }
}
