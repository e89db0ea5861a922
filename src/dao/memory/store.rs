use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use futures::{
    StreamExt,
    future::{self, BoxFuture},
    stream,
};
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    models::{FinishRoom, JoinRoom, NewRoom, PlayerEntity, RoomEntity, RoomStatus, Slot},
    player_store::{PlayerStore, RatingTransform},
    room_store::{RoomSnapshots, RoomStore},
    storage::{StorageError, StorageResult},
};

/// In-process backend: each room sits behind its own map shard lock and
/// carries a watch channel acting as its change stream.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: DashMap<Uuid, RoomCell>,
    players: Mutex<HashMap<String, PlayerEntity>>,
}

struct RoomCell {
    room: RoomEntity,
    changes: watch::Sender<Option<RoomEntity>>,
}

impl RoomCell {
    fn new(room: RoomEntity) -> Self {
        let (changes, _receiver) = watch::channel(Some(room.clone()));
        Self { room, changes }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a room out of band. Live subscribers observe the disappearance.
    pub fn remove_room(&self, id: Uuid) -> bool {
        match self.inner.rooms.remove(&id) {
            Some((_, cell)) => {
                cell.changes.send_replace(None);
                true
            }
            None => false,
        }
    }

    /// Overwrite a room as-is, bypassing every guard. Meant for seeding fixtures.
    pub fn put_room(&self, room: RoomEntity) {
        match self.inner.rooms.get_mut(&room.id) {
            Some(mut cell) => {
                cell.room = room;
                cell.changes.send_replace(Some(cell.room.clone()));
            }
            None => {
                self.inner.rooms.insert(room.id, RoomCell::new(room));
            }
        }
    }

    /// Apply `apply` to a copy of the room and commit it only on success.
    /// Subscribers are notified when the document actually changed.
    fn update_room<T>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut RoomEntity) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut cell = self
            .inner
            .rooms
            .get_mut(&id)
            .ok_or_else(|| StorageError::room_not_found(id))?;

        let mut next = cell.room.clone();
        let value = apply(&mut next)?;
        if next != cell.room {
            cell.room = next;
            cell.changes.send_replace(Some(cell.room.clone()));
        }
        Ok(value)
    }

    fn oldest_waiting(&self, exclude_player: &str) -> Option<RoomEntity> {
        self.inner
            .rooms
            .iter()
            .filter(|cell| {
                cell.room.status == RoomStatus::Waiting && cell.room.player1_id != exclude_player
            })
            .min_by_key(|cell| (cell.room.created_at, cell.room.id))
            .map(|cell| cell.room.clone())
    }

    async fn settle_ratings(
        &self,
        room_id: Uuid,
        first: String,
        second: String,
        transform: RatingTransform,
    ) -> StorageResult<Option<(i64, i64)>> {
        let mut players = self.inner.players.lock().await;
        let first_rating = players
            .get(&first)
            .ok_or_else(|| StorageError::player_not_found(&first))?
            .rating_or_default();
        let second_rating = players
            .get(&second)
            .ok_or_else(|| StorageError::player_not_found(&second))?
            .rating_or_default();

        let marked = self.update_room(room_id, |room| {
            if room.status != RoomStatus::Finished || room.ratings_settled {
                return Ok(false);
            }
            room.ratings_settled = true;
            Ok(true)
        })?;
        if !marked {
            return Ok(None);
        }

        let (first_next, second_next) = transform(first_rating, second_rating);
        if let Some(player) = players.get_mut(&first) {
            player.rating = Some(first_next);
        }
        if let Some(player) = players.get_mut(&second) {
            player.rating = Some(second_next);
        }

        Ok(Some((first_next, second_next)))
    }
}

fn advance(room: &mut RoomEntity, to: RoomStatus) -> StorageResult<()> {
    if !room.status.can_transition_to(to) {
        return Err(StorageError::InvalidTransition {
            from: room.status,
            to,
        });
    }
    room.status = to;
    Ok(())
}

fn join(room: &mut RoomEntity, join: JoinRoom) -> StorageResult<RoomEntity> {
    if room.status != RoomStatus::Waiting || room.player2_id.is_some() {
        return Err(StorageError::conflict(format!(
            "room `{}` is no longer waiting",
            room.id
        )));
    }
    advance(room, RoomStatus::Ongoing)?;
    room.player2_id = Some(join.player2_id);
    room.player2_name = Some(join.player2_name);
    room.start_time = Some(join.start_time);
    Ok(room.clone())
}

fn cancel(room: &mut RoomEntity, player1_id: &str) -> StorageResult<RoomEntity> {
    if room.player1_id != player1_id {
        return Err(StorageError::conflict(format!(
            "room `{}` belongs to another player",
            room.id
        )));
    }
    if room.status != RoomStatus::Waiting {
        return Err(StorageError::conflict(format!(
            "room `{}` is no longer waiting",
            room.id
        )));
    }
    advance(room, RoomStatus::Canceled)?;
    Ok(room.clone())
}

fn submit(room: &mut RoomEntity, slot: Slot, score: i64, code: String) -> StorageResult<()> {
    if room.status != RoomStatus::Ongoing {
        return Err(StorageError::conflict(format!(
            "room `{}` is not accepting submissions",
            room.id
        )));
    }
    match slot {
        Slot::Player1 => {
            room.player1_score = score;
            room.player1_submission = Some(code);
        }
        Slot::Player2 => {
            room.player2_score = score;
            room.player2_submission = Some(code);
        }
    }
    Ok(())
}

fn finish(room: &mut RoomEntity, finish: FinishRoom) -> StorageResult<bool> {
    if room.status == RoomStatus::Finished {
        return Ok(false);
    }
    if room.status == RoomStatus::Ongoing
        && (room.player1_score, room.player2_score) != finish.expected_scores
    {
        return Err(StorageError::conflict(format!(
            "scores of room `{}` changed since they were read",
            room.id
        )));
    }
    advance(room, RoomStatus::Finished)?;
    room.end_time = Some(finish.end_time);
    room.winner_id = finish.winner_id;
    room.ratings_settled = finish.ratings_settled;
    Ok(true)
}

impl RoomStore for MemoryStore {
    fn create_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let room = RoomEntity::waiting(Uuid::new_v4(), room);
        self.inner.rooms.insert(room.id, RoomCell::new(room.clone()));
        debug!(room_id = %room.id, "room created in memory store");
        Box::pin(future::ready(Ok(room)))
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let room = self.inner.rooms.get(&id).map(|cell| cell.room.clone());
        Box::pin(future::ready(Ok(room)))
    }

    fn find_oldest_waiting(
        &self,
        exclude_player: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        Box::pin(future::ready(Ok(self.oldest_waiting(&exclude_player))))
    }

    fn join_room(
        &self,
        id: Uuid,
        request: JoinRoom,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        Box::pin(future::ready(
            self.update_room(id, |room| join(room, request)),
        ))
    }

    fn cancel_room(
        &self,
        id: Uuid,
        player1_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        Box::pin(future::ready(
            self.update_room(id, |room| cancel(room, &player1_id)),
        ))
    }

    fn record_submission(
        &self,
        id: Uuid,
        slot: Slot,
        score: i64,
        code: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(
            self.update_room(id, |room| submit(room, slot, score, code)),
        ))
    }

    fn finish_room(
        &self,
        id: Uuid,
        request: FinishRoom,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(future::ready(
            self.update_room(id, |room| finish(room, request)),
        ))
    }

    fn watch_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<RoomSnapshots>> {
        let snapshots: RoomSnapshots = match self.inner.rooms.get(&id) {
            Some(cell) => WatchStream::new(cell.changes.subscribe()).map(Ok).boxed(),
            None => stream::once(future::ready(Ok(None))).boxed(),
        };
        Box::pin(future::ready(Ok(snapshots)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

impl PlayerStore for MemoryStore {
    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.players.lock().await.get(&id).cloned()) })
    }

    fn create_player_if_absent(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let mut players = store.inner.players.lock().await;
            let stored = players.entry(player.id.clone()).or_insert(player);
            Ok(stored.clone())
        })
    }

    fn settle_ratings(
        &self,
        room_id: Uuid,
        first: String,
        second: String,
        transform: RatingTransform,
    ) -> BoxFuture<'static, StorageResult<Option<(i64, i64)>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .settle_ratings(room_id, first, second, transform)
                .await
        })
    }
}
