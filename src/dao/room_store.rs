use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::{
    models::{FinishRoom, JoinRoom, NewRoom, RoomEntity, Slot},
    storage::StorageResult,
};

/// Full-document snapshots of one room; `None` means the room no longer exists.
///
/// Dropping the stream unsubscribes.
pub type RoomSnapshots = BoxStream<'static, StorageResult<Option<RoomEntity>>>;

/// Abstraction over the persistence layer for battle rooms.
///
/// Every mutating operation is a single atomic write guarded on the status it
/// expects; a lost precondition surfaces as [`StorageError::Conflict`].
///
/// [`StorageError::Conflict`]: crate::dao::storage::StorageError::Conflict
pub trait RoomStore: Send + Sync {
    /// Insert a waiting room under a freshly generated id.
    fn create_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>>;

    /// Point read.
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;

    /// Oldest waiting room (by `createdAt`) not created by `exclude_player`.
    fn find_oldest_waiting(
        &self,
        exclude_player: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;

    /// waiting -> ongoing, only while the room is still waiting with no second player.
    fn join_room(&self, id: Uuid, join: JoinRoom) -> BoxFuture<'static, StorageResult<RoomEntity>>;

    /// waiting -> canceled, only by the creator and only while still waiting.
    fn cancel_room(
        &self,
        id: Uuid,
        player1_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>>;

    /// Write the score and code of exactly one slot of an ongoing room.
    fn record_submission(
        &self,
        id: Uuid,
        slot: Slot,
        score: i64,
        code: String,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// ongoing -> finished compare-and-set.
    ///
    /// Returns `true` for the single caller that performed the transition and
    /// `false` when the room was already finished.
    fn finish_room(&self, id: Uuid, finish: FinishRoom) -> BoxFuture<'static, StorageResult<bool>>;

    /// Subscribe to the room. The first item is the current state.
    fn watch_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<RoomSnapshots>>;

    /// Cheap connectivity check.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
