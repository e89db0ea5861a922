use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{models::PlayerEntity, storage::StorageResult};

/// Pure function from the two current ratings to the two new ratings.
///
/// Backends may invoke it more than once when a transaction is retried.
pub type RatingTransform = Arc<dyn Fn(i64, i64) -> (i64, i64) + Send + Sync>;

/// Abstraction over the persistence layer for player profiles.
pub trait PlayerStore: Send + Sync {
    /// Point read.
    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// Insert `player` unless a profile already exists; returns the stored profile.
    fn create_player_if_absent(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>>;

    /// Settle the ratings of finished room `room_id`.
    ///
    /// In one atomic write: read both ratings, apply `transform`, store both
    /// results and mark the room's ratings as settled. Returns `None` when the
    /// room is not finished or was already settled, in which case nothing is
    /// written. Fails with `NotFound` when either profile is missing.
    fn settle_ratings(
        &self,
        room_id: Uuid,
        first: String,
        second: String,
        transform: RatingTransform,
    ) -> BoxFuture<'static, StorageResult<Option<(i64, i64)>>>;
}
