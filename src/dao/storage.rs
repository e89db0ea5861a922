use std::{error::Error, sync::Arc};

use thiserror::Error;
use uuid::Uuid;

use crate::dao::{models::RoomStatus, player_store::PlayerStore, room_store::RoomStore};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or failed mid-operation; retryable.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A change stream ended without the subscriber asking for it.
    #[error("change stream for room `{id}` closed")]
    StreamClosed { id: Uuid },
    /// A guarded write lost its precondition to a concurrent writer.
    #[error("write conflict: {message}")]
    Conflict { message: String },
    /// The addressed document does not exist.
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    /// The write would move a room status backward or sideways.
    #[error("room status cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: RoomStatus, to: RoomStatus },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        StorageError::Conflict {
            message: message.into(),
        }
    }

    /// Missing room.
    pub fn room_not_found(id: Uuid) -> Self {
        StorageError::NotFound {
            entity: "room",
            id: id.to_string(),
        }
    }

    /// Missing player profile.
    pub fn player_not_found(id: &str) -> Self {
        StorageError::NotFound {
            entity: "player",
            id: id.to_owned(),
        }
    }

    /// Whether the error comes from a lost precondition race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Room and player stores of one backend, installed together.
#[derive(Clone)]
pub struct Backend {
    /// Room documents and their change streams.
    pub rooms: Arc<dyn RoomStore>,
    /// Player profiles and ratings.
    pub players: Arc<dyn PlayerStore>,
}

impl Backend {
    /// Bundle a store implementing both capabilities.
    pub fn new<S>(store: S) -> Self
    where
        S: RoomStore + PlayerStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            rooms: store.clone(),
            players: store,
        }
    }
}
