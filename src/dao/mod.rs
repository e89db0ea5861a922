/// In-process storage backend.
pub mod memory;
/// Database model definitions.
pub mod models;
/// MongoDB storage backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;
/// Player profile and rating persistence.
pub mod player_store;
/// Battle room persistence and change streams.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
