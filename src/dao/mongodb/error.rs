use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to create room `{id}`")]
    CreateRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to update room `{id}`")]
    UpdateRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query waiting rooms")]
    QueryRooms {
        #[source]
        source: MongoError,
    },
    #[error("change stream for room `{id}` failed")]
    WatchRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("room document `{id}` carries an invalid identifier")]
    CorruptRoom {
        id: String,
        #[source]
        source: uuid::Error,
    },
    #[error("failed to load player `{id}`")]
    LoadPlayer {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save player `{id}`")]
    SavePlayer {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("rating transaction failed")]
    RatingTransaction {
        #[source]
        source: MongoError,
    },
}
