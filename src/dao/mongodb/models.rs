use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{PlayerEntity, RoomEntity, RoomStatus, Slot};

/// Persisted layout of a battle room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: String,
    status: RoomStatus,
    player1_uid: String,
    #[serde(rename = "player1_displayName")]
    player1_display_name: Option<String>,
    player2_uid: Option<String>,
    #[serde(rename = "player2_displayName")]
    player2_display_name: Option<String>,
    #[serde(rename = "problemId")]
    problem_id: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime>,
    #[serde(default)]
    player1_score: i64,
    #[serde(default)]
    player2_score: i64,
    player1_submission: Option<String>,
    player2_submission: Option<String>,
    winner_uid: Option<String>,
    #[serde(rename = "ratingsSettled", default)]
    ratings_settled: bool,
}

impl From<&RoomEntity> for MongoRoomDocument {
    fn from(value: &RoomEntity) -> Self {
        Self {
            id: value.id.to_string(),
            status: value.status,
            player1_uid: value.player1_id.clone(),
            player1_display_name: value.player1_name.clone(),
            player2_uid: value.player2_id.clone(),
            player2_display_name: value.player2_name.clone(),
            problem_id: value.problem_id.clone(),
            created_at: DateTime::from_system_time(value.created_at),
            start_time: value.start_time.map(DateTime::from_system_time),
            end_time: value.end_time.map(DateTime::from_system_time),
            player1_score: value.player1_score,
            player2_score: value.player2_score,
            player1_submission: value.player1_submission.clone(),
            player2_submission: value.player2_submission.clone(),
            winner_uid: value.winner_id.clone(),
            ratings_settled: value.ratings_settled,
        }
    }
}

impl TryFrom<MongoRoomDocument> for RoomEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoRoomDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|source| MongoDaoError::CorruptRoom {
            id: value.id.clone(),
            source,
        })?;

        Ok(Self {
            id,
            status: value.status,
            player1_id: value.player1_uid,
            player1_name: value.player1_display_name,
            player2_id: value.player2_uid,
            player2_name: value.player2_display_name,
            problem_id: value.problem_id,
            created_at: value.created_at.to_system_time(),
            start_time: value.start_time.map(DateTime::to_system_time),
            end_time: value.end_time.map(DateTime::to_system_time),
            player1_score: value.player1_score,
            player2_score: value.player2_score,
            player1_submission: value.player1_submission,
            player2_submission: value.player2_submission,
            winner_id: value.winner_uid,
            ratings_settled: value.ratings_settled,
        })
    }
}

/// Persisted layout of a player profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    rating: Option<i64>,
    #[serde(rename = "createdAt")]
    created_at: DateTime,
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            rating: value.rating,
            created_at: value.created_at.to_system_time(),
        }
    }
}

/// Fields written when a profile is inserted for the first time.
pub fn player_insert_fields(player: &PlayerEntity) -> Document {
    doc! {
        "displayName": player.display_name.clone(),
        "rating": player.rating,
        "createdAt": DateTime::from_system_time(player.created_at),
    }
}

/// Score and submission field names owned by `slot`.
pub fn slot_fields(slot: Slot) -> (&'static str, &'static str) {
    match slot {
        Slot::Player1 => ("player1_score", "player1_submission"),
        Slot::Player2 => ("player2_score", "player2_submission"),
    }
}

pub fn room_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}
