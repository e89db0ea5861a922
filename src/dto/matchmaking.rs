//! Matchmaking request/response payloads.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::matchmaking_service::{MatchRole, MatchTicket};

/// Whether the caller got an opponent straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// A new room was created; poll `/matchmaking/{room_id}/wait`.
    Waiting,
    /// An existing room was joined; the battle is running.
    Matched,
}

/// Outcome of `POST /matchmaking`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchmakingResponse {
    pub room_id: Uuid,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent_name: Option<String>,
    pub problem_id: String,
}

impl From<MatchTicket> for MatchmakingResponse {
    fn from(value: MatchTicket) -> Self {
        let status = match value.role {
            MatchRole::Created => MatchStatus::Waiting,
            MatchRole::Joined => MatchStatus::Matched,
        };
        Self {
            room_id: value.room_id,
            status,
            opponent_name: value.opponent_name,
            problem_id: value.problem_id,
        }
    }
}

/// Opponent found while waiting in a created room.
#[derive(Debug, Serialize, ToSchema)]
pub struct OpponentResponse {
    pub room_id: Uuid,
    pub opponent_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_tickets_are_waiting() {
        let ticket = MatchTicket {
            room_id: Uuid::nil(),
            role: MatchRole::Created,
            opponent_name: None,
            problem_id: "problem_2".into(),
        };
        let json = serde_json::to_value(MatchmakingResponse::from(ticket)).unwrap();
        assert_eq!(json["status"], "waiting");
        assert!(json.get("opponent_name").is_none());
    }
}
