//! Battle submission and result payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::{battle_service::ResultSummary, finalize_service::FinalizeOutcome};

/// Code submitted during a running battle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 100000))]
    pub code: String,
}

/// Score assigned by the judge.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub score: i64,
}

/// Ratings after a settled battle.
#[derive(Debug, Serialize, ToSchema)]
pub struct RatingsDto {
    pub player1: i64,
    pub player2: i64,
}

/// What an explicit finalize request did.
#[derive(Debug, Serialize, ToSchema)]
pub struct FinalizeResponse {
    /// `applied`, `already_finalized`, `lost_race` or `not_started`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratings: Option<RatingsDto>,
}

impl From<FinalizeOutcome> for FinalizeResponse {
    fn from(value: FinalizeOutcome) -> Self {
        let outcome = |name: &str| Self {
            outcome: name.to_owned(),
            winner_id: None,
            ratings: None,
        };
        match value {
            FinalizeOutcome::Applied { winner_id, ratings } => Self {
                outcome: "applied".into(),
                winner_id,
                ratings: ratings.map(|(player1, player2)| RatingsDto { player1, player2 }),
            },
            FinalizeOutcome::AlreadyFinalized => outcome("already_finalized"),
            FinalizeOutcome::LostRace => outcome("lost_race"),
            FinalizeOutcome::NotStarted => outcome("not_started"),
        }
    }
}

/// Result screen of a settled battle.
#[derive(Debug, Serialize, ToSchema)]
pub struct BattleResultResponse {
    pub headline: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
}

impl From<ResultSummary> for BattleResultResponse {
    fn from(value: ResultSummary) -> Self {
        Self {
            headline: value.headline,
            details: value.details,
            winner_id: value.winner_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_oversized_code_is_rejected() {
        assert!(SubmitRequest { code: String::new() }.validate().is_err());
        assert!(SubmitRequest { code: "x".repeat(100_001) }.validate().is_err());
        assert!(SubmitRequest { code: "fn main() {}".into() }.validate().is_ok());
    }

    #[test]
    fn applied_outcome_carries_ratings() {
        let response = FinalizeResponse::from(FinalizeOutcome::Applied {
            winner_id: Some("alice".into()),
            ratings: Some((1015, 985)),
        });
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["ratings"]["player2"], 985);

        let json = serde_json::to_value(FinalizeResponse::from(FinalizeOutcome::LostRace)).unwrap();
        assert_eq!(json["outcome"], "lost_race");
        assert!(json.get("winner_id").is_none());
    }
}
