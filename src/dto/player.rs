//! Player identity and profile payloads.

use serde::Serialize;
use utoipa::ToSchema;

use crate::{dao::models::PlayerEntity, dto::format_system_time};

/// Profile of a signed-in player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerProfile {
    pub id: String,
    /// Stored display name, absent when the player never picked one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub rating: i64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl From<PlayerEntity> for PlayerProfile {
    fn from(value: PlayerEntity) -> Self {
        Self {
            rating: value.rating_or_default(),
            created_at: format_system_time(value.created_at),
            id: value.id,
            display_name: value.display_name,
        }
    }
}

/// Returned by anonymous sign-in.
///
/// `user_id` is the credential to echo back in the `X-User-Id` header.
#[derive(Debug, Serialize, ToSchema)]
pub struct SignInResponse {
    pub user_id: String,
    pub profile: PlayerProfile,
}
