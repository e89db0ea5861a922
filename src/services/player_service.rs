use std::time::SystemTime;

use tracing::{debug, info};

use crate::{
    dao::{
        models::{PlayerEntity, Slot},
        storage::Backend,
    },
    error::ServiceError,
    state::SharedState,
};

const GENERATED_NAME_PREFIX: &str = "User_";
const GENERATED_NAME_ID_CHARS: usize = 6;

/// Issue an anonymous identity and make sure its profile exists.
pub async fn sign_in(state: &SharedState) -> Result<PlayerEntity, ServiceError> {
    let backend = state.require_backend().await?;
    let user_id = state.collaborators().identity.sign_in().await?;
    let profile = ensure_profile(&backend, &user_id).await?;
    info!(user_id = %user_id, "anonymous sign-in");
    Ok(profile)
}

/// Map a request credential to a user id.
pub fn current_user_id(state: &SharedState, credential: Option<&str>) -> Result<String, ServiceError> {
    let credential =
        credential.ok_or_else(|| ServiceError::Unauthorized("no signed-in user".into()))?;
    state
        .collaborators()
        .identity
        .resolve(credential)
        .ok_or_else(|| ServiceError::Unauthorized("unknown user credential".into()))
}

/// Profile of `user_id`, created on the fly when missing.
pub async fn get_profile(state: &SharedState, user_id: &str) -> Result<PlayerEntity, ServiceError> {
    let backend = state.require_backend().await?;
    ensure_profile(&backend, user_id).await
}

/// Create the profile of `user_id` unless it exists; returns the stored profile.
pub async fn ensure_profile(backend: &Backend, user_id: &str) -> Result<PlayerEntity, ServiceError> {
    if let Some(existing) = backend.players.find_player(user_id.to_owned()).await? {
        return Ok(existing);
    }

    let profile = PlayerEntity::new(
        user_id.to_owned(),
        generated_display_name(user_id),
        SystemTime::now(),
    );
    debug!(user_id, "creating player profile");
    Ok(backend.players.create_player_if_absent(profile).await?)
}

/// Display name stored for `user_id`, or the default name of `slot`.
///
/// A missing profile is created, but this call still answers with the default.
pub async fn display_name_for(
    backend: &Backend,
    user_id: &str,
    slot: Slot,
) -> Result<String, ServiceError> {
    let stored = match backend.players.find_player(user_id.to_owned()).await? {
        Some(profile) => profile.display_name,
        None => {
            ensure_profile(backend, user_id).await?;
            None
        }
    };
    Ok(stored
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| slot.default_name().to_owned()))
}

/// `User_` followed by the first characters of the id.
pub fn generated_display_name(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(GENERATED_NAME_ID_CHARS).collect();
    format!("{GENERATED_NAME_PREFIX}{prefix}")
}
