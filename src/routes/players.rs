use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::get,
};

use crate::{
    dto::player::PlayerProfile,
    error::AppError,
    routes::auth::{CurrentUser, require_user},
    services::player_service,
    state::SharedState,
};

/// Profile endpoints for the signed-in player.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/players/me", get(my_profile))
        .route_layer(middleware::from_fn_with_state(state, require_user))
}

#[utoipa::path(
    get,
    path = "/players/me",
    tag = "players",
    params(("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")),
    responses(
        (status = 200, description = "Caller's profile", body = PlayerProfile),
        (status = 401, description = "Missing or unknown user id")
    )
)]
/// Profile of the caller, created on first access.
pub async fn my_profile(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<PlayerProfile>, AppError> {
    let profile = player_service::get_profile(&state, &user_id).await?;
    Ok(Json(profile.into()))
}
