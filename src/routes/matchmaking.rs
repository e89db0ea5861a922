use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::matchmaking::{MatchmakingResponse, OpponentResponse},
    error::AppError,
    routes::auth::{CurrentUser, require_user},
    services::matchmaking_service,
    state::SharedState,
};

/// How long one wait request blocks before answering 503; the client may retry.
const OPPONENT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Matchmaking endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/matchmaking", post(find_or_create))
        .route("/matchmaking/{room_id}/wait", get(wait_for_opponent))
        .route("/matchmaking/{room_id}/cancel", post(cancel))
        .route_layer(middleware::from_fn_with_state(state, require_user))
}

#[utoipa::path(
    post,
    path = "/matchmaking",
    tag = "matchmaking",
    params(("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")),
    responses(
        (status = 200, description = "Joined a waiting room or created a new one", body = MatchmakingResponse),
        (status = 409, description = "Every join attempt lost its race")
    )
)]
/// Join the oldest waiting room of another player, or create one.
pub async fn find_or_create(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<MatchmakingResponse>, AppError> {
    let ticket = matchmaking_service::find_or_create_room(&state, &user_id).await?;
    Ok(Json(ticket.into()))
}

#[utoipa::path(
    get,
    path = "/matchmaking/{room_id}/wait",
    tag = "matchmaking",
    params(
        ("room_id" = Uuid, Path, description = "Room created by the caller"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    responses(
        (status = 200, description = "An opponent joined", body = OpponentResponse),
        (status = 410, description = "Room canceled, finished or removed"),
        (status = 503, description = "No opponent yet; wait again")
    )
)]
/// Block until an opponent joins the caller's room.
///
/// Dropping the request cancels the room.
pub async fn wait_for_opponent(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<OpponentResponse>, AppError> {
    let opponent_name =
        matchmaking_service::wait_or_cancel(&state, room_id, &user_id, OPPONENT_WAIT_TIMEOUT)
            .await?;
    Ok(Json(OpponentResponse {
        room_id,
        opponent_name,
    }))
}

#[utoipa::path(
    post,
    path = "/matchmaking/{room_id}/cancel",
    tag = "matchmaking",
    params(
        ("room_id" = Uuid, Path, description = "Room created by the caller"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    responses(
        (status = 204, description = "Room canceled"),
        (status = 409, description = "Room is no longer waiting or belongs to someone else")
    )
)]
/// Cancel the caller's waiting room.
pub async fn cancel(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    matchmaking_service::cancel_waiting_room(&state, room_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
