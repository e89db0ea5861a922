use std::convert::Infallible;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::battle::{BattleResultResponse, FinalizeResponse, SubmitRequest, SubmitResponse},
    error::AppError,
    routes::auth::{CurrentUser, require_user},
    services::{battle_service, finalize_service, sse_service},
    state::SharedState,
};

/// Battle session endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/battles/{room_id}/events", get(events))
        .route("/battles/{room_id}/submissions", post(submit))
        .route("/battles/{room_id}/finalize", post(finalize))
        .route("/battles/{room_id}/result", get(result))
        .route_layer(middleware::from_fn_with_state(state, require_user))
}

#[utoipa::path(
    get,
    path = "/battles/{room_id}/events",
    tag = "battles",
    params(
        ("room_id" = Uuid, Path, description = "Room the caller plays in"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    responses(
        (status = 200, description = "Battle session events", content_type = "text/event-stream", body = String),
        (status = 401, description = "Caller is not a player of this room"),
        (status = 404, description = "Room not found")
    )
)]
/// Start the caller's battle session and stream its updates.
///
/// Closing the stream ends the session.
pub async fn events(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session = battle_service::open_session(&state, room_id, &user_id).await?;
    info!(room_id = %room_id, user_id = %user_id, "battle SSE connection");
    Ok(sse_service::battle_stream(session))
}

#[utoipa::path(
    post,
    path = "/battles/{room_id}/submissions",
    tag = "battles",
    params(
        ("room_id" = Uuid, Path, description = "Room the caller plays in"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Submission scored and recorded", body = SubmitResponse),
        (status = 409, description = "No running battle session for the caller")
    )
)]
/// Score the code and record it in the caller's slot.
pub async fn submit(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitRequest>>,
) -> Result<Json<SubmitResponse>, AppError> {
    let score = battle_service::submit(&state, room_id, &user_id, payload.code).await?;
    Ok(Json(SubmitResponse { score }))
}

#[utoipa::path(
    post,
    path = "/battles/{room_id}/finalize",
    tag = "battles",
    params(
        ("room_id" = Uuid, Path, description = "Room to settle"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    responses(
        (status = 200, description = "Finalize outcome", body = FinalizeResponse),
        (status = 401, description = "Caller is not a player in the room"),
        (status = 404, description = "Room not found"),
        (status = 409, description = "Battle deadline has not passed yet")
    )
)]
/// Idempotently finish the room and settle ratings once the deadline has passed.
pub async fn finalize(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<FinalizeResponse>, AppError> {
    info!(room_id = %room_id, user_id = %user_id, "explicit finalize requested");
    let outcome = finalize_service::finalize(&state, room_id, &user_id).await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    get,
    path = "/battles/{room_id}/result",
    tag = "battles",
    params(
        ("room_id" = Uuid, Path, description = "Room the caller played in"),
        ("X-User-Id" = String, Header, description = "User id issued by /auth/anonymous")
    ),
    responses(
        (status = 200, description = "Result for the caller", body = BattleResultResponse),
        (status = 409, description = "Battle still running")
    )
)]
/// Result headline and score details for the caller.
pub async fn result(
    State(state): State<SharedState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<BattleResultResponse>, AppError> {
    let summary = battle_service::result_for(&state, room_id, &user_id).await?;
    Ok(Json(summary.into()))
}
