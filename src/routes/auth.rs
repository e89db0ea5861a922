use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
    routing::post,
};

use crate::{
    dto::player::SignInResponse,
    error::AppError,
    services::player_service,
    state::SharedState,
};

/// Header carrying the caller's user id on authenticated routes.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity resolved by [`require_user`], available as a request extension.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Anonymous sign-in endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/auth/anonymous", post(sign_in))
}

#[utoipa::path(
    post,
    path = "/auth/anonymous",
    tag = "players",
    responses(
        (status = 200, description = "New anonymous identity with its profile", body = SignInResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Issue an anonymous identity and create its profile.
pub async fn sign_in(State(state): State<SharedState>) -> Result<Json<SignInResponse>, AppError> {
    let profile = player_service::sign_in(&state).await?;
    Ok(Json(SignInResponse {
        user_id: profile.id.clone(),
        profile: profile.into(),
    }))
}

/// Resolve `X-User-Id` into a [`CurrentUser`] extension or reject with 401.
pub async fn require_user(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let credential = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok());
    let user_id = player_service::current_user_id(&state, credential)?;
    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
