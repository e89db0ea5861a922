use axum::Router;

use crate::state::SharedState;

pub mod auth;
pub mod battles;
pub mod docs;
pub mod health;
pub mod matchmaking;
pub mod players;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(auth::router())
        .merge(players::router(state.clone()))
        .merge(matchmaking::router(state.clone()))
        .merge(battles::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
