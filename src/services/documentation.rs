use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for ChronoCode Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::auth::sign_in,
        crate::routes::players::my_profile,
        crate::routes::matchmaking::find_or_create,
        crate::routes::matchmaking::wait_for_opponent,
        crate::routes::matchmaking::cancel,
        crate::routes::battles::events,
        crate::routes::battles::submit,
        crate::routes::battles::finalize,
        crate::routes::battles::result,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::player::PlayerProfile,
            crate::dto::player::SignInResponse,
            crate::dto::matchmaking::MatchStatus,
            crate::dto::matchmaking::MatchmakingResponse,
            crate::dto::matchmaking::OpponentResponse,
            crate::dto::battle::SubmitRequest,
            crate::dto::battle::SubmitResponse,
            crate::dto::battle::RatingsDto,
            crate::dto::battle::FinalizeResponse,
            crate::dto::battle::BattleResultResponse,
            crate::dto::sse::ProblemEvent,
            crate::dto::sse::StartedEvent,
            crate::dto::sse::TickEvent,
            crate::dto::sse::ScoresEvent,
            crate::dto::sse::EndedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "players", description = "Anonymous identity and profiles"),
        (name = "matchmaking", description = "Find, wait for and cancel battle rooms"),
        (name = "battles", description = "Battle sessions, submissions and results"),
    )
)]
pub struct ApiDoc;
