/// Battle session runtime, submissions and result summaries.
pub mod battle_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Idempotent room finalization and rating settlement.
pub mod finalize_service;
/// Health check service.
pub mod health_service;
/// Room matching, waiting and cancellation.
pub mod matchmaking_service;
/// Anonymous identity and player profiles.
pub mod player_service;
/// Flat rating rule and winner derivation.
pub mod rating;
/// Server-Sent Events framing of battle updates.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
