//! Library crate for chronocode-back: coding-battle matchmaking, battle
//! sessions and result settlement, exposed for the binaries and tests.

/// Runtime configuration.
pub mod config;
/// Storage models, store traits and backends.
pub mod dao;
mod dto;
mod error;
/// Identity, problem bank and judge collaborators.
pub mod external;
/// HTTP routers.
pub mod routes;
/// Service layer.
pub mod services;
/// Shared application state and the battle state machine.
pub mod state;
