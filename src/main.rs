//! ChronoCode Back binary entrypoint wiring storage, collaborators, REST and SSE layers.

use std::{env, net::SocketAddr};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronocode_back::{
    config::AppConfig,
    dao::{memory::MemoryStore, storage::Backend},
    external::Collaborators,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let collaborators =
        Collaborators::from_config(&config).context("building external collaborators")?;
    let app_state = AppState::new(config, collaborators);

    start_storage(app_state.clone()).await?;
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise install the in-memory backend.
async fn start_storage(state: SharedState) -> anyhow::Result<()> {
    #[cfg(feature = "mongo-store")]
    if env::var_os("MONGO_URI").is_some() {
        use chronocode_back::{
            dao::{
                mongodb::{MongoConfig, MongoStore},
                storage::StorageError,
            },
            services::storage_supervisor,
        };

        let mongo = MongoConfig::from_env()
            .await
            .context("reading MongoDB settings")?;
        info!(database = %mongo.database_name, "supervising MongoDB storage");
        tokio::spawn(storage_supervisor::run(state, move || {
            let mongo = mongo.clone();
            async move {
                MongoStore::connect(mongo)
                    .await
                    .map(Backend::new)
                    .map_err(StorageError::from)
            }
        }));
        return Ok(());
    }

    info!("MONGO_URI not set; using in-memory storage");
    state.install_backend(Backend::new(MemoryStore::new())).await;
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
