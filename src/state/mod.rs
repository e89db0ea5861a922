pub mod battle;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::{
    sync::{RwLock, watch},
    task::AbortHandle,
};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::storage::Backend, error::ServiceError, external::Collaborators,
    services::battle_service::SessionCommands,
};

pub type SharedState = Arc<AppState>;

/// Registry key: one live session per user per room.
pub type SessionKey = (Uuid, String);

/// Registry entry pointing at a running battle session.
#[derive(Clone)]
pub struct SessionEntry {
    /// Distinguishes successive sessions under the same key.
    pub id: Uuid,
    /// Command channel of the session task.
    pub commands: SessionCommands,
    /// Abort handle of the session task, used when a newer session replaces it.
    pub abort: AbortHandle,
}

/// Central application state: storage handles, collaborators and live sessions.
pub struct AppState {
    backend: RwLock<Option<Backend>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    collaborators: Collaborators,
    sessions: DashMap<SessionKey, SessionEntry>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, collaborators: Collaborators) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            backend: RwLock::new(None),
            degraded: degraded_tx,
            config,
            collaborators,
            sessions: DashMap::new(),
        })
    }

    /// Obtain a handle to the current backend, if one is installed.
    pub async fn backend(&self) -> Option<Backend> {
        let guard = self.backend.read().await;
        guard.as_ref().cloned()
    }

    /// Current backend or [`ServiceError::Degraded`].
    pub async fn require_backend(&self) -> Result<Backend, ServiceError> {
        self.backend().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new backend and leave degraded mode.
    pub async fn install_backend(&self, backend: Backend) {
        {
            let mut guard = self.backend.write().await;
            *guard = Some(backend);
        }
        self.update_degraded(false);
    }

    /// Remove the current backend and enter degraded mode.
    pub async fn clear_backend(&self) {
        {
            let mut guard = self.backend.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.backend.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// External collaborators.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Live battle sessions keyed by room and user.
    pub fn sessions(&self) -> &DashMap<SessionKey, SessionEntry> {
        &self.sessions
    }

    /// Broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::memory::MemoryStore;

    #[tokio::test]
    async fn degraded_until_backend_installed() {
        let config = AppConfig::default();
        let collaborators = Collaborators::local(&config);
        let state = AppState::new(config, collaborators);
        let mut watcher = state.degraded_watcher();

        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_backend().await,
            Err(ServiceError::Degraded)
        ));

        state.install_backend(Backend::new(MemoryStore::new())).await;
        assert!(!state.is_degraded().await);
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        state.clear_backend().await;
        assert!(state.is_degraded().await);
        assert!(*watcher.borrow_and_update());
    }
}
