//! Application state.

use mobilize_config::OrchestratorSettings;
use mobilize_core::Collaborators;
use mobilize_db::JobStore;
use mobilize_orchestrator::{IdempotencyGuard, Orchestrator, StatusService};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub guard: Arc<IdempotencyGuard>,
    pub status: StatusService,
    pub orchestrator: Arc<Orchestrator>,
    pub collaborators: Collaborators,
    /// Shared secret the compile service signs callbacks with.
    pub callback_secret: Option<String>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        let guard = Arc::new(IdempotencyGuard::new(
            store.clone(),
            settings.freshness_window,
        ));
        let status = StatusService::new(store.clone());
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), &collaborators, settings));

        Self {
            store,
            guard,
            status,
            orchestrator,
            collaborators,
            callback_secret: None,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn with_callback_secret(mut self, secret: Option<String>) -> Self {
        self.callback_secret = secret;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}
