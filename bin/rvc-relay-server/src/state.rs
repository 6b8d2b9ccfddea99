//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use rvc_relay_core::JobOrchestrator;

use crate::config::Config;

#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Owns the model cache, engine handle and delivery policy.
    pub orchestrator: Arc<JobOrchestrator>,
}
