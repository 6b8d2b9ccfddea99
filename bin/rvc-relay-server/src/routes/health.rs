//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health), components(schemas(HealthResponse)))]
pub struct HealthApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the engine cannot be constructed.
    pub status: String,
    /// Compute device of the engine, e.g. `cuda:0`.
    pub device: Option<String>,
    pub version: String,
}

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Constructs the engine if nothing has done so yet.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service status and engine device", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let device = match state.orchestrator.engine().get().await {
        Ok(engine) => Some(engine.device().to_owned()),
        Err(e) => {
            warn!(error = %e, "engine unavailable");
            None
        }
    };
    Json(HealthResponse {
        status: if device.is_some() { "ok" } else { "degraded" }.to_owned(),
        device,
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routes::test_support;

    #[tokio::test]
    async fn health_reports_engine_device() {
        let fx = test_support::fixture();
        let Json(body) = get_health(State(fx.state.clone())).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.device.as_deref(), Some("cpu"));
    }

    #[tokio::test]
    async fn health_is_degraded_when_engine_cannot_start() {
        let fx = test_support::fixture_with_broken_engine();
        let Json(body) = get_health(State(fx.state.clone())).await;
        assert_eq!(body.status, "degraded");
        assert!(body.device.is_none());
    }
}
