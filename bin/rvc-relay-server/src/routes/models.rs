//! Cached-model listing.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rvc_relay_core::CachedModel;
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_models), components(schemas(ModelList, CachedModel)))]
pub struct ModelsApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct ModelList {
    pub models: Vec<CachedModel>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

/// Models present in the local cache (`GET /models`).
///
/// Only reports what is on disk; models still in the store are fetched on
/// first use.
#[utoipa::path(
    get,
    path = "/models",
    tag = "models",
    responses(
        (status = 200, description = "Locally cached models", body = ModelList),
        (status = 500, description = "Cache directory unreadable"),
    )
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelList>, ServerError> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let models = tokio::task::spawn_blocking(move || orchestrator.cache().list())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(Json(ModelList { models }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routes::test_support;

    #[tokio::test]
    async fn lists_cached_models_only() {
        let fx = test_support::fixture();
        std::fs::create_dir_all(fx.cache_dir()).unwrap();
        std::fs::write(fx.cache_dir().join("kj_yesudas.pth"), b"w").unwrap();
        std::fs::write(fx.cache_dir().join("kj_yesudas.index"), b"i").unwrap();

        let Json(list) = list_models(State(fx.state.clone())).await.unwrap();
        assert_eq!(list.models.len(), 1);
        assert_eq!(list.models[0].id, "kj_yesudas");
        assert_eq!(list.models[0].name, "Kj Yesudas");
        assert!(list.models[0].has_index);
    }
}
