//! Axum router construction.
//!
//! [`build`] assembles the application router:
//! - Middleware layers (CORS, per-request trace-ID span)
//! - `GET /health`, `GET /models`, `POST /convert`
//! - Optional OpenAPI document (disable with `RVC_ENABLE_DOCS=false`)

mod convert;
pub mod doc;
mod health;
mod models;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .merge(models::router())
        .merge(convert::router(state.config.max_body_bytes));

    if state.config.enable_docs {
        app = app.route("/api-docs/openapi.json", get(doc::openapi_json));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(state.config.cors_allowed_origins.as_deref()))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;

    use rvc_relay_core::config::RelayConfig;
    use rvc_relay_core::engine::{ConversionCall, EngineHandle, VoiceEngine};
    use rvc_relay_core::store::{FsStore, ObjectStore, Stores};
    use rvc_relay_core::{EngineError, JobOrchestrator};
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::state::AppState;

    /// Writes a fixed payload as conversion output.
    pub struct StubEngine;

    impl VoiceEngine for StubEngine {
        fn device(&self) -> &str {
            "cpu"
        }

        fn convert(&self, call: &ConversionCall) -> Result<Option<PathBuf>, EngineError> {
            std::fs::write(&call.output_path, b"converted-wav").map_err(EngineError::Spawn)?;
            Ok(None)
        }
    }

    pub struct Fixture {
        pub root: TempDir,
        pub state: Arc<AppState>,
    }

    impl Fixture {
        pub fn cache_dir(&self) -> PathBuf {
            self.root.path().join("cache")
        }

        pub fn publish(&self, model_id: &str) {
            let dir = self.root.path().join("remote/models/v2");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{model_id}.pth")), b"weights").unwrap();
        }
    }

    fn build(engine: EngineHandle) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let relay = RelayConfig {
            cache_dir: root.path().join("cache"),
            work_dir: root.path().join("work"),
            ..RelayConfig::default()
        };
        let stores = Stores {
            models: Arc::new(FsStore::new(root.path().join("remote"))) as Arc<dyn ObjectStore>,
            outputs: None,
        };
        let orchestrator = JobOrchestrator::from_config(&relay, stores, Arc::new(engine));
        let config = Config {
            bind_address: "127.0.0.1:0".into(),
            log_level: "info".into(),
            log_json: false,
            cors_allowed_origins: None,
            max_body_bytes: 1024 * 1024,
            preload_engine: false,
            enable_docs: true,
            relay,
        };
        let state = Arc::new(AppState {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
        });
        Fixture { root, state }
    }

    pub fn fixture() -> Fixture {
        build(EngineHandle::with_engine(Arc::new(StubEngine)))
    }

    pub fn fixture_with_broken_engine() -> Fixture {
        build(EngineHandle::new(|| {
            Err::<Arc<dyn VoiceEngine>, _>(EngineError::Construction("no device".into()))
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let trace = resp
            .headers()
            .get(trace::X_TRACE_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body, trace)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::post("/convert")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn convert_returns_inline_audio_with_success_flag() {
        let fx = test_support::fixture();
        fx.publish("spb");
        let app = build(fx.state.clone());

        let (status, body, trace) = call(
            app,
            post_json(json!({ "audio_base64": "UklGRg==", "model_id": "spb", "pitch": 2 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["audio_base64"], "Y29udmVydGVkLXdhdg==");
        assert_eq!(body["model_id"], "spb");
        assert_eq!(body["params"]["pitch"], 2);
        assert!(trace.is_some());
    }

    #[tokio::test]
    async fn convert_maps_errors_to_status_codes() {
        let fx = test_support::fixture();
        let app = build(fx.state.clone());

        let (status, body, _) = call(app.clone(), post_json(json!({ "model_id": "spb" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "audio_base64 is required" }));

        let (status, body, _) = call(
            app.clone(),
            post_json(json!({ "audio_base64": "UklGRg==", "model_id": "nobody" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Model nobody not found");

        let malformed = Request::post("/convert")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body, _) = call(app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn trace_id_is_echoed() {
        let fx = test_support::fixture();
        let app = build(fx.state.clone());
        let id = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
        let req = Request::get("/health")
            .header(trace::X_TRACE_ID, id)
            .body(Body::empty())
            .unwrap();
        let (status, body, trace) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"], "cpu");
        assert_eq!(trace.as_deref(), Some(id));
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let fx = test_support::fixture();
        let app = build(fx.state.clone());
        let req = Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap();
        let (status, body, _) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/convert"].is_object());
    }
}
