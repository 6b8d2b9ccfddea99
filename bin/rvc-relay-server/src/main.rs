//! rvc-relay-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Build the object stores, engine handle and job orchestrator.
//! 4. Optionally construct the engine before accepting traffic.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use rvc_relay_core::engine::{ApplioEngine, EngineHandle, VoiceEngine};
use rvc_relay_core::store::Stores;
use rvc_relay_core::JobOrchestrator;
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: RVC_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "rvc-relay-server starting");

    // ── 3. Stores, engine, orchestrator ────────────────────────────────────────
    let stores = Stores::from_config(&cfg.relay.store)?;
    let engine_cfg = cfg.relay.engine.clone();
    let engine = Arc::new(EngineHandle::new(move || {
        ApplioEngine::prepare(&engine_cfg).map(|e| Arc::new(e) as Arc<dyn VoiceEngine>)
    }));
    let orchestrator = JobOrchestrator::from_config(&cfg.relay, stores, Arc::clone(&engine));
    info!(
        cache_dir = %cfg.relay.cache_dir.display(),
        versions = ?cfg.relay.model_versions,
        "job orchestrator ready"
    );

    // ── 4. Engine preload ──────────────────────────────────────────────────────
    if cfg.preload_engine {
        match engine.get().await {
            Ok(e) => info!(device = e.device(), "engine preloaded"),
            Err(e) => warn!(error = %e, "engine preload failed; retrying on first job"),
        }
    }

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        orchestrator: Arc::new(orchestrator),
    });
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("rvc-relay-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
