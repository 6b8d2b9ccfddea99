//! Server configuration, loaded from environment variables at startup.

use rvc_relay_core::config::{env_flag, env_opt, env_or, parse_env};
use rvc_relay_core::RelayConfig;

/// Runtime configuration for rvc-relay-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS origins; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Upper bound for `POST /convert` bodies.
    pub max_body_bytes: usize,

    /// Construct the engine before accepting requests.
    pub preload_engine: bool,

    /// Serve `/api-docs/openapi.json`.
    pub enable_docs: bool,

    pub relay: RelayConfig,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("RVC_BIND", "0.0.0.0:5000"),
            log_level: env_or("RVC_LOG", "info"),
            log_json: env_flag("RVC_LOG_JSON", false),
            cors_allowed_origins: env_opt("RVC_CORS_ORIGINS"),
            max_body_bytes: parse_env("RVC_MAX_BODY_BYTES", 100 * 1024 * 1024),
            preload_engine: env_flag("RVC_PRELOAD_ENGINE", true),
            enable_docs: env_flag("RVC_ENABLE_DOCS", true),
            relay: RelayConfig::from_env(),
        }
    }
}
