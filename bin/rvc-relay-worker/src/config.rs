//! Worker configuration, loaded from environment variables at startup.
//!
//! Queue endpoints come from the command line (or their `RUNPOD_*` env
//! fallbacks); everything here is shared by both worker modes.

use rvc_relay_core::config::{env_flag, env_or};
use rvc_relay_core::RelayConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// `tracing` filter string, e.g. `"info"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    pub relay: RelayConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env_or("RVC_LOG", "info"),
            log_json: env_flag("RVC_LOG_JSON", false),
            relay: RelayConfig::from_env(),
        }
    }
}
