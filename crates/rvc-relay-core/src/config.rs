//! Core configuration, loaded from environment variables.
//!
//! Every field has a default so a worker boots with no environment set; only
//! credentials and the output bucket are genuinely deployment-specific.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default bucket holding `models/{version}/{model_id}.pth|.index`.
pub const DEFAULT_MODEL_BUCKET: &str = "synthica-rvc-models";

/// Outputs at or above this size are not inlined when an upload succeeded.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 5_000_000;

/// Hard ceiling for inline fallback when remote delivery is unavailable.
pub const DEFAULT_INLINE_FALLBACK_LIMIT: u64 = 20_000_000;

/// Runtime configuration for the orchestration layer.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local model cache directory (default: `/workspace/models`).
    pub cache_dir: PathBuf,
    /// Directory for per-job input/output temp files (default: OS temp dir).
    pub work_dir: PathBuf,
    /// Version prefixes tried in order on a cache miss (default: `v2,v1`).
    pub model_versions: Vec<String>,
    /// See [`DEFAULT_INLINE_THRESHOLD`].
    pub inline_threshold: u64,
    /// See [`DEFAULT_INLINE_FALLBACK_LIMIT`].
    pub inline_fallback_limit: u64,
    /// Overall per-job timeout; `None` disables it.
    pub job_timeout: Option<Duration>,
    /// Key prefix for uploaded results.
    pub output_prefix: String,
    pub store: StoreConfig,
    pub engine: EngineConfig,
}

/// Where model assets come from and where results go.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub model_bucket: String,
    /// `None` means remote delivery is unavailable and results are inlined.
    pub output_bucket: Option<String>,
    pub region: String,
    pub credentials: Option<Credentials>,
    /// S3-compatible endpoint; switches to path-style addressing.
    pub endpoint: Option<String>,
    /// When set, a local directory replaces the remote store entirely.
    pub local_dir: Option<PathBuf>,
}

/// Static object-store credentials.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How to reach the external voice-conversion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine installation root (contains `core.py`).
    pub root: PathBuf,
    /// Interpreter used to drive the engine CLI.
    pub python: String,
    /// Forced compute device; probed when `None`.
    pub device: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/workspace/models"),
            work_dir: std::env::temp_dir(),
            model_versions: vec!["v2".to_owned(), "v1".to_owned()],
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            inline_fallback_limit: DEFAULT_INLINE_FALLBACK_LIMIT,
            job_timeout: Some(Duration::from_secs(600)),
            output_prefix: "outputs".to_owned(),
            store: StoreConfig {
                model_bucket: DEFAULT_MODEL_BUCKET.to_owned(),
                output_bucket: None,
                region: "us-east-1".to_owned(),
                credentials: None,
                endpoint: None,
                local_dir: None,
            },
            engine: EngineConfig {
                root: PathBuf::from("/workspace/Applio"),
                python: "python3".to_owned(),
                device: None,
            },
        }
    }
}

impl RelayConfig {
    /// Build [`RelayConfig`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let credentials = match (
            env_opt("AWS_ACCESS_KEY_ID"),
            env_opt("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: env_opt("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };

        let model_versions = env_opt("RVC_MODEL_VERSIONS")
            .map(|v| parse_list(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.model_versions);

        let job_timeout = match parse_env("RVC_JOB_TIMEOUT_SECS", 600u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            cache_dir: env_opt("RVC_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            work_dir: env_opt("RVC_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            model_versions,
            inline_threshold: parse_env("RVC_INLINE_THRESHOLD", DEFAULT_INLINE_THRESHOLD),
            inline_fallback_limit: parse_env(
                "RVC_INLINE_FALLBACK_LIMIT",
                DEFAULT_INLINE_FALLBACK_LIMIT,
            ),
            job_timeout,
            output_prefix: env_or("RVC_OUTPUT_PREFIX", &defaults.output_prefix),
            store: StoreConfig {
                model_bucket: env_or("S3_BUCKET", DEFAULT_MODEL_BUCKET),
                output_bucket: env_opt("OUTPUT_BUCKET"),
                region: env_or("AWS_REGION", &defaults.store.region),
                credentials,
                endpoint: env_opt("RVC_S3_ENDPOINT"),
                local_dir: env_opt("RVC_STORE_DIR").map(PathBuf::from),
            },
            engine: EngineConfig {
                root: env_opt("RVC_ENGINE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.engine.root),
                python: env_or("RVC_ENGINE_PYTHON", &defaults.engine.python),
                device: env_opt("RVC_DEVICE"),
            },
        }
    }
}

// ── env helpers ─────────────────────────────────────────────────────────────

/// Read `key`, treating unset and blank values alike.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_owned())
}

pub fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// `"1"`, `"true"`, `"yes"` (any case) are true; anything else is `default`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_list_skips_blanks() {
        assert_eq!(parse_list(" v3, ,v2,v1 "), vec!["v3", "v2", "v1"]);
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn defaults_match_store_conventions() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.model_versions, vec!["v2", "v1"]);
        assert_eq!(cfg.inline_threshold, 5_000_000);
        assert_eq!(cfg.store.model_bucket, "synthica-rvc-models");
        assert!(cfg.store.output_bucket.is_none());
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "super-secret".into(),
            session_token: Some("token".into()),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
