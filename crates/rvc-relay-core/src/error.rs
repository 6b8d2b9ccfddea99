use std::time::Duration;

use thiserror::Error;

/// Errors produced by an [`ObjectStore`](crate::store::ObjectStore) backend.
///
/// A missing object is not an error: `get_object` reports it as `Ok(false)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The HTTP request itself failed (DNS, TLS, connection reset, ...).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status other than 404.
    #[error("store returned status {status} for '{key}'")]
    Status { status: u16, key: String },

    /// A filesystem I/O error while streaming an object to or from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key cannot be mapped onto the store (empty, `..` components, ...).
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// The configured endpoint URL could not be parsed.
    #[error("invalid store endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },
}

/// Errors raised by the inference engine or while constructing it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One-time engine construction failed; the next job retries it.
    #[error("engine construction failed: {0}")]
    Construction(String),

    /// The engine process could not be launched.
    #[error("failed to launch engine process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine ran and reported failure.
    #[error("engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The engine rejected the call without running (bad parameters, missing model, ...).
    #[error("{0}")]
    Rejected(String),

    /// The blocking task driving the engine panicked.
    #[error("engine call panicked")]
    Panicked,
}

/// Everything that can make a conversion job fail.
///
/// The orchestrator catches every variant at its boundary and turns it into a
/// `{"error": ...}` result; nothing escapes to the caller as a fault.
#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or malformed input. Never retried.
    #[error("{0}")]
    Validation(String),

    /// No configured store version holds the requested model.
    #[error("Model {model_id} not found")]
    ModelNotFound { model_id: String },

    /// The conversion call failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The engine returned without error but left no usable output file.
    #[error("{0}")]
    NoOutputProduced(String),

    /// Neither inline nor remote delivery was possible.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The caller-imposed job timeout fired.
    #[error("job timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// Local I/O fault unrelated to the request (temp dir not writable, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`JobError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    Validation,
    ModelNotFound,
    Engine,
    NoOutputProduced,
    Delivery,
    TimedOut,
    #[default]
    Internal,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Validation(_) => ErrorKind::Validation,
            JobError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            JobError::Engine(_) => ErrorKind::Engine,
            JobError::NoOutputProduced(_) => ErrorKind::NoOutputProduced,
            JobError::Delivery(_) => ErrorKind::Delivery,
            JobError::TimedOut(_) => ErrorKind::TimedOut,
            JobError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` when the failure is attributable to the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::ModelNotFound)
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Internal(e.to_string())
    }
}
