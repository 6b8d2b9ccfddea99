//! Unified server error type.
//!
//! Handlers return `Result<T, ServerError>`; the [`IntoResponse`] impl maps
//! each variant to a status code and a `{"error": "..."}` body. Internal
//! failures are logged in full and reported to the caller generically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rvc_relay_core::{ErrorKind, JobError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A conversion job failed; the message is already caller-safe.
    #[error("{message}")]
    Job { kind: ErrorKind, message: String },

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Job { kind, .. } => match kind {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::ModelNotFound => StatusCode::NOT_FOUND,
                ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::Engine
                | ErrorKind::NoOutputProduced
                | ErrorKind::Delivery
                | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match self {
            ServerError::Job { kind: ErrorKind::Internal, message } => {
                error!(message = %message, "internal job error");
                "internal server error".to_owned()
            }
            ServerError::Job { message, .. } => message,
            ServerError::BadRequest(m) => m,
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<JobError> for ServerError {
    fn from(e: JobError) -> Self {
        ServerError::Job {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}
