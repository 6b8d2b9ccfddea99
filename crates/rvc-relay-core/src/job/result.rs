use serde::Serialize;
use utoipa::ToSchema;

use super::request::ConversionParams;
use crate::error::{ErrorKind, JobError};

/// Successful conversion payload.
///
/// Carries at least one of `audio_base64` and `audio_url`; small outputs may
/// carry both.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversionOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Wall-clock time of the engine call.
    pub duration_ms: u64,
    pub model_id: String,
    pub output_size: u64,
    pub params: ConversionParams,
}

/// Failure payload: `{"error": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionFailure {
    pub error: String,
    #[serde(skip)]
    pub kind: ErrorKind,
}

/// Outcome of a job. The presence of `error` is the only failure signal.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ConversionResult {
    Success(ConversionOutput),
    Failure(ConversionFailure),
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ConversionResult::Success(_) => None,
            ConversionResult::Failure(f) => Some(&f.error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ConversionResult::Success(_) => None,
            ConversionResult::Failure(f) => Some(f.kind),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to encode result: {e}") })
        })
    }
}

impl From<JobError> for ConversionResult {
    fn from(err: JobError) -> Self {
        ConversionResult::Failure(ConversionFailure {
            kind: err.kind(),
            error: err.to_string(),
        })
    }
}

impl From<Result<ConversionOutput, JobError>> for ConversionResult {
    fn from(outcome: Result<ConversionOutput, JobError>) -> Self {
        match outcome {
            Ok(output) => ConversionResult::Success(output),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_serializes_to_a_bare_error_object() {
        let result = ConversionResult::from(JobError::ModelNotFound {
            model_id: "ghost".into(),
        });
        assert_eq!(result.to_json(), json!({ "error": "Model ghost not found" }));
        assert_eq!(result.error_kind(), Some(ErrorKind::ModelNotFound));
    }

    #[test]
    fn success_omits_absent_channels() {
        let result = ConversionResult::Success(ConversionOutput {
            audio_base64: None,
            audio_url: Some("https://b.s3.us-east-1.amazonaws.com/outputs/x.wav".into()),
            duration_ms: 1200,
            model_id: "spb".into(),
            output_size: 6_000_000,
            params: ConversionParams::default(),
        });
        let value = result.to_json();
        assert!(value.get("audio_base64").is_none());
        assert!(value.get("error").is_none());
        assert_eq!(value["params"]["f0_method"], "rmvpe");
        assert_eq!(value["output_size"], 6_000_000);
        assert!(result.is_success());
    }
}
