//! Loosely-typed job input to a validated [`ConversionRequest`].
//!
//! Job payloads arrive as arbitrary JSON from two transports. Numeric fields
//! accept numbers or numeric strings, absent or `null` fields take their
//! defaults, and values are passed through without range clamping.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::cache::validate_model_id;
use crate::error::JobError;

pub const DEFAULT_MODEL_ID: &str = "spb";

/// Pitch extraction algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum F0Method {
    #[default]
    Rmvpe,
    Fcpe,
    Crepe,
    CrepeTiny,
}

impl F0Method {
    pub fn as_str(self) -> &'static str {
        match self {
            F0Method::Rmvpe => "rmvpe",
            F0Method::Fcpe => "fcpe",
            F0Method::Crepe => "crepe",
            F0Method::CrepeTiny => "crepe-tiny",
        }
    }

    /// Unknown names fall back to [`F0Method::Rmvpe`].
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim() {
            "rmvpe" => F0Method::Rmvpe,
            "fcpe" => F0Method::Fcpe,
            "crepe" => F0Method::Crepe,
            "crepe-tiny" => F0Method::CrepeTiny,
            _ => F0Method::Rmvpe,
        }
    }
}

impl std::fmt::Display for F0Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion parameters, echoed back in successful results.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConversionParams {
    /// Semitones; nominally -12..12.
    pub pitch: i64,
    pub index_ratio: f64,
    pub filter_radius: i64,
    pub rms_mix_rate: f64,
    pub protect: f64,
    pub f0_method: F0Method,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            pitch: 0,
            index_ratio: 0.75,
            filter_radius: 3,
            rms_mix_rate: 0.25,
            protect: 0.33,
            f0_method: F0Method::Rmvpe,
        }
    }
}

/// Job input as documented for both transports.
///
/// Only used for schema generation; parsing goes through
/// [`ConversionRequest::from_input`] so that loosely-typed values are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversionInput {
    /// Base64-encoded source audio.
    pub audio_base64: String,
    #[schema(default = "spb")]
    pub model_id: Option<String>,
    #[schema(default = 0)]
    pub pitch: Option<i64>,
    #[schema(default = 0.75)]
    pub index_ratio: Option<f64>,
    #[schema(default = 3)]
    pub filter_radius: Option<i64>,
    #[schema(default = 0.25)]
    pub rms_mix_rate: Option<f64>,
    #[schema(default = 0.33)]
    pub protect: Option<f64>,
    pub f0_method: Option<F0Method>,
}

/// A validated conversion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    /// Decoded source audio, never empty.
    pub audio: Vec<u8>,
    pub model_id: String,
    pub params: ConversionParams,
}

impl ConversionRequest {
    /// Validate a job input object.
    ///
    /// # Errors
    ///
    /// [`JobError::Validation`] when the input is not an object, the audio is
    /// missing, undecodable or empty, the model id is malformed, or a numeric
    /// field holds something that is not a number.
    pub fn from_input(input: &Value) -> Result<Self, JobError> {
        let Some(obj) = input.as_object() else {
            return Err(JobError::Validation("job input must be a JSON object".into()));
        };

        let encoded = match field(obj, "audio_base64") {
            None => return Err(JobError::Validation("audio_base64 is required".into())),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(JobError::Validation("audio_base64 is required".into()));
            }
            Some(Value::String(s)) => s,
            Some(_) => return Err(JobError::Validation("audio_base64 must be a string".into())),
        };
        let audio = decode_audio(encoded)?;

        let model_id = match field(obj, "model_id") {
            None => DEFAULT_MODEL_ID.to_owned(),
            Some(Value::String(s)) => s.trim().to_owned(),
            Some(_) => return Err(JobError::Validation("model_id must be a string".into())),
        };
        validate_model_id(&model_id)?;

        let defaults = ConversionParams::default();
        let f0_method = match field(obj, "f0_method") {
            Some(Value::String(s)) => F0Method::parse_lenient(s),
            _ => F0Method::Rmvpe,
        };
        let params = ConversionParams {
            pitch: int_field(obj, "pitch", defaults.pitch)?,
            index_ratio: float_field(obj, "index_ratio", defaults.index_ratio)?,
            filter_radius: int_field(obj, "filter_radius", defaults.filter_radius)?,
            rms_mix_rate: float_field(obj, "rms_mix_rate", defaults.rms_mix_rate)?,
            protect: float_field(obj, "protect", defaults.protect)?,
            f0_method,
        };

        Ok(Self {
            audio,
            model_id,
            params,
        })
    }
}

/// `null` counts as absent.
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn decode_audio(encoded: &str) -> Result<Vec<u8>, JobError> {
    // Tolerate data URLs and line-wrapped payloads.
    let payload = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let audio = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| JobError::Validation(format!("audio_base64 is not valid base64: {e}")))?;
    if audio.is_empty() {
        return Err(JobError::Validation("audio_base64 decodes to an empty payload".into()));
    }
    Ok(audio)
}

fn int_field(obj: &Map<String, Value>, name: &str, default: i64) -> Result<i64, JobError> {
    let Some(value) = field(obj, name) else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    parsed.ok_or_else(|| JobError::Validation(format!("{name} must be an integer")))
}

fn float_field(obj: &Map<String, Value>, name: &str, default: f64) -> Result<f64, JobError> {
    let Some(value) = field(obj, name) else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    };
    parsed.ok_or_else(|| JobError::Validation(format!("{name} must be a number")))
}
