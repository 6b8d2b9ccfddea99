//! Voice conversion endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use rvc_relay_core::job::ConversionInput;
use rvc_relay_core::{ConversionOutput, ConversionParams, ConversionResult, F0Method};
use serde::Serialize;
use serde_json::Value;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::ServerError;
use crate::middleware::trace::X_TRACE_ID;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(convert),
    components(schemas(ConversionInput, ConvertResponse, ConversionOutput, ConversionParams, F0Method))
)]
pub struct ConvertApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(flatten)]
    pub output: ConversionOutput,
}

pub fn router(max_body_bytes: usize) -> Router<Arc<AppState>> {
    Router::new().route(
        "/convert",
        post(convert).layer(DefaultBodyLimit::max(max_body_bytes)),
    )
}

/// Convert a voice (`POST /convert`).
///
/// The body is the same loosely-typed job input the worker accepts.
#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    request_body = ConversionInput,
    responses(
        (status = 200, description = "Converted audio", body = ConvertResponse),
        (status = 400, description = "Missing or malformed input"),
        (status = 404, description = "Model not published in any store version"),
        (status = 500, description = "Engine or delivery failure"),
        (status = 504, description = "Job timed out"),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ServerError> {
    let Json(input) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let job_id = headers
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.orchestrator.run(&job_id, &input).await {
        ConversionResult::Success(output) => Ok(Json(ConvertResponse {
            success: true,
            output,
        })),
        ConversionResult::Failure(failure) => Err(ServerError::Job {
            kind: failure.kind,
            message: failure.error,
        }),
    }
}
