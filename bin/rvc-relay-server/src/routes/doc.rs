use crate::routes::{convert, health, models};
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "rvc-relay-server",
    description = "Voice conversion over HTTP: model cache, conversion and result delivery",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(models::ModelsApi::openapi());
    root.merge(convert::ConvertApi::openapi());
    root
}

/// `GET /api-docs/openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(get_docs())
}
