use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

/// CORS layer from a comma-separated origin list.
///
/// `None`, or a list with no parseable origin, allows any origin.
pub fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .map(|list| {
            list.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    let cors = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
