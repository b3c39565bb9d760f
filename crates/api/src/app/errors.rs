use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use liftride_core::ValidationError;
use liftride_infra::{IngestError, StoreError};

pub fn ingest_error_to_response(err: IngestError) -> axum::response::Response {
    match err {
        IngestError::Validation(e) => validation_error_to_response(&e),
        // Same status as a bad request; the code marks it retryable.
        IngestError::Pool(e) => json_error(StatusCode::BAD_REQUEST, "publish_failed", e.to_string()),
        IngestError::Publish(e) => json_error(StatusCode::BAD_REQUEST, "publish_failed", e.to_string()),
    }
}

pub fn validation_error_to_response(err: &ValidationError) -> axum::response::Response {
    let code = if err.in_body() { "invalid_body" } else { "invalid_url" };
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({
            "error": code,
            "message": err.to_string(),
            "field": err.field().map(|f| f.as_str()),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "ride query failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 404 body for anything the router does not serve.
pub fn not_found(path: &str, query: Option<&str>) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({
            "error": "not_found",
            "path": path,
            "queryParams": query.unwrap_or_default(),
        })),
    )
        .into_response()
}
