use axum::http::{StatusCode, Uri};

use crate::app::errors;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn fallback(uri: Uri) -> axum::response::Response {
    errors::not_found(uri.path(), uri.query())
}
