use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;

use crate::app::errors;
use crate::app::services::AppServices;

pub mod resorts;
pub mod skiers;
pub mod system;

/// Router for the ride endpoints.
pub fn router() -> Router {
    Router::new().merge(skiers::router()).merge(resorts::router())
}

/// Run a synchronous service call on the blocking pool.
///
/// Channel acquisition and the Postgres store both block the calling thread.
async fn run_blocking<F>(services: Arc<AppServices>, f: F) -> axum::response::Response
where
    F: FnOnce(&AppServices) -> axum::response::Response + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&services)).await {
        Ok(response) => response,
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}
