use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use liftride_core::RidePath;
use liftride_infra::queries;

use super::run_blocking;
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/skiers/*rest", get(get_vertical).post(record_ride))
}

/// The part of the request path after `/skiers`.
fn ride_path(uri: &Uri) -> String {
    uri.path().strip_prefix("/skiers").unwrap_or_default().to_string()
}

/// `POST /skiers/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}`
pub async fn record_ride(
    Extension(services): Extension<Arc<AppServices>>,
    uri: Uri,
    body: Bytes,
) -> axum::response::Response {
    let path = ride_path(&uri);
    run_blocking(services, move |services| match services.ingest(&path, &body) {
        Ok(ride) => (
            StatusCode::OK,
            Json(json!({
                "message": "lift ride recorded",
                "ride": ride,
            })),
        )
            .into_response(),
        Err(e) => errors::ingest_error_to_response(e),
    })
    .await
}

enum VerticalQuery {
    Total { skier_id: u32 },
    Day(RidePath),
}

/// `GET /skiers/{skierID}` or
/// `GET /skiers/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}`
pub async fn get_vertical(
    Extension(services): Extension<Arc<AppServices>>,
    uri: Uri,
) -> axum::response::Response {
    let path = ride_path(&uri);
    let trimmed = path.trim_end_matches('/');
    let parsed = match trimmed.strip_prefix('/') {
        Some(id) if !id.contains('/') => services
            .validator()
            .validate_skier_id(id)
            .map(|skier_id| VerticalQuery::Total { skier_id }),
        _ => services.validator().validate_path(trimmed).map(VerticalQuery::Day),
    };
    let query = match parsed {
        Ok(q) => q,
        Err(e) => return errors::validation_error_to_response(&e),
    };

    run_blocking(services, move |services| match query {
        VerticalQuery::Total { skier_id } => {
            match queries::skier_vertical_total(services.store(), &skier_id.to_string()) {
                Ok(total) => Json(json!({
                    "skierID": skier_id,
                    "totalVertical": total,
                }))
                .into_response(),
                Err(e) => errors::store_error_to_response(e),
            }
        }
        VerticalQuery::Day(p) => {
            match queries::skier_day_vertical(
                services.store(),
                &p.resort_id.to_string(),
                &p.season_id,
                &p.day_id,
                &p.skier_id.to_string(),
            ) {
                Ok(vertical) => Json(json!({
                    "resortID": p.resort_id,
                    "seasonID": p.season_id,
                    "dayID": p.day_id,
                    "skierID": p.skier_id,
                    "vertical": vertical,
                }))
                .into_response(),
                Err(e) => errors::store_error_to_response(e),
            }
        }
    })
    .await
}
