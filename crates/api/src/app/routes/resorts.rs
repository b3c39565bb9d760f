use std::sync::Arc;

use axum::{
    extract::Extension,
    http::Uri,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use liftride_infra::queries;

use super::run_blocking;
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/resorts/*rest", get(get_unique_skiers))
}

/// `GET /resorts/{resortID}/seasons/{seasonID}/days/{dayID}/skiers`
pub async fn get_unique_skiers(
    Extension(services): Extension<Arc<AppServices>>,
    uri: Uri,
) -> axum::response::Response {
    let path = uri.path().strip_prefix("/resorts").unwrap_or_default();
    let day = match services.validator().validate_resort_day_path(path) {
        Ok(day) => day,
        Err(e) => return errors::validation_error_to_response(&e),
    };

    run_blocking(services, move |services| {
        match queries::resort_unique_skiers(
            services.store(),
            &day.resort_id.to_string(),
            &day.season_id,
            &day.day_id,
        ) {
            Ok(skiers) => Json(json!({
                "resortID": day.resort_id,
                "seasonID": day.season_id,
                "dayID": day.day_id,
                "numSkiers": skiers,
            }))
            .into_response(),
            Err(e) => errors::store_error_to_response(e),
        }
    })
    .await
}
