//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// `GET /api/health` — liveness plus a database round trip.
pub async fn check(State(ctx): State<ApiContext>) -> Result<Json<HealthResponse>, ApiError> {
    let database = match ctx.core.open_db() {
        Ok(conn) if crate::db::ping(&conn) => "ok",
        Ok(_) => "unavailable",
        Err(e) => {
            tracing::warn!("Health check could not open database: {e}");
            "unavailable"
        }
    };

    Ok(Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        version: crate::config::APP_VERSION,
        database,
    }))
}
