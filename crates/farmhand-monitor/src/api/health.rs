//! Health check endpoint.

use axum::Json;

use crate::dto::HealthResponse;

/// GET /api/v0/health - Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}
