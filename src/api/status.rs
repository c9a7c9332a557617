use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::health::{HealthChecker, HealthState};

/// GET /
pub async fn root() -> &'static str {
    "Kuycountry Midtrans Backend Service"
}

/// GET /status
pub async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /health
pub async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let health = checker.check_health().await;
    let code = match health.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(health))
}
