use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: &'static str,
    pub store: bool,
    pub version: &'static str,
}

pub async fn check_health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.engine.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check failed: {}", e);
            false
        }
    };

    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if store { "ok" } else { "degraded" },
        store,
        version: env!("CARGO_PKG_VERSION"),
    };
    (status, Json(body))
}
