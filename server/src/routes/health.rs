//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub model: String,
    pub num_classes: usize,
    pub backend: String,
    pub remedy_enabled: bool,
}

/// GET /health
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        started_at: state.started_at_utc.to_rfc3339(),
        model: state.model_name.clone(),
        num_classes: state.num_classes,
        backend: leafguard::backend::backend_name().to_string(),
        remedy_enabled: !state.label_only,
    })
}
