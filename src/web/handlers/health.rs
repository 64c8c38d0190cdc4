//! Health check HTTP handlers

use axum::{extract::State, response::Response};
use serde::Serialize;
use tracing::trace;

use crate::coordinator::PollStatus;
use crate::web::{AppState, responses::ok};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when both pipelines are ready and their last polls succeeded
    pub status: &'static str,
    pub connection_key: String,
    pub uptime_seconds: i64,
    pub meter: PollStatus,
    pub system: PollStatus,
}

/// Engine health, always 200 so it can be used for liveness checks
pub async fn health_check(State(state): State<AppState>) -> Response {
    trace!("GET /health");
    let meter = state.meter.status();
    let system = state.system.status();
    let healthy = [&meter, &system]
        .iter()
        .all(|s| s.ready && s.last_poll_succeeded);

    ok(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        connection_key: state.connection_key.clone(),
        uptime_seconds: (chrono::Utc::now() - state.start_time).num_seconds(),
        meter,
        system,
    })
}
