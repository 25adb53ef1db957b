use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub rooms: usize,
    pub connections: usize,
    pub sessions: usize,
    pub invite_tokens: usize,
    pub scheduled_tasks: usize,
}

/// GET /healthz: liveness plus coarse occupancy counters.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.lifecycle.stats();
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        rooms: stats.rooms,
        connections: state.registry.len(),
        sessions: stats.sessions,
        invite_tokens: stats.invite_tokens,
        scheduled_tasks: stats.scheduled_tasks,
    })
}
