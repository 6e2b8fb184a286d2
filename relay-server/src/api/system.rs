//! Health and log endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{api::AppState, log_buffer::LogEntry};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connected_agents: usize,
    pub pending_commands: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("BUILD_INFO"),
        connected_agents: stats.connected_agents,
        pending_commands: stats.pending_commands,
    })
}

/// Recent log lines, newest first
pub async fn get_logs(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    let buffer = state.log_buffer.read().await;
    Json(buffer.iter().cloned().collect())
}
