//! Pending command (notification) endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    api::{ApiResult, AppState, ProblemDetails},
    notifier::Notification,
};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub agent_id: String,
    pub device_ip: String,
    pub command: String,
}

pub async fn list_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.hub.pending().await)
}

/// Drop a stuck entry so the same command can be issued again
pub async fn clear_notification(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<StatusCode> {
    let cleared = state
        .hub
        .notifier()
        .clear_notification(&query.agent_id, &query.device_ip, &query.command)
        .await;

    if cleared {
        tracing::info!(
            "Cleared notification {} for {} via agent {}",
            query.command,
            query.device_ip,
            query.agent_id
        );
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ProblemDetails::not_found(format!(
            "Notification {} for {} via agent {}",
            query.command, query.device_ip, query.agent_id
        )))
    }
}
