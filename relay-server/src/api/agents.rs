//! Agent endpoint handlers
//!
//! Connected agents come from the hub; credentials live in the database.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use gym_bridge_protocol::{BoardEvent, DeviceAction};

use crate::{
    agent_hub::{AgentInfo, HubStats},
    api::{ApiResult, AppState, ProblemDetails},
    models::{AgentRecord, NewAgent},
};

/// Body of the command endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub action: DeviceAction,
    #[serde(default)]
    pub device_ip: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Overrides `bridge.command_timeout_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub action: DeviceAction,
    pub device_ip: Option<String>,
    pub data: Value,
}

impl CommandRequest {
    pub fn timeout(&self, state: &AppState) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| state.config.bridge.command_timeout())
    }
}

pub async fn list_agents(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentInfo>> {
    state.hub.agent_info(&agent_id).await.map(Json).ok_or_else(|| {
        ProblemDetails::not_found(format!("Agent {}", agent_id))
            .with_instance(format!("/api/agents/{}", agent_id))
    })
}

pub async fn disconnect_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.hub.disconnect(&agent_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ProblemDetails::not_found(format!("Agent {}", agent_id))
            .with_instance(format!("/api/agents/{}", agent_id)))
    }
}

pub async fn list_boards(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Json<Vec<BoardEvent>> {
    Json(state.hub.boards(&agent_id).await)
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<CommandResult>> {
    tracing::info!("Command {} for agent {}", request.action, agent_id);
    let timeout = request.timeout(&state);
    let data = state
        .hub
        .send_command(
            &agent_id,
            request.device_ip.clone(),
            request.action,
            request.data,
            timeout,
        )
        .await
        .map_err(|e| {
            tracing::warn!("Command failed: {}", e);
            ProblemDetails::from(e).with_instance(format!("/api/agents/{}/commands", agent_id))
        })?;

    Ok(Json(CommandResult {
        action: request.action,
        device_ip: request.device_ip,
        data,
    }))
}

pub async fn register_agent(
    State(state): State<AppState>,
    Json(agent): Json<NewAgent>,
) -> ApiResult<(StatusCode, Json<AgentRecord>)> {
    if agent.agent_id.trim().is_empty() {
        return Err(ProblemDetails::validation_error("agent_id must not be empty"));
    }
    if agent.token.len() < 8 {
        return Err(ProblemDetails::validation_error(
            "token must be at least 8 characters",
        ));
    }

    let record = state.db.upsert_agent(&agent).await?;
    tracing::info!("Registered agent {} for gym {}", record.agent_id, record.gym_id);
    Ok((StatusCode::CREATED, Json(record)))
}
