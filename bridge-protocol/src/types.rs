// Location: bridge-protocol/src/types.rs
// Purpose: JSON frames exchanged over the agent WebSocket
// Why: Centralized definitions so server and agent cannot drift apart

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::DeviceAction;
use crate::board::BoardEvent;

/// Command relayed from the server to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCommand {
    pub request_id: String,
    pub action: DeviceAction,
    /// Target device on the gym LAN; `None` means the agent's default reader or the HUB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ip: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl AgentCommand {
    pub fn new(action: DeviceAction, device_ip: Option<String>, data: Value) -> Self {
        Self {
            request_id: new_request_id(),
            action,
            device_ip,
            data,
        }
    }
}

/// Result of one `AgentCommand`, matched by `request_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<DeviceAction>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            device_ip: None,
            action: None,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            device_ip: None,
            action: None,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Echo the addressing of the command this response answers
    pub fn answering(mut self, command: &AgentCommand) -> Self {
        self.request_id = command.request_id.clone();
        self.device_ip = command.device_ip.clone();
        self.action = Some(command.action);
        self
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Command(AgentCommand),
}

/// Frames sent by an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Response(AgentResponse),
    Board(BoardEvent),
}

/// Request ids only need to be unique among one server's pending commands
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
