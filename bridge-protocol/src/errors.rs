use thiserror::Error;

/// Failures of a command relayed through an agent connection
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("Agent {0} is not connected")]
    AgentNotConnected(String),

    #[error("Command {command} already in flight for device {device_ip}")]
    CommandInFlight { device_ip: String, command: String },

    #[error("No pending notification for device {device_ip} command {command}")]
    UnknownNotification { device_ip: String, command: String },

    #[error("Timed out waiting for device {device_ip} command {command} ({timeout_ms}ms)")]
    Timeout {
        device_ip: String,
        command: String,
        timeout_ms: u64,
    },

    #[error("Command {command} for device {device_ip} was cancelled")]
    Cancelled { device_ip: String, command: String },

    #[error("Agent {0} disconnected")]
    AgentDisconnected(String),

    #[error("Agent returned error: {0}")]
    Agent(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Agent channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}
