// Top-level modules
pub mod actions;
pub mod board;
pub mod constants;
pub mod errors;
pub mod payloads;
pub mod types;

// Re-export wire types for use in relay-server and agent
pub use actions::{DeviceAction, DeviceType};
pub use board::{Board, BoardEvent, BoardKind};
pub use errors::BridgeError;
pub use types::{AgentCommand, AgentMessage, AgentResponse, ServerMessage};

// Re-export constants for protocol consistency
pub use constants::{
    AGENT_WS_PATH, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
    DEFAULT_COMMAND_TIMEOUT_MS, HEADER_AUTHORIZATION, HEADER_CLIENT_ID,
};
