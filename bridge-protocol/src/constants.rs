// Location: bridge-protocol/src/constants.rs
// Purpose: Shared constants between relay-server and gym agents
// Why: Single source of truth for the agent link handshake and timings

// =============================================================================
// Handshake
// =============================================================================

/// Path of the WebSocket endpoint agents dial into
pub const AGENT_WS_PATH: &str = "/agent";

/// Header carrying the agent identifier on the upgrade request
pub const HEADER_CLIENT_ID: &str = "x-client-id";

/// Header carrying `Bearer <token>` on the upgrade request
pub const HEADER_AUTHORIZATION: &str = "authorization";

// =============================================================================
// Close Codes (RFC 6455)
// =============================================================================

/// Normal closure, e.g. operator disconnect
pub const CLOSE_NORMAL: u16 = 1000;

/// Server shutting down or connection replaced
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Handshake or protocol rule violated
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

// =============================================================================
// Timings
// =============================================================================

/// Default time a caller waits for a device answer
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Interval between WebSocket pings on both ends
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Silence after which the server drops an agent connection
pub const DEFAULT_DEAD_TIMEOUT_SECS: u64 = 90;

/// Interval of the server's dead-connection and expiry sweep
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Builds the `Authorization` header value for an agent token
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Extracts the token from an `Authorization` header value
pub fn parse_bearer(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
