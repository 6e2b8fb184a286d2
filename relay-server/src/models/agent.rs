// relay-server/src/models/agent.rs
//
// Agent credentials: the identity an agent presents on the WebSocket upgrade
// and the gym it serves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub gym_id: i64,
    /// Bearer token expected in the Authorization header
    #[serde(skip_serializing)]
    pub token: String,
    pub created_at: String,
}

/// Request body of `POST /api/agents`
#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub agent_id: String,
    pub gym_id: i64,
    pub token: String,
}
