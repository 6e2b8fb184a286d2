// relay-server/src/models/device.rs
//
// Device registration: a reader or HUB installed at a gym, reachable through
// that gym's agent.

use serde::{Deserialize, Serialize};

use gym_bridge_protocol::DeviceType;

fn default_port() -> u16 {
    80
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRegistration {
    pub id: i64,
    pub gym_id: i64,
    pub agent_id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub device_type: DeviceType,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body of `POST /api/gyms/:gym_id/devices`
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeviceRegistration {
    pub agent_id: String,
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub device_type: DeviceType,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_username")]
    pub password: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl NewDeviceRegistration {
    /// Basic shape checks before anything reaches the database
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_id.trim().is_empty() {
            return Err("agent_id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.ip_address.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("invalid ip_address: {}", self.ip_address));
        }
        Ok(())
    }
}
