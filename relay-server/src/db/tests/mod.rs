//! Test utilities module
//!
//! Shared helpers for database tests

use crate::db::Database;
use crate::models::{NewAgent, NewDeviceRegistration};
use gym_bridge_protocol::DeviceType;


pub(crate) async fn create_test_db() -> Database {
    Database::new("sqlite::memory:").await.unwrap()
}

pub(crate) fn create_test_agent(agent_id: &str, gym_id: i64) -> NewAgent {
    NewAgent {
        agent_id: agent_id.to_string(),
        gym_id,
        token: format!("{}-token", agent_id),
    }
}

pub(crate) fn create_test_device(ip: &str, device_type: DeviceType) -> NewDeviceRegistration {
    NewDeviceRegistration {
        agent_id: "academia-1".to_string(),
        name: format!("Device {}", ip),
        ip_address: ip.to_string(),
        port: 80,
        device_type,
        username: "admin".to_string(),
        password: "admin".to_string(),
        active: true,
    }
}
