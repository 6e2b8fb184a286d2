//! Control ID reader operations relayed through a gym's agent
//!
//! Every method turns into one `AgentCommand` addressed to the reader's IP;
//! the agent performs the HTTP calls on the gym LAN.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use gym_bridge_protocol::payloads::{CreateUser, EnrollFace, UnblockUser, UploadFaceImage, UserRef};
use gym_bridge_protocol::{BridgeError, DeviceAction, DeviceType};

use crate::agent_hub::AgentHub;
use crate::db::Database;
use crate::models::DeviceRegistration;

/// Reader answers within this unless the action needs longer
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlIdService {
    hub: AgentHub,
    agent_id: String,
    device_ip: String,
}

impl ControlIdService {
    pub fn new(hub: AgentHub, agent_id: impl Into<String>, device_ip: impl Into<String>) -> Self {
        Self {
            hub,
            agent_id: agent_id.into(),
            device_ip: device_ip.into(),
        }
    }

    /// Service for a registered reader
    pub fn for_device(hub: AgentHub, device: &DeviceRegistration) -> Self {
        Self::new(hub, device.agent_id.clone(), device.ip_address.clone())
    }

    /// Service for the gym's first active reader, if it has one
    pub async fn for_gym(
        hub: AgentHub,
        db: &Database,
        gym_id: i64,
    ) -> anyhow::Result<Option<Self>> {
        let device = db.first_active_device(gym_id, DeviceType::ControlId).await?;
        Ok(device.map(|device| Self::for_device(hub, &device)))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn device_ip(&self) -> &str {
        &self.device_ip
    }

    async fn send(
        &self,
        action: DeviceAction,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        tracing::info!(
            "Sending {} to reader {} via agent {}",
            action,
            self.device_ip,
            self.agent_id
        );
        self.hub
            .send_command(
                &self.agent_id,
                Some(self.device_ip.clone()),
                action,
                data,
                timeout,
            )
            .await
    }

    async fn send_payload<T: Serialize>(
        &self,
        action: DeviceAction,
        payload: &T,
    ) -> Result<Value, BridgeError> {
        let data = serde_json::to_value(payload)?;
        self.send(action, data, DEFAULT_TIMEOUT).await
    }

    /// Open a session on the reader; returns the session token
    pub async fn login(&self) -> Result<String, BridgeError> {
        let value = self.send(DeviceAction::Login, Value::Null, DEFAULT_TIMEOUT).await?;
        match value {
            Value::String(session) => Ok(session),
            other => other
                .get("session")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BridgeError::Agent("Login returned no session".to_string())),
        }
    }

    /// Whether the reader answers; any failure on the way counts as offline
    pub async fn check_status(&self) -> bool {
        match self
            .send(DeviceAction::CheckStatus, Value::Null, STATUS_TIMEOUT)
            .await
        {
            Ok(value) => value.as_bool().unwrap_or(true),
            Err(e) => {
                tracing::warn!("Reader {} status check failed: {}", self.device_ip, e);
                false
            }
        }
    }

    pub async fn system_information(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::SystemInformation, Value::Null, DEFAULT_TIMEOUT)
            .await
    }

    pub async fn load_users(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::LoadUsers, Value::Null, DEFAULT_TIMEOUT).await
    }

    pub async fn load_groups(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::LoadGroups, Value::Null, DEFAULT_TIMEOUT).await
    }

    pub async fn load_user_groups(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::LoadUserGroups, Value::Null, DEFAULT_TIMEOUT)
            .await
    }

    pub async fn load_access_logs(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::LoadAccessLogs, Value::Null, DEFAULT_TIMEOUT)
            .await
    }

    /// Create a user and link it to `group_id` (group 1 when absent); returns the new user id
    pub async fn create_user(
        &self,
        name: &str,
        registration: &str,
        group_id: Option<i64>,
    ) -> Result<i64, BridgeError> {
        let value = self
            .send_payload(
                DeviceAction::CreateUser,
                &CreateUser {
                    name: name.to_string(),
                    registration: registration.to_string(),
                    group_id,
                },
            )
            .await?;

        value
            .as_i64()
            .or_else(|| value.get("userId").and_then(Value::as_i64))
            .ok_or_else(|| BridgeError::Agent(format!("Unexpected createUser result: {}", value)))
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<(), BridgeError> {
        self.send_payload(DeviceAction::DeleteUser, &UserRef { user_id })
            .await
            .map(|_| ())
    }

    /// Remove the user from every group so the reader denies access
    pub async fn block_user_access(&self, user_id: i64) -> Result<(), BridgeError> {
        self.send_payload(DeviceAction::BlockUserAccess, &UserRef { user_id })
            .await
            .map(|_| ())
    }

    pub async fn unblock_user_access(
        &self,
        user_id: i64,
        group_id: Option<i64>,
    ) -> Result<(), BridgeError> {
        self.send_payload(
            DeviceAction::UnblockUserAccess,
            &UnblockUser { user_id, group_id },
        )
        .await
        .map(|_| ())
    }

    /// Start a remote face enrollment on the reader screen
    pub async fn enroll_face(&self, request: EnrollFace) -> Result<Value, BridgeError> {
        self.send_payload(DeviceAction::EnrollFace, &request).await
    }

    pub async fn upload_face_image(
        &self,
        user_id: i64,
        image_base64: String,
        timestamp: Option<i64>,
    ) -> Result<Value, BridgeError> {
        self.send_payload(
            DeviceAction::UploadFaceImage,
            &UploadFaceImage {
                user_id,
                image_base64,
                timestamp,
            },
        )
        .await
    }

    pub async fn get_user_image(&self, user_id: i64) -> Result<Value, BridgeError> {
        self.send_payload(DeviceAction::GetUserImage, &UserRef { user_id })
            .await
    }

    pub async fn list_users_with_faces(&self) -> Result<Value, BridgeError> {
        self.send(DeviceAction::ListUsersWithFaces, Value::Null, DEFAULT_TIMEOUT)
            .await
    }

    pub async fn remove_user_face(&self, user_id: i64) -> Result<(), BridgeError> {
        self.send_payload(DeviceAction::RemoveUserFace, &UserRef { user_id })
            .await
            .map(|_| ())
    }
}
