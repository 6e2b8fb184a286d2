use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use gym_bridge_protocol::payloads::{
    BoardAddress, CreateUser, EnrollFace, ReleaseTurnstile, SetEntryClockwise, SetFlowControl,
    SetWebhook, UnblockUser, UploadFaceImage, UserRef,
};
use gym_bridge_protocol::{AgentCommand, AgentResponse, DeviceAction, DeviceType, ServerMessage};

use crate::config::ReaderConfig;
use crate::controlid::{ControlIdClient, ReaderObject};
use crate::error::DispatchError;
use crate::toletus::ToletusClient;

/// Executes relayed commands against the LAN devices
///
/// Readers are addressed by the command's `device_ip`; one client (and so one
/// cached session) is kept per reader IP. Commands without an IP go to the
/// configured reader.
pub struct Dispatcher {
    reader: ReaderConfig,
    http: reqwest::Client,
    readers: Mutex<HashMap<String, Arc<ControlIdClient>>>,
    hub: Arc<ToletusClient>,
}

fn parse<T: DeserializeOwned>(action: DeviceAction, data: &Value) -> Result<T, DispatchError> {
    serde_json::from_value(data.clone()).map_err(|e| DispatchError::invalid(action.as_str(), e))
}

/// Strip an optional `data:image/...;base64,` prefix and decode
fn decode_image(action: DeviceAction, encoded: &str) -> Result<Vec<u8>, DispatchError> {
    let raw = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    STANDARD
        .decode(raw.trim())
        .map_err(|e| DispatchError::invalid(action.as_str(), e))
}

impl Dispatcher {
    pub fn new(reader: ReaderConfig, http: reqwest::Client, hub: Arc<ToletusClient>) -> Self {
        Self {
            reader,
            http,
            readers: Mutex::new(HashMap::new()),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<ToletusClient> {
        &self.hub
    }

    /// Client for the reader at `ip`, or the configured reader
    pub async fn reader(&self, ip: Option<&str>) -> Arc<ControlIdClient> {
        let ip = ip.unwrap_or(&self.reader.ip).to_string();
        let mut readers = self.readers.lock().await;
        readers
            .entry(ip.clone())
            .or_insert_with(|| {
                tracing::debug!("New reader client for {}", ip);
                Arc::new(ControlIdClient::new(
                    self.http.clone(),
                    self.reader.base_url_for(&ip),
                    self.reader.username.clone(),
                    self.reader.password.clone(),
                ))
            })
            .clone()
    }

    /// Handle a raw server frame
    ///
    /// Frames that do not parse still get a failed response when a `requestId`
    /// can be recovered, so the server's caller is not left waiting.
    pub async fn handle_frame(&self, text: &str) -> Option<AgentResponse> {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Command(command)) => Some(self.execute(&command).await),
            Err(e) => {
                let request_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("requestId").and_then(Value::as_str).map(str::to_string));
                match request_id {
                    Some(request_id) => {
                        tracing::warn!("Rejecting command {}: {}", request_id, e);
                        Some(AgentResponse::failed(
                            request_id,
                            format!("Unsupported command: {}", e),
                        ))
                    }
                    None => {
                        tracing::warn!("Ignoring unreadable frame: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Run one command and build the response that answers it
    pub async fn execute(&self, command: &AgentCommand) -> AgentResponse {
        tracing::info!(
            "Executing {} (request {}, device {})",
            command.action,
            command.request_id,
            command.device_ip.as_deref().unwrap_or("default")
        );

        let response = match self.run(command).await {
            Ok(data) => AgentResponse::ok("", data),
            Err(e) => {
                tracing::error!("{} failed: {}", command.action, e);
                AgentResponse::failed("", e.to_string())
            }
        };
        response.answering(command)
    }

    async fn run(&self, command: &AgentCommand) -> Result<Value, DispatchError> {
        let action = command.action;
        let data = &command.data;

        if action.device_type() == DeviceType::ToletusHub {
            return self.run_hub(action, data).await;
        }

        let reader = self.reader(command.device_ip.as_deref()).await;
        let value = match action {
            DeviceAction::Login => json!(reader.login().await?),
            DeviceAction::CheckStatus => json!(reader.check_status().await),
            DeviceAction::SystemInformation => reader.system_information().await?,
            DeviceAction::LoadUsers => json!(reader.load_objects(ReaderObject::Users).await?),
            DeviceAction::LoadGroups => json!(reader.load_objects(ReaderObject::Groups).await?),
            DeviceAction::LoadUserGroups => {
                json!(reader.load_objects(ReaderObject::UserGroups).await?)
            }
            DeviceAction::LoadAccessLogs => {
                json!(reader.load_objects(ReaderObject::AccessLogs).await?)
            }
            DeviceAction::CreateUser => {
                let user: CreateUser = parse(action, data)?;
                json!(
                    reader
                        .create_user(&user.name, &user.registration, user.group_id)
                        .await?
                )
            }
            DeviceAction::DeleteUser => {
                let user: UserRef = parse(action, data)?;
                reader.delete_user(user.user_id).await?;
                json!(true)
            }
            DeviceAction::BlockUserAccess => {
                let user: UserRef = parse(action, data)?;
                reader.block_user_access(user.user_id).await?;
                json!(true)
            }
            DeviceAction::UnblockUserAccess => {
                let user: UnblockUser = parse(action, data)?;
                reader
                    .unblock_user_access(user.user_id, user.group_id)
                    .await?;
                json!(true)
            }
            DeviceAction::EnrollFace => {
                let enroll: EnrollFace = parse(action, data)?;
                reader.enroll_face(&enroll).await?
            }
            DeviceAction::UploadFaceImage => {
                let upload: UploadFaceImage = parse(action, data)?;
                let image = decode_image(action, &upload.image_base64)?;
                let timestamp = upload
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());
                reader
                    .upload_face_image(upload.user_id, image, timestamp)
                    .await?
            }
            DeviceAction::GetUserImage => {
                let user: UserRef = parse(action, data)?;
                reader.get_user_image(user.user_id).await?
            }
            DeviceAction::ListUsersWithFaces => json!(reader.list_users_with_faces().await?),
            DeviceAction::RemoveUserFace => {
                let user: UserRef = parse(action, data)?;
                reader.remove_user_face(user.user_id).await?;
                json!(true)
            }
            other => {
                return Err(DispatchError::invalid(
                    other.as_str(),
                    "not a reader action",
                ))
            }
        };
        Ok(value)
    }

    async fn run_hub(&self, action: DeviceAction, data: &Value) -> Result<Value, DispatchError> {
        let hub = &self.hub;
        let value = match action {
            DeviceAction::ToletusDiscoverDevices => json!(hub.discover_devices().await?),
            DeviceAction::ToletusGetDevices => hub.get_devices().await?,
            DeviceAction::ToletusConnectDevice => {
                let target: BoardAddress = parse(action, data)?;
                hub.connect_device(&target.ip, target.kind).await?
            }
            DeviceAction::ToletusDisconnectDevice => {
                let target: BoardAddress = parse(action, data)?;
                hub.disconnect_device(&target.ip, target.kind).await?
            }
            DeviceAction::ToletusReleaseEntry => {
                let release: ReleaseTurnstile = parse(action, data)?;
                json!(hub.release_entry(&release.device, &release.message).await?)
            }
            DeviceAction::ToletusReleaseExit => {
                let release: ReleaseTurnstile = parse(action, data)?;
                json!(hub.release_exit(&release.device, &release.message).await?)
            }
            DeviceAction::ToletusReleaseEntryAndExit => {
                let release: ReleaseTurnstile = parse(action, data)?;
                json!(
                    hub.release_entry_and_exit(&release.device, &release.message)
                        .await?
                )
            }
            DeviceAction::ToletusSetWebhook => {
                let webhook: SetWebhook = parse(action, data)?;
                json!(hub.set_webhook(&webhook.endpoint).await?)
            }
            DeviceAction::ToletusSetEntryClockwise => {
                let setting: SetEntryClockwise = parse(action, data)?;
                json!(
                    hub.set_entry_clockwise(&setting.device, setting.entry_clockwise)
                        .await?
                )
            }
            DeviceAction::ToletusSetFlowControl => {
                let setting: SetFlowControl = parse(action, data)?;
                json!(
                    hub.set_flow_control(&setting.device, setting.controlled_flow)
                        .await?
                )
            }
            DeviceAction::ToletusCheckStatus => json!(hub.check_status().await),
            other => return Err(DispatchError::invalid(other.as_str(), "not a HUB action")),
        };
        Ok(value)
    }
}
