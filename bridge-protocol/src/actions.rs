// Location: bridge-protocol/src/actions.rs
// Purpose: Commands the server may relay to an agent
// Why: Both ends must agree on the action names carried in `AgentCommand`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Family of hardware a command ends up on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Control ID face reader (on-device HTTP API)
    ControlId,
    /// Toletus HUB fronting LiteNet boards
    ToletusHub,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::ControlId => write!(f, "control_id"),
            DeviceType::ToletusHub => write!(f, "toletus_hub"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control_id" => Ok(DeviceType::ControlId),
            "toletus_hub" => Ok(DeviceType::ToletusHub),
            other => Err(format!("Unknown device type: {}", other)),
        }
    }
}

/// Action names understood by the agent
///
/// The wire names match what deployed agents already speak, hence the mix of
/// camelCase reader actions and `toletus_` prefixed HUB actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    // === Control ID reader ===
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "checkStatus")]
    CheckStatus,
    #[serde(rename = "systemInformation")]
    SystemInformation,
    #[serde(rename = "loadUsers")]
    LoadUsers,
    #[serde(rename = "loadGroups")]
    LoadGroups,
    #[serde(rename = "loadUserGroups")]
    LoadUserGroups,
    #[serde(rename = "loadAccessLogs")]
    LoadAccessLogs,
    #[serde(rename = "createUser")]
    CreateUser,
    #[serde(rename = "deleteUser")]
    DeleteUser,
    #[serde(rename = "blockUserAccess")]
    BlockUserAccess,
    #[serde(rename = "unblockUserAccess")]
    UnblockUserAccess,
    #[serde(rename = "enrollFace")]
    EnrollFace,
    #[serde(rename = "uploadFaceImage")]
    UploadFaceImage,
    #[serde(rename = "getUserImage")]
    GetUserImage,
    #[serde(rename = "listUsersWithFaces")]
    ListUsersWithFaces,
    #[serde(rename = "removeUserFace")]
    RemoveUserFace,

    // === Toletus HUB ===
    #[serde(rename = "toletus_discoverDevices")]
    ToletusDiscoverDevices,
    #[serde(rename = "toletus_getDevices")]
    ToletusGetDevices,
    #[serde(rename = "toletus_connectDevice")]
    ToletusConnectDevice,
    #[serde(rename = "toletus_disconnectDevice")]
    ToletusDisconnectDevice,
    #[serde(rename = "toletus_releaseEntry")]
    ToletusReleaseEntry,
    #[serde(rename = "toletus_releaseExit")]
    ToletusReleaseExit,
    #[serde(rename = "toletus_releaseEntryAndExit")]
    ToletusReleaseEntryAndExit,
    #[serde(rename = "toletus_setWebhook")]
    ToletusSetWebhook,
    #[serde(rename = "toletus_setEntryClockwise")]
    ToletusSetEntryClockwise,
    #[serde(rename = "toletus_setFlowControl")]
    ToletusSetFlowControl,
    #[serde(rename = "toletus_checkStatus")]
    ToletusCheckStatus,
}

impl DeviceAction {
    pub const ALL: [DeviceAction; 27] = [
        DeviceAction::Login,
        DeviceAction::CheckStatus,
        DeviceAction::SystemInformation,
        DeviceAction::LoadUsers,
        DeviceAction::LoadGroups,
        DeviceAction::LoadUserGroups,
        DeviceAction::LoadAccessLogs,
        DeviceAction::CreateUser,
        DeviceAction::DeleteUser,
        DeviceAction::BlockUserAccess,
        DeviceAction::UnblockUserAccess,
        DeviceAction::EnrollFace,
        DeviceAction::UploadFaceImage,
        DeviceAction::GetUserImage,
        DeviceAction::ListUsersWithFaces,
        DeviceAction::RemoveUserFace,
        DeviceAction::ToletusDiscoverDevices,
        DeviceAction::ToletusGetDevices,
        DeviceAction::ToletusConnectDevice,
        DeviceAction::ToletusDisconnectDevice,
        DeviceAction::ToletusReleaseEntry,
        DeviceAction::ToletusReleaseExit,
        DeviceAction::ToletusReleaseEntryAndExit,
        DeviceAction::ToletusSetWebhook,
        DeviceAction::ToletusSetEntryClockwise,
        DeviceAction::ToletusSetFlowControl,
        DeviceAction::ToletusCheckStatus,
    ];

    /// Wire name of the action, also used as the command id of a notification
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAction::Login => "login",
            DeviceAction::CheckStatus => "checkStatus",
            DeviceAction::SystemInformation => "systemInformation",
            DeviceAction::LoadUsers => "loadUsers",
            DeviceAction::LoadGroups => "loadGroups",
            DeviceAction::LoadUserGroups => "loadUserGroups",
            DeviceAction::LoadAccessLogs => "loadAccessLogs",
            DeviceAction::CreateUser => "createUser",
            DeviceAction::DeleteUser => "deleteUser",
            DeviceAction::BlockUserAccess => "blockUserAccess",
            DeviceAction::UnblockUserAccess => "unblockUserAccess",
            DeviceAction::EnrollFace => "enrollFace",
            DeviceAction::UploadFaceImage => "uploadFaceImage",
            DeviceAction::GetUserImage => "getUserImage",
            DeviceAction::ListUsersWithFaces => "listUsersWithFaces",
            DeviceAction::RemoveUserFace => "removeUserFace",
            DeviceAction::ToletusDiscoverDevices => "toletus_discoverDevices",
            DeviceAction::ToletusGetDevices => "toletus_getDevices",
            DeviceAction::ToletusConnectDevice => "toletus_connectDevice",
            DeviceAction::ToletusDisconnectDevice => "toletus_disconnectDevice",
            DeviceAction::ToletusReleaseEntry => "toletus_releaseEntry",
            DeviceAction::ToletusReleaseExit => "toletus_releaseExit",
            DeviceAction::ToletusReleaseEntryAndExit => "toletus_releaseEntryAndExit",
            DeviceAction::ToletusSetWebhook => "toletus_setWebhook",
            DeviceAction::ToletusSetEntryClockwise => "toletus_setEntryClockwise",
            DeviceAction::ToletusSetFlowControl => "toletus_setFlowControl",
            DeviceAction::ToletusCheckStatus => "toletus_checkStatus",
        }
    }

    /// Hardware family that executes the action
    pub fn device_type(&self) -> DeviceType {
        if self.as_str().starts_with("toletus_") {
            DeviceType::ToletusHub
        } else {
            DeviceType::ControlId
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}
