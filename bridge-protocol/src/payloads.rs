// Location: bridge-protocol/src/payloads.rs
// Purpose: Typed `data` of each AgentCommand
// Why: Keys are camelCase because deployed servers already send them that way

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardKind};

fn default_true() -> bool {
    true
}

fn default_countdown() -> u32 {
    3
}

/// Group new users join and unblocked users return to
pub const DEFAULT_GROUP_ID: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub name: String,
    pub registration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

/// Payload of actions addressing a single reader user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnblockUser {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollFace {
    pub user_id: i64,
    #[serde(default = "default_true")]
    pub save: bool,
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub auto: bool,
    #[serde(default = "default_countdown")]
    pub countdown: u32,
}

impl EnrollFace {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            save: true,
            sync: true,
            auto: true,
            countdown: default_countdown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadFaceImage {
    pub user_id: i64,
    /// JPEG bytes, standard base64
    pub image_base64: String,
    /// Unix seconds; the agent uses the current time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Target of HUB connect/disconnect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardAddress {
    pub ip: String,
    #[serde(rename = "type")]
    pub kind: BoardKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseTurnstile {
    pub device: Board,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetWebhook {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetEntryClockwise {
    pub device: Board,
    pub entry_clockwise: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetFlowControl {
    pub device: Board,
    pub controlled_flow: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enroll_face_defaults() {
        let enroll: EnrollFace = serde_json::from_value(json!({"userId": 42})).unwrap();
        assert_eq!(enroll, EnrollFace::new(42));
    }

    #[test]
    fn test_release_accepts_board_kind_by_name() {
        let release: ReleaseTurnstile = serde_json::from_value(json!({
            "device": {"id": 1, "name": "Catraca", "ip": "192.168.0.50", "port": 7878, "type": "LiteNet2"},
            "message": "Bem-vindo"
        }))
        .unwrap();

        assert_eq!(release.device.kind, BoardKind::LiteNet2);
        assert_eq!(release.message, "Bem-vindo");
    }

    #[test]
    fn test_create_user_keys() {
        let value = serde_json::to_value(CreateUser {
            name: "Ana".to_string(),
            registration: "42".to_string(),
            group_id: Some(2),
        })
        .unwrap();

        assert_eq!(value, json!({"name": "Ana", "registration": "42", "groupId": 2}));
    }
}
