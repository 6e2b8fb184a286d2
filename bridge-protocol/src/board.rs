// Location: bridge-protocol/src/board.rs
// Purpose: LiteNet board model as reported by the Toletus HUB
// Why: The agent reconciles scans of these boards and forwards them to the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// LiteNet controller generation
///
/// The HUB reports the kind as a number (`0`, `1`, `2`) in discovery results
/// but expects the name (`LiteNet2`) in connect/disconnect query strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "KindRepr", into = "u8")]
pub enum BoardKind {
    LiteNet1,
    LiteNet2,
    LiteNet3,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<KindRepr> for BoardKind {
    type Error = String;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Code(code) => BoardKind::from_code(code),
            KindRepr::Name(name) => name.parse(),
        }
    }
}

impl From<BoardKind> for u8 {
    fn from(kind: BoardKind) -> Self {
        kind.code()
    }
}

impl BoardKind {
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(BoardKind::LiteNet1),
            1 => Ok(BoardKind::LiteNet2),
            2 => Ok(BoardKind::LiteNet3),
            other => Err(format!("Unknown board type code: {}", other)),
        }
    }

    /// Numeric type used in HUB payloads
    pub fn code(&self) -> u8 {
        match self {
            BoardKind::LiteNet1 => 0,
            BoardKind::LiteNet2 => 1,
            BoardKind::LiteNet3 => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BoardKind::LiteNet1 => "LiteNet1",
            BoardKind::LiteNet2 => "LiteNet2",
            BoardKind::LiteNet3 => "LiteNet3",
        }
    }

    /// HUB controller prefix for board commands (e.g. `/LiteNet2Commands`)
    pub fn commands_path(&self) -> &'static str {
        match self {
            BoardKind::LiteNet1 => "/LiteNet1Commands",
            BoardKind::LiteNet2 => "/LiteNet2Commands",
            BoardKind::LiteNet3 => "/LiteNet3Commands",
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for BoardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LiteNet1" => Ok(BoardKind::LiteNet1),
            "LiteNet2" => Ok(BoardKind::LiteNet2),
            "LiteNet3" => Ok(BoardKind::LiteNet3),
            other => Err(format!("Unknown board type: {}", other)),
        }
    }
}

/// A networked turnstile controller; identity is its IP address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub serial_number: String,
    #[serde(rename = "type")]
    pub kind: BoardKind,
    #[serde(default)]
    pub connected: bool,
}

impl Board {
    /// `/24` network the board lives on (LiteNet3 connect needs it)
    pub fn network(&self) -> String {
        match self.ip.rsplit_once('.') {
            Some((prefix, _)) => format!("{}.0", prefix),
            None => self.ip.clone(),
        }
    }
}

/// Board sighting forwarded by an agent after a discovery scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardEvent {
    pub board: Board,
    pub scanned_at: DateTime<Utc>,
}
