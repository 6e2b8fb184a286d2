//! HTTP client for the Toletus HUB fronting the LiteNet turnstile boards

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use gym_bridge_protocol::{Board, BoardKind};

use crate::error::DeviceError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Envelope the HUB wraps every answer in
#[derive(Debug, Default, Deserialize)]
struct HubEnvelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    response: Option<HubResult>,
}

#[derive(Debug, Default, Deserialize)]
struct HubResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Board as the HUB command controllers expect it in a request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HubBoard<'a> {
    id: i32,
    name: &'a str,
    ip: &'a str,
    serial_number: &'a str,
    port: u16,
    #[serde(rename = "Type")]
    kind: u8,
    connected: bool,
}

impl<'a> From<&'a Board> for HubBoard<'a> {
    fn from(board: &'a Board) -> Self {
        Self {
            id: board.id,
            name: &board.name,
            ip: &board.ip,
            serial_number: &board.serial_number,
            port: board.port,
            kind: board.kind.code(),
            connected: true,
        }
    }
}

/// Turnstile release direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Entry,
    Exit,
    EntryAndExit,
}

impl Release {
    fn endpoint(&self) -> &'static str {
        match self {
            Release::Entry => "ReleaseEntry",
            Release::Exit => "ReleaseExit",
            Release::EntryAndExit => "ReleaseEntryAndExit",
        }
    }
}

fn is_not_connected(err: &DeviceError) -> bool {
    match err {
        DeviceError::Status(_, body) => {
            body.contains("not connected") || body.contains("not in connected")
        }
        _ => false,
    }
}

fn is_already_connected(err: &DeviceError) -> bool {
    matches!(err, DeviceError::Status(_, body) if body.contains("already connected"))
}

pub struct ToletusClient {
    http: reqwest::Client,
    base_url: String,
}

impl ToletusClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// HTTP client for the HUB; its stock certificate is self-signed
    pub fn build_http(accept_invalid_certs: bool) -> Result<reqwest::Client, DeviceError> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| DeviceError::Unreachable(format!("HUB client setup failed: {}", e)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<HubEnvelope, DeviceError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DeviceError::from_reqwest(&self.base_url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeviceError::from_reqwest(&self.base_url, e))?;

        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(HubEnvelope::default());
        }
        serde_json::from_str(&body).map_err(|e| DeviceError::Malformed(format!("{}: {}", e, body)))
    }

    /// Scan the LAN for LiteNet boards
    pub async fn discover_devices(&self) -> Result<Vec<Board>, DeviceError> {
        let envelope = self
            .execute(
                self.http.get(self.url("/DeviceConnection/DiscoverDevices")),
                DISCOVER_TIMEOUT,
            )
            .await?;

        let boards: Vec<Board> = match envelope.data {
            Value::Null => Vec::new(),
            data => serde_json::from_value(data)
                .map_err(|e| DeviceError::Malformed(format!("discovered boards: {}", e)))?,
        };
        tracing::info!("HUB discovered {} board(s)", boards.len());
        Ok(boards)
    }

    /// Boards the HUB currently holds a connection to
    pub async fn get_devices(&self) -> Result<Value, DeviceError> {
        let envelope = self
            .execute(
                self.http.get(self.url("/DeviceConnection/GetDevices")),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn connect_device(&self, ip: &str, kind: BoardKind) -> Result<Value, DeviceError> {
        tracing::info!("Connecting HUB to {} ({})", ip, kind);
        let mut query = vec![("ip", ip.to_string()), ("type", kind.name().to_string())];
        if kind == BoardKind::LiteNet3 {
            // LiteNet3 boards are looked up by their /24 network
            let network = match ip.rsplit_once('.') {
                Some((prefix, _)) => format!("{}.0", prefix),
                None => ip.to_string(),
            };
            query.push(("network", network));
        }

        let envelope = self
            .execute(
                self.http
                    .post(self.url("/DeviceConnection/Connect"))
                    .query(&query)
                    .json(&serde_json::json!({})),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn disconnect_device(&self, ip: &str, kind: BoardKind) -> Result<Value, DeviceError> {
        tracing::info!("Disconnecting HUB from {} ({})", ip, kind);
        let envelope = self
            .execute(
                self.http
                    .post(self.url("/DeviceConnection/Disconnect"))
                    .query(&[("ip", ip), ("type", kind.name())])
                    .json(&serde_json::json!({})),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(envelope.data)
    }

    /// POST a board to one of its command endpoints and read `response.success`
    async fn board_command(
        &self,
        board: &Board,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<bool, DeviceError> {
        let envelope = self
            .execute(
                self.http
                    .post(self.url(path))
                    .query(query)
                    .json(&HubBoard::from(board)),
                DEFAULT_TIMEOUT,
            )
            .await?;
        Ok(envelope.response.map(|r| r.success).unwrap_or(false))
    }

    async fn release_once(
        &self,
        board: &Board,
        release: Release,
        message: &str,
    ) -> Result<bool, DeviceError> {
        let path = format!("{}/{}", board.kind.commands_path(), release.endpoint());
        self.board_command(board, &path, &[("message", message.to_string())])
            .await
    }

    /// Find the board in a fresh scan and make sure the HUB is connected to it
    ///
    /// Falls back to the caller's copy when the scan does not see the board.
    async fn rediscover_and_connect(&self, board: &Board) -> Board {
        let target = match self.discover_devices().await {
            Ok(found) => match found.into_iter().find(|b| b.ip == board.ip) {
                Some(discovered) => discovered,
                None => {
                    tracing::warn!("Board {} not seen by discovery", board.ip);
                    board.clone()
                }
            },
            Err(e) => {
                tracing::warn!("Discovery before release failed: {}", e);
                board.clone()
            }
        };

        match self.connect_device(&target.ip, board.kind).await {
            Ok(_) => {}
            Err(e) if is_already_connected(&e) => {
                tracing::debug!("Board {} already connected", target.ip)
            }
            Err(e) => tracing::warn!("Connecting to {} failed, releasing anyway: {}", target.ip, e),
        }
        target
    }

    /// Release a turnstile; retried once after reconnecting when the HUB lost the board
    pub async fn release(
        &self,
        board: &Board,
        release: Release,
        message: &str,
    ) -> Result<bool, DeviceError> {
        tracing::info!(
            "Releasing {:?} on {} ({}), message {:?}",
            release,
            board.name,
            board.ip,
            message
        );

        if release == Release::EntryAndExit {
            let target = self.rediscover_and_connect(board).await;
            return self.release_once(&target, release, message).await;
        }

        match self.release_once(board, release, message).await {
            Err(e) if is_not_connected(&e) => {
                tracing::info!("HUB is not connected to {}, reconnecting", board.ip);
                let target = self.rediscover_and_connect(board).await;
                self.release_once(&target, release, message).await
            }
            other => other,
        }
    }

    pub async fn release_entry(&self, board: &Board, message: &str) -> Result<bool, DeviceError> {
        self.release(board, Release::Entry, message).await
    }

    pub async fn release_exit(&self, board: &Board, message: &str) -> Result<bool, DeviceError> {
        self.release(board, Release::Exit, message).await
    }

    pub async fn release_entry_and_exit(
        &self,
        board: &Board,
        message: &str,
    ) -> Result<bool, DeviceError> {
        self.release(board, Release::EntryAndExit, message).await
    }

    /// Point the HUB's event webhook at `endpoint`
    pub async fn set_webhook(&self, endpoint: &str) -> Result<bool, DeviceError> {
        tracing::info!("Setting HUB webhook to {}", endpoint);
        self.execute(
            self.http
                .post(self.url("/Webhook/SetEndpoint"))
                .query(&[("endpoint", endpoint)])
                .json(&serde_json::json!({})),
            DEFAULT_TIMEOUT,
        )
        .await?;
        Ok(true)
    }

    pub async fn set_entry_clockwise(
        &self,
        board: &Board,
        entry_clockwise: bool,
    ) -> Result<bool, DeviceError> {
        self.board_command(
            board,
            "/LiteNet2Commands/SetEntryClockwise",
            &[("entryClockwise", entry_clockwise.to_string())],
        )
        .await
    }

    pub async fn set_flow_control(
        &self,
        board: &Board,
        controlled_flow: i32,
    ) -> Result<bool, DeviceError> {
        self.board_command(
            board,
            "/LiteNet2Commands/SetFlowControl",
            &[("controlledFlow", controlled_flow.to_string())],
        )
        .await
    }

    pub async fn check_status(&self) -> bool {
        match self
            .http
            .get(self.url("/DeviceConnection/GetNetworks"))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("HUB {} offline: {}", self.base_url, e);
                false
            }
        }
    }
}
