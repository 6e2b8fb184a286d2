use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gym_bridge_protocol::constants::bearer;
use gym_bridge_protocol::{AgentMessage, BoardEvent, HEADER_AUTHORIZATION, HEADER_CLIENT_ID};

use crate::config::{AgentIdentity, ServerLinkConfig};
use crate::dispatcher::Dispatcher;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay schedule between connection attempts
///
/// `max_attempts` failures in a row earn one `cooldown` pause, after which the
/// count starts over.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: u32,
    cooldown: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            cooldown,
            attempts: 0,
        }
    }

    pub fn from_config(config: &ServerLinkConfig) -> Self {
        Self::new(
            config.reconnect_interval(),
            config.max_reconnect_attempts,
            config.cooldown(),
        )
    }

    /// Record a failed attempt and return how long to wait before the next one
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.attempts = 0;
            self.cooldown
        } else {
            self.interval
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// How a connected session ended
#[derive(Debug, PartialEq)]
pub enum SessionEnd {
    /// Local shutdown requested
    Shutdown,
    /// The server closed the socket, with its close code if any
    Closed(Option<u16>),
}

/// Outbound link from the agent to the relay server
pub struct RelayLink {
    server: ServerLinkConfig,
    identity: AgentIdentity,
    dispatcher: Arc<Dispatcher>,
}

impl RelayLink {
    pub fn new(server: ServerLinkConfig, identity: AgentIdentity, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            server,
            identity,
            dispatcher,
        }
    }

    async fn connect(&self) -> Result<RelaySocket> {
        let mut request = self
            .server
            .url
            .as_str()
            .into_client_request()
            .context("Invalid server URL")?;

        let headers = request.headers_mut();
        headers.insert(
            HEADER_CLIENT_ID,
            HeaderValue::from_str(&self.identity.id).context("Invalid agent id")?,
        );
        headers.insert(
            HEADER_AUTHORIZATION,
            HeaderValue::from_str(&bearer(&self.identity.token)).context("Invalid agent token")?,
        );

        match tokio_tungstenite::connect_async(request).await {
            Ok((socket, _)) => Ok(socket),
            Err(tungstenite::Error::Http(response)) => anyhow::bail!(
                "Server refused the connection with HTTP {}",
                response.status()
            ),
            Err(e) => Err(e).context("WebSocket connect failed"),
        }
    }

    /// Keep the link up until `shutdown` flips to true
    pub async fn run(
        &self,
        mut board_events: mpsc::Receiver<BoardEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut policy = ReconnectPolicy::from_config(&self.server);

        loop {
            if *shutdown.borrow() {
                return;
            }

            tracing::info!("Connecting to {} as {}", self.server.url, self.identity.id);
            match self.connect().await {
                Ok(socket) => {
                    policy.reset();
                    tracing::info!("Connected to relay server");
                    self.spawn_reader_check();

                    match self.session(socket, &mut board_events, &mut shutdown).await {
                        Ok(SessionEnd::Shutdown) => return,
                        Ok(SessionEnd::Closed(code)) => {
                            tracing::warn!("Relay closed the connection (code {:?})", code)
                        }
                        Err(e) => tracing::warn!("Relay connection lost: {:#}", e),
                    }
                }
                Err(e) => tracing::error!("{:#}", e),
            }

            let delay = policy.next_delay();
            tracing::info!("Reconnecting in {}s", delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Log whether the default reader answers, without holding up the link
    fn spawn_reader_check(&self) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let reader = dispatcher.reader(None).await;
            if reader.check_status().await {
                tracing::info!("Reader {} online", reader.base_url());
            } else {
                tracing::warn!("Reader {} not answering", reader.base_url());
            }
        });
    }

    /// Serve one connected socket
    ///
    /// Each command runs on its own task; responses and board events share the
    /// single writer below.
    pub async fn session(
        &self,
        socket: RelaySocket,
        board_events: &mut mpsc::Receiver<BoardEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let mut ping = tokio::time::interval(self.server.ping_interval());
        // First tick completes immediately
        ping.tick().await;

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let dispatcher = self.dispatcher.clone();
                        let out_tx = out_tx.clone();
                        let text = text.as_str().to_string();
                        tokio::spawn(async move {
                            if let Some(response) = dispatcher.handle_frame(&text).await {
                                match serde_json::to_string(&AgentMessage::Response(response)) {
                                    Ok(json) => {
                                        let _ = out_tx.send(json);
                                    }
                                    Err(e) => tracing::error!("Failed to encode response: {}", e),
                                }
                            }
                        });
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(SessionEnd::Closed(frame.map(|f| u16::from(f.code))));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Read from relay failed"),
                    None => return Ok(SessionEnd::Closed(None)),
                },
                Some(json) = out_rx.recv() => {
                    sink.send(Message::text(json)).await.context("Send to relay failed")?;
                }
                Some(event) = board_events.recv() => {
                    let json = serde_json::to_string(&AgentMessage::Board(event))?;
                    sink.send(Message::text(json)).await.context("Send to relay failed")?;
                }
                _ = ping.tick() => {
                    sink.send(Message::Ping(Default::default())).await.context("Ping failed")?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Agent shutting down".into(),
                            })))
                            .await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::toletus::ToletusClient;
    use gym_bridge_protocol::{AgentResponse, Board, BoardKind};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    #[test]
    fn test_policy_cools_down_after_max_attempts() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(5), 3, Duration::from_secs(60));

        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
        assert_eq!(policy.next_delay(), Duration::from_secs(60));
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_policy_reset_on_connect() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(5), 2, Duration::from_secs(60));
        policy.next_delay();
        policy.reset();

        assert_eq!(policy.next_delay(), Duration::from_secs(5));
    }

    fn link(port: u16) -> RelayLink {
        let http = reqwest::Client::new();
        let hub = Arc::new(ToletusClient::new(http.clone(), "http://127.0.0.1:9"));
        let reader = ReaderConfig {
            ip: "127.0.0.1".to_string(),
            port: 9,
            ..ReaderConfig::default()
        };
        let server = ServerLinkConfig {
            url: format!("ws://127.0.0.1:{}/agent", port),
            reconnect_interval_secs: 1,
            ..ServerLinkConfig::default()
        };
        let identity = AgentIdentity {
            id: "academia-1".to_string(),
            token: "academia-1-secret".to_string(),
        };
        RelayLink::new(server, identity, Arc::new(Dispatcher::new(reader, http, hub)))
    }

    #[tokio::test]
    async fn test_session_answers_commands_and_forwards_boards() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let headers = Arc::new(Mutex::new(None));

        let captured = headers.clone();
        let relay = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, move |req: &Request, resp: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                *captured.lock().unwrap() =
                    Some((header(HEADER_CLIENT_ID), header(HEADER_AUTHORIZATION)));
                Ok(resp)
            })
            .await
            .unwrap();

            ws.send(Message::text(
                r#"{"type":"command","requestId":"req-1","action":"openDoor","data":{}}"#,
            ))
            .await
            .unwrap();

            let mut frames = Vec::new();
            while frames.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        frames.push(serde_json::from_str::<AgentMessage>(text.as_str()).unwrap())
                    }
                    Some(Ok(_)) => {}
                    other => panic!("relay socket ended early: {:?}", other),
                }
            }
            ws.close(None).await.unwrap();
            frames
        });

        let link = link(port);
        let (board_tx, mut board_rx) = mpsc::channel(8);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        board_tx
            .send(BoardEvent {
                board: Board {
                    id: 1,
                    name: "Entrada".to_string(),
                    ip: "192.168.0.100".to_string(),
                    port: 7878,
                    serial_number: String::new(),
                    kind: BoardKind::LiteNet2,
                    connected: true,
                },
                scanned_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let socket = link.connect().await.unwrap();
        let end = link
            .session(socket, &mut board_rx, &mut shutdown_rx)
            .await
            .unwrap();
        let frames = relay.await.unwrap();

        assert!(matches!(end, SessionEnd::Closed(_)));
        assert_eq!(
            *headers.lock().unwrap(),
            Some((
                Some("academia-1".to_string()),
                Some("Bearer academia-1-secret".to_string())
            ))
        );

        let response: Vec<&AgentResponse> = frames
            .iter()
            .filter_map(|f| match f {
                AgentMessage::Response(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(response.len(), 1);
        assert_eq!(response[0].request_id, "req-1");
        assert!(!response[0].success);
        assert!(frames
            .iter()
            .any(|f| matches!(f, AgentMessage::Board(e) if e.board.ip == "192.168.0.100")));
    }

    #[tokio::test]
    async fn test_rejected_upgrade_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = tokio_tungstenite::accept_hdr_async(tcp, |_req: &Request, _resp: Response| {
                let mut reject = tokio_tungstenite::tungstenite::handshake::server::ErrorResponse::new(None);
                *reject.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED;
                Err(reject)
            })
            .await;
        });

        let err = link(port).connect().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown_while_waiting() {
        // Nothing listens here, so the link sits in its reconnect delay
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let link = link(port);
        let (_board_tx, board_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { link.run(board_rx, shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("link did not stop")
            .unwrap();
    }
}
