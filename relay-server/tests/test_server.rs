// test_server.rs
//
// Test helper for spawning relay-server instances on an ephemeral port, plus a
// minimal WebSocket agent to drive them.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use gym_bridge_relay_server::{
    agent_hub::AgentHub,
    api::{create_router, AppState},
    config::Config,
    db::Database,
    log_buffer::create_log_buffer,
    models::NewAgent,
    notifier::Notifier,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gym_bridge_protocol::constants::bearer;
use gym_bridge_protocol::{AgentCommand, AgentMessage, AgentResponse, ServerMessage};

/// Test server instance with a dynamically allocated port
#[allow(dead_code)]
pub struct TestServer {
    pub http_port: u16,
    pub db: Arc<Database>,
    pub hub: AgentHub,
    server_handle: Option<JoinHandle<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(Config::default()).await
    }

    pub async fn start_with(config: Config) -> Result<Self> {
        // Bind to port 0 to get an available port immediately
        let http_listener = TcpListener::bind("127.0.0.1:0")?;
        let http_port = http_listener.local_addr()?.port();

        let db = Arc::new(Database::new("sqlite::memory:").await?);
        let hub = AgentHub::new(
            Arc::new(Notifier::new()),
            Duration::from_secs(config.bridge.dead_timeout_secs),
        );

        let state = AppState {
            db: db.clone(),
            hub: hub.clone(),
            log_buffer: create_log_buffer(),
            allowed_origins: vec![],
            cors_disabled: true,
            config: Arc::new(config),
        };
        let app = create_router(state);

        let server_handle = tokio::spawn(async move {
            http_listener
                .set_nonblocking(true)
                .expect("Failed to set non-blocking");
            let listener = tokio::net::TcpListener::from_std(http_listener)
                .expect("Failed to convert listener");

            axum::serve(listener, app)
                .await
                .expect("HTTP server failed");
        });

        // Wait a bit for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(TestServer {
            http_port,
            db,
            hub,
            server_handle: Some(server_handle),
        })
    }

    pub fn http_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.http_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/agent", self.http_port)
    }

    /// Store credentials for an agent
    pub async fn register_agent(&self, agent_id: &str, gym_id: i64, token: &str) -> Result<()> {
        self.db
            .upsert_agent(&NewAgent {
                agent_id: agent_id.to_string(),
                gym_id,
                token: token.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Wait until the hub sees the agent (registration happens after the upgrade)
    pub async fn wait_for_agent(&self, agent_id: &str) -> bool {
        for _ in 0..50 {
            if self.hub.is_connected(agent_id).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    pub async fn shutdown(mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

/// Minimal agent speaking the relay protocol over tokio-tungstenite
#[allow(dead_code)]
pub struct FakeAgent {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[allow(dead_code)]
impl FakeAgent {
    pub async fn connect(
        url: &str,
        agent_id: &str,
        token: &str,
    ) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("x-client-id", HeaderValue::from_str(agent_id).expect("header"));
        request
            .headers_mut()
            .insert("authorization", HeaderValue::from_str(&bearer(token)).expect("header"));

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(Self { ws })
    }

    /// Next command frame, skipping pings
    pub async fn next_command(&mut self) -> Option<AgentCommand> {
        while let Some(msg) = self.ws.next().await {
            match msg.ok()? {
                Message::Text(text) => {
                    let ServerMessage::Command(cmd) = serde_json::from_str(&text).ok()?;
                    return Some(cmd);
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    }

    pub async fn send(&mut self, message: &AgentMessage) {
        let text = serde_json::to_string(message).expect("serialize");
        self.ws.send(Message::text(text)).await.expect("send");
    }

    pub async fn respond(&mut self, response: AgentResponse) {
        self.send(&AgentMessage::Response(response)).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_string())).await.expect("send");
    }

    /// Wait for the close frame sent by the server
    pub async fn expect_close(&mut self) -> Option<u16> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
