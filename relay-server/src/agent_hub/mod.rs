use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use gym_bridge_protocol::{
    AgentCommand, AgentResponse, BoardEvent, BridgeError, DeviceAction, ServerMessage,
    CLOSE_GOING_AWAY, CLOSE_NORMAL,
};

use crate::notifier::{NewNotification, Notification, Notifier};

pub mod monitor;

/// Frame queued for delivery on an agent's socket
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;

struct AgentConnection {
    agent_id: String,
    gym_id: i64,
    connection_id: u64,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    tx: OutboundSender,
}

impl AgentConnection {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            agent_id: self.agent_id.clone(),
            gym_id: self.gym_id,
            connection_id: self.connection_id,
            connected_at: self.connected_at,
            last_seen: self.last_seen,
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Public view of a connected agent
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentInfo {
    pub agent_id: String,
    pub gym_id: i64,
    pub connection_id: u64,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connected_agents: usize,
    pub pending_commands: usize,
    pub agents: Vec<AgentInfo>,
}

/// Registry of live agent connections and the commands relayed through them
#[derive(Clone)]
pub struct AgentHub {
    agents: Arc<RwLock<HashMap<String, AgentConnection>>>,
    boards: Arc<RwLock<HashMap<String, BTreeMap<String, BoardEvent>>>>,
    notifier: Arc<Notifier>,
    next_connection_id: Arc<AtomicU64>,
    dead_timeout: Duration,
}

impl AgentHub {
    pub fn new(notifier: Arc<Notifier>, dead_timeout: Duration) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            boards: Arc::new(RwLock::new(HashMap::new())),
            notifier,
            next_connection_id: Arc::new(AtomicU64::new(1)),
            dead_timeout,
        }
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register a freshly authenticated connection and return its connection id
    ///
    /// An older connection for the same agent is closed and its pending
    /// commands are failed.
    pub async fn register(&self, agent_id: &str, gym_id: i64, tx: OutboundSender) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let connection = AgentConnection {
            agent_id: agent_id.to_string(),
            gym_id,
            connection_id,
            connected_at: now,
            last_seen: now,
            tx,
        };

        {
            let mut agents = self.agents.write().await;
            // Old commands fail before the new connection becomes reachable
            if let Some(old) = agents.remove(agent_id) {
                tracing::warn!(
                    "Agent {} reconnected: replacing connection #{}",
                    agent_id,
                    old.connection_id
                );
                old.close(CLOSE_GOING_AWAY, "Replaced by a newer connection");
                self.notifier.fail_agent(agent_id).await;
            }
            agents.insert(agent_id.to_string(), connection);
        }

        tracing::info!(
            "Agent connected: {} (gym {}, connection #{})",
            agent_id,
            gym_id,
            connection_id
        );
        connection_id
    }

    /// Remove a connection; calls from an already replaced connection are ignored
    pub async fn unregister(&self, agent_id: &str, connection_id: u64) -> bool {
        let removed = {
            let mut agents = self.agents.write().await;
            match agents.get(agent_id) {
                Some(conn) if conn.connection_id == connection_id => agents.remove(agent_id),
                _ => None,
            }
        };

        if removed.is_none() {
            tracing::debug!(
                "Ignoring stale unregister for {} (connection #{})",
                agent_id,
                connection_id
            );
            return false;
        }

        let failed = self.notifier.fail_agent(agent_id).await;
        tracing::info!(
            "Agent disconnected: {} (connection #{}, {} pending commands failed)",
            agent_id,
            connection_id,
            failed
        );
        true
    }

    /// Record inbound traffic from an agent
    pub async fn touch(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(conn) = agents.get_mut(agent_id) {
            conn.last_seen = Utc::now();
        }
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    pub async fn list_connected(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().await;
        let mut list: Vec<AgentInfo> = agents.values().map(AgentConnection::info).collect();
        list.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        list
    }

    pub async fn agent_info(&self, agent_id: &str) -> Option<AgentInfo> {
        self.agents.read().await.get(agent_id).map(AgentConnection::info)
    }

    /// Close an agent's connection from the server side
    pub async fn disconnect(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().await.remove(agent_id);
        match removed {
            Some(conn) => {
                conn.close(CLOSE_NORMAL, "Disconnected by server");
                self.notifier.fail_agent(agent_id).await;
                tracing::info!("Agent {} disconnected by server", agent_id);
                true
            }
            None => false,
        }
    }

    pub async fn stats(&self) -> HubStats {
        let agents = self.list_connected().await;
        HubStats {
            connected_agents: agents.len(),
            pending_commands: self.notifier.len().await,
            agents,
        }
    }

    /// Relay a command to an agent and wait for the device result
    ///
    /// `device_ip` of `None` addresses the agent itself (HUB-level actions);
    /// the notification is then keyed by the agent id.
    pub async fn send_command(
        &self,
        agent_id: &str,
        device_ip: Option<String>,
        action: DeviceAction,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let tx = {
            let agents = self.agents.read().await;
            agents
                .get(agent_id)
                .map(|conn| conn.tx.clone())
                .ok_or_else(|| BridgeError::AgentNotConnected(agent_id.to_string()))?
        };

        let command = AgentCommand::new(action, device_ip, data);
        let address = command
            .device_ip
            .clone()
            .unwrap_or_else(|| agent_id.to_string());
        let frame = serde_json::to_string(&ServerMessage::Command(command.clone()))?;

        let waiter = self
            .notifier
            .add_notification(NewNotification {
                device_ip: address.clone(),
                command_id: action.as_str().to_string(),
                device_type: action.device_type(),
                agent_id: agent_id.to_string(),
                request_id: command.request_id.clone(),
                timeout,
            })
            .await?;

        tracing::debug!(
            "Sending {} to agent {} for {} (request {})",
            action,
            agent_id,
            address,
            command.request_id
        );

        if tx.send(OutboundFrame::Text(frame)).is_err() {
            self.notifier.cancel(waiter).await;
            return Err(BridgeError::AgentDisconnected(agent_id.to_string()));
        }

        let response = self.notifier.wait(waiter).await?;
        if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::Agent(
                response
                    .error
                    .unwrap_or_else(|| "Unknown device error".to_string()),
            ))
        }
    }

    /// Deliver a response frame received from an agent
    pub async fn handle_response(&self, agent_id: &str, response: AgentResponse) {
        let request_id = response.request_id.clone();
        match self.notifier.update_by_request(agent_id, response).await {
            Ok(key) => tracing::debug!(
                "Response for {} on {} from agent {}",
                key.command_id,
                key.device_ip,
                agent_id
            ),
            Err(e) => tracing::warn!(
                "Discarding response {} from agent {}: {}",
                request_id,
                agent_id,
                e
            ),
        }
    }

    /// Keep the latest scan result for a board, keyed by its IP
    pub async fn record_board(&self, agent_id: &str, event: BoardEvent) {
        tracing::debug!(
            "Agent {} reported board {} ({}, {})",
            agent_id,
            event.board.name,
            event.board.ip,
            event.board.kind
        );
        let mut boards = self.boards.write().await;
        boards
            .entry(agent_id.to_string())
            .or_default()
            .insert(event.board.ip.clone(), event);
    }

    pub async fn boards(&self, agent_id: &str) -> Vec<BoardEvent> {
        let boards = self.boards.read().await;
        boards
            .get(agent_id)
            .map(|by_ip| by_ip.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop agents silent for longer than the dead timeout
    pub async fn check_dead_connections(&self) -> Vec<String> {
        let now = Utc::now();
        let dead_timeout = self.dead_timeout;

        let dead: Vec<AgentConnection> = {
            let mut agents = self.agents.write().await;
            let ids: Vec<String> = agents
                .values()
                .filter(|conn| {
                    now.signed_duration_since(conn.last_seen)
                        .to_std()
                        .map(|silence| silence > dead_timeout)
                        .unwrap_or(false)
                })
                .map(|conn| conn.agent_id.clone())
                .collect();
            ids.iter().filter_map(|id| agents.remove(id)).collect()
        };

        let mut dropped = Vec::with_capacity(dead.len());
        for conn in dead {
            tracing::warn!(
                "Agent {} timed out (last seen {})",
                conn.agent_id,
                conn.last_seen
            );
            conn.close(CLOSE_GOING_AWAY, "Connection timed out");
            self.notifier.fail_agent(&conn.agent_id).await;
            dropped.push(conn.agent_id);
        }

        dropped
    }

    /// Pending notifications, for the admin API
    pub async fn pending(&self) -> Vec<Notification> {
        self.notifier.pending().await
    }

    /// Close every connection; used on graceful shutdown
    pub async fn shutdown(&self) {
        let drained: Vec<AgentConnection> = {
            let mut agents = self.agents.write().await;
            agents.drain().map(|(_, conn)| conn).collect()
        };

        for conn in drained {
            conn.close(CLOSE_GOING_AWAY, "Server shutting down");
            self.notifier.fail_agent(&conn.agent_id).await;
        }
    }
}
