//! Notification correlator
//!
//! Pairs a command dispatched to a gym device with the response that later
//! arrives over the agent connection. Entries are keyed by
//! `(agent_id, device_ip, command_id)`: gym LANs reuse the same private
//! addresses, so a device IP only identifies a device within one agent. At
//! most one unanswered entry per key exists at a time, which serializes
//! concurrent callers issuing the same command to the same device.
//!
//! The caller that registered an entry receives a [`NotificationWaiter`] and
//! is woken exactly once, either with the response, a timeout once the
//! entry's deadline passes, or a cancellation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use gym_bridge_protocol::{AgentResponse, BridgeError, DeviceType};

/// Identity of a notification: one device behind one agent, one command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NotificationKey {
    pub agent_id: String,
    pub device_ip: String,
    pub command_id: String,
}

impl NotificationKey {
    pub fn new(
        agent_id: impl Into<String>,
        device_ip: impl Into<String>,
        command_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            device_ip: device_ip.into(),
            command_id: command_id.into(),
        }
    }
}

/// Snapshot of a correlated command
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub device_ip: String,
    pub command_id: String,
    pub device_type: DeviceType,
    pub request_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub response: Option<AgentResponse>,
}

/// Parameters of a command about to be dispatched
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub device_ip: String,
    pub command_id: String,
    pub device_type: DeviceType,
    pub agent_id: String,
    pub request_id: String,
    pub timeout: Duration,
}

type WaiterResult = Result<AgentResponse, BridgeError>;

// Roughly 30 years, the same horizon tokio uses for a sleep that never fires
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;

struct Entry {
    notification: Notification,
    expires_at: Instant,
    timeout: Duration,
    waiter: Option<oneshot::Sender<WaiterResult>>,
}

impl Entry {
    fn timeout_error(&self) -> BridgeError {
        BridgeError::Timeout {
            device_ip: self.notification.device_ip.clone(),
            command: self.notification.command_id.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn wake(&mut self, result: WaiterResult) {
        if let Some(tx) = self.waiter.take() {
            // Receiver gone means the caller stopped waiting; nothing to report
            let _ = tx.send(result);
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<NotificationKey, Entry>,
    by_request: HashMap<String, NotificationKey>,
}

impl Inner {
    fn remove(&mut self, key: &NotificationKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.by_request.remove(&entry.notification.request_id);
        Some(entry)
    }

    fn remove_where<F>(&mut self, mut pred: F) -> Vec<Entry>
    where
        F: FnMut(&Entry) -> bool,
    {
        let keys: Vec<NotificationKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter().filter_map(|key| self.remove(key)).collect()
    }
}

/// Handle returned by [`Notifier::add_notification`]; await it with [`Notifier::wait`]
#[derive(Debug)]
pub struct NotificationWaiter {
    pub key: NotificationKey,
    pub request_id: String,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<WaiterResult>,
}

/// In-memory registry of in-flight device commands
///
/// One instance per server process, shared by handle. All operations take the
/// same lock.
#[derive(Default)]
pub struct Notifier {
    inner: Mutex<Inner>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending command
    ///
    /// Refused with [`BridgeError::CommandInFlight`] while an unanswered entry
    /// exists for the same agent, device and command. An answered entry that
    /// nobody consumed is replaced.
    pub async fn add_notification(
        &self,
        new: NewNotification,
    ) -> Result<NotificationWaiter, BridgeError> {
        let key = NotificationKey::new(&new.agent_id, &new.device_ip, &new.command_id);
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.entries.get(&key) {
            if existing.notification.response.is_none() {
                return Err(BridgeError::CommandInFlight {
                    device_ip: new.device_ip,
                    command: new.command_id,
                });
            }
            inner.remove(&key);
        }

        let now = Utc::now();
        let deadline = expiry_instant(new.timeout);
        let (tx, rx) = oneshot::channel();

        let notification = Notification {
            device_ip: new.device_ip,
            command_id: new.command_id,
            device_type: new.device_type,
            request_id: new.request_id.clone(),
            agent_id: new.agent_id,
            created_at: now,
            deadline: wall_clock_deadline(now, new.timeout),
            response: None,
        };

        inner.by_request.insert(new.request_id.clone(), key.clone());
        inner.entries.insert(
            key.clone(),
            Entry {
                notification,
                expires_at: deadline,
                timeout: new.timeout,
                waiter: Some(tx),
            },
        );

        Ok(NotificationWaiter {
            key,
            request_id: new.request_id,
            deadline,
            timeout: new.timeout,
            rx,
        })
    }

    /// Attach a response to the pending entry for `(agent_id, device_ip, command_id)`
    ///
    /// Fails with [`BridgeError::UnknownNotification`] when no such entry
    /// exists, when it was already answered, or when the response belongs to a
    /// different (stale) request.
    pub async fn update_notification(
        &self,
        agent_id: &str,
        device_ip: &str,
        command_id: &str,
        response: AgentResponse,
    ) -> Result<(), BridgeError> {
        let key = NotificationKey::new(agent_id, device_ip, command_id);
        let mut inner = self.inner.lock().await;
        Self::attach(&mut inner, &key, response)
    }

    /// Attach a response located by its request id, checking the answering agent
    pub async fn update_by_request(
        &self,
        agent_id: &str,
        response: AgentResponse,
    ) -> Result<NotificationKey, BridgeError> {
        let mut inner = self.inner.lock().await;

        let key = match inner.by_request.get(&response.request_id) {
            Some(key) => key.clone(),
            None => {
                return Err(BridgeError::UnknownNotification {
                    device_ip: String::new(),
                    command: format!("request {}", response.request_id),
                })
            }
        };

        if key.agent_id != agent_id {
            return Err(BridgeError::UnknownNotification {
                device_ip: key.device_ip,
                command: key.command_id,
            });
        }

        Self::attach(&mut inner, &key, response)?;
        Ok(key)
    }

    fn attach(
        inner: &mut Inner,
        key: &NotificationKey,
        response: AgentResponse,
    ) -> Result<(), BridgeError> {
        let unknown = || BridgeError::UnknownNotification {
            device_ip: key.device_ip.clone(),
            command: key.command_id.clone(),
        };

        let entry = inner.entries.get_mut(key).ok_or_else(unknown)?;
        if entry.notification.response.is_some()
            || entry.notification.request_id != response.request_id
        {
            return Err(unknown());
        }

        entry.notification.response = Some(response.clone());
        entry.wake(Ok(response));
        Ok(())
    }

    /// Whether an entry exists, optionally requiring that it was answered
    pub async fn has_notification(
        &self,
        agent_id: &str,
        device_ip: &str,
        command_id: &str,
        want_response: bool,
    ) -> bool {
        let key = NotificationKey::new(agent_id, device_ip, command_id);
        let inner = self.inner.lock().await;
        match inner.entries.get(&key) {
            Some(entry) => !want_response || entry.notification.response.is_some(),
            None => false,
        }
    }

    pub async fn get_notification(
        &self,
        agent_id: &str,
        device_ip: &str,
        command_id: &str,
    ) -> Option<Notification> {
        let key = NotificationKey::new(agent_id, device_ip, command_id);
        let inner = self.inner.lock().await;
        inner.entries.get(&key).map(|entry| entry.notification.clone())
    }

    /// Remove an entry, freeing the slot; a still-waiting caller gets `Cancelled`
    pub async fn clear_notification(
        &self,
        agent_id: &str,
        device_ip: &str,
        command_id: &str,
    ) -> bool {
        let key = NotificationKey::new(agent_id, device_ip, command_id);
        let mut inner = self.inner.lock().await;
        match inner.remove(&key) {
            Some(mut entry) => {
                entry.wake(Err(BridgeError::Cancelled {
                    device_ip: key.device_ip,
                    command: key.command_id,
                }));
                true
            }
            None => false,
        }
    }

    /// Wait for the response of a registered command
    ///
    /// The entry is consumed whatever the outcome. Past the deadline the entry
    /// is removed and `Timeout` is returned.
    pub async fn wait(&self, waiter: NotificationWaiter) -> Result<AgentResponse, BridgeError> {
        let NotificationWaiter {
            key,
            request_id,
            deadline,
            timeout,
            rx,
        } = waiter;

        let outcome = tokio::time::timeout_at(deadline, rx).await;
        self.remove_request(&request_id).await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Cancelled {
                device_ip: key.device_ip,
                command: key.command_id,
            }),
            Err(_) => Err(BridgeError::Timeout {
                device_ip: key.device_ip,
                command: key.command_id,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Drop a registration that will never be dispatched
    pub async fn cancel(&self, waiter: NotificationWaiter) {
        self.remove_request(&waiter.request_id).await;
    }

    async fn remove_request(&self, request_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(key) = inner.by_request.get(request_id).cloned() {
            inner.remove(&key);
        }
    }

    /// Remove entries past their deadline and report the timeout to their waiters
    pub async fn expire_overdue(&self) -> Vec<Notification> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        inner
            .remove_where(|entry| entry.expires_at <= now)
            .into_iter()
            .map(|mut entry| {
                let err = entry.timeout_error();
                entry.wake(Err(err));
                entry.notification
            })
            .collect()
    }

    /// Fail every entry owned by a disconnected agent
    pub async fn fail_agent(&self, agent_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let failed = inner.remove_where(|entry| entry.notification.agent_id == agent_id);
        let count = failed.len();

        for mut entry in failed {
            entry.wake(Err(BridgeError::AgentDisconnected(agent_id.to_string())));
        }

        count
    }

    /// All entries, oldest first
    pub async fn pending(&self) -> Vec<Notification> {
        let inner = self.inner.lock().await;
        let mut list: Vec<Notification> = inner
            .entries
            .values()
            .map(|entry| entry.notification.clone())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Instant at which an entry expires; saturates far in the future
fn expiry_instant(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Reported deadline; saturates at the latest representable time
fn wall_clock_deadline(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
