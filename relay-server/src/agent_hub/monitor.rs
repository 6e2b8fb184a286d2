use std::time::Duration;

use super::AgentHub;

/// Periodic sweep over the hub: drops silent agents and expires overdue commands
pub struct HubMonitor {
    hub: AgentHub,
    check_interval: Duration,
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub dead_agents: Vec<String>,
    pub expired_commands: usize,
}

impl HubMonitor {
    pub fn new(hub: AgentHub, check_interval: Duration) -> Self {
        Self {
            hub,
            check_interval,
        }
    }

    /// Start the monitoring loop
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.check_interval);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    /// Perform a single sweep (public for testing)
    pub async fn sweep(&self) -> SweepReport {
        let dead_agents = self.hub.check_dead_connections().await;
        let expired = self.hub.notifier().expire_overdue().await;

        for notification in &expired {
            tracing::warn!(
                "Command {} for {} expired without a response (agent {}, request {})",
                notification.command_id,
                notification.device_ip,
                notification.agent_id,
                notification.request_id
            );
        }

        if !dead_agents.is_empty() {
            tracing::info!("Dropped silent agents: {:?}", dead_agents);
        }

        SweepReport {
            dead_agents,
            expired_commands: expired.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_hub::OutboundFrame;
    use crate::notifier::{NewNotification, Notifier};
    use gym_bridge_protocol::DeviceType;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sweep_drops_silent_agent() {
        let hub = AgentHub::new(Arc::new(Notifier::new()), Duration::from_millis(50));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register("academia-1", 7, tx).await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        let monitor = HubMonitor::new(hub.clone(), Duration::from_secs(60));
        let report = monitor.sweep().await;

        assert_eq!(report.dead_agents, vec!["academia-1".to_string()]);
        assert!(!hub.is_connected("academia-1").await);
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Close { .. })));
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_agent() {
        let hub = AgentHub::new(Arc::new(Notifier::new()), Duration::from_secs(90));
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register("academia-1", 7, tx).await;

        let monitor = HubMonitor::new(hub.clone(), Duration::from_secs(60));
        let report = monitor.sweep().await;

        assert!(report.dead_agents.is_empty());
        assert!(hub.is_connected("academia-1").await);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_commands() {
        let notifier = Arc::new(Notifier::new());
        let hub = AgentHub::new(notifier.clone(), Duration::from_secs(90));
        notifier
            .add_notification(NewNotification {
                device_ip: "192.168.2.142".to_string(),
                command_id: "loadUsers".to_string(),
                device_type: DeviceType::ControlId,
                agent_id: "academia-1".to_string(),
                request_id: "req-1".to_string(),
                timeout: Duration::from_millis(10),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let monitor = HubMonitor::new(hub, Duration::from_secs(60));
        let report = monitor.sweep().await;

        assert_eq!(report.expired_commands, 1);
        assert!(notifier.is_empty().await);
    }
}
