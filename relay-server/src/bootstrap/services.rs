use anyhow::Result;
use std::sync::Arc;

use crate::agent_hub::{monitor::HubMonitor, AgentHub};
use crate::cert;
use crate::db::Database;
use crate::log_buffer::LogBuffer;
use crate::notifier::Notifier;

pub struct ServiceRegistry {
    pub db: Arc<Database>,
    pub hub: AgentHub,
    pub log_buffer: LogBuffer,
}

pub async fn setup(config: &crate::config::Config, log_buffer: LogBuffer) -> Result<ServiceRegistry> {
    if config.tls.enabled {
        let base_path = std::env::current_dir()?;
        cert::ensure_certificate(&config.tls, &base_path)?;
        tracing::info!("TLS certificate ready");
    }

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database.url.clone());
    let db = Arc::new(Database::new(&database_url).await?);
    tracing::info!("Database initialized: {}", database_url);

    let notifier = Arc::new(Notifier::new());
    let hub = AgentHub::new(notifier, config.bridge.dead_timeout());
    tracing::info!(
        "Agent hub initialized (ping every {}s, dead after {}s, default command timeout {}ms)",
        config.bridge.ping_interval_secs,
        config.bridge.dead_timeout_secs,
        config.bridge.command_timeout_ms
    );

    // Spawn dead-connection and notification expiry sweep
    let monitor = HubMonitor::new(hub.clone(), config.bridge.cleanup_interval());
    tokio::spawn(async move {
        monitor.run().await;
    });
    tracing::info!(
        "Hub monitor spawned ({}s interval)",
        config.bridge.cleanup_interval_secs
    );

    Ok(ServiceRegistry {
        db,
        hub,
        log_buffer,
    })
}
