use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use gym_bridge_agent::boards::BoardRegistry;
use gym_bridge_agent::config::AgentConfig;
use gym_bridge_agent::connection::RelayLink;
use gym_bridge_agent::discovery::DiscoveryLoop;
use gym_bridge_agent::dispatcher::Dispatcher;
use gym_bridge_agent::logging;
use gym_bridge_agent::toletus::ToletusClient;
use gym_bridge_protocol::BoardEvent;

/// Board events waiting for the relay link; older scans are dropped when full
const BOARD_EVENT_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
    let config = AgentConfig::from_file(PathBuf::from(&config_dir).join("config"))
        .with_context(|| format!("Failed to load configuration from {}", config_dir))?;

    let _log_guard = logging::init(&config.logging);
    tracing::info!(
        "Gym bridge agent {} starting (server {}, reader {})",
        config.agent.id,
        config.server.url,
        config.reader.ip
    );

    let reader_http = reqwest::Client::builder()
        .build()
        .context("Failed to build reader HTTP client")?;
    let hub_http = ToletusClient::build_http(config.toletus.accept_invalid_certs)?;
    let hub = Arc::new(ToletusClient::new(hub_http, config.toletus.hub_url.clone()));
    let dispatcher = Arc::new(Dispatcher::new(config.reader.clone(), reader_http, hub.clone()));

    // Open the default reader's session up front so the first command is fast
    let reader = dispatcher.reader(None).await;
    if reader.check_status().await {
        if let Err(e) = reader.login().await {
            tracing::warn!("Initial reader login failed: {}", e);
        }
    } else {
        tracing::warn!("Reader {} not answering at startup", reader.base_url());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (board_tx, board_rx) = mpsc::channel::<BoardEvent>(BOARD_EVENT_BUFFER);

    let discovery_task = if config.discovery.enabled {
        let mut registry = BoardRegistry::new();
        registry.on_board(move |board| {
            let event = BoardEvent {
                board: board.clone(),
                scanned_at: Utc::now(),
            };
            if board_tx.try_send(event).is_err() {
                tracing::debug!("Board event for {} dropped, relay link busy", board.ip);
            }
        });

        let discovery = DiscoveryLoop::new(hub, registry, config.discovery.interval());
        Some(tokio::spawn(discovery.run(shutdown_rx.clone())))
    } else {
        tracing::info!("Board discovery disabled");
        None
    };

    let link = RelayLink::new(config.server.clone(), config.agent.clone(), dispatcher);
    let link_task = tokio::spawn(async move { link.run(board_rx, shutdown_rx).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = link_task.await;
    if let Some(task) = discovery_task {
        let _ = task.await;
    }

    tracing::info!("Agent stopped");
    Ok(())
}
