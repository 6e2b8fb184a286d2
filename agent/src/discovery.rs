use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use gym_bridge_protocol::Board;

use crate::boards::{BoardRegistry, ScanDelta};
use crate::error::DeviceError;
use crate::toletus::ToletusClient;

/// Source of board scans
#[async_trait]
pub trait BoardScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<Board>, DeviceError>;
}

#[async_trait]
impl BoardScanner for ToletusClient {
    async fn scan(&self) -> Result<Vec<Board>, DeviceError> {
        self.discover_devices().await
    }
}

/// Periodically scans for boards and reconciles the registry
pub struct DiscoveryLoop {
    scanner: Arc<dyn BoardScanner>,
    registry: BoardRegistry,
    interval: Duration,
}

impl DiscoveryLoop {
    pub fn new(scanner: Arc<dyn BoardScanner>, registry: BoardRegistry, interval: Duration) -> Self {
        Self {
            scanner,
            registry,
            interval,
        }
    }

    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    /// Scan until `shutdown` flips to true; the first scan runs immediately
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.scan_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Board discovery stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Perform a single scan (public for testing)
    ///
    /// A failed scan leaves the registry untouched.
    pub async fn scan_once(&mut self) -> Result<ScanDelta, DeviceError> {
        match self.scanner.scan().await {
            Ok(boards) => Ok(self.registry.set_boards(boards)),
            Err(e) => {
                tracing::warn!("Board discovery failed: {}", e);
                Err(e)
            }
        }
    }
}
