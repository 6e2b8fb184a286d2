use tracing_appender::non_blocking::WorkerGuard;

use crate::log_buffer::{create_log_buffer, LogBuffer};
use crate::logging;

pub fn setup(config: &crate::config::Config) -> (LogBuffer, Option<WorkerGuard>) {
    let log_buffer = create_log_buffer();
    let guard = logging::init(&config.logging, log_buffer.clone());

    tracing::info!("Starting Gym Bridge relay server...");
    tracing::info!("Server Version: {}", env!("BUILD_INFO"));

    if config.logging.enabled {
        tracing::info!(
            "File logging enabled: directory={}, prefix={}, rotation={}",
            config.logging.directory,
            config.logging.file_prefix,
            config.logging.rotation
        );
    }

    (log_buffer, guard)
}
