use anyhow::Result;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use tracing_appender::non_blocking::WorkerGuard;

use crate::agent_hub::AgentHub;

pub mod logging;
pub mod server;
pub mod services;

pub struct Application {
    pub router: Router,
    pub hub: AgentHub,
    /// `None` serves plain HTTP/WS (TLS terminated by a reverse proxy)
    pub tls_config: Option<RustlsConfig>,
    pub bind_address: String,
    pub socket_addr: SocketAddr,
    /// Flushes the file log writer on drop
    pub log_guard: Option<WorkerGuard>,
}

pub async fn setup() -> Result<Application> {
    // Initialize rustls with ring crypto provider; a second install is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    // 1. Load Configuration
    let config = load_config();

    // 2. Setup Logging
    let (log_buffer, log_guard) = logging::setup(&config);

    // 3. Setup Services & Background Tasks
    let registry = services::setup(&config, log_buffer).await?;

    // 4. Setup Server (API & TLS)
    server::setup(config, registry, log_guard).await
}

fn load_config() -> crate::config::Config {
    use crate::config::Config;

    // Determine config directory
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_string())
    });
    let config_base = format!("{}/config", config_dir);

    eprintln!(
        "Config directory: {}, config base: {}",
        config_dir, config_base
    );

    match Config::from_file(&config_base) {
        Ok(cfg) => {
            eprintln!("Configuration loaded successfully from {}", config_base);
            cfg
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}, using defaults", e);
            Config::default()
        }
    }
}
