use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

use crate::api::{create_router, AppState};
use crate::bootstrap::{services::ServiceRegistry, Application};

pub async fn setup(
    config: crate::config::Config,
    registry: ServiceRegistry,
    log_guard: Option<WorkerGuard>,
) -> Result<Application> {
    let server_address = config.server_address();
    tracing::info!("Server will listen on: {}", server_address);

    let allowed_origins = config.allowed_origins();
    let cors_disabled = config.cors.disable;

    let app_state = AppState {
        db: registry.db,
        hub: registry.hub.clone(),
        log_buffer: registry.log_buffer,
        allowed_origins: allowed_origins.clone(),
        cors_disabled,
        config: Arc::new(config.clone()),
    };

    if cors_disabled {
        tracing::warn!("CORS is DISABLED in config - all origins will be allowed!");
    } else {
        tracing::info!("API state created with CORS origins: {:?}", allowed_origins);
    }

    let app = create_router(app_state);
    tracing::info!("API router built");

    let tls_config = if config.tls.enabled {
        let base_path = std::env::current_dir()?;
        let cert_path = base_path.join(&config.tls.cert_path);
        let key_path = base_path.join(&config.tls.key_path);

        match RustlsConfig::from_pem_file(&cert_path, &key_path).await {
            Ok(tls) => {
                tracing::info!("TLS configuration loaded successfully");
                Some(tls)
            }
            Err(e) => {
                tracing::error!("Failed to load TLS certificate: {}", e);
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let socket_addr: SocketAddr = server_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", server_address, e))?;

    Ok(Application {
        router: app,
        hub: registry.hub,
        tls_config,
        bind_address: server_address,
        socket_addr,
        log_guard,
    })
}
