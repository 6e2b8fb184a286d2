use anyhow::Result;
use gym_bridge_relay_server::bootstrap;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Bootstrap the application (setup logging, DB, agent hub, API router)
    let app = bootstrap::setup().await?;
    let _log_guard = app.log_guard;
    let hub = app.hub;

    match app.tls_config {
        Some(tls_config) => {
            tracing::info!("HTTPS server listening on https://{}", app.bind_address);

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                hub.shutdown().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            axum_server::bind_rustls(app.socket_addr, tls_config)
                .handle(handle)
                .serve(app.router.into_make_service())
                .await?;
        }
        None => {
            tracing::info!("HTTP server listening on http://{}", app.bind_address);

            let listener = tokio::net::TcpListener::bind(app.socket_addr).await?;
            axum::serve(listener, app.router)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    hub.shutdown().await;
                })
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing agent connections");
}
