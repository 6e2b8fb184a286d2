//! Relay Server REST API module
//!
//! Admin endpoints over the agent hub, the notification table and the device
//! registry, plus the WebSocket endpoint agents dial into.

mod agent_ws;
mod agents;
mod devices;
mod error;
mod notifications;
mod system;

pub use agents::{CommandRequest, CommandResult};
pub use error::{ApiResult, ProblemDetails};

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

use gym_bridge_protocol::AGENT_WS_PATH;

use crate::{agent_hub::AgentHub, config::Config, db::Database, log_buffer::LogBuffer};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub hub: AgentHub,
    pub log_buffer: LogBuffer,
    pub allowed_origins: Vec<String>,
    pub cors_disabled: bool,
    pub config: Arc<Config>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = if state.cors_disabled {
        tracing::warn!(
            "CORS is DISABLED - allowing all origins. This should only be used in development!"
        );
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(
                state
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
            .allow_credentials(true)
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(tracing::Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route(AGENT_WS_PATH, get(agent_ws::agent_ws_handler))
        .route("/api/health", get(system::health))
        .route("/api/logs", get(system::get_logs))
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::register_agent),
        )
        .route(
            "/api/agents/:agent_id",
            get(agents::get_agent).delete(agents::disconnect_agent),
        )
        .route("/api/agents/:agent_id/boards", get(agents::list_boards))
        .route("/api/agents/:agent_id/commands", post(agents::send_command))
        .route(
            "/api/notifications",
            get(notifications::list_notifications).delete(notifications::clear_notification),
        )
        .route(
            "/api/gyms/:gym_id/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route("/api/gyms/:gym_id/reader/status", get(devices::reader_status))
        .route("/api/devices/:id", delete(devices::delete_device))
        .route("/api/devices/:id/commands", post(devices::send_device_command))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
