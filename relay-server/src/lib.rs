// Library interface for gym-bridge-server
// Exposes modules for integration testing

pub mod agent_hub;
pub mod api;
pub mod bootstrap;
pub mod cert;
pub mod config;
pub mod controlid;
pub mod db;
pub mod log_buffer;
pub mod logging;
pub mod models;
pub mod notifier;
