// Library interface for gym-bridge-agent
// Exposes modules for the binary and for tests

pub mod boards;
pub mod config;
pub mod connection;
pub mod controlid;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod toletus;
