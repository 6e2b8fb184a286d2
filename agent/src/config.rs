use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use gym_bridge_protocol::constants::DEFAULT_PING_INTERVAL_SECS;

/// Prefix of environment overrides, e.g. `AGENT__SERVER__URL`
pub const ENV_PREFIX: &str = "AGENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentIdentity,
    #[serde(default)]
    pub server: ServerLinkConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub toletus: ToletusConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials presented on the WebSocket upgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLinkConfig {
    /// Full URL of the relay endpoint, e.g. `wss://relay.example.com/agent`
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Failed attempts in a row before pausing for `cooldown_secs`
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_server_url() -> String {
    "ws://localhost:8080/agent".to_string()
}
fn default_reconnect_interval() -> u64 {
    5
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_cooldown() -> u64 {
    60
}
fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

impl ServerLinkConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for ServerLinkConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            reconnect_interval_secs: default_reconnect_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            cooldown_secs: default_cooldown(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

/// Default Control ID reader; commands naming another IP reuse port and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_ip")]
    pub ip: String,
    #[serde(default = "default_reader_port")]
    pub port: u16,
    #[serde(default = "default_reader_credential")]
    pub username: String,
    #[serde(default = "default_reader_credential")]
    pub password: String,
}

fn default_reader_ip() -> String {
    "192.168.2.142".to_string()
}
fn default_reader_port() -> u16 {
    80
}
fn default_reader_credential() -> String {
    "admin".to_string()
}

impl ReaderConfig {
    pub fn base_url_for(&self, ip: &str) -> String {
        format!("http://{}:{}", ip, self.port)
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            ip: default_reader_ip(),
            port: default_reader_port(),
            username: default_reader_credential(),
            password: default_reader_credential(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToletusConfig {
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// The HUB ships with a self-signed certificate
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

fn default_hub_url() -> String {
    "https://localhost:7067".to_string()
}
fn default_accept_invalid_certs() -> bool {
    true
}

impl Default for ToletusConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            accept_invalid_certs: default_accept_invalid_certs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,
}

fn default_discovery_enabled() -> bool {
    true
}
fn default_discovery_interval() -> u64 {
    30
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            interval_secs: default_discovery_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    /// "daily", "hourly" or "never"
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
    /// 0 keeps every file
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_directory() -> String {
    "logs".to_string()
}
fn default_log_file_prefix() -> String {
    "gym-bridge-agent".to_string()
}
fn default_log_rotation() -> String {
    "daily".to_string()
}
fn default_max_files() -> usize {
    14
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            rotation: default_log_rotation(),
            max_files: default_max_files(),
        }
    }
}

impl AgentConfig {
    /// Load layered TOML files, then `AGENT__SECTION__KEY` environment overrides
    ///
    /// Order (later wins): `{base}.toml` (optional), `{base}.{CONFIG_ENV}.toml`,
    /// `{base}.local.toml`, environment.
    pub fn from_file<P: AsRef<Path>>(base_name: P) -> Result<Self> {
        let base_str = base_name.as_ref().to_str().context("Invalid base path")?;

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(base_str).required(false));

        if let Ok(env) = std::env::var("CONFIG_ENV") {
            let env_config = format!("{}.{}", base_str, env);
            builder = builder.add_source(config::File::with_name(&env_config).required(false));
        }

        let local_config = format!("{}.local", base_str);
        builder = builder
            .add_source(config::File::with_name(&local_config).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            );

        let config: AgentConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration (agent.id and agent.token are required)")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.id.trim().is_empty() {
            anyhow::bail!("agent.id must not be empty");
        }
        if self.agent.token.trim().is_empty() {
            anyhow::bail!("agent.token must not be empty");
        }
        if !(self.server.url.starts_with("ws://") || self.server.url.starts_with("wss://")) {
            anyhow::bail!("server.url must be a ws:// or wss:// URL: {}", self.server.url);
        }
        if self.server.max_reconnect_attempts == 0 {
            anyhow::bail!("server.max_reconnect_attempts must be at least 1");
        }
        Ok(())
    }
}
