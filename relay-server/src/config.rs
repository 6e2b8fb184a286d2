use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use gym_bridge_protocol::constants::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_DEAD_TIMEOUT_SECS,
    DEFAULT_PING_INTERVAL_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Agent link timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interval between pings sent to each agent
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Agents silent for longer than this are dropped
    #[serde(default = "default_dead_timeout")]
    pub dead_timeout_secs: u64,
    /// Interval of the dead-connection and notification expiry sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Default deadline for a relayed device command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}
fn default_dead_timeout() -> u64 {
    DEFAULT_DEAD_TIMEOUT_SECS
}
fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}
fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

impl BridgeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_secs(self.dead_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            dead_timeout_secs: default_dead_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    /// Disable CORS restrictions (allows all origins) - use only in development!
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub additional_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable file logging
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Directory for log files (relative to executable or absolute path)
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Prefix for log file names
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    /// Rotation strategy: "daily", "hourly", or "never"
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
    /// Maximum number of log files to keep (0 = unlimited)
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    /// Maximum age of log files in days (0 = unlimited)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

fn default_logging_enabled() -> bool {
    true
}
fn default_log_directory() -> String {
    "logs".to_string()
}
fn default_log_file_prefix() -> String {
    "gym-bridge-server".to_string()
}
fn default_log_rotation() -> String {
    "daily".to_string()
}
fn default_max_files() -> u32 {
    30
}
fn default_max_age_days() -> u32 {
    90
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            rotation: default_log_rotation(),
            max_files: default_max_files(),
            max_age_days: default_max_age_days(),
        }
    }
}

/// TLS configuration for the HTTPS/WSS listener
///
/// Usually disabled: production deployments terminate TLS at a reverse proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path to certificate file (.pem)
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    /// Path to private key file (.pem)
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Validity of a generated self-signed certificate
    #[serde(default = "default_cert_validity_days")]
    pub validity_days: u32,
    /// DNS names and IPs put in a generated certificate
    #[serde(default = "default_cert_hostnames")]
    pub hostnames: Vec<String>,
}

fn default_cert_path() -> String {
    "certs/server.pem".to_string()
}

fn default_key_path() -> String {
    "certs/server-key.pem".to_string()
}

fn default_cert_validity_days() -> u32 {
    3650 // 10 years
}

fn default_cert_hostnames() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            validity_days: default_cert_validity_days(),
            hostnames: default_cert_hostnames(),
        }
    }
}

impl Config {
    /// Load config from layered TOML files
    ///
    /// Loads configuration files in the following order (later files override earlier):
    /// 1. {base_name}.toml (required, e.g., config.toml)
    /// 2. {base_name}.{ENV}.toml (optional, only if CONFIG_ENV is set)
    /// 3. {base_name}.local.toml (optional, for personal overrides, git-ignored)
    pub fn from_file<P: AsRef<Path>>(base_name: P) -> Result<Self> {
        let base_path = base_name.as_ref();
        let base_str = base_path.to_str().context("Invalid base path")?;

        let mut builder = config::Config::builder()
            // 1. Load base config (required)
            .add_source(config::File::with_name(base_str));

        // 2. Load environment-specific config (optional)
        if let Ok(env) = std::env::var("CONFIG_ENV") {
            let env_config = format!("{}.{}", base_str, env);
            builder = builder.add_source(config::File::with_name(&env_config).required(false));
        }

        // 3. Load local config (optional, for personal overrides)
        let local_config = format!("{}.local", base_str);
        builder = builder.add_source(config::File::with_name(&local_config).required(false));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Get server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Get all allowed CORS origins
    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors.additional_origins.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://gym_bridge.db?mode=rwc".to_string(),
            },
            bridge: BridgeConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}
