//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (COURIER_HOST, COURIER_PORT)
//! - Command line arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Destinations created at startup.
    #[serde(default)]
    pub destinations: Vec<String>,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Delivery worker configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Connection handling.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Transaction handling.
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval at which clients must send something, in milliseconds.
    /// Zero disables read timeouts.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Delivery worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of fan-out workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Connection handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Delay between DISCONNECT and the socket closing, in milliseconds.
    #[serde(default = "default_shutdown_delay")]
    pub shutdown_delay_ms: u64,

    /// Longest a write to one client may block, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Capacity of the inbound event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Transaction handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// On COMMIT, keep only the last frame sent to each destination.
    #[serde(default)]
    pub collapse_per_destination: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the stats HTTP server.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stats server host.
    #[serde(default = "default_metrics_host")]
    pub host: String,

    /// Stats server port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("COURIER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("COURIER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(61613)
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_delay() -> u64 {
    500
}

fn default_write_timeout() -> u64 {
    5_000
}

fn default_max_frame_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_event_buffer() -> usize {
    1024
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            destinations: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            delivery: DeliveryConfig::default(),
            connection: ConnectionConfig::default(),
            transactions: TransactionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_ms: default_shutdown_delay(),
            write_timeout_ms: default_write_timeout(),
            max_frame_size: default_max_frame_size(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "courier.toml",
            "/etc/courier/courier.toml",
            "~/.config/courier/courier.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Address the broker listens on, `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address the stats server listens on, `host:port`.
    #[must_use]
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.metrics.host, self.metrics.port)
    }

    /// Interval advertised in CONNECTED and used for read deadlines.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.heartbeat.interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Delay between a DISCONNECT and the socket closing.
    #[must_use]
    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.connection.shutdown_delay_ms)
    }

    /// Longest a write to one client may block.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.write_timeout_ms)
    }
}
