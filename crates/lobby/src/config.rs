//! Configuration management for the lobby server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files. Command-line overrides are applied by the
//! application before validation.

use lobby_server::{config::DEFAULT_SEND_QUEUE_CAPACITY, ManagerConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log levels accepted in `[logging] level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
///
/// ```toml
/// [server]
/// bind_address = "127.0.0.1:8080"
/// max_connections = 1000
///
/// [connections]
/// send_queue_capacity = 256
///
/// [logging]
/// level = "info"
/// json_format = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Per-connection delivery settings
    #[serde(default)]
    pub connections: ConnectionSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Outbound messages a connection may have pending before new ones are
    /// dropped
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

fn default_send_queue_capacity() -> usize {
    DEFAULT_SEND_QUEUE_CAPACITY
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            Ok(default_config)
        }
    }

    /// Converts the file configuration into the server's own config type.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            manager: ManagerConfig {
                send_queue_capacity: self.connections.send_queue_capacity,
                ..Default::default()
            },
        })
    }

    /// Validates the configuration.
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        if self.connections.send_queue_capacity == 0 {
            return Err("connections.send_queue_capacity must be greater than 0".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
