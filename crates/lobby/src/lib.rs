//! # Lobby Server - Main Entry Point
//!
//! Real-time game lobby server. This entry point handles CLI parsing,
//! configuration loading, logging setup and application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! lobby
//!
//! # Specify custom configuration
//! lobby --config production.toml
//!
//! # Override specific settings
//! lobby --bind 0.0.0.0:8080 --log-level debug --queue-capacity 512
//!
//! # JSON logging for production
//! lobby --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::{apply_overrides, Application};
use cli::CliArgs;
use config::AppConfig;
use tracing::{error, info};

/// Runs the lobby server until shutdown.
///
/// The config file is read once. Command-line overrides are merged into it,
/// logging is configured from the result, and the same merged config builds
/// the application.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let created = !args.config_path.exists();
    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "❌ Failed to load configuration from {}: {e}",
                args.config_path.display()
            );
            return Err(e);
        }
    };
    apply_overrides(&mut config, &args);

    if let Err(e) = logging::setup_logging(&config.logging, config.logging.json_format) {
        eprintln!("❌ Failed to setup logging: {e}");
        return Err(e);
    }

    if created {
        info!("📝 Created default configuration file: {}", args.config_path.display());
    } else {
        info!("🔧 Loaded configuration from: {}", args.config_path.display());
    }

    let app = match Application::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            return Err(e);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {e}");
        return Err(e);
    }
    Ok(())
}

// Re-export main types for potential library usage
pub use config::{AppConfig as LobbyConfig, ConnectionSettings, LoggingSettings, ServerSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_converts() {
        let config = LobbyConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.bind_address.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let toml_content = toml::to_string_pretty(&LobbyConfig::default())
            .expect("Failed to serialize default config to TOML");
        assert!(toml_content.contains("[server]"));
        assert!(toml_content.contains("[connections]"));
        assert!(toml_content.contains("[logging]"));
    }
}
