//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that orchestrates server
//! startup, periodic monitoring and graceful shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use lobby_server::{ConnectionManager, LobbyServer};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Interval between connection statistics reports.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Time allowed for the accept loop to wind down after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

/// Main application struct.
///
/// Owns the merged configuration and the lobby server instance.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Lobby server instance
    server: Arc<LobbyServer>,
}

impl Application {
    /// Creates a new application instance from an already merged config.
    ///
    /// # Process
    ///
    /// 1. Validate the configuration
    /// 2. Initialize the lobby server
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration validated successfully");

        display_banner();

        let server = LobbyServer::new(config.to_server_config()?);
        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    /// Runs the server until a termination signal arrives, then shuts down.
    ///
    /// A second signal during shutdown exits the process immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Lobby Server Application");
        self.log_configuration_summary();

        let connection_manager = self.server.connection_manager();

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let monitoring_handle = tokio::spawn(monitor_connections(connection_manager.clone()));

        info!("✅ Lobby Server is now running!");
        info!(
            "🎮 Ready to accept connections on ws://{}/ws/{{room_id}}",
            self.config.server.bind_address
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // The server task only finishes early if it failed to start.
        tokio::select! {
            signal = setup_signal_handlers() => signal?,
            finished = &mut server_handle => {
                monitoring_handle.abort();
                return match finished {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }
        }

        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again, exiting immediately");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        monitoring_handle.abort();

        self.server.shutdown();
        match timeout(SHUTDOWN_TIMEOUT, server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!("⏰ Server task did not complete within timeout"),
        }

        info!("📊 Final connection count: {}", connection_manager.connection_count().await);
        info!("✅ Lobby Server shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  📬 Send queue capacity: {}",
            self.config.connections.send_queue_capacity
        );
    }
}

/// Applies command-line overrides on top of the file configuration.
pub(crate) fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(capacity) = args.queue_capacity {
        config.connections.send_queue_capacity = capacity;
    }
}

async fn monitor_connections(connection_manager: ConnectionManager) {
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        info!(
            "📊 Lobby Health - {} connections | {} active rooms",
            connection_manager.connection_count().await,
            connection_manager.group_count().await
        );
    }
}
