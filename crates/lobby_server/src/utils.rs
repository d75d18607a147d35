//! Utility functions and helper methods for the lobby server.
//!
//! This module provides convenient factory functions and small helpers
//! shared across the crate.

use crate::{config::ServerConfig, server::LobbyServer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

/// Creates a new lobby server with default configuration.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use lobby_server::create_server;
///
/// let server = create_server();
/// assert_eq!(server.connection_manager().connection_count().await, 0);
/// # }
/// ```
pub fn create_server() -> LobbyServer {
    LobbyServer::new(ServerConfig::default())
}

/// Creates a new lobby server with custom configuration.
///
/// # Example
///
/// ```rust
/// use lobby_server::{create_server_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9000".parse().unwrap(),
///     max_connections: 5000,
///     ..Default::default()
/// };
///
/// let server = create_server_with_config(config);
/// ```
pub fn create_server_with_config(config: ServerConfig) -> LobbyServer {
    LobbyServer::new(config)
}
