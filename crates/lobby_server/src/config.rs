//! Server configuration types and defaults.
//!
//! This module contains the configuration structures and default values
//! used to initialize the connection manager and the lobby server.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default number of pending outbound messages per connection.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Default time a delivery loop keeps writing after its connection closed.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Configuration for the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Capacity of each connection's outbound queue. Enqueues beyond this
    /// are dropped rather than buffered.
    pub send_queue_capacity: usize,

    /// How long, in milliseconds, a closed connection may keep draining into
    /// a transport that is not accepting writes before the transport is
    /// dropped.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_close_timeout_ms() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_MS
}

impl ManagerConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

/// Configuration structure for the lobby server.
///
/// Contains the network settings for the WebSocket listener together with
/// the connection manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Connection manager settings
    pub manager: ManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            manager: ManagerConfig::default(),
        }
    }
}
