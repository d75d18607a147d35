//! Error types and handling for the lobby server.
//!
//! This module defines the error types that can occur during connection
//! management and server operations, providing clear categorization of
//! different failure modes.

use crate::connection::{ConnectionId, GroupId};

/// Failures reported by the connection manager and individual connections.
///
/// Every variant is returned to the immediate caller. The manager never
/// retries internally and never panics on any of these conditions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// The manager is not running (it was shut down before this call).
    #[error("connection manager is not running")]
    NotInitialized,

    /// No connection is registered under the given id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// No group exists under the given id.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// The connection's outbound queue is at capacity; the message was dropped.
    #[error("outbound queue full for connection {0}")]
    ChannelFull(ConnectionId),

    /// The connection has already been closed.
    #[error("connection closed: {0}")]
    Closed(ConnectionId),

    /// The envelope could not be serialized for transport.
    #[error("message serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::Serialization(err.to_string())
    }
}

/// Enumeration of possible server errors.
///
/// Categorizes errors into network-related, handshake and internal server
/// errors to help with debugging and error handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("Network error: {0}")]
    Network(String),

    /// WebSocket upgrade failures, including requests for unknown paths
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Internal server errors surfaced from the connection manager
    #[error("Internal error: {0}")]
    Internal(#[from] ManagerError),
}
