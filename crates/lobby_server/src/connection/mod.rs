//! Connection management for lobby clients.
//!
//! This module handles the lifecycle of client connections: the per-connection
//! outbound queue and delivery loop, the registry of live connections, the
//! room group index, and the [`ConnectionManager`] facade that keeps the
//! registry and group index consistent under a single lock.

pub mod client;
pub mod group;
pub mod manager;
pub mod registry;

mod delivery;

pub use client::{Connection, ConnectionMetadata, ConnectionState};
pub use group::GroupIndex;
pub use manager::{ConnectionManager, GroupDelivery};
pub use registry::ConnectionRegistry;

use uuid::Uuid;

/// Type alias for connection identifiers.
///
/// Connection IDs are assigned by the caller and must be unique for the
/// lifetime of the connection.
pub type ConnectionId = String;

/// Type alias for group identifiers (typically a room id).
pub type GroupId = String;

/// Generates a collision-resistant connection id backed by a random UUID.
pub fn generate_connection_id() -> ConnectionId {
    format!("conn_{}", Uuid::new_v4().simple())
}

/// Generates a collision-resistant player id backed by a random UUID.
pub fn generate_player_id() -> String {
    format!("player_{}", Uuid::new_v4().simple())
}
