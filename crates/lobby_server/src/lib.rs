//! # Lobby Server - Real-time Room Messaging
//!
//! A WebSocket server for game lobbies. Clients connect to a room, and every
//! message they send is relayed to the other players in that room.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Connection Manager** - Registry of live connections, room groups and
//!   message fan-out ([`ConnectionManager`])
//! * **Delivery Loops** - One task per connection that drains a bounded queue
//!   into the socket in order
//! * **Envelopes** - The typed JSON message format shared by clients and the
//!   server ([`Envelope`], [`Payload`])
//! * **Lobby Server** - Accept loop and per-client handler ([`LobbyServer`])
//!
//! ### Message Flow
//!
//! 1. Client connects to `/ws/{room_id}?nickname=...`
//! 2. The server registers the connection and joins it to the room group
//! 3. Inbound envelopes are stamped with the sender and room
//! 4. The connection manager serializes the envelope once and queues it for
//!    every other room member
//! 5. Each delivery loop writes its queue to the client socket
//!
//! ### Using the manager directly
//!
//! ```rust
//! use futures::channel::mpsc;
//! use lobby_server::{ConnectionManager, ConnectionMetadata, Envelope, Payload};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), lobby_server::ManagerError> {
//! let manager = ConnectionManager::default();
//! let (transport, _client) = mpsc::unbounded();
//!
//! manager.connect("conn_a", transport, ConnectionMetadata::new()).await?;
//! manager.join_group("room1", "conn_a").await?;
//!
//! let report = manager
//!     .send_to_group("room1", &Envelope::new("room1", Payload::Heartbeat(None)), &[])
//!     .await?;
//! assert_eq!(report.delivered_count(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! * Per-connection FIFO order
//! * At-most-once, best-effort: a full queue drops the message and reports
//!   [`ManagerError::ChannelFull`] instead of blocking the sender
//! * Group sends are not atomic; see [`GroupDelivery`]
//!
//! ## Error Handling
//!
//! Manager operations return [`ManagerError`]; server-level failures use
//! [`ServerError`], which wraps manager errors.

// Re-export core types and functions for easy access
pub use config::{ManagerConfig, ServerConfig};
pub use connection::{
    Connection, ConnectionId, ConnectionManager, ConnectionMetadata, ConnectionState,
    GroupDelivery, GroupId,
};
pub use error::{ManagerError, ServerError};
pub use messaging::{Envelope, MessageType, Payload};
pub use server::LobbyServer;
pub use utils::{create_server, create_server_with_config};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod utils;
