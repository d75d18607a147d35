//! Message handling for lobby client communication.
//!
//! This module provides the envelope types exchanged with clients and the
//! routing of inbound client frames to the connection manager.

pub mod router;
pub mod types;

pub use router::route_client_message;
pub use types::{
    ChatContent, Envelope, ErrorContent, GameActionContent, GameStateContent, MessageType,
    NoticeContent, NoticeLevel, Payload, PlayerPresenceContent,
};
