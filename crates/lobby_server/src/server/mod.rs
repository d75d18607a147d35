//! Core server implementation and connection handling.
//!
//! This module contains the lobby server structure and the logic for
//! upgrading client sockets and relaying their messages.

pub mod core;
pub mod handlers;

pub use core::LobbyServer;
pub use handlers::{parse_lobby_path, upgrade, UpgradedClient};
