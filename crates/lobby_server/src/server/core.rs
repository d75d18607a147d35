//! Core lobby server implementation.
//!
//! This module contains the `LobbyServer` struct, which owns the TCP
//! listener, enforces the connection limit and hands upgraded sockets to the
//! connection handler.

use crate::{
    config::ServerConfig, connection::ConnectionManager, error::ServerError,
    server::handlers::handle_connection,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// The lobby server.
///
/// `LobbyServer` accepts WebSocket clients on `/ws/{room_id}` and relays
/// their envelopes to the rest of the room through a shared
/// [`ConnectionManager`].
///
/// # Lifecycle
///
/// * [`start`](Self::start) binds the configured address and runs the accept
///   loop until [`shutdown`](Self::shutdown) is called
/// * on exit the connection manager is shut down, closing every client
pub struct LobbyServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Manager for client connections and room groups
    connection_manager: ConnectionManager,

    /// One permit per concurrent connection
    connection_slots: Arc<Semaphore>,

    /// Set to `true` to stop the accept loop
    shutdown_sender: watch::Sender<bool>,
}

impl LobbyServer {
    /// Creates a new lobby server with the specified configuration.
    ///
    /// No socket is bound until [`start`](Self::start) is called.
    pub fn new(config: ServerConfig) -> Self {
        let connection_manager = ConnectionManager::new(config.manager.clone());
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));
        let (shutdown_sender, _) = watch::channel(false);

        Self {
            config,
            connection_manager,
            connection_slots,
            shutdown_sender,
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| {
                ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address))
            })?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Connections beyond `max_connections` are dropped before the WebSocket
    /// handshake.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Listener has no local address: {e}")))?;
        info!("🚀 Lobby server listening on {}", local_addr);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            if *shutdown_receiver.borrow_and_update() {
                info!("🛑 Accept loop stopping - shutdown initiated");
                break;
            }

            tokio::select! {
                changed = shutdown_receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = self.connection_slots.clone().try_acquire_owned() else {
                        warn!(
                            remote_addr = %addr,
                            max_connections = self.config.max_connections,
                            "connection limit reached, refusing client"
                        );
                        continue;
                    };

                    let connection_manager = self.connection_manager.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, connection_manager).await {
                            debug!(remote_addr = %addr, "Connection error: {}", e);
                        }
                        drop(permit);
                    });
                }
            }
        }

        info!("🧹 Performing server cleanup...");
        let closed = self.connection_manager.shutdown().await;
        info!(closed, "Server stopped");
        Ok(())
    }

    /// Requests the accept loop to stop.
    ///
    /// Safe to call before `start`; the loop then exits immediately.
    pub fn shutdown(&self) {
        self.shutdown_sender.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_sender.borrow()
    }

    /// Handle to the shared connection manager.
    pub fn connection_manager(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
