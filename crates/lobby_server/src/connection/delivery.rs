//! Per-connection delivery loop.
//!
//! Each connection gets exactly one delivery task. It owns the outbound half
//! of the transport and the receiving half of the connection's queue.

use super::{client::Connection, manager::ConnectionManager};
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, warn};

/// Writes queued payloads to the transport in enqueue order.
///
/// * A write error stops the loop and removes the connection from the manager.
/// * Queue closure (all senders dropped) drains what is left, sends a close
///   frame and releases the transport.
/// * Once the connection is closed, writes get `close_timeout` to finish.
///   A peer that stopped reading does not hold the transport past that.
pub(crate) async fn run_delivery_loop<S>(
    connection: Arc<Connection>,
    mut queue: mpsc::Receiver<Utf8Bytes>,
    mut transport: S,
    manager: ConnectionManager,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
{
    let release = release_after_close(&connection, manager.config().close_timeout());
    tokio::pin!(release);

    while let Some(payload) = queue.recv().await {
        let written = tokio::select! {
            biased;
            written = transport.send(Message::Text(payload)) => written,
            _ = &mut release => {
                warn!(conn_id = %connection.id(), "transport stalled after close, dropping it");
                connection.mark_closed();
                return;
            }
        };
        if let Err(e) = written {
            warn!(conn_id = %connection.id(), error = %e, "transport write failed");
            queue.close();
            connection.mark_closed();
            manager.disconnect_connection(&connection).await;
            return;
        }
    }

    let finished = tokio::select! {
        biased;
        sent = async {
            let sent = transport.send(Message::Close(None)).await;
            let _ = transport.close().await;
            sent
        } => {
            if let Err(e) = sent {
                debug!(conn_id = %connection.id(), error = %e, "close frame not delivered");
            }
            true
        }
        _ = &mut release => false,
    };
    if !finished {
        warn!(conn_id = %connection.id(), "transport stalled on close frame, dropping it");
    }
    connection.mark_closed();
    debug!(conn_id = %connection.id(), "delivery loop finished");
}

/// Resolves `grace` after the connection has been closed.
async fn release_after_close(connection: &Connection, grace: Duration) {
    connection.closed().await;
    tokio::time::sleep(grace).await;
}
