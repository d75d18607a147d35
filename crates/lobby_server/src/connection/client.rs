//! Client connection representation and management.
//!
//! This module defines the structure and behavior of individual client
//! connections: the bounded outbound queue, the closed state, and the
//! caller-defined metadata attached at connect time.

use super::ConnectionId;
use crate::error::ManagerError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Lifecycle state of a [`Connection`].
///
/// Transitions only move forward: `Open` → `Closing` → `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting enqueues.
    Open,
    /// Closed for enqueues; the delivery loop is draining what was queued.
    Closing,
    /// The delivery loop has exited and the transport is released.
    Closed,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Caller-defined attributes attached to a connection (player id, nickname, ...).
///
/// The manager never interprets these values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata(HashMap<String, Value>);

impl ConnectionMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a value, returning the previous one for that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Convenience accessor for a string-valued entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The associated player id, if the caller recorded one under `player_id`.
    pub fn player_id(&self) -> Option<&str> {
        self.get_str("player_id")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConnectionMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Represents one live client connection.
///
/// A connection owns the sending half of a bounded FIFO queue of serialized
/// payloads. The receiving half belongs to the connection's delivery loop,
/// which writes payloads to the transport in enqueue order.
///
/// Closing drops the sending half, so the delivery loop drains whatever is
/// already queued and then exits. It also raises a close signal: a delivery
/// loop stuck writing to a peer that stopped reading gives up and releases
/// the transport. Once closed, nothing is ever enqueued again.
#[derive(Debug)]
pub struct Connection {
    /// Caller-assigned identifier
    id: ConnectionId,

    /// Sending half of the outbound queue; `None` once closed
    sender: Mutex<Option<mpsc::Sender<Utf8Bytes>>>,

    /// Encoded [`ConnectionState`]
    state: AtomicU8,

    /// Flipped to `true` by `close` and `mark_closed`
    close_signal: watch::Sender<bool>,

    /// Caller-defined attributes
    metadata: ConnectionMetadata,

    /// When this connection was established
    connected_at: SystemTime,
}

impl Connection {
    /// Creates a connection with an outbound queue of `capacity` payloads.
    ///
    /// Returns the connection together with the receiving half of its queue,
    /// which must be handed to the delivery loop.
    pub(crate) fn new(
        id: ConnectionId,
        metadata: ConnectionMetadata,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id,
            sender: Mutex::new(Some(sender)),
            state: AtomicU8::new(STATE_OPEN),
            close_signal: watch::Sender::new(false),
            metadata,
            connected_at: SystemTime::now(),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once the connection stopped accepting enqueues, either because it
    /// was closed or because its delivery loop already exited.
    pub fn is_closed(&self) -> bool {
        if self.state() != ConnectionState::Open {
            return true;
        }
        self.sender
            .lock()
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }

    /// Attempts a non-blocking push onto the outbound queue.
    ///
    /// A full queue drops the payload and reports [`ManagerError::ChannelFull`].
    /// A closed connection reports [`ManagerError::Closed`].
    pub fn enqueue(&self, payload: Utf8Bytes) -> Result<(), ManagerError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ManagerError::Closed(self.id.clone()));
        };
        match sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ManagerError::ChannelFull(self.id.clone())),
            Err(TrySendError::Closed(_)) => Err(ManagerError::Closed(self.id.clone())),
        }
    }

    /// Closes the outbound queue. Idempotent.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        let sender = self.sender.lock().take();
        self.close_signal.send_replace(true);
        if sender.is_some() {
            let _ = self.state.compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        sender.is_some()
    }

    /// Terminal transition, performed by the delivery loop when it exits.
    pub(crate) fn mark_closed(&self) {
        drop(self.sender.lock().take());
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.close_signal.send_replace(true);
    }

    /// Resolves once `close` has been called. Returns immediately if it
    /// already was.
    pub async fn closed(&self) {
        let mut signal = self.close_signal.subscribe();
        let _ = signal.wait_for(|closed| *closed).await;
    }
}
