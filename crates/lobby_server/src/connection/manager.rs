//! Connection manager for tracking connections and room groups.
//!
//! This module provides the central coordinator for all client connections,
//! handling connection lifecycle, group membership and message delivery to a
//! single connection or to a whole group.

use super::{
    client::{Connection, ConnectionMetadata},
    delivery::run_delivery_loop,
    group::GroupIndex,
    registry::ConnectionRegistry,
    ConnectionId,
};
use crate::{config::ManagerConfig, error::ManagerError, messaging::Envelope};
use futures::Sink;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Registry and group index, guarded together.
#[derive(Debug)]
struct ManagerState {
    registry: ConnectionRegistry,
    groups: GroupIndex,
    running: bool,
}

/// Outcome of a group send.
///
/// Group sends are not transactional: some targets may receive the message
/// while others drop it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupDelivery {
    /// Connections the message was queued for
    pub delivered: Vec<ConnectionId>,
    /// Connections that rejected the message, with the reason
    pub dropped: Vec<(ConnectionId, ManagerError)>,
}

impl GroupDelivery {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Central manager for all client connections.
///
/// The `ConnectionManager` registers connections, tracks which connections
/// belong to which room group, and fans serialized envelopes out to them.
/// It is a cheap handle: clones share the same state, so one instance is
/// created at startup and passed to every collaborator that needs it.
///
/// # Architecture
///
/// * One `RwLock` protects the registry and the group index as a unit, so a
///   group never observes a member that was removed without being pruned
/// * Mutations take the write lock; lookups and target resolution take the
///   read lock
/// * Serialization and enqueueing happen after the lock is released
/// * Each connection runs its own delivery task; enqueueing never blocks
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: Arc<RwLock<ManagerState>>,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// Creates a running connection manager.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(ManagerState {
                registry: ConnectionRegistry::new(),
                groups: GroupIndex::new(),
                running: true,
            })),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Registers a connection and starts its delivery loop.
    ///
    /// `transport` is the outbound half of an already-upgraded transport.
    /// The connection becomes visible to group operations once this returns.
    /// A connection previously registered under the same id is closed and
    /// replaced; its group memberships carry over to the new connection.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotInitialized`] if the manager has been shut down.
    pub async fn connect<S>(
        &self,
        connection_id: impl Into<ConnectionId>,
        transport: S,
        metadata: ConnectionMetadata,
    ) -> Result<Arc<Connection>, ManagerError>
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
    {
        let (connection, queue) = Connection::new(
            connection_id.into(),
            metadata,
            self.config.send_queue_capacity,
        );
        let connection = Arc::new(connection);

        {
            let mut state = self.state.write().await;
            if !state.running {
                return Err(ManagerError::NotInitialized);
            }
            if let Some(previous) = state.registry.insert(connection.clone()) {
                previous.close();
                warn!(conn_id = %connection.id(), "replaced existing connection with the same id");
            }
        }

        tokio::spawn(run_delivery_loop(
            connection.clone(),
            queue,
            transport,
            self.clone(),
        ));

        info!(conn_id = %connection.id(), "🔗 Connection registered");
        Ok(connection)
    }

    /// Adds a registered connection to a group, creating the group if needed.
    ///
    /// Joining a group the connection already belongs to is a no-op.
    pub async fn join_group(&self, group_id: &str, connection_id: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().await;
        if !state.registry.contains(connection_id) {
            return Err(ManagerError::ConnectionNotFound(connection_id.to_string()));
        }
        if state.groups.add(group_id, connection_id) {
            debug!(conn_id = %connection_id, group_id = %group_id, "joined group");
        }
        Ok(())
    }

    /// Removes a connection from a group; the group is deleted once empty.
    ///
    /// Absent groups or members are ignored.
    pub async fn leave_group(&self, group_id: &str, connection_id: &str) {
        let mut state = self.state.write().await;
        if state.groups.remove(group_id, connection_id) {
            debug!(conn_id = %connection_id, group_id = %group_id, "left group");
        }
    }

    /// Sends an envelope to a single connection.
    ///
    /// Delivery is best-effort and at-most-once: a full queue or a closed
    /// connection is reported, never retried.
    pub async fn send_to_connection(
        &self,
        connection_id: &str,
        envelope: &Envelope,
    ) -> Result<(), ManagerError> {
        let connection = {
            let state = self.state.read().await;
            if !state.running {
                return Err(ManagerError::NotInitialized);
            }
            state
                .registry
                .get(connection_id)
                .cloned()
                .ok_or_else(|| ManagerError::ConnectionNotFound(connection_id.to_string()))?
        };

        let payload = envelope.encode()?;
        connection.enqueue(payload)
    }

    /// Sends an envelope to every open member of a group except `exclude`.
    ///
    /// The envelope is serialized once. A failure for one target is logged
    /// and recorded in the returned [`GroupDelivery`] without affecting the
    /// other targets.
    pub async fn send_to_group(
        &self,
        group_id: &str,
        envelope: &Envelope,
        exclude: &[&str],
    ) -> Result<GroupDelivery, ManagerError> {
        let targets: Vec<Arc<Connection>> = {
            let state = self.state.read().await;
            if !state.running {
                return Err(ManagerError::NotInitialized);
            }
            let members = state
                .groups
                .members(group_id)
                .ok_or_else(|| ManagerError::GroupNotFound(group_id.to_string()))?;
            members
                .iter()
                .filter(|id| !exclude.contains(&id.as_str()))
                .filter_map(|id| state.registry.get(id))
                .filter(|connection| !connection.is_closed())
                .cloned()
                .collect()
        };

        let payload = envelope.encode()?;

        let mut report = GroupDelivery::default();
        for connection in targets {
            match connection.enqueue(payload.clone()) {
                Ok(()) => report.delivered.push(connection.id().to_string()),
                Err(e) => {
                    warn!(conn_id = %connection.id(), group_id = %group_id, error = %e, "group delivery dropped");
                    report.dropped.push((connection.id().to_string(), e));
                }
            }
        }

        debug!(
            group_id = %group_id,
            kind = envelope.kind(),
            delivered = report.delivered.len(),
            dropped = report.dropped.len(),
            "📡 Group broadcast"
        );
        Ok(report)
    }

    /// Closes a connection and removes it from the registry and every group.
    ///
    /// Returns `false` if no such connection was registered; calling it again
    /// is harmless.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(connection) = state.registry.remove(connection_id) else {
            return false;
        };
        connection.close();
        let groups = state.groups.remove_everywhere(connection_id);
        info!(conn_id = %connection_id, groups = groups.len(), "❌ Connection removed");
        true
    }

    /// Self-initiated removal from a delivery loop whose transport failed.
    ///
    /// Only removes the registry entry if it still refers to `connection`, so a
    /// replacement registered under the same id is left alone.
    pub(crate) async fn disconnect_connection(&self, connection: &Arc<Connection>) {
        let mut state = self.state.write().await;
        connection.close();
        if state.registry.remove_if_same(connection) {
            let groups = state.groups.remove_everywhere(connection.id());
            info!(conn_id = %connection.id(), groups = groups.len(), "❌ Connection removed after transport failure");
        }
    }

    /// Number of members in a group, 0 if the group does not exist.
    pub async fn group_connection_count(&self, group_id: &str) -> usize {
        self.state.read().await.groups.member_count(group_id)
    }

    /// Snapshot of the member ids of a group, in no particular order.
    pub async fn group_connection_ids(&self, group_id: &str) -> Vec<ConnectionId> {
        self.state.read().await.groups.member_ids(group_id)
    }

    /// Looks up one metadata entry of a registered connection.
    pub async fn connection_metadata(&self, connection_id: &str, key: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .registry
            .get(connection_id)
            .and_then(|connection| connection.metadata().get(key).cloned())
    }

    pub async fn is_connected(&self, connection_id: &str) -> bool {
        self.state.read().await.registry.contains(connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    pub async fn group_count(&self) -> usize {
        self.state.read().await.groups.len()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Closes every connection, clears all groups and stops the manager.
    ///
    /// Later `connect` and send calls fail with [`ManagerError::NotInitialized`].
    /// Returns the number of connections that were closed.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.write().await;
        state.running = false;
        let connections = state.registry.drain();
        for connection in &connections {
            connection.close();
        }
        state.groups.clear();
        info!(closed = connections.len(), "🛑 Connection manager stopped");
        connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::messaging::{ChatContent, Payload};
    use futures::channel::mpsc as transport;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    type TransportRx = transport::UnboundedReceiver<Message>;

    fn chat(text: &str) -> Envelope {
        Envelope::new(
            "room1",
            Payload::Chat(ChatContent {
                text: text.into(),
                nickname: "ann".into(),
                ..Default::default()
            }),
        )
    }

    async fn connect(manager: &ConnectionManager, id: &str) -> (Arc<Connection>, TransportRx) {
        let (sink, rx) = transport::unbounded();
        let conn = manager
            .connect(id, sink, ConnectionMetadata::new())
            .await
            .expect("connect should succeed");
        (conn, rx)
    }

    async fn next_text(rx: &mut TransportRx) -> String {
        match timeout(Duration::from_secs(2), rx.next()).await {
            Ok(Some(Message::Text(text))) => text.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn chat_text(rx: &mut TransportRx) -> String {
        let envelope = Envelope::decode(&next_text(rx).await).unwrap();
        match envelope.payload {
            Payload::Chat(chat) => chat.text,
            other => panic!("expected chat, got {other:?}"),
        }
    }

    async fn wait_until_disconnected(manager: &ConnectionManager, id: &str) {
        timeout(Duration::from_secs(2), async {
            while manager.is_connected(id).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection should be removed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_in_enqueue_order() {
        let manager = ConnectionManager::default();
        let (_conn, mut rx) = connect(&manager, "c1").await;

        for i in 0..20 {
            manager
                .send_to_connection("c1", &chat(&format!("m{i}")))
                .await
                .unwrap();
        }
        for i in 0..20 {
            assert_eq!(chat_text(&mut rx).await, format!("m{i}"));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_send_skips_excluded_members() {
        let manager = ConnectionManager::default();
        let (_c1, mut rx1) = connect(&manager, "c1").await;
        let (_c2, mut rx2) = connect(&manager, "c2").await;
        manager.join_group("room1", "c1").await.unwrap();
        manager.join_group("room1", "c2").await.unwrap();

        let report = manager
            .send_to_group("room1", &chat("hello"), &["c1"])
            .await
            .unwrap();
        assert_eq!(report.delivered, vec!["c2".to_string()]);
        assert!(report.is_complete());

        assert_eq!(chat_text(&mut rx2).await, "hello");
        assert!(timeout(Duration::from_millis(100), rx1.next()).await.is_err());

        let mut ids = manager.group_connection_ids("room1").await;
        ids.sort();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(manager.group_connection_count("room1").await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn join_then_leave_removes_group() {
        let manager = ConnectionManager::default();
        let (_conn, _rx) = connect(&manager, "c1").await;

        manager.join_group("room1", "c1").await.unwrap();
        manager.join_group("room1", "c1").await.unwrap();
        assert_eq!(manager.group_connection_count("room1").await, 1);

        manager.leave_group("room1", "c1").await;
        assert_eq!(manager.group_connection_count("room1").await, 0);
        assert_eq!(manager.group_count().await, 0);
        assert_eq!(
            manager.send_to_group("room1", &chat("x"), &[]).await,
            Err(ManagerError::GroupNotFound("room1".into()))
        );

        // Leaving again is harmless.
        manager.leave_group("room1", "c1").await;
    }

    #[tokio::test]
    async fn join_requires_registered_connection() {
        let manager = ConnectionManager::default();
        assert_eq!(
            manager.join_group("room1", "ghost").await,
            Err(ManagerError::ConnectionNotFound("ghost".into()))
        );
        assert_eq!(manager.group_count().await, 0);
    }

    #[tokio::test]
    async fn send_to_unknown_connection_has_no_side_effects() {
        let manager = ConnectionManager::default();
        assert_eq!(
            manager.send_to_connection("nobody", &chat("x")).await,
            Err(ManagerError::ConnectionNotFound("nobody".into()))
        );
        assert_eq!(manager.connection_count().await, 0);
        assert_eq!(manager.group_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_after_disconnect_is_not_found() {
        let manager = ConnectionManager::default();
        let (_conn, _rx) = connect(&manager, "c1").await;
        assert!(manager.disconnect("c1").await);
        assert_eq!(
            manager.send_to_connection("c1", &chat("x")).await,
            Err(ManagerError::ConnectionNotFound("c1".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_is_idempotent_and_leaves_every_group() {
        let manager = ConnectionManager::default();
        let (conn, _rx1) = connect(&manager, "c1").await;
        let (_c2, _rx2) = connect(&manager, "c2").await;
        manager.join_group("room1", "c1").await.unwrap();
        manager.join_group("room2", "c1").await.unwrap();
        manager.join_group("room2", "c2").await.unwrap();

        assert!(manager.disconnect("c1").await);
        assert!(!manager.disconnect("c1").await);

        assert!(conn.is_closed());
        assert_eq!(manager.group_connection_count("room1").await, 0);
        assert_eq!(manager.group_connection_ids("room2").await, vec!["c2".to_string()]);
        assert_eq!(manager.group_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closing_drains_queue_then_sends_close_frame() {
        let manager = ConnectionManager::default();
        let (conn, mut rx) = connect(&manager, "c1").await;

        manager.send_to_connection("c1", &chat("last")).await.unwrap();
        manager.disconnect("c1").await;

        assert_eq!(chat_text(&mut rx).await, "last");
        match timeout(Duration::from_secs(2), rx.next()).await {
            Ok(Some(Message::Close(None))) => {}
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(timeout(Duration::from_secs(2), rx.next()).await.unwrap().is_none());

        timeout(Duration::from_secs(2), async {
            while conn.state() != ConnectionState::Closed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("delivery loop should finish");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_failure_removes_connection() {
        let manager = ConnectionManager::default();
        let (sink, rx) = transport::unbounded::<Message>();
        drop(rx);
        manager
            .connect("c1", sink, ConnectionMetadata::new())
            .await
            .unwrap();
        manager.join_group("room1", "c1").await.unwrap();

        // The first write fails and the delivery loop disconnects itself.
        let _ = manager.send_to_connection("c1", &chat("x")).await;
        wait_until_disconnected(&manager, "c1").await;
        assert_eq!(manager.group_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_delivery_loop_does_not_evict_replacement() {
        let manager = ConnectionManager::default();
        let (broken_sink, broken_rx) = transport::unbounded::<Message>();
        let stale = manager
            .connect("c1", broken_sink, ConnectionMetadata::new())
            .await
            .unwrap();
        let (_fresh, mut rx) = connect(&manager, "c1").await;
        assert!(stale.is_closed());

        drop(broken_rx);
        manager.disconnect_connection(&stale).await;
        assert!(manager.is_connected("c1").await);

        manager.send_to_connection("c1", &chat("still here")).await.unwrap();
        assert_eq!(chat_text(&mut rx).await, "still here");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_without_blocking() {
        let manager = ConnectionManager::new(ManagerConfig {
            send_queue_capacity: 2,
            ..Default::default()
        });
        // A zero-capacity bounded sink that nobody reads stalls the delivery loop.
        let (sink, _stalled_rx) = transport::channel::<Message>(0);
        manager
            .connect("slow", sink, ConnectionMetadata::new())
            .await
            .unwrap();
        let (_fast, mut fast_rx) = connect(&manager, "fast").await;
        manager.join_group("room1", "slow").await.unwrap();
        manager.join_group("room1", "fast").await.unwrap();

        let mut dropped = 0;
        for i in 0..10 {
            let report = timeout(
                Duration::from_secs(1),
                manager.send_to_group("room1", &chat(&format!("m{i}")), &[]),
            )
            .await
            .expect("group send must not block")
            .unwrap();
            dropped += report
                .dropped
                .iter()
                .filter(|(id, e)| id == "slow" && *e == ManagerError::ChannelFull("slow".into()))
                .count();
        }
        assert!(dropped > 0, "slow connection should have dropped messages");

        // The healthy member got everything in order.
        for i in 0..10 {
            assert_eq!(chat_text(&mut fast_rx).await, format!("m{i}"));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_releases_stalled_transport() {
        let manager = ConnectionManager::new(ManagerConfig {
            close_timeout_ms: 50,
            ..Default::default()
        });
        let (sink, mut stalled_rx) = transport::channel::<Message>(0);
        let conn = manager
            .connect("slow", sink, ConnectionMetadata::new())
            .await
            .unwrap();
        for _ in 0..3 {
            manager
                .send_to_connection("slow", &Envelope::new("room1", Payload::Heartbeat(None)))
                .await
                .unwrap();
        }

        assert!(manager.disconnect("slow").await);

        timeout(Duration::from_secs(5), async {
            while conn.state() != ConnectionState::Closed || Arc::strong_count(&conn) > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("delivery loop should let go of a transport nobody reads");

        // The sink was dropped: the peer sees what was buffered, then the end.
        let drained = timeout(Duration::from_secs(1), async {
            let mut frames = 0;
            while stalled_rx.next().await.is_some() {
                frames += 1;
            }
            frames
        })
        .await
        .expect("transport should be released");
        assert!(drained < 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_send_skips_closed_members() {
        let manager = ConnectionManager::default();
        let (c1, _rx1) = connect(&manager, "c1").await;
        let (_c2, _rx2) = connect(&manager, "c2").await;
        manager.join_group("room1", "c1").await.unwrap();
        manager.join_group("room1", "c2").await.unwrap();

        c1.close();
        let report = manager.send_to_group("room1", &chat("x"), &[]).await.unwrap();
        assert_eq!(report.delivered, vec!["c2".to_string()]);
        assert!(report.dropped.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serialization_failure_aborts_send() {
        let manager = ConnectionManager::default();
        let (_c1, _rx) = connect(&manager, "c1").await;
        manager.join_group("room1", "c1").await.unwrap();

        let bad = Envelope::new(
            "room1",
            Payload::Other {
                kind: "vote".into(),
                content: b"{oops".to_vec(),
            },
        );
        assert!(matches!(
            manager.send_to_group("room1", &bad, &[]).await,
            Err(ManagerError::Serialization(_))
        ));
        assert!(matches!(
            manager.send_to_connection("c1", &bad).await,
            Err(ManagerError::Serialization(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metadata_lookup() {
        let manager = ConnectionManager::default();
        let (sink, _rx) = transport::unbounded();
        manager
            .connect(
                "c1",
                sink,
                ConnectionMetadata::new().with("player_id", "player_7"),
            )
            .await
            .unwrap();

        assert_eq!(
            manager.connection_metadata("c1", "player_id").await,
            Some(Value::from("player_7"))
        );
        assert_eq!(manager.connection_metadata("c1", "missing").await, None);
        assert_eq!(manager.connection_metadata("c2", "player_id").await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_rejects_further_use() {
        let manager = ConnectionManager::default();
        let (conn, _rx) = connect(&manager, "c1").await;
        manager.join_group("room1", "c1").await.unwrap();

        assert_eq!(manager.shutdown().await, 1);
        assert!(!manager.is_running().await);
        assert!(conn.is_closed());
        assert_eq!(manager.group_count().await, 0);

        let (sink, _rx) = transport::unbounded::<Message>();
        assert!(matches!(
            manager.connect("c2", sink, ConnectionMetadata::new()).await,
            Err(ManagerError::NotInitialized)
        ));
        assert_eq!(
            manager.send_to_connection("c1", &chat("x")).await,
            Err(ManagerError::NotInitialized)
        );
        assert_eq!(
            manager.send_to_group("room1", &chat("x"), &[]).await,
            Err(ManagerError::NotInitialized)
        );
    }
}
