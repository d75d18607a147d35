//! Registry of live connections indexed by connection id.

use super::{client::Connection, ConnectionId};
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from connection id to the live [`Connection`].
///
/// Not synchronized on its own; the [`ConnectionManager`](super::ConnectionManager)
/// guards it together with the group index.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning any connection previously stored
    /// under the same id.
    pub fn insert(&mut self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections
            .insert(connection.id().to_string(), connection)
    }

    pub fn get(&self, connection_id: &str) -> Option<&Arc<Connection>> {
        self.connections.get(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn remove(&mut self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.remove(connection_id)
    }

    /// Removes the entry only if it still refers to this exact connection.
    ///
    /// A stale connection that was replaced under the same id must not evict
    /// its replacement.
    pub fn remove_if_same(&mut self, connection: &Arc<Connection>) -> bool {
        match self.connections.get(connection.id()) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                self.connections.remove(connection.id());
                true
            }
            _ => false,
        }
    }

    /// Removes and returns every registered connection.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.connections.drain().map(|(_, conn)| conn).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionMetadata;

    fn conn(id: &str) -> Arc<Connection> {
        let (conn, _rx) = Connection::new(id.to_string(), ConnectionMetadata::new(), 4);
        Arc::new(conn)
    }

    #[test]
    fn insert_get_remove() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.insert(conn("c1")).is_none());
        assert!(registry.contains("c1"));
        assert_eq!(registry.get("c1").map(|c| c.id()), Some("c1"));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("c1").is_some());
        assert!(registry.remove("c1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_if_same_ignores_replaced_connection() {
        let mut registry = ConnectionRegistry::new();
        let stale = conn("c1");
        let fresh = conn("c1");
        registry.insert(stale.clone());
        let previous = registry.insert(fresh.clone());
        assert!(previous.is_some_and(|p| Arc::ptr_eq(&p, &stale)));

        assert!(!registry.remove_if_same(&stale));
        assert!(registry.contains("c1"));
        assert!(registry.remove_if_same(&fresh));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(conn("a"));
        registry.insert(conn("b"));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
