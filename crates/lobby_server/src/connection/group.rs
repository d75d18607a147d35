//! Group membership index.

use super::{ConnectionId, GroupId};
use std::collections::{HashMap, HashSet};

/// Mapping from group id to the set of member connection ids.
///
/// A group exists only while it has at least one member: removing the last
/// member deletes the group.
#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: HashMap<GroupId, HashSet<ConnectionId>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member, creating the group if needed.
    ///
    /// Returns `false` if the connection was already a member.
    pub fn add(&mut self, group_id: &str, connection_id: &str) -> bool {
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .insert(connection_id.to_string())
    }

    /// Removes a member, deleting the group once it is empty.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, group_id: &str, connection_id: &str) -> bool {
        let Some(members) = self.groups.get_mut(group_id) else {
            return false;
        };
        let removed = members.remove(connection_id);
        if members.is_empty() {
            self.groups.remove(group_id);
        }
        removed
    }

    /// Removes a connection from every group, pruning groups left empty.
    ///
    /// Returns the ids of the groups it was removed from.
    pub fn remove_everywhere(&mut self, connection_id: &str) -> Vec<GroupId> {
        let mut left = Vec::new();
        self.groups.retain(|group_id, members| {
            if members.remove(connection_id) {
                left.push(group_id.clone());
            }
            !members.is_empty()
        });
        left
    }

    pub fn members(&self, group_id: &str) -> Option<&HashSet<ConnectionId>> {
        self.groups.get(group_id)
    }

    pub fn contains_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn is_member(&self, group_id: &str, connection_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Number of members, 0 for unknown groups.
    pub fn member_count(&self, group_id: &str) -> usize {
        self.groups.get(group_id).map_or(0, HashSet::len)
    }

    /// Owned snapshot of the member ids, empty for unknown groups.
    pub fn member_ids(&self, group_id: &str) -> Vec<ConnectionId> {
        self.groups
            .get(group_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
