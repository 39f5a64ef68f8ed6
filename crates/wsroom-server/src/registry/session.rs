//! Sessions: connections grouped under one identity.

use std::collections::BTreeSet;

use wsroom_core::ConnectionId;

/// The connections bound to one authenticated identity.
#[derive(Clone, Debug)]
pub struct Session {
    name: String,
    connections: BTreeSet<ConnectionId>,
}

impl Session {
    /// A session holding a single connection.
    pub fn new(name: impl Into<String>, first: ConnectionId) -> Self {
        Self {
            name: name.into(),
            connections: BTreeSet::from([first]),
        }
    }

    /// Principal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind a connection. Returns `false` if it was already bound.
    pub fn insert(&mut self, id: ConnectionId) -> bool {
        self.connections.insert(id)
    }

    /// Unbind a connection. Returns `false` if it was not bound.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id)
    }

    /// Whether `id` is bound to this session.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains(id)
    }

    /// Bound connections in ID order.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.iter()
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are bound.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let mut session = Session::new("alice", ConnectionId::from("c1"));
        assert!(!session.insert(ConnectionId::from("c1")));
        assert!(session.insert(ConnectionId::from("c2")));
        assert_eq!(session.len(), 2);
        assert_eq!(session.name(), "alice");
    }

    #[test]
    fn remove_last_leaves_empty() {
        let mut session = Session::new("alice", ConnectionId::from("c1"));
        assert!(session.remove(&ConnectionId::from("c1")));
        assert!(!session.remove(&ConnectionId::from("c1")));
        assert!(session.is_empty());
    }
}
