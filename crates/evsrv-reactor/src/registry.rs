//! Connection registry.
//!
//! The single place an id resolves to a live connection object. Owned
//! and mutated by the reactor thread only — that single-writer rule is
//! what lets the registry go unlocked. Workers never see a `Connection`,
//! only a `ConnectionId`.
//!
//! The reactor keeps registry membership and poll-set membership in
//! lockstep: every insert pairs with an epoll add, every remove with an
//! epoll delete.

use std::collections::HashMap;

use evsrv_core::id::ConnectionId;

use crate::connection::Connection;

pub struct ConnectionRegistry {
    map: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            map: HashMap::new(),
            // 0 is the listener sentinel
            next_id: 1,
        }
    }

    /// Mint the next connection id.
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert (or replace, during upgrade) under the connection's id.
    pub fn insert(&mut self, conn: Connection) {
        self.map.insert(conn.id(), conn);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.map.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.map.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Take everything out (shutdown path).
    pub fn drain(&mut self) -> Vec<Connection> {
        self.map.drain().map(|(_, c)| c).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn conn(id: ConnectionId) -> (Connection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let c = Connection::http(id, OwnedFd::from(a), "127.0.0.1:1".parse().unwrap());
        (c, b)
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let mut reg = ConnectionRegistry::new();
        let a = reg.allocate_id();
        let b = reg.allocate_id();
        assert_ne!(a, b);
        assert!(!a.is_listener());
    }

    #[test]
    fn test_insert_replace_remove() {
        let mut reg = ConnectionRegistry::new();
        let id = reg.allocate_id();

        let (c1, _p1) = conn(id);
        reg.insert(c1);
        assert_eq!(reg.len(), 1);

        // Replace under the same id (upgrade semantics): still one entry.
        let (c2, _p2) = conn(id);
        reg.insert(c2);
        assert_eq!(reg.len(), 1);

        assert!(reg.remove(id).is_some());
        assert!(reg.remove(id).is_none());
        assert!(reg.is_empty());
    }
}
