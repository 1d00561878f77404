use dashmap::DashMap;
use proctor_core::Identity;

use crate::connection::{Conn, ConnId};

/// Live mapping from identity to connection handle, one instance per role.
///
/// Entries are a lookup, not an ownership relation: the socket belongs to
/// its accepting task, and at most one handle is held per identity. A new
/// registration for an identity displaces the old entry without closing the
/// old socket.
pub struct ConnectionRegistry<C> {
    conns: DashMap<Identity, C>,
}

impl<C: Conn + Clone> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self { conns: DashMap::new() }
    }

    /// Insert or replace the entry for `identity`; returns the displaced
    /// handle, if any.
    pub fn register(&self, identity: Identity, conn: C) -> Option<C> {
        self.conns.insert(identity, conn)
    }

    pub fn lookup(&self, identity: &Identity) -> Option<C> {
        self.conns.get(identity).map(|entry| entry.value().clone())
    }

    /// Remove the entry only while it still belongs to `conn_id`.
    ///
    /// The teardown path of a replaced socket races its successor's
    /// registration; the guard keeps it from evicting the live entry.
    pub fn remove_if(&self, identity: &Identity, conn_id: &ConnId) -> bool {
        self.conns
            .remove_if(identity, |_, conn| conn.id() == conn_id)
            .is_some()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.conns.contains_key(identity)
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }
}

impl<C: Conn + Clone> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
