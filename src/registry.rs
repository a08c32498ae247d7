use std::net::SocketAddr;

use lockfree::map::Map as LockfreeMap;

use crate::connection::ConnectionId;

/// Concurrent membership set of live connections.
///
/// Written by the selector thread (accept inserts, close removes) and read
/// from anywhere. The peer address rides along as a lookup aid; membership is
/// keyed on [`ConnectionId`] alone.
///
/// ```text
///   LockfreeMap<u64, SocketAddr>
///        ├──> 2 ──> 127.0.0.1:53012
///        └──> 3 ──> 127.0.0.1:53014
/// ```
pub struct ClientRegistry {
    clients: LockfreeMap<u64, SocketAddr>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: LockfreeMap::new(),
        }
    }

    /// Returns false if the id was already present.
    pub fn insert(&self, id: ConnectionId, peer: SocketAddr) -> bool {
        self.clients.insert(id.as_u64(), peer).is_none()
    }

    /// Returns false if the id was not present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.clients.remove(&id.as_u64()).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.get(&id.as_u64()).is_some()
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.clients.get(&id.as_u64()).map(|entry| *entry.val())
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.clients
            .iter()
            .map(|entry| ConnectionId::new(*entry.key()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.iter().next().is_none()
    }

    /// Removes every member, returning how many were dropped.
    pub fn clear(&self) -> usize {
        self.ids().into_iter().filter(|id| self.remove(*id)).count()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
