//! Live connection tracking for the server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crypto_session::PublicKey;
use dashmap::DashMap;
use shared_protocol::{ConnectionId, ConnectionState};

use crate::ChannelResult;

/// Snapshot of one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub state: ConnectionState,
    /// Known once the handshake completes
    pub peer_public_key: Option<PublicKey>,
    pub opened_at: Instant,
    pub messages_echoed: u64,
}

impl ConnectionInfo {
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Cumulative server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u64,
    pub active: u64,
    pub handshakes_failed: u64,
    pub messages_echoed: u64,
    pub closed: u64,
}

/// Concurrent map of active connections
///
/// All methods are synchronous; no entry guard ever lives across an await.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    accepted: AtomicU64,
    handshakes_failed: AtomicU64,
    messages_echoed: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly accepted connection
    pub(crate) fn register(&self, peer_addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionInfo {
                id,
                peer_addr,
                state: ConnectionState::Accepted,
                peer_public_key: None,
                opened_at: Instant::now(),
                messages_echoed: 0,
            },
        );
        self.accepted.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Advance a connection's state
    pub(crate) fn transition(&self, id: ConnectionId, next: ConnectionState) -> ChannelResult<()> {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.state.transition(next)?;
        }
        Ok(())
    }

    /// Mark the handshake done and remember the peer's key
    pub(crate) fn activate(&self, id: ConnectionId, peer_public_key: PublicKey) -> ChannelResult<()> {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.state.transition(ConnectionState::Active)?;
            entry.peer_public_key = Some(peer_public_key);
        }
        Ok(())
    }

    pub(crate) fn record_echo(&self, id: ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.messages_echoed += 1;
        }
        self.messages_echoed.fetch_add(1, Ordering::Relaxed);
    }

    /// Close and forget a connection, returning its final snapshot
    pub(crate) fn close(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let (_, mut info) = self.connections.remove(&id)?;

        if info.state == ConnectionState::Handshaking {
            self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
        }
        // Closed is reachable from every live state
        let _ = info.state.transition(ConnectionState::Closed);
        self.closed.fetch_add(1, Ordering::Relaxed);

        Some(info)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every active connection
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.connections.len() as u64,
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            messages_echoed: self.messages_echoed.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelError;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_lifecycle_updates_stats() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr());
        assert_eq!(registry.get(&id).unwrap().state, ConnectionState::Accepted);

        registry.transition(id, ConnectionState::Handshaking).unwrap();
        let key = PublicKey::from_bytes([9u8; 32]);
        registry.activate(id, key).unwrap();
        registry.record_echo(id);
        registry.record_echo(id);

        let info = registry.get(&id).unwrap();
        assert_eq!(info.state, ConnectionState::Active);
        assert_eq!(info.peer_public_key, Some(key));
        assert_eq!(info.messages_echoed, 2);

        let closed = registry.close(id).unwrap();
        assert_eq!(closed.state, ConnectionState::Closed);
        assert!(registry.is_empty());

        assert_eq!(
            registry.stats(),
            ServerStats {
                accepted: 1,
                active: 0,
                handshakes_failed: 0,
                messages_echoed: 2,
                closed: 1,
            }
        );
    }

    #[test]
    fn test_failed_handshake_counted() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr());
        registry.transition(id, ConnectionState::Handshaking).unwrap();
        registry.close(id);

        assert_eq!(registry.stats().handshakes_failed, 1);
        assert!(registry.close(id).is_none());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(addr());

        let err = registry
            .activate(id, PublicKey::from_bytes([1u8; 32]))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
        assert_eq!(registry.len(), 1);
    }
}
