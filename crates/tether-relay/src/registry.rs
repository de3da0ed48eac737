//! Node registry and router.
//!
//! The registry maps node ids to live connection handles. It is shared by every
//! connection task; `DashMap` shard locks serialize writers per key, so a
//! register, replace or unregister of one id never races another writer of the
//! same id.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tether_core::{NodeId, ProtocolError, RouteHeader, WireFrame};
use tokio::sync::mpsc;

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Reference to one live connection, held by the registry while registered
///
/// Frames pushed through the handle are written by the connection's own
/// writer task; the registry never touches the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<WireFrame>,
    connected_at: Instant,
}

impl ConnectionHandle {
    /// Create a handle feeding `tx`
    #[must_use]
    pub fn new(id: ConnectionId, peer: SocketAddr, tx: mpsc::UnboundedSender<WireFrame>) -> Self {
        Self {
            id,
            peer,
            tx,
            connected_at: Instant::now(),
        }
    }

    /// Connection id
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time the connection was accepted
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Queue a frame for the writer task; false if the writer has shut down
    pub fn send(&self, frame: WireFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// True once the writer task has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of routing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Frame queued on the target's connection
    Delivered {
        /// Target node id
        target: NodeId,
    },
    /// No connection registered under the target id; frame dropped
    Missed {
        /// Target node id
        target: NodeId,
    },
    /// Target registered but its connection is already shutting down
    Closed {
        /// Target node id
        target: NodeId,
    },
}

/// Node id to connection map
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<NodeId, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a newly accepted connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register `handle` under `node_id`, last writer wins
    ///
    /// Returns the displaced handle, if any. The displaced connection is not
    /// closed; it simply stops receiving routed frames.
    pub fn register(&self, node_id: NodeId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let peer = handle.peer();
        let connection_id = handle.id();
        let previous = self.connections.insert(node_id.clone(), handle);

        match &previous {
            Some(old) => tracing::warn!(
                node_id = %node_id,
                %peer,
                connection_id,
                replaced = old.id(),
                "node re-registered, previous connection orphaned"
            ),
            None => tracing::info!(node_id = %node_id, %peer, connection_id, "node registered"),
        }

        previous
    }

    /// Remove `node_id` if it is still registered to `connection_id`
    ///
    /// A connection that was replaced by a newer registration leaves the newer
    /// entry in place. Returns true if an entry was removed.
    pub fn unregister(&self, node_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(node_id, |_, handle| handle.id() == connection_id)
            .is_some();

        if removed {
            tracing::info!(node_id, connection_id, "node unregistered");
        } else {
            tracing::debug!(
                node_id,
                connection_id,
                "connection no longer registered, keeping current entry"
            );
        }

        removed
    }

    /// Route a frame by its target id, forwarding the original frame unchanged
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the target id cannot be read from the frame.
    pub fn route(&self, frame: WireFrame) -> Result<RouteOutcome, ProtocolError> {
        let header = RouteHeader::peek(&frame)?;
        Ok(self.deliver(header.target, frame))
    }

    /// Forward `frame` to whatever is registered under `target`
    pub fn deliver(&self, target: NodeId, frame: WireFrame) -> RouteOutcome {
        // Shard lock released before queueing
        let handle = self.connections.get(target.as_str()).map(|h| h.clone());

        match handle {
            Some(handle) => {
                if handle.send(frame) {
                    RouteOutcome::Delivered { target }
                } else {
                    tracing::warn!(to = %target, peer = %handle.peer(), "target connection closing, frame dropped");
                    RouteOutcome::Closed { target }
                }
            }
            None => {
                tracing::warn!(to = %target, "target node not found, frame dropped");
                RouteOutcome::Missed { target }
            }
        }
    }

    /// True if `node_id` is currently registered
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.connections.contains_key(node_id)
    }

    /// Connection id currently registered under `node_id`
    #[must_use]
    pub fn connection_id(&self, node_id: &str) -> Option<ConnectionId> {
        self.connections.get(node_id).map(|h| h.id())
    }

    /// Registered node ids, in no particular order
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if no node is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{Envelope, MessageEnvelope, Payload};

    fn handle(
        registry: &ConnectionRegistry,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<WireFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = "127.0.0.1:9000".parse().unwrap();
        (ConnectionHandle::new(registry.next_connection_id(), addr, tx), rx)
    }

    fn frame_to(target: &str) -> WireFrame {
        Envelope::from(MessageEnvelope::new("node_1", target, Payload::new()))
            .encode()
            .unwrap()
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_connection_id();
        let b = registry.next_connection_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_route_forwards_original_frame() {
        let registry = ConnectionRegistry::new();
        let (h, mut rx) = handle(&registry);
        registry.register("node_2".to_string(), h);

        let frame = frame_to("node_2");
        let outcome = registry.route(frame.clone()).unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                target: "node_2".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), frame);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = handle(&registry);
        let (second, mut second_rx) = handle(&registry);
        let first_id = first.id();

        assert!(registry.register("node_2".to_string(), first).is_none());
        let displaced = registry.register("node_2".to_string(), second).unwrap();
        assert_eq!(displaced.id(), first_id);
        assert!(!displaced.is_closed());

        registry.route(frame_to("node_2")).unwrap();
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_keeps_newer_registration() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = handle(&registry);
        let (second, _second_rx) = handle(&registry);
        let (first_id, second_id) = (first.id(), second.id());

        registry.register("node_2".to_string(), first);
        registry.register("node_2".to_string(), second);

        assert!(!registry.unregister("node_2", first_id));
        assert_eq!(registry.connection_id("node_2"), Some(second_id));

        assert!(registry.unregister("node_2", second_id));
        assert!(!registry.contains("node_2"));
    }

    #[test]
    fn test_route_miss_is_not_an_error() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.route(frame_to("nobody")).unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Missed {
                target: "nobody".to_string()
            }
        );
    }

    #[test]
    fn test_route_to_closed_writer() {
        let registry = ConnectionRegistry::new();
        let (h, rx) = handle(&registry);
        registry.register("node_2".to_string(), h);
        drop(rx);

        assert!(matches!(
            registry.route(frame_to("node_2")).unwrap(),
            RouteOutcome::Closed { .. }
        ));
    }

    #[test]
    fn test_route_undecodable_frame() {
        let registry = ConnectionRegistry::new();
        assert!(registry.route(WireFrame::Text("{oops".to_string())).is_err());
        assert!(registry.route(WireFrame::Binary(vec![0xc1])).is_err());
    }

    #[test]
    fn test_node_ids() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let (a, _ra) = handle(&registry);
        let (b, _rb) = handle(&registry);
        registry.register("a".to_string(), a);
        registry.register("b".to_string(), b);

        let mut ids = registry.node_ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
