//! Connection Hub
//!
//! In-process implementation of `TransportPort`. Each connection owns a
//! bounded outbound queue drained by its WebSocket writer task; topic rooms
//! are plain member sets.
//!
//! # Backpressure
//!
//! Sends never wait. An event for a connection whose queue is full is
//! dropped and counted, so one slow client cannot stall a polling worker or
//! the other members of a room. Broadcasts serialize the event once and
//! clone the frame per member.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::application::ports::{ServerEvent, TransportPort};
use crate::domain::subscription::{ConnectionId, Topic};
use crate::infrastructure::metrics;

/// One serialized server event.
pub type OutboundFrame = String;

/// Default per-connection queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Registry of connected clients and their topic rooms.
#[derive(Debug)]
pub struct ConnectionHub {
    capacity: usize,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<OutboundFrame>>>,
    rooms: RwLock<HashMap<Topic, HashSet<ConnectionId>>>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl ConnectionHub {
    /// Create a hub with the given per-connection queue capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection and return the receiving end of its queue.
    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.write().insert(connection, tx);
        debug!(connection_id = %connection, "Connection registered");
        rx
    }

    /// Drop a connection and remove it from every room.
    pub fn unregister(&self, connection: ConnectionId) {
        self.connections.write().remove(&connection);
        let mut rooms = self.rooms.write();
        for members in rooms.values_mut() {
            members.remove(&connection);
        }
        rooms.retain(|_, members| !members.is_empty());
        debug!(connection_id = %connection, "Connection unregistered");
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of members in a room.
    #[must_use]
    pub fn room_size(&self, topic: Topic) -> usize {
        self.rooms.read().get(&topic).map_or(0, HashSet::len)
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.read().contains_key(&connection)
    }

    fn send_frame(&self, connection: ConnectionId, frame: OutboundFrame, event: &'static str) -> bool {
        let sender = self.connections.read().get(&connection).cloned();
        let Some(sender) = sender else {
            return false;
        };

        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::record_event_dropped(event);
                warn!(connection_id = %connection, event, "Outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_event_dropped(event);
                false
            }
        }
    }
}

fn serialize(event: &ServerEvent) -> Option<OutboundFrame> {
    serde_json::to_string(event)
        .map_err(|e| error!(event = event.name(), error = %e, "Failed to serialize event"))
        .ok()
}

impl TransportPort for ConnectionHub {
    fn emit(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        let Some(frame) = serialize(&event) else {
            return false;
        };
        let delivered = self.send_frame(connection, frame, event.name());
        if delivered {
            metrics::record_events_sent(event.name(), 1);
        }
        delivered
    }

    fn broadcast(&self, topic: Topic, event: ServerEvent) -> usize {
        let members: Vec<ConnectionId> = self
            .rooms
            .read()
            .get(&topic)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        if members.is_empty() {
            return 0;
        }

        let Some(frame) = serialize(&event) else {
            return 0;
        };
        let delivered = members
            .into_iter()
            .filter(|member| self.send_frame(*member, frame.clone(), event.name()))
            .count();
        metrics::record_events_sent(event.name(), delivered as u64);
        delivered
    }

    fn join(&self, connection: ConnectionId, topic: Topic) {
        self.rooms.write().entry(topic).or_default().insert(connection);
    }

    fn leave(&self, connection: ConnectionId, topic: Topic) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(&topic) {
            members.remove(&connection);
            if members.is_empty() {
                rooms.remove(&topic);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn emit_reaches_only_target() {
        let hub = ConnectionHub::default();
        let a = ConnectionId::new_v4();
        let b = ConnectionId::new_v4();
        let mut rx_a = hub.register(a);
        let mut rx_b = hub.register(b);

        assert!(hub.emit(a, ServerEvent::message("hello")));

        let frame = rx_a.try_recv().unwrap();
        assert_eq!(parse(&frame)["data"]["message"], "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn emit_to_unknown_connection_is_not_delivered() {
        let hub = ConnectionHub::default();
        assert!(!hub.emit(ConnectionId::new_v4(), ServerEvent::message("lost")));
    }

    #[test]
    fn broadcast_reaches_room_members() {
        let hub = ConnectionHub::default();
        let a = ConnectionId::new_v4();
        let b = ConnectionId::new_v4();
        let outsider = ConnectionId::new_v4();
        let mut rx_a = hub.register(a);
        let mut rx_b = hub.register(b);
        let mut rx_out = hub.register(outsider);

        hub.join(a, Topic::Indexes);
        hub.join(b, Topic::Indexes);

        assert_eq!(hub.broadcast(Topic::Indexes, ServerEvent::message("tick")), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let hub = ConnectionHub::new(1);
        let a = ConnectionId::new_v4();
        let mut rx = hub.register(a);

        assert!(hub.emit(a, ServerEvent::message("first")));
        assert!(!hub.emit(a, ServerEvent::message("second")));

        assert_eq!(parse(&rx.try_recv().unwrap())["data"]["message"], "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_leaves_rooms() {
        let hub = ConnectionHub::default();
        let a = ConnectionId::new_v4();
        let _rx = hub.register(a);
        hub.join(a, Topic::Indexes);
        assert_eq!(hub.room_size(Topic::Indexes), 1);

        hub.unregister(a);

        assert_eq!(hub.room_size(Topic::Indexes), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.is_connected(a));
    }

    #[test]
    fn leave_is_idempotent() {
        let hub = ConnectionHub::default();
        let a = ConnectionId::new_v4();
        hub.leave(a, Topic::Indexes);
        hub.join(a, Topic::Indexes);
        hub.leave(a, Topic::Indexes);
        hub.leave(a, Topic::Indexes);
        assert_eq!(hub.room_size(Topic::Indexes), 0);
    }
}
