use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::model::{ConnectionId, ServerEvent};

/// Fan-out bus for lock/unlock/booking-changed events.
///
/// Subscriptions are an explicit registry keyed by connection and tied
/// to connection lifecycle — no process-global handler list. Each
/// subscriber gets its own ordered channel; delivery is at-most-once
/// with no replay, so a late subscriber re-fetches state instead.
pub struct BroadcastChannel {
    subscribers: DashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Register a connection. Replaces any previous subscription for the
    /// same id (the old receiver just stops getting events).
    pub fn subscribe(&self, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(conn, tx);
        rx
    }

    pub fn unsubscribe(&self, conn: ConnectionId) {
        self.subscribers.remove(&conn);
    }

    /// Deliver to every subscriber. A closed receiver is silently skipped.
    pub fn send_all(&self, event: &ServerEvent) {
        for entry in self.subscribers.iter() {
            let _ = entry.value().send(event.clone());
        }
    }

    /// Deliver to every subscriber except `except` — the caller already
    /// knows the outcome of its own request.
    pub fn send_to_others(&self, except: ConnectionId, event: &ServerEvent) {
        for entry in self.subscribers.iter() {
            if *entry.key() != except {
                let _ = entry.value().send(event.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
