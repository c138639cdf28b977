//! Broadcast Gateway
//!
//! Fan-out boundary between the session engine and whatever transport
//! pushes state to clients. The engine needs exactly one capability:
//! publish an event to a session's subscribers, delivered to each
//! subscriber in publish order (FIFO per session; no ordering across
//! sessions).

use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::engine::events::EventRecord;
use crate::engine::session::SessionId;

/// Publish capability the registry depends on.
///
/// Implementations must preserve per-session publish order for every
/// subscriber. Callers publish while holding the session's write lock,
/// so calls for one session never race each other.
pub trait Gateway: Send + Sync {
    /// Deliver an event to all current subscribers of its session.
    fn publish(&self, record: &EventRecord);

    /// Drop any fan-out state held for a session once it is evicted.
    fn retire_session(&self, _session_id: &SessionId) {}
}

/// In-process gateway backed by one tokio broadcast channel per session.
///
/// Subscribers that fall behind by more than the channel capacity drop
/// oldest events (the broadcast lag contract); the WebSocket layer
/// surfaces that as a resync, not silent reordering.
pub struct BroadcastGateway {
    channels: RwLock<BTreeMap<SessionId, broadcast::Sender<EventRecord>>>,
    capacity: usize,
}

impl BroadcastGateway {
    /// Create a gateway with the given per-session channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Subscribe to a session's event stream.
    ///
    /// The channel is created on first use, so subscribing before the
    /// first publish never loses events.
    pub fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<EventRecord> {
        let mut channels = self.channels.write().expect("gateway lock poisoned");
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop a session's channel once the session is evicted.
    pub fn remove_session(&self, session_id: &SessionId) {
        let mut channels = self.channels.write().expect("gateway lock poisoned");
        channels.remove(session_id);
    }

    /// Number of sessions with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.read().expect("gateway lock poisoned").len()
    }
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Gateway for BroadcastGateway {
    fn publish(&self, record: &EventRecord) {
        let sender = {
            let channels = self.channels.read().expect("gateway lock poisoned");
            channels.get(&record.session_id).cloned()
        };

        // A send error just means no subscriber is listening yet.
        if let Some(sender) = sender {
            let _ = sender.send(record.clone());
        }
    }

    fn retire_session(&self, session_id: &SessionId) {
        self.remove_session(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::SessionEvent;
    use crate::engine::session::SessionState;

    fn state_changed(session_id: SessionId, ts: u64) -> EventRecord {
        EventRecord::new(session_id, ts, SessionEvent::SessionStateChanged {
            from: SessionState::Waiting,
            to: SessionState::Active,
            round_index: Some(0),
        })
    }

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let gateway = BroadcastGateway::new(16);
        let mut rx = gateway.subscribe([1; 16]);

        gateway.publish(&state_changed([1; 16], 100));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.timestamp_ms, 100);
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let gateway = BroadcastGateway::new(16);
        let mut rx = gateway.subscribe([1; 16]);

        for ts in 0..5 {
            gateway.publish(&state_changed([1; 16], ts));
        }

        for ts in 0..5 {
            assert_eq!(rx.recv().await.unwrap().timestamp_ms, ts);
        }
    }

    #[tokio::test]
    async fn test_sessions_isolated() {
        let gateway = BroadcastGateway::new(16);
        let mut rx_a = gateway.subscribe([1; 16]);
        let mut rx_b = gateway.subscribe([2; 16]);

        gateway.publish(&state_changed([1; 16], 1));

        assert_eq!(rx_a.recv().await.unwrap().session_id, [1; 16]);
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let gateway = BroadcastGateway::new(16);
        gateway.publish(&state_changed([3; 16], 1));
        assert_eq!(gateway.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_session_drops_channel() {
        let gateway = BroadcastGateway::new(16);
        let _rx = gateway.subscribe([1; 16]);
        assert_eq!(gateway.channel_count(), 1);

        gateway.remove_session(&[1; 16]);
        assert_eq!(gateway.channel_count(), 0);
    }
}
