//! Fire-and-forget session notifications.

use {serde::Serialize, tokio::sync::broadcast};

use crate::state::SessionState;

/// Capacity of the broadcast ring; slow subscribers skip ahead.
const EVENT_CAPACITY: usize = 256;

/// Notification pushed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Qr {
        #[serde(rename = "senderId")]
        sender_id: String,
        qr: String,
    },
    StateChanged {
        #[serde(rename = "senderId")]
        sender_id: String,
        state: SessionState,
    },
    Closed {
        #[serde(rename = "senderId")]
        sender_id: String,
    },
}

impl SessionEvent {
    pub fn sender_id(&self) -> &str {
        match self {
            Self::Qr { sender_id, .. }
            | Self::StateChanged { sender_id, .. }
            | Self::Closed { sender_id } => sender_id,
        }
    }
}

/// Broadcast channel for [`SessionEvent`]s. Publishing with no subscribers
/// is fine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SessionEvent::Closed {
            sender_id: "alice".into(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::Qr {
            sender_id: "alice".into(),
            qr: "data".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.sender_id(), "alice");
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(SessionEvent::StateChanged {
            sender_id: "alice".into(),
            state: SessionState::Connected,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "state_changed", "senderId": "alice", "state": "connected"})
        );
    }
}
