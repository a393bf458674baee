//! Session lifecycle events.
//!
//! Every lifecycle transition produces one [`SessionEvent`]. The
//! [`EventPublisher`] hands it to the in-process [`EventBus`] and broadcasts
//! it on the cache channel `session:events` so other instances can react.
//! Delivery is best-effort and at most once: there is no event log and no
//! replay.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ SessionService  │────>│ EventPublisher  │────>│    EventBus     │──> local subscribers
//! └─────────────────┘     └────────┬────────┘     └────────▲────────┘
//!                                  │ PUBLISH               │ remote events
//!                                  v                       │
//!                         ┌─────────────────┐     ┌────────┴────────┐
//!                         │  cache channel  │────>│  EventListener  │
//!                         └─────────────────┘     └─────────────────┘
//! ```

mod publisher;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
pub use publisher::{EventListener, EventPublisher, start_event_listener};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Identifier stamped on events from this process: `inst_` followed by 8 hex chars.
pub fn new_instance_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("inst_{}", &id[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    SessionCreated,
    SessionUpdated,
    SessionRevoked,
    UserLogout,
    TokenRefreshed,
    SessionExpired,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventType::SessionCreated => "session_created",
            SessionEventType::SessionUpdated => "session_updated",
            SessionEventType::SessionRevoked => "session_revoked",
            SessionEventType::UserLogout => "user_logout",
            SessionEventType::TokenRefreshed => "token_refreshed",
            SessionEventType::SessionExpired => "session_expired",
        }
    }
}

/// An immutable fact about one session (or, for `user_logout`, one user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: SessionEventType,
    /// Empty for user-wide events.
    #[serde(default)]
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Unix seconds.
    pub timestamp: i64,
    /// Instance that published the event.
    pub source: String,
}

impl SessionEvent {
    pub fn new(
        event_type: SessionEventType,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            user_id: user_id.into(),
            data: serde_json::Map::new(),
            timestamp: Utc::now().timestamp(),
            source: source.into(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// In-process fan-out of session events.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                // No active subscribers, event is dropped
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
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
    fn test_instance_id_format() {
        let id = new_instance_id();
        assert!(id.starts_with("inst_"));
        assert_eq!(id.len(), 13);
    }

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::new(SessionEventType::SessionRevoked, "sess_1", "u1", "inst_1")
            .with_data("reason", "quota_eviction");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_revoked");
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["data"]["reason"], "quota_eviction");
        assert_eq!(json["source"], "inst_1");
        assert!(json["timestamp"].is_i64());

        let parsed: SessionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_type_names_match_serde() {
        for event_type in [
            SessionEventType::SessionCreated,
            SessionEventType::SessionUpdated,
            SessionEventType::SessionRevoked,
            SessionEventType::UserLogout,
            SessionEventType::TokenRefreshed,
            SessionEventType::SessionExpired,
        ] {
            assert_eq!(
                serde_json::to_value(event_type).unwrap(),
                event_type.as_str()
            );
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = SessionEvent::new(SessionEventType::SessionCreated, "sess_1", "u1", "inst_1");
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 0);
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        let event = SessionEvent::new(SessionEventType::UserLogout, "", "u1", "inst_1");
        assert_eq!(bus.publish(event), 0);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 1);
    }
}
