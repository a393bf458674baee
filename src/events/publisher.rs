use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{EventBus, SessionEvent, SessionEventType};
use crate::{
    cache::{Cache, CacheResult, MessageStream, SessionKeys},
    observability::metrics,
};

/// Publishes session events locally and to other instances.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<EventBus>,
    cache: Arc<dyn Cache>,
    instance_id: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>, cache: Arc<dyn Cache>, instance_id: impl Into<String>) -> Self {
        Self {
            bus,
            cache,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// An event stamped with this instance as its source.
    pub fn event(
        &self,
        event_type: SessionEventType,
        session_id: &str,
        user_id: &str,
    ) -> SessionEvent {
        SessionEvent::new(event_type, session_id, user_id, &self.instance_id)
    }

    /// Best-effort: failures are logged and never reach the caller.
    pub async fn publish(&self, event: SessionEvent) {
        metrics::record_session_event(event.event_type.as_str());

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(
                    event_type = event.event_type.as_str(),
                    session_id = %event.session_id,
                    error = %e,
                    "Failed to serialize session event"
                );
                None
            }
        };

        let event_type = event.event_type;
        let session_id = event.session_id.clone();
        self.bus.publish(event);

        if let Some(payload) = payload
            && let Err(e) = self
                .cache
                .publish(SessionKeys::events_channel(), &payload)
                .await
        {
            tracing::warn!(
                event_type = event_type.as_str(),
                session_id = %session_id,
                error = %e,
                "Failed to broadcast session event"
            );
        }
    }
}

/// Relays events published by other instances onto the local bus.
pub struct EventListener {
    messages: MessageStream,
    bus: Arc<EventBus>,
    instance_id: String,
}

impl EventListener {
    /// Subscribe to the event channel. Events published after this returns
    /// will be seen by [`EventListener::run`].
    pub async fn subscribe(publisher: &EventPublisher) -> CacheResult<Self> {
        let messages = publisher
            .cache
            .subscribe(SessionKeys::events_channel())
            .await?;

        Ok(Self {
            messages,
            bus: publisher.bus.clone(),
            instance_id: publisher.instance_id.clone(),
        })
    }

    /// Runs until the subscription closes.
    pub async fn run(mut self) {
        while let Some(payload) = self.messages.next().await {
            let event: SessionEvent = match serde_json::from_slice(&payload) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable session event");
                    continue;
                }
            };

            // Our own events already went to the local bus
            if event.source == self.instance_id {
                continue;
            }

            tracing::debug!(
                event_type = event.event_type.as_str(),
                session_id = %event.session_id,
                source = %event.source,
                "Received remote session event"
            );
            self.bus.publish(event);
        }

        tracing::info!("Session event subscription closed");
    }
}

/// Subscribe and relay remote events in a background task.
pub async fn start_event_listener(publisher: &EventPublisher) -> CacheResult<JoinHandle<()>> {
    let listener = EventListener::subscribe(publisher).await?;
    tracing::info!(
        instance_id = %publisher.instance_id(),
        channel = SessionKeys::events_channel(),
        "Starting session event listener"
    );
    Ok(tokio::spawn(listener.run()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{cache::MemoryCache, config::MemoryCacheConfig};

    fn shared_cache() -> Arc<dyn Cache> {
        Arc::new(MemoryCache::new(&MemoryCacheConfig::default()))
    }

    #[tokio::test]
    async fn test_publish_reaches_local_bus_and_channel() {
        let cache = shared_cache();
        let publisher = EventPublisher::new(Arc::new(EventBus::new()), cache.clone(), "inst_a");
        let mut local = publisher.bus().subscribe();
        let mut remote = cache.subscribe(SessionKeys::events_channel()).await.unwrap();

        let event = publisher.event(SessionEventType::SessionCreated, "sess_1", "u1");
        publisher.publish(event.clone()).await;

        assert_eq!(local.recv().await.unwrap(), event);
        let payload = remote.next().await.unwrap();
        let wire: SessionEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(wire, event);
        assert_eq!(wire.source, "inst_a");
    }

    #[tokio::test]
    async fn test_listener_relays_only_foreign_events() {
        let cache = shared_cache();
        let a = EventPublisher::new(Arc::new(EventBus::new()), cache.clone(), "inst_a");
        let b = EventPublisher::new(Arc::new(EventBus::new()), cache.clone(), "inst_b");

        let _listener_a = start_event_listener(&a).await.unwrap();
        let _listener_b = start_event_listener(&b).await.unwrap();
        let mut bus_a = a.bus().subscribe();
        let mut bus_b = b.bus().subscribe();

        let event = a.event(SessionEventType::SessionRevoked, "sess_1", "u1");
        a.publish(event.clone()).await;

        let relayed = tokio::time::timeout(Duration::from_secs(1), bus_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relayed, event);

        // A sees its own event exactly once, from the direct publish
        assert_eq!(bus_a.recv().await.unwrap(), event);
        let echo = tokio::time::timeout(Duration::from_millis(100), bus_a.recv()).await;
        assert!(echo.is_err(), "own events must not be relayed back");
    }
}
