use chrono::Utc;

use super::{
    error::{SessionError, SessionResult},
    model::{Session, SessionStatus},
    store::CacheSessionStore,
};
use crate::{
    events::{EventPublisher, SessionEventType},
    persistence::DurablePersistenceWriter,
};

/// Caps concurrent sessions per user by evicting the least recently active.
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: CacheSessionStore,
    persistence: DurablePersistenceWriter,
    events: EventPublisher,
}

impl QuotaEnforcer {
    pub fn new(
        store: CacheSessionStore,
        persistence: DurablePersistenceWriter,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            persistence,
            events,
        }
    }

    /// Make room for one more session. Returns the evicted session ids.
    ///
    /// Only sessions whose record is still present count; stale set members
    /// are pruned along the way. A `max_sessions` of zero disables the cap.
    pub async fn enforce_before_login(
        &self,
        user_id: &str,
        max_sessions: usize,
    ) -> SessionResult<Vec<String>> {
        if max_sessions == 0 {
            return Ok(Vec::new());
        }

        let mut sessions = self.store.live_sessions(user_id).await?;
        let mut evicted = Vec::new();

        while sessions.len() >= max_sessions {
            let Some(index) = least_recently_active(&sessions) else {
                break;
            };
            let victim = sessions.swap_remove(index);
            let now = Utc::now();

            if let Err(e) = self.store.revoke(&victim, now).await {
                tracing::warn!(
                    session_id = %victim.session_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to evict session"
                );
                return Err(SessionError::QuotaExceededTransient {
                    user_id: user_id.to_string(),
                    max_sessions,
                });
            }

            self.persistence.mark_status(
                &victim.session_id,
                SessionStatus::Revoked,
                Some(now),
            );
            self.events
                .publish(
                    self.events
                        .event(SessionEventType::SessionRevoked, &victim.session_id, user_id)
                        .with_data("reason", "quota_eviction"),
                )
                .await;

            tracing::info!(
                session_id = %victim.session_id,
                user_id = %user_id,
                max_sessions,
                "Evicted session due to concurrent session limit"
            );
            evicted.push(victim.session_id);
        }

        Ok(evicted)
    }
}

/// Oldest `last_active_at` wins; ties go to the smallest session id.
fn least_recently_active(sessions: &[Session]) -> Option<usize> {
    sessions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.last_active_at
                .cmp(&b.last_active_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        })
        .map(|(index, _)| index)
}
