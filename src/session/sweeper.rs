//! Background removal of sessions past their absolute expiry.
//!
//! The sweeper walks the whole activity index, least recently active first,
//! reading it in pages of `batch_cleanup_size`. Entries whose record has vanished are
//! dropped from the index; sessions past `expires_at` are deleted, marked
//! `expired` in the durable mirror and announced with `session_expired`.

use chrono::{DateTime, Utc};

use super::{
    error::{SessionError, SessionResult},
    model::{Session, SessionStatus},
    service::SessionService,
    store::CacheSessionStore,
};
use crate::{
    config::SessionConfig,
    events::{EventPublisher, SessionEventType},
    observability::metrics,
    persistence::DurablePersistenceWriter,
};

/// Results from a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Activity-index entries examined.
    pub scanned: usize,
    /// Index entries dropped because their record was already gone.
    pub stale_removed: usize,
    /// Sessions deleted for being past their expiry.
    pub expired: usize,
}

impl SweepReport {
    pub fn has_removals(&self) -> bool {
        self.stale_removed + self.expired > 0
    }
}

#[derive(Clone)]
pub struct SessionSweeper {
    store: CacheSessionStore,
    persistence: DurablePersistenceWriter,
    events: EventPublisher,
    batch_size: usize,
}

impl SessionSweeper {
    pub fn new(
        store: CacheSessionStore,
        persistence: DurablePersistenceWriter,
        events: EventPublisher,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            persistence,
            events,
            batch_size,
        }
    }

    /// One pass over the whole activity index, `batch_size` entries per read.
    ///
    /// Only a failure to read the index aborts the pass. Per-session failures
    /// are logged and the entry is retried on the next pass.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SessionResult<SweepReport> {
        let mut report = SweepReport::default();
        let page_size = (self.batch_size > 0).then_some(self.batch_size);
        let mut offset = 0;

        loop {
            let page = self.store.active_session_ids(offset, page_size).await?;
            let fetched = page.len();
            let mut removed = 0;

            for (session_id, _) in page {
                if self.sweep_entry(&session_id, now, &mut report).await {
                    removed += 1;
                }
            }

            // Removed entries shift the ones behind them forward
            offset += fetched - removed;
            if page_size.map_or(true, |size| fetched < size) {
                break;
            }
        }

        metrics::record_sweep(report.stale_removed, report.expired);
        Ok(report)
    }

    /// Examine one index entry. Returns true when it left the index.
    async fn sweep_entry(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> bool {
        report.scanned += 1;

        match self.store.get(session_id).await {
            Ok(session) if session.is_expired_at(now) => match self.expire(&session, now).await {
                Ok(()) => {
                    report.expired += 1;
                    true
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to expire session");
                    false
                }
            },
            Ok(_) => false,
            Err(SessionError::SessionNotFound) => {
                match self.store.discard_index_entry(session_id).await {
                    Ok(()) => {
                        report.stale_removed += 1;
                        true
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %e,
                            "Failed to discard stale activity entry"
                        );
                        false
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to load session during sweep"
                );
                false
            }
        }
    }

    /// Remove an expired session everywhere and announce it.
    pub async fn expire(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<()> {
        self.store.delete(session).await?;
        self.persistence
            .mark_status(&session.session_id, SessionStatus::Expired, Some(now));
        self.events
            .publish(
                self.events
                    .event(
                        SessionEventType::SessionExpired,
                        &session.session_id,
                        &session.user_id,
                    )
                    .with_data("expires_at", session.expires_at.to_rfc3339()),
            )
            .await;

        tracing::debug!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "Session expired"
        );
        Ok(())
    }
}

/// Runs the sweeper until the task is cancelled.
pub async fn start_session_sweeper(service: SessionService, config: SessionConfig) {
    if !config.sweeper_enabled {
        tracing::info!("Session sweeper disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.cleanup_interval_secs,
        batch_size = config.batch_cleanup_size,
        "Starting session sweeper"
    );

    let interval = config.cleanup_interval();

    loop {
        match service.cleanup_expired_sessions().await {
            Ok(report) => {
                if report.has_removals() {
                    tracing::info!(
                        scanned = report.scanned,
                        stale_removed = report.stale_removed,
                        expired = report.expired,
                        "Session sweep complete"
                    );
                } else {
                    tracing::debug!(scanned = report.scanned, "Session sweep complete, nothing to remove");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error sweeping sessions");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::{
        cache::SessionKeys,
        persistence::tests::RecordingRepo,
        session::fixtures::{Fixture, stored_session},
    };

    fn sweeper(fx: &Fixture, persistence: DurablePersistenceWriter, batch: usize) -> SessionSweeper {
        SessionSweeper::new(fx.store.clone(), persistence, fx.events.clone(), batch)
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_and_stale() {
        let fx = Fixture::new();
        let repo = Arc::new(RecordingRepo::default());
        let sweeper = sweeper(&fx, DurablePersistenceWriter::new(repo.clone()), 100);
        let mut bus = fx.events.bus().subscribe();

        let now = Utc::now();
        // Refresh lifetime is one hour, so this one is already past expiry
        let old = stored_session(&fx, "u1", now - Duration::hours(2)).await;
        let fresh = stored_session(&fx, "u1", now).await;
        fx.store
            .cache()
            .zset_add(SessionKeys::active_sessions(), 0.0, "sess_ghost")
            .await
            .unwrap();

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 3,
                stale_removed: 1,
                expired: 1,
            }
        );

        assert!(matches!(
            fx.store.get(&old.session_id).await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(fx.store.get(&fresh.session_id).await.is_ok());
        let remaining: Vec<String> = fx
            .store
            .active_session_ids(0, None)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(remaining, vec![fresh.session_id]);

        let event = bus.recv().await.unwrap();
        assert_eq!(event.event_type, SessionEventType::SessionExpired);
        assert_eq!(event.session_id, old.session_id);

        let call = repo.wait_for("update_status").await;
        assert_eq!(call, format!("update_status:{}:expired:true", old.session_id));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fx = Fixture::new();
        let sweeper = sweeper(&fx, DurablePersistenceWriter::disabled(), 100);
        let now = Utc::now();
        stored_session(&fx, "u1", now - Duration::hours(2)).await;

        assert!(sweeper.sweep(now).await.unwrap().has_removals());
        let again = sweeper.sweep(now).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_pages_through_whole_index() {
        let fx = Fixture::new();
        let sweeper = sweeper(&fx, DurablePersistenceWriter::disabled(), 2);
        let now = Utc::now();
        for i in 0..3 {
            stored_session(&fx, "u1", now - Duration::hours(3) + Duration::minutes(i)).await;
        }

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 3,
                stale_removed: 0,
                expired: 3,
            }
        );
        assert!(fx.store.user_session_ids("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_reaches_expired_session_behind_idle_ones() {
        let fx = Fixture::new();
        let sweeper = sweeper(&fx, DurablePersistenceWriter::disabled(), 1);
        let now = Utc::now();

        // Idle for 50 minutes but still within its one-hour lifetime
        let idle = stored_session(&fx, "u1", now - Duration::minutes(50)).await;
        // Past its expiry, yet more recently active than the idle one
        let expired = stored_session(&fx, "u2", now - Duration::hours(2)).await;
        fx.store
            .touch(&expired.session_id, now - Duration::minutes(10))
            .await
            .unwrap();

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.expired, 1);
        assert!(matches!(
            fx.store.get(&expired.session_id).await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(fx.store.get(&idle.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_sessions() {
        let fx = Fixture::new();
        let sweeper = sweeper(&fx, DurablePersistenceWriter::disabled(), 100);
        let session = stored_session(&fx, "u1", Utc::now()).await;

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert!(!report.has_removals());
        assert!(fx.store.get(&session.session_id).await.is_ok());
    }
}
