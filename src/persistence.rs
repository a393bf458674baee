//! Best-effort mirror of session state into the durable store.
//!
//! Every write is spawned onto the runtime and forgotten. Failures are logged
//! and counted, never returned: the cache is the system of record and the
//! durable copy only serves history reads.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    db::{DbResult, SessionRecord, SessionRepo, TokenHashes},
    observability::metrics,
    session::{Session, SessionStatus},
};

#[derive(Clone, Default)]
pub struct DurablePersistenceWriter {
    repo: Option<Arc<dyn SessionRepo>>,
}

impl DurablePersistenceWriter {
    pub fn new(repo: Arc<dyn SessionRepo>) -> Self {
        Self { repo: Some(repo) }
    }

    /// A writer that drops every update. Used when no database is configured.
    pub fn disabled() -> Self {
        Self { repo: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.repo.is_some()
    }

    pub fn persist_created(&self, session: &Session, login_method: &str) {
        let record = SessionRecord::from_session(session, login_method);
        self.spawn("upsert", session.session_id.clone(), move |repo| async move {
            repo.upsert(&record).await
        });
    }

    pub fn mark_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        logout_time: Option<DateTime<Utc>>,
    ) {
        let id = session_id.to_string();
        self.spawn("update_status", id.clone(), move |repo| async move {
            repo.update_status(&id, status, logout_time)
                .await
                .map(|_| ())
        });
    }

    pub fn update_last_active(&self, session_id: &str, at: DateTime<Utc>) {
        let id = session_id.to_string();
        self.spawn("update_last_active", id.clone(), move |repo| async move {
            repo.update_last_active(&id, at).await.map(|_| ())
        });
    }

    pub fn update_tokens(&self, session: &Session) {
        let id = session.session_id.clone();
        let tokens = TokenHashes::from_session(session);
        self.spawn("update_tokens", id.clone(), move |repo| async move {
            repo.update_tokens(&id, &tokens).await.map(|_| ())
        });
    }

    fn spawn<F, Fut>(&self, operation: &'static str, session_id: String, write: F)
    where
        F: FnOnce(Arc<dyn SessionRepo>) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
    {
        let Some(repo) = self.repo.clone() else {
            return;
        };

        tokio::spawn(async move {
            match write(repo).await {
                Ok(()) => metrics::record_persistence_write(operation, "success"),
                Err(e) => {
                    metrics::record_persistence_write(operation, "error");
                    tracing::warn!(
                        session_id = %session_id,
                        operation,
                        error = %e,
                        "Failed to mirror session to durable store"
                    );
                }
            }
        });
    }
}
