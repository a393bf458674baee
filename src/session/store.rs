//! Cache-backed session records and their indexes.
//!
//! A session occupies five kinds of cache entries (see [`SessionKeys`]): the
//! record hash, a member of its user's set, one index entry per token hash and
//! a member of the global activity index. Each mutation is a sequence of
//! independent writes. A partial failure can leave a record without a token
//! entry (the token stops working) or an index entry pointing at a vanished
//! record (resolved as not found); both fail toward denying access.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use super::{
    error::{SessionError, SessionResult},
    model::{Session, SessionStatus, TokenInfo, token_fields},
};
use crate::{
    cache::{Cache, CacheResult, SessionKeys, TokenKind, hash_token},
    observability::metrics,
    tokens::IssuedTokens,
};

#[derive(Clone)]
pub struct CacheSessionStore {
    cache: Arc<dyn Cache>,
    /// Lifetime of the record and the user set. Matches the refresh token TTL.
    session_ttl: Duration,
}

impl CacheSessionStore {
    pub fn new(cache: Arc<dyn Cache>, session_ttl: Duration) -> Self {
        Self { cache, session_ttl }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Write the record and every index entry for a new session.
    pub async fn create(&self, session: &Session) -> SessionResult<()> {
        let id = &session.session_id;

        track(
            "create",
            self.cache
                .hash_set(
                    &SessionKeys::session(id),
                    &session.to_fields(),
                    Some(self.session_ttl),
                )
                .await,
        )?;
        track(
            "index_user",
            self.cache
                .set_add(
                    &SessionKeys::user_sessions(&session.user_id),
                    id,
                    Some(self.session_ttl),
                )
                .await,
        )?;
        self.write_token_entries(id, &session.tokens).await?;
        track(
            "index_activity",
            self.cache
                .zset_add(
                    SessionKeys::active_sessions(),
                    score(session.created_at),
                    id,
                )
                .await,
        )?;

        tracing::debug!(session_id = %id, user_id = %session.user_id, "Session stored");
        Ok(())
    }

    /// Load a session record. Partial or unreadable records count as missing.
    pub async fn get(&self, session_id: &str) -> SessionResult<Session> {
        let fields = match self.cache.hash_get_all(&SessionKeys::session(session_id)).await {
            Ok(fields) if fields.is_empty() => {
                metrics::record_cache_operation("session", "get", "miss");
                return Err(SessionError::SessionNotFound);
            }
            Ok(fields) => {
                metrics::record_cache_operation("session", "get", "hit");
                fields
            }
            Err(e) => {
                metrics::record_cache_operation("session", "get", "error");
                return Err(e.into());
            }
        };

        Session::from_fields(session_id, &fields).map_err(|reason| {
            tracing::warn!(
                session_id = %session_id,
                reason = %reason,
                "Ignoring unreadable session record"
            );
            SessionError::SessionNotFound
        })
    }

    /// Bump last-active on the record and the activity index.
    ///
    /// Returns false when the record no longer exists; nothing is written then.
    pub async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> SessionResult<bool> {
        let updated = track(
            "touch",
            self.cache
                .hash_set_existing(
                    &SessionKeys::session(session_id),
                    &[("last_active_at".to_string(), at.to_rfc3339())],
                    None,
                )
                .await,
        )?;

        if updated {
            track(
                "index_activity",
                self.cache
                    .zset_add(SessionKeys::active_sessions(), score(at), session_id)
                    .await,
            )?;
        }
        Ok(updated)
    }

    /// Map a token hash to its session id. An absent entry means the token
    /// is dead whatever its embedded expiry says.
    pub async fn resolve_token(&self, token_hash: &str, kind: TokenKind) -> SessionResult<String> {
        let key = SessionKeys::token(kind, token_hash);
        match self.cache.get_bytes(&key).await {
            Ok(Some(bytes)) => {
                metrics::record_cache_operation("session", "resolve_token", "hit");
                String::from_utf8(bytes).map_err(|_| SessionError::TokenNotFound)
            }
            Ok(None) => {
                metrics::record_cache_operation("session", "resolve_token", "miss");
                Err(SessionError::TokenNotFound)
            }
            Err(e) => {
                metrics::record_cache_operation("session", "resolve_token", "error");
                Err(e.into())
            }
        }
    }

    /// Replace the session's token pair. The old tokens stop resolving as soon
    /// as this returns, and the record expiry moves out to the new refresh expiry.
    pub async fn rotate_tokens(
        &self,
        session: &Session,
        tokens: &IssuedTokens,
    ) -> SessionResult<Session> {
        let id = &session.session_id;
        let new_tokens = TokenInfo::from(tokens);

        let mut fields = token_fields(&new_tokens);
        fields.push((
            "expires_at".to_string(),
            new_tokens.refresh_expires_at.to_rfc3339(),
        ));

        let updated = track(
            "rotate",
            self.cache
                .hash_set_existing(&SessionKeys::session(id), &fields, Some(self.session_ttl))
                .await,
        )?;
        if !updated {
            // Revoked or swept between validation and rotation
            return Err(SessionError::SessionNotFound);
        }

        self.remove_token_entries(&session.tokens).await?;
        self.write_token_entries(id, &new_tokens).await?;
        track(
            "index_user",
            self.cache
                .set_add(
                    &SessionKeys::user_sessions(&session.user_id),
                    id,
                    Some(self.session_ttl),
                )
                .await,
        )?;

        Ok(Session {
            expires_at: new_tokens.refresh_expires_at,
            tokens: new_tokens,
            ..session.clone()
        })
    }

    /// Remove a session and every index entry pointing at it. This is the
    /// single revocation primitive; it is safe to call on an already removed
    /// session.
    pub async fn delete(&self, session: &Session) -> SessionResult<()> {
        let id = &session.session_id;

        // Token entries first so the credentials die before anything else
        self.remove_token_entries(&session.tokens).await?;
        track(
            "delete",
            self.cache.delete(&SessionKeys::session(id)).await,
        )?;
        track(
            "unindex_user",
            self.cache
                .set_remove(&SessionKeys::user_sessions(&session.user_id), id)
                .await,
        )?;
        track(
            "unindex_activity",
            self.cache
                .zset_remove(SessionKeys::active_sessions(), id)
                .await,
        )?;

        tracing::debug!(session_id = %id, user_id = %session.user_id, "Session removed");
        Ok(())
    }

    /// Delete a session and leave a revocation marker behind for the rest of
    /// its refresh lifetime, so lookups can tell "revoked" from "never existed".
    ///
    /// The marker is best-effort: failing to write it only loses that
    /// distinction, the session is already gone.
    pub async fn revoke(&self, session: &Session, now: DateTime<Utc>) -> SessionResult<()> {
        self.delete(session).await?;

        let remaining = (session.expires_at - now)
            .to_std()
            .unwrap_or_default()
            .max(Duration::from_secs(1));
        let marked = self
            .cache
            .set_bytes(
                &SessionKeys::revoked(&session.session_id),
                SessionStatus::Revoked.as_str().as_bytes(),
                remaining,
            )
            .await;
        if let Err(e) = track("mark_revoked", marked) {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to write revocation marker"
            );
        }
        Ok(())
    }

    /// Whether a revocation marker exists for this session id.
    pub async fn is_revoked(&self, session_id: &str) -> SessionResult<bool> {
        track(
            "check_revoked",
            self.cache.exists(&SessionKeys::revoked(session_id)).await,
        )
    }

    /// Session ids in the user's set. May include ids whose record is gone.
    pub async fn user_session_ids(&self, user_id: &str) -> SessionResult<Vec<String>> {
        track(
            "list_user",
            self.cache
                .set_members(&SessionKeys::user_sessions(user_id))
                .await,
        )
    }

    /// Up to `limit` activity-index entries starting at rank `offset`, least
    /// recently active first.
    pub async fn active_session_ids(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> SessionResult<Vec<(String, DateTime<Utc>)>> {
        let entries = track(
            "list_activity",
            self.cache
                .zset_range_by_score(
                    SessionKeys::active_sessions(),
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                    offset,
                    limit,
                )
                .await,
        )?;

        Ok(entries
            .into_iter()
            .map(|(id, score)| {
                let at = DateTime::from_timestamp(score as i64, 0).unwrap_or_default();
                (id, at)
            })
            .collect())
    }

    /// Drop an activity-index entry whose record has vanished.
    pub async fn discard_index_entry(&self, session_id: &str) -> SessionResult<()> {
        track(
            "unindex_activity",
            self.cache
                .zset_remove(SessionKeys::active_sessions(), session_id)
                .await,
        )?;
        Ok(())
    }

    /// Drop a user-set member whose record has vanished.
    pub async fn remove_user_index_entry(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> SessionResult<()> {
        track(
            "unindex_user",
            self.cache
                .set_remove(&SessionKeys::user_sessions(user_id), session_id)
                .await,
        )?;
        Ok(())
    }

    /// Live sessions of a user, pruning stale set members on the way.
    pub async fn live_sessions(&self, user_id: &str) -> SessionResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for id in self.user_session_ids(user_id).await? {
            match self.get(&id).await {
                Ok(session) if session.status == SessionStatus::Active => sessions.push(session),
                Ok(_) => {}
                Err(SessionError::SessionNotFound) => {
                    if let Err(e) = self.remove_user_index_entry(user_id, &id).await {
                        tracing::warn!(
                            session_id = %id,
                            user_id = %user_id,
                            error = %e,
                            "Failed to prune stale user-sessions entry"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    async fn write_token_entries(&self, session_id: &str, tokens: &TokenInfo) -> SessionResult<()> {
        let now = Utc::now();
        for (kind, token, expires_at) in [
            (TokenKind::Access, &tokens.access_token, tokens.access_expires_at),
            (TokenKind::Refresh, &tokens.refresh_token, tokens.refresh_expires_at),
        ] {
            track(
                "index_token",
                self.cache
                    .set_bytes(
                        &SessionKeys::token(kind, &hash_token(token)),
                        session_id.as_bytes(),
                        remaining(now, expires_at),
                    )
                    .await,
            )?;
        }
        Ok(())
    }

    async fn remove_token_entries(&self, tokens: &TokenInfo) -> SessionResult<()> {
        for (kind, token) in [
            (TokenKind::Access, &tokens.access_token),
            (TokenKind::Refresh, &tokens.refresh_token),
        ] {
            track(
                "unindex_token",
                self.cache
                    .delete(&SessionKeys::token(kind, &hash_token(token)))
                    .await,
            )?;
        }
        Ok(())
    }
}

/// Record the outcome of a session cache operation and lift its error.
fn track<T>(operation: &str, result: CacheResult<T>) -> SessionResult<T> {
    match result {
        Ok(value) => {
            metrics::record_cache_operation("session", operation, "success");
            Ok(value)
        }
        Err(e) => {
            metrics::record_cache_operation("session", operation, "error");
            Err(e.into())
        }
    }
}

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64
}

/// TTL until `expires_at`, at least one second so the entry is never immortal.
fn remaining(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Duration {
    (expires_at - now)
        .to_std()
        .unwrap_or_default()
        .max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        config::MemoryCacheConfig,
        session::model::{LoginContext, new_session_id},
        tokens::TokenIssuer,
    };

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    fn store() -> CacheSessionStore {
        let cache = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
        CacheSessionStore::new(cache, Duration::from_secs(3600))
    }

    fn new_session(issuer: &TokenIssuer, user_id: &str) -> Session {
        let id = new_session_id();
        let tokens = issuer.issue(user_id, &id, "app").unwrap();
        Session::new(id, user_id.into(), &LoginContext::new("app"), &tokens)
    }

    #[tokio::test]
    async fn test_create_writes_every_index() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();

        assert_eq!(store.get(&session.session_id).await.unwrap(), session);
        assert_eq!(
            store.user_session_ids("u1").await.unwrap(),
            vec![session.session_id.clone()]
        );
        let access = hash_token(&session.tokens.access_token);
        let refresh = hash_token(&session.tokens.refresh_token);
        assert_eq!(
            store.resolve_token(&access, TokenKind::Access).await.unwrap(),
            session.session_id
        );
        assert_eq!(
            store.resolve_token(&refresh, TokenKind::Refresh).await.unwrap(),
            session.session_id
        );
        // An access hash is not a refresh entry
        assert!(matches!(
            store.resolve_token(&access, TokenKind::Refresh).await,
            Err(SessionError::TokenNotFound)
        ));

        let active = store.active_session_ids(0, None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, session.session_id);
        assert_eq!(active[0].1, session.created_at);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = store();
        assert!(matches!(
            store.get("sess_missing").await,
            Err(SessionError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_touch_updates_activity() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();

        let later = session.created_at + chrono::Duration::seconds(30);
        assert!(store.touch(&session.session_id, later).await.unwrap());

        assert_eq!(
            store.get(&session.session_id).await.unwrap().last_active_at,
            later
        );
        let active = store.active_session_ids(0, None).await.unwrap();
        assert_eq!(active[0].1, later);
    }

    #[tokio::test]
    async fn test_touch_never_resurrects() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();
        store.delete(&session).await.unwrap();

        assert!(!store.touch(&session.session_id, Utc::now()).await.unwrap());
        assert!(matches!(
            store.get(&session.session_id).await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(store.active_session_ids(0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_kills_old_tokens() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();

        let fresh = issuer.issue("u1", &session.session_id, "app").unwrap();
        let rotated = store.rotate_tokens(&session, &fresh).await.unwrap();
        assert_eq!(rotated.tokens.access_token, fresh.access_token);
        assert_eq!(rotated.expires_at, fresh.refresh_expires_at);

        for (kind, token) in [
            (TokenKind::Access, &session.tokens.access_token),
            (TokenKind::Refresh, &session.tokens.refresh_token),
        ] {
            assert!(matches!(
                store.resolve_token(&hash_token(token), kind).await,
                Err(SessionError::TokenNotFound)
            ));
        }
        assert_eq!(
            store
                .resolve_token(&hash_token(&fresh.access_token), TokenKind::Access)
                .await
                .unwrap(),
            session.session_id
        );
        assert_eq!(store.get(&session.session_id).await.unwrap(), rotated);
    }

    #[tokio::test]
    async fn test_rotate_deleted_session() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();
        store.delete(&session).await.unwrap();

        let fresh = issuer.issue("u1", &session.session_id, "app").unwrap();
        assert!(matches!(
            store.rotate_tokens(&session, &fresh).await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(matches!(
            store
                .resolve_token(&hash_token(&fresh.access_token), TokenKind::Access)
                .await,
            Err(SessionError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_is_complete_and_repeatable() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();

        store.delete(&session).await.unwrap();
        store.delete(&session).await.unwrap();

        assert!(store.user_session_ids("u1").await.unwrap().is_empty());
        assert!(store.active_session_ids(0, None).await.unwrap().is_empty());
        assert!(matches!(
            store
                .resolve_token(&hash_token(&session.tokens.access_token), TokenKind::Access)
                .await,
            Err(SessionError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoke_leaves_marker() {
        let store = store();
        let issuer = issuer();
        let session = new_session(&issuer, "u1");
        let bystander = new_session(&issuer, "u1");
        store.create(&session).await.unwrap();
        store.create(&bystander).await.unwrap();

        store.revoke(&session, Utc::now()).await.unwrap();

        assert!(matches!(
            store.get(&session.session_id).await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(store.is_revoked(&session.session_id).await.unwrap());
        assert!(!store.is_revoked(&bystander.session_id).await.unwrap());
        assert_eq!(
            store.user_session_ids("u1").await.unwrap(),
            vec![bystander.session_id.clone()]
        );
    }

    #[tokio::test]
    async fn test_live_sessions_prunes_stale_members() {
        let store = store();
        let issuer = issuer();
        let live = new_session(&issuer, "u1");
        store.create(&live).await.unwrap();

        // A member with no record behind it
        store
            .cache()
            .set_add(&SessionKeys::user_sessions("u1"), "sess_ghost", None)
            .await
            .unwrap();

        let sessions = store.live_sessions("u1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, live.session_id);
        assert_eq!(
            store.user_session_ids("u1").await.unwrap(),
            vec![live.session_id.clone()]
        );
    }

    #[test]
    fn test_remaining_ttl_floor() {
        let now = Utc::now();
        assert_eq!(
            remaining(now, now - chrono::Duration::seconds(10)),
            Duration::from_secs(1)
        );
        assert_eq!(
            remaining(now, now + chrono::Duration::seconds(90)),
            Duration::from_secs(90)
        );
    }
}
