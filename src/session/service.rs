use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{
    error::{SessionError, SessionResult},
    model::{CreatedSession, LoginContext, Session, SessionInfo, SessionStatus, new_session_id},
    quota::QuotaEnforcer,
    store::CacheSessionStore,
    sweeper::{SessionSweeper, SweepReport},
};
use crate::{
    cache::{Cache, TokenKind, hash_token},
    config::SessionConfig,
    events::{EventBus, EventPublisher, SessionEventType},
    persistence::DurablePersistenceWriter,
    tokens::{TokenIssuer, TokenPair, TokenType},
    users::UserDirectory,
};

/// Session lifecycle operations for one service instance.
///
/// Cheap to clone; clones share the cache client, token keys and event bus.
#[derive(Clone)]
pub struct SessionService {
    store: CacheSessionStore,
    issuer: Arc<TokenIssuer>,
    persistence: DurablePersistenceWriter,
    events: EventPublisher,
    quota: QuotaEnforcer,
    sweeper: SessionSweeper,
    users: Arc<dyn UserDirectory>,
    config: SessionConfig,
}

impl SessionService {
    /// Build a service around an already connected cache.
    ///
    /// `instance_id` is stamped on every published event and used by the
    /// event listener to skip this instance's own broadcasts.
    pub fn new(
        config: SessionConfig,
        cache: Arc<dyn Cache>,
        persistence: DurablePersistenceWriter,
        users: Arc<dyn UserDirectory>,
        instance_id: impl Into<String>,
    ) -> SessionResult<Self> {
        config
            .validate()
            .map_err(|e| SessionError::Config(e.to_string()))?;

        let issuer = Arc::new(TokenIssuer::from_config(&config)?);
        let store = CacheSessionStore::new(cache.clone(), config.refresh_ttl());
        let events = EventPublisher::new(Arc::new(EventBus::new()), cache, instance_id);
        let quota = QuotaEnforcer::new(store.clone(), persistence.clone(), events.clone());
        let sweeper = SessionSweeper::new(
            store.clone(),
            persistence.clone(),
            events.clone(),
            config.batch_cleanup_size,
        );

        Ok(Self {
            store,
            issuer,
            persistence,
            events,
            quota,
            sweeper,
            users,
            config,
        })
    }

    pub fn instance_id(&self) -> &str {
        self.events.instance_id()
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn store(&self) -> &CacheSessionStore {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Log a user in on a new device.
    #[tracing::instrument(skip(self, context), fields(platform = %context.platform))]
    pub async fn create_session(
        &self,
        user_id: &str,
        context: LoginContext,
    ) -> SessionResult<CreatedSession> {
        match self.users.is_login_allowed(user_id).await {
            Ok(true) => {}
            Ok(false) => return Err(SessionError::UserNotAllowed),
            Err(e) => return Err(SessionError::StoreUnavailable(e.to_string())),
        }

        // Quota problems never block a login
        if let Err(e) = self
            .quota
            .enforce_before_login(user_id, self.config.max_sessions_per_user)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Session quota enforcement failed");
        }

        let session_id = new_session_id();
        let tokens = self.issuer.issue(user_id, &session_id, &context.platform)?;
        let session = Session::new(session_id, user_id.to_string(), &context, &tokens);

        if let Err(e) = self.store.create(&session).await {
            // Remove whatever made it in so no half-written session lingers
            if let Err(cleanup) = self.store.delete(&session).await {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %cleanup,
                    "Failed to clean up partially created session"
                );
            }
            return Err(e);
        }

        self.persistence
            .persist_created(&session, &context.login_method);
        self.events
            .publish(
                self.events
                    .event(
                        SessionEventType::SessionCreated,
                        &session.session_id,
                        user_id,
                    )
                    .with_data("platform", session.platform.clone())
                    .with_data("device_id", session.device.device_id.clone()),
            )
            .await;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %user_id,
            device_id = %session.device.device_id,
            "Session created"
        );

        Ok(CreatedSession {
            session: session.info(),
            tokens: tokens.pair(),
        })
    }

    /// Load a session and check it is active and unexpired.
    ///
    /// A revoked session keeps failing with [`SessionError::SessionNotActive`]
    /// after its record is gone. An expired session is removed in the
    /// background.
    pub async fn validate_session(&self, session_id: &str) -> SessionResult<Session> {
        let session = match self.store.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::SessionNotFound) if self.store.is_revoked(session_id).await? => {
                return Err(SessionError::SessionNotActive(
                    SessionStatus::Revoked.to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if session.status != SessionStatus::Active {
            return Err(SessionError::SessionNotActive(session.status.to_string()));
        }

        let now = Utc::now();
        if session.is_expired_at(now) {
            let sweeper = self.sweeper.clone();
            let expired = session.clone();
            tokio::spawn(async move {
                if let Err(e) = sweeper.expire(&expired, now).await {
                    tracing::warn!(
                        session_id = %expired.session_id,
                        error = %e,
                        "Failed to remove expired session"
                    );
                }
            });
            return Err(SessionError::SessionExpired);
        }

        Ok(session)
    }

    /// Authenticate a request by its access token.
    ///
    /// Bounded by `validation_timeout_secs`; a timeout is reported as
    /// [`SessionError::StoreUnavailable`].
    pub async fn validate_token(&self, access_token: &str) -> SessionResult<SessionInfo> {
        match tokio::time::timeout(
            self.config.validation_timeout(),
            self.validate_token_inner(access_token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.validation_timeout_secs,
                    "Token validation timed out"
                );
                Err(SessionError::StoreUnavailable(
                    "token validation timed out".into(),
                ))
            }
        }
    }

    async fn validate_token_inner(&self, access_token: &str) -> SessionResult<SessionInfo> {
        let session_id = self
            .store
            .resolve_token(&hash_token(access_token), TokenKind::Access)
            .await?;
        let claims = self.issuer.verify(access_token, TokenType::Access)?;

        if claims.session_id != session_id {
            tracing::warn!(
                session_id = %session_id,
                claimed_session_id = %claims.session_id,
                "Access token indexed under a different session"
            );
            return Err(SessionError::TokenNotFound);
        }

        let session = self.validate_session(&session_id).await?;

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.record_activity(&session_id, Utc::now()).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to update last active");
            }
        });

        Ok(session.info())
    }

    /// Exchange a refresh token for a new pair. The presented pair stops
    /// working immediately.
    pub async fn refresh_session(&self, refresh_token: &str) -> SessionResult<TokenPair> {
        let claims = self.issuer.verify(refresh_token, TokenType::Refresh)?;
        let session_id = self
            .store
            .resolve_token(&hash_token(refresh_token), TokenKind::Refresh)
            .await?;
        if claims.session_id != session_id {
            return Err(SessionError::TokenNotFound);
        }

        let session = self.validate_session(&session_id).await?;
        let tokens = self
            .issuer
            .issue(&session.user_id, &session_id, &session.platform)?;
        let rotated = self.store.rotate_tokens(&session, &tokens).await?;

        // A refresh counts as activity so the sweeper sees the session as recent
        if let Err(e) = self.store.touch(&session_id, tokens.issued_at).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to update last active");
        }

        self.persistence.update_tokens(&rotated);
        self.persistence
            .update_last_active(&session_id, tokens.issued_at);
        self.events
            .publish(
                self.events
                    .event(
                        SessionEventType::TokenRefreshed,
                        &session_id,
                        &session.user_id,
                    )
                    .with_data("expires_at", rotated.expires_at.to_rfc3339()),
            )
            .await;

        tracing::debug!(session_id = %session_id, user_id = %session.user_id, "Tokens rotated");
        Ok(tokens.pair())
    }

    /// Log one session out. Revoking an absent or inactive session succeeds.
    pub async fn revoke_session(&self, session_id: &str) -> SessionResult<()> {
        let session = match self.store.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::SessionNotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        if session.status != SessionStatus::Active {
            return Ok(());
        }

        self.revoke(&session).await?;
        self.events
            .publish(
                self.events
                    .event(
                        SessionEventType::SessionRevoked,
                        session_id,
                        &session.user_id,
                    )
                    .with_data("reason", "logout"),
            )
            .await;

        tracing::info!(session_id = %session_id, user_id = %session.user_id, "Session revoked");
        Ok(())
    }

    /// Log a user out everywhere, optionally keeping one session.
    ///
    /// Best-effort per session. Returns the number of sessions revoked.
    pub async fn revoke_user_sessions(
        &self,
        user_id: &str,
        exclude: Option<&str>,
    ) -> SessionResult<usize> {
        let mut revoked = 0;
        let mut failed = 0;

        for session_id in self.store.user_session_ids(user_id).await? {
            if exclude == Some(session_id.as_str()) {
                continue;
            }

            let result = match self.store.get(&session_id).await {
                Ok(session) if session.status == SessionStatus::Active => {
                    self.revoke(&session).await.map(|()| true)
                }
                Ok(_) => Ok(false),
                Err(SessionError::SessionNotFound) => self
                    .store
                    .remove_user_index_entry(user_id, &session_id)
                    .await
                    .map(|()| false),
                Err(e) => Err(e),
            };

            match result {
                Ok(true) => revoked += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        session_id = %session_id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to revoke session"
                    );
                }
            }
        }

        self.events
            .publish(
                self.events
                    .event(SessionEventType::UserLogout, "", user_id)
                    .with_data("revoked_count", revoked)
                    .with_data("failed_count", failed),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            revoked,
            failed,
            excluded = exclude.is_some(),
            "User sessions revoked"
        );
        Ok(revoked)
    }

    pub async fn revoke_all_sessions(&self, user_id: &str) -> SessionResult<usize> {
        self.revoke_user_sessions(user_id, None).await
    }

    /// Live sessions of a user, most recently active first.
    pub async fn get_user_sessions(&self, user_id: &str) -> SessionResult<Vec<SessionInfo>> {
        let mut sessions = self.store.live_sessions(user_id).await?;
        sessions.sort_by(|a, b| {
            b.last_active_at
                .cmp(&a.last_active_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions.iter().map(Session::info).collect())
    }

    pub async fn get_active_session_count(&self, user_id: &str) -> SessionResult<usize> {
        Ok(self.store.live_sessions(user_id).await?.len())
    }

    /// Record activity now and announce it with `session_updated`.
    /// Returns false when the session no longer exists.
    ///
    /// Token validation bumps activity too, but silently.
    pub async fn update_last_active(&self, session_id: &str) -> SessionResult<bool> {
        let session = match self.store.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::SessionNotFound) => return Ok(false),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        if !self.record_activity(session_id, now).await? {
            return Ok(false);
        }

        self.events
            .publish(
                self.events
                    .event(SessionEventType::SessionUpdated, session_id, &session.user_id)
                    .with_data("last_active_at", now.to_rfc3339()),
            )
            .await;
        Ok(true)
    }

    /// Bump activity in the cache and the durable mirror. Returns false when
    /// the record is gone.
    async fn record_activity(&self, session_id: &str, at: DateTime<Utc>) -> SessionResult<bool> {
        let updated = self.store.touch(session_id, at).await?;
        if updated {
            self.persistence.update_last_active(session_id, at);
        }
        Ok(updated)
    }

    /// Run one sweep pass now.
    pub async fn cleanup_expired_sessions(&self) -> SessionResult<SweepReport> {
        self.sweeper.sweep(Utc::now()).await
    }

    async fn revoke(&self, session: &Session) -> SessionResult<()> {
        let now = Utc::now();
        self.store.revoke(session, now).await?;
        self.persistence
            .mark_status(&session.session_id, SessionStatus::Revoked, Some(now));
        Ok(())
    }
}
