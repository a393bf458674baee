use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    cache::hash_token,
    db::error::DbResult,
    session::{Session, SessionStatus},
};

// Column widths of `user_sessions`.
const PLATFORM_MAX_CHARS: usize = 10;
const DEVICE_ID_MAX_CHARS: usize = 64;
const DEVICE_TYPE_MAX_CHARS: usize = 20;
const DEVICE_NAME_MAX_CHARS: usize = 500;
const APP_VERSION_MAX_CHARS: usize = 20;
const IP_ADDRESS_MAX_CHARS: usize = 45;
const LOCATION_MAX_CHARS: usize = 100;
const LOGIN_METHOD_MAX_CHARS: usize = 20;

/// Durable mirror row for one session. Tokens are kept only as hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub platform: String,
    pub device_id: String,
    pub device_type: String,
    pub device_name: String,
    pub app_version: String,
    pub user_agent: String,
    pub ip_address: String,
    pub location: String,
    #[serde(skip_serializing, default)]
    pub access_token_hash: String,
    #[serde(skip_serializing, default)]
    pub refresh_token_hash: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub login_method: String,
    pub login_time: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub logout_time: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Mirror row for a live session, clipped to the column widths.
    pub fn from_session(session: &Session, login_method: &str) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            platform: clip(&session.platform, PLATFORM_MAX_CHARS),
            device_id: clip(&session.device.device_id, DEVICE_ID_MAX_CHARS),
            device_type: clip(&session.device.device_type, DEVICE_TYPE_MAX_CHARS),
            device_name: clip(&session.device.device_name, DEVICE_NAME_MAX_CHARS),
            app_version: clip(&session.device.app_version, APP_VERSION_MAX_CHARS),
            user_agent: session.device.user_agent.clone(),
            ip_address: clip(&session.network.ip_address, IP_ADDRESS_MAX_CHARS),
            location: clip(&session.network.location, LOCATION_MAX_CHARS),
            access_token_hash: hash_token(&session.tokens.access_token),
            refresh_token_hash: hash_token(&session.tokens.refresh_token),
            access_expires_at: session.tokens.access_expires_at,
            refresh_expires_at: session.tokens.refresh_expires_at,
            status: session.status,
            login_method: clip(login_method, LOGIN_METHOD_MAX_CHARS),
            login_time: session.created_at,
            last_active_at: session.last_active_at,
            logout_time: None,
        }
    }
}

/// New token hashes and expiries after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHashes {
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenHashes {
    pub fn from_session(session: &Session) -> Self {
        Self {
            access_token_hash: hash_token(&session.tokens.access_token),
            refresh_token_hash: hash_token(&session.tokens.refresh_token),
            access_expires_at: session.tokens.access_expires_at,
            refresh_expires_at: session.tokens.refresh_expires_at,
        }
    }
}

fn clip(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Audit history of sessions. Written off the request path and never read
/// when authorizing.
///
/// Update methods return whether a row was changed. A session that has reached
/// a terminal status is never moved back to `active`.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Insert or replace the row for `record.session_id`.
    async fn upsert(&self, record: &SessionRecord) -> DbResult<()>;

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        logout_time: Option<DateTime<Utc>>,
    ) -> DbResult<bool>;

    async fn update_last_active(&self, session_id: &str, at: DateTime<Utc>) -> DbResult<bool>;

    async fn update_tokens(&self, session_id: &str, tokens: &TokenHashes) -> DbResult<bool>;

    async fn get_by_session_id(&self, session_id: &str) -> DbResult<Option<SessionRecord>>;

    /// Sessions of a user, newest login first, optionally filtered by status.
    async fn list_by_user(
        &self,
        user_id: &str,
        status: Option<SessionStatus>,
    ) -> DbResult<Vec<SessionRecord>>;

    async fn count_active_by_user(&self, user_id: &str) -> DbResult<i64>;

    async fn recent_logins(&self, user_id: &str, limit: i64) -> DbResult<Vec<SessionRecord>>;

    async fn list_by_ip(&self, ip_address: &str, limit: i64) -> DbResult<Vec<SessionRecord>>;

    async fn list_by_device(&self, device_id: &str) -> DbResult<Vec<SessionRecord>>;

    /// Delete rows whose refresh token expired before `before`.
    /// Returns the number of rows deleted.
    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{session::LoginContext, tokens::TokenIssuer};

    #[test]
    fn test_record_clips_to_columns() {
        let issuer = TokenIssuer::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
        .unwrap();
        let tokens = issuer.issue("u1", "sess_1", "app").unwrap();
        let context = LoginContext {
            device_name: "n".repeat(600),
            ip_address: "x".repeat(60),
            location: "y".repeat(120),
            ..LoginContext::new("app")
        };
        let session = Session::new("sess_1".into(), "u1".into(), &context, &tokens);

        let record = SessionRecord::from_session(&session, "password");
        assert_eq!(record.device_name.chars().count(), 500);
        assert_eq!(record.ip_address.len(), 45);
        assert_eq!(record.location.len(), 100);
        assert_eq!(record.access_token_hash, hash_token(&tokens.access_token));
        assert_eq!(record.access_token_hash.len(), 64);
        assert_eq!(record.status, SessionStatus::Active);
        assert!(record.logout_time.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("access_token_hash").is_none());
    }
}
