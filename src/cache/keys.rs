use sha2::{Digest, Sha256};

/// Which half of a token pair an index entry points from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Cache key layout for session state.
///
/// Keys are unprefixed here; `RedisCache` applies its configured prefix.
pub struct SessionKeys;

impl SessionKeys {
    /// Session record hash: session:{session_id}
    pub fn session(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    /// Revocation marker kept after the record is gone: session:{session_id}:revoked
    pub fn revoked(session_id: &str) -> String {
        format!("session:{}:revoked", session_id)
    }

    /// Per-user set of session ids: user:sessions:{user_id}
    pub fn user_sessions(user_id: &str) -> String {
        format!("user:sessions:{}", user_id)
    }

    /// Token hash to session id: token:{kind}:{sha256}
    pub fn token(kind: TokenKind, token_hash: &str) -> String {
        format!("token:{}:{}", kind.as_str(), token_hash)
    }

    /// Global activity index, scored by unix last-active seconds.
    pub fn active_sessions() -> &'static str {
        "sessions:active"
    }

    /// Broadcast channel for session lifecycle events.
    pub fn events_channel() -> &'static str {
        "session:events"
    }
}

/// Lowercase hex SHA-256 of a token string.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
