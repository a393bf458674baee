use crate::{cache::CacheError, tokens::TokenError};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
///
/// Callers outside the trust boundary should only learn whether a request is
/// authenticated; use [`SessionError::is_auth_failure`] to collapse these into
/// a single "unauthorized" answer and keep the variant for logs.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Malformed token")]
    TokenMalformed,

    #[error("Token signature is invalid")]
    TokenSignatureInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Wrong token type: {0}")]
    TokenWrongType(String),

    #[error("Token is not recognised or has been revoked")]
    TokenNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session is not active (status: {0})")]
    SessionNotActive(String),

    #[error("Session expired")]
    SessionExpired,

    /// Raised inside quota enforcement when eviction could not free a slot.
    /// Never returned from a public operation.
    #[error("User {user_id} is at the session limit of {max_sessions}")]
    QuotaExceededTransient { user_id: String, max_sessions: usize },

    #[error("User is not allowed to log in")]
    UserNotAllowed,

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Session configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this error means "the caller is not authenticated" as opposed
    /// to an infrastructure or configuration failure.
    pub fn is_auth_failure(&self) -> bool {
        !matches!(
            self,
            SessionError::StoreUnavailable(_) | SessionError::Config(_)
        )
    }

    /// Short stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::TokenMalformed => "token_malformed",
            SessionError::TokenSignatureInvalid => "token_signature_invalid",
            SessionError::TokenExpired => "token_expired",
            SessionError::TokenWrongType(_) => "token_wrong_type",
            SessionError::TokenNotFound => "token_not_found",
            SessionError::SessionNotFound => "session_not_found",
            SessionError::SessionNotActive(_) => "session_not_active",
            SessionError::SessionExpired => "session_expired",
            SessionError::QuotaExceededTransient { .. } => "quota_exceeded",
            SessionError::UserNotAllowed => "user_not_allowed",
            SessionError::StoreUnavailable(_) => "store_unavailable",
            SessionError::Config(_) => "config",
        }
    }
}

impl From<CacheError> for SessionError {
    fn from(e: CacheError) -> Self {
        SessionError::StoreUnavailable(e.to_string())
    }
}

impl From<TokenError> for SessionError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed => SessionError::TokenMalformed,
            TokenError::SignatureInvalid => SessionError::TokenSignatureInvalid,
            TokenError::Expired => SessionError::TokenExpired,
            TokenError::WrongType { .. } => SessionError::TokenWrongType(e.to_string()),
            TokenError::WeakSecret | TokenError::Signing(_) => SessionError::Config(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classification() {
        assert!(SessionError::TokenNotFound.is_auth_failure());
        assert!(SessionError::SessionExpired.is_auth_failure());
        assert!(SessionError::SessionNotActive("revoked".into()).is_auth_failure());
        assert!(!SessionError::StoreUnavailable("down".into()).is_auth_failure());
        assert!(!SessionError::Config("bad".into()).is_auth_failure());
    }

    #[test]
    fn test_token_error_mapping() {
        assert!(matches!(
            SessionError::from(TokenError::Expired),
            SessionError::TokenExpired
        ));
        assert!(matches!(
            SessionError::from(TokenError::WrongType {
                expected: "access",
                actual: "refresh"
            }),
            SessionError::TokenWrongType(_)
        ));
        assert!(matches!(
            SessionError::from(CacheError::NotConfigured),
            SessionError::StoreUnavailable(_)
        ));
    }
}
