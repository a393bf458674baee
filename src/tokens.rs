//! Signed access/refresh token pairs.
//!
//! Tokens are HS256 JWTs carrying the user, session, platform and token type.
//! A valid signature is necessary but not sufficient: a token is only usable
//! while its hash is indexed in the cache (see [`crate::session::CacheSessionStore`]).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MIN_JWT_SECRET_LEN, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub session_id: String,
    pub platform: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Unique per token so re-issuing within the same second never repeats a token.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Token pair as handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// A freshly minted pair with the absolute expiry of each half.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl IssuedTokens {
    pub fn pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_in: (self.access_expires_at - self.issued_at).num_seconds(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token signature is invalid")]
    SignatureInvalid,

    #[error("Token has expired")]
    Expired,

    #[error("Expected {expected} token, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Signing secret is shorter than 32 bytes")]
    WeakSecret,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, TokenError> {
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }

        // Only HS256 is accepted, whatever the header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, TokenError> {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.access_ttl(),
            config.refresh_ttl(),
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint a token pair issued now.
    pub fn issue(
        &self,
        user_id: &str,
        session_id: &str,
        platform: &str,
    ) -> Result<IssuedTokens, TokenError> {
        self.issue_at(user_id, session_id, platform, Utc::now())
    }

    /// Mint a token pair as if issued at `now`.
    pub fn issue_at(
        &self,
        user_id: &str,
        session_id: &str,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, TokenError> {
        // Whole seconds, so the expiries round-trip through the claims exactly.
        let issued_at = Utc
            .timestamp_opt(now.timestamp(), 0)
            .single()
            .ok_or(TokenError::Malformed)?;
        let access_expires_at = issued_at + to_chrono(self.access_ttl);
        let refresh_expires_at = issued_at + to_chrono(self.refresh_ttl);

        let access_token = self.sign(TokenClaims {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            platform: platform.to_string(),
            token_type: TokenType::Access,
            jti: Uuid::new_v4().simple().to_string(),
            iat: issued_at.timestamp(),
            exp: access_expires_at.timestamp(),
        })?;
        let refresh_token = self.sign(TokenClaims {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            platform: platform.to_string(),
            token_type: TokenType::Refresh,
            jti: Uuid::new_v4().simple().to_string(),
            iat: issued_at.timestamp(),
            exp: refresh_expires_at.timestamp(),
        })?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            issued_at,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Check signature, expiry and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                tracing::debug!(error = %e, "Token verification failed");
                match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Malformed,
                }
            },
        )?;

        if data.claims.token_type != expected {
            return Err(TokenError::WrongType {
                expected: expected.as_str(),
                actual: data.claims.token_type.as_str(),
            });
        }

        Ok(data.claims)
    }

    fn sign(&self, claims: TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            SECRET,
            Duration::from_secs(7200),
            Duration::from_secs(604_800),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_short_secret() {
        let result = TokenIssuer::new(b"short", Duration::from_secs(1), Duration::from_secs(2));
        assert!(matches!(result, Err(TokenError::WeakSecret)));
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "sess_1", "app").unwrap();

        assert_ne!(tokens.access_token, tokens.refresh_token);
        assert!(tokens.access_expires_at < tokens.refresh_expires_at);
        assert_eq!(tokens.pair().expires_in, 7200);

        let access = issuer
            .verify(&tokens.access_token, TokenType::Access)
            .unwrap();
        assert_eq!(access.user_id, "u1");
        assert_eq!(access.session_id, "sess_1");
        assert_eq!(access.platform, "app");
        assert_eq!(access.exp, tokens.access_expires_at.timestamp());

        let refresh = issuer
            .verify(&tokens.refresh_token, TokenType::Refresh)
            .unwrap();
        assert_eq!(refresh.exp, tokens.refresh_expires_at.timestamp());
    }

    #[test]
    fn test_reissue_in_same_second_differs() {
        let issuer = issuer();
        let now = Utc::now();
        let first = issuer.issue_at("u1", "s", "app", now).unwrap();
        let second = issuer.issue_at("u1", "s", "app", now).unwrap();
        assert_ne!(first.access_token, second.access_token);
        assert_ne!(first.refresh_token, second.refresh_token);
    }

    #[test]
    fn test_wrong_type() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "s", "app").unwrap();

        assert_eq!(
            issuer.verify(&tokens.refresh_token, TokenType::Access),
            Err(TokenError::WrongType {
                expected: "access",
                actual: "refresh"
            })
        );
        assert!(matches!(
            issuer.verify(&tokens.access_token, TokenType::Refresh),
            Err(TokenError::WrongType { .. })
        ));
    }

    #[test]
    fn test_expired() {
        let issuer = issuer();
        let three_hours_ago = Utc::now() - chrono::Duration::hours(3);
        let tokens = issuer.issue_at("u1", "s", "app", three_hours_ago).unwrap();

        assert_eq!(
            issuer.verify(&tokens.access_token, TokenType::Access),
            Err(TokenError::Expired)
        );
        // Refresh lifetime is 7 days, so it is still good
        assert!(
            issuer
                .verify(&tokens.refresh_token, TokenType::Refresh)
                .is_ok()
        );
    }

    #[test]
    fn test_signature_invalid() {
        let issuer = issuer();
        let other = TokenIssuer::new(
            b"ffffffffffffffffffffffffffffffff",
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
        .unwrap();
        let foreign = other.issue("u1", "s", "app").unwrap();

        assert_eq!(
            issuer.verify(&foreign.access_token, TokenType::Access),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_tampered_payload() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "s", "app").unwrap();

        let mut parts: Vec<&str> = tokens.access_token.split('.').collect();
        let forged = issuer.issue("u2", "s", "app").unwrap();
        let forged_payload = forged.access_token.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;
        let tampered = parts.join(".");

        assert_eq!(
            issuer.verify(&tampered, TokenType::Access),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_malformed() {
        let issuer = issuer();
        assert_eq!(
            issuer.verify("not-a-jwt", TokenType::Access),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            issuer.verify("", TokenType::Access),
            Err(TokenError::Malformed)
        );
    }
}
