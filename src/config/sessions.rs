use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum HS256 secret length in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Session and token settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// HMAC secret used to sign access and refresh tokens.
    /// Usually supplied as `"${SESSION_JWT_SECRET}"`.
    pub jwt_secret: String,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds. Also the absolute session lifetime.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Concurrent sessions allowed per user before the least recently
    /// active one is evicted on login.
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,

    /// Run the background expiry sweeper.
    #[serde(default = "default_true")]
    pub sweeper_enabled: bool,

    /// Seconds between sweeper passes.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Maximum activity-index entries examined per sweep.
    #[serde(default = "default_batch_cleanup_size")]
    pub batch_cleanup_size: usize,

    /// Upper bound on a single token validation, including cache round trips.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
}

// Keep the secret out of logs.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .field("sweeper_enabled", &self.sweeper_enabled)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("batch_cleanup_size", &self.batch_cleanup_size)
            .field("validation_timeout_secs", &self.validation_timeout_secs)
            .finish()
    }
}

impl SessionConfig {
    /// Settings with every default applied and the given secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            max_sessions_per_user: default_max_sessions_per_user(),
            sweeper_enabled: default_true(),
            cleanup_interval_secs: default_cleanup_interval(),
            batch_cleanup_size: default_batch_cleanup_size(),
            validation_timeout_secs: default_validation_timeout(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Validation(format!(
                "sessions.jwt_secret must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }
        if self.access_token_ttl_secs == 0 || self.refresh_token_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "Token lifetimes must be greater than 0".into(),
            ));
        }
        if self.access_token_ttl_secs >= self.refresh_token_ttl_secs {
            return Err(ConfigError::Validation(
                "access_token_ttl_secs must be shorter than refresh_token_ttl_secs".into(),
            ));
        }
        if self.max_sessions_per_user == 0 {
            return Err(ConfigError::Validation(
                "max_sessions_per_user must be at least 1".into(),
            ));
        }
        if self.sweeper_enabled && self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup_interval_secs must be greater than 0 when the sweeper is enabled".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_access_token_ttl() -> u64 {
    7200 // 2 hours
}

fn default_refresh_token_ttl() -> u64 {
    604_800 // 7 days
}

fn default_max_sessions_per_user() -> usize {
    5
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_batch_cleanup_size() -> usize {
    1000
}

fn default_validation_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config = SessionConfig::with_secret(SECRET);
        assert_eq!(config.access_ttl(), Duration::from_secs(7200));
        assert_eq!(config.refresh_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.max_sessions_per_user, 5);
        assert!(config.sweeper_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = SessionConfig::with_secret(SECRET);
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }

    #[rstest]
    #[case::short_secret("too-short", 60, 120, 3, "jwt_secret")]
    #[case::zero_access(SECRET, 0, 120, 3, "greater than 0")]
    #[case::access_not_shorter(SECRET, 120, 120, 3, "shorter")]
    #[case::zero_quota(SECRET, 60, 120, 0, "max_sessions_per_user")]
    fn test_validation_rejects(
        #[case] secret: &str,
        #[case] access: u64,
        #[case] refresh: u64,
        #[case] max_sessions: usize,
        #[case] expected: &str,
    ) {
        let config = SessionConfig {
            access_token_ttl_secs: access,
            refresh_token_ttl_secs: refresh,
            max_sessions_per_user: max_sessions,
            ..SessionConfig::with_secret(secret)
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(
            err.contains(expected),
            "expected error containing {expected:?}, got {err:?}"
        );
    }
}
