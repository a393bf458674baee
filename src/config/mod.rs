mod cache;
mod database;
mod observability;
mod sessions;

use std::path::Path;

pub use cache::*;
pub use database::*;
use serde::{Deserialize, Serialize};
pub use observability::*;
pub use sessions::*;

/// Root configuration for the session core.
///
/// Loaded from TOML. `${VAR}` references are replaced with environment
/// variable values before parsing, except inside comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionCoreConfig {
    /// Cache backend holding live sessions.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Durable store for session history.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token and session settings.
    pub sessions: SessionConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl SessionCoreConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SessionCoreConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.is_none() {
            return Err(ConfigError::Validation(
                "A cache backend is required: set [cache] type = \"memory\" or \"redis\"".into(),
            ));
        }
        self.cache.validate()?;
        self.database.validate()?;
        self.sessions.validate()?;
        self.observability.metrics.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Replace `${VAR}` with the value of `VAR`. References after a `#` on the
/// same line are left untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("Invalid env pattern: {}", e)))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let value = std::env::var(name.as_str())
                .map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    const MINIMAL: &str = r#"
[cache]
type = "memory"

[sessions]
jwt_secret = "0123456789abcdef0123456789abcdef"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = SessionCoreConfig::from_str(MINIMAL).unwrap();
        assert!(matches!(config.cache, CacheConfig::Memory(_)));
        assert!(config.database.is_none());
        assert_eq!(config.sessions.max_sessions_per_user, 5);
        assert_eq!(config.observability.logging.format, LogFormat::Compact);
        assert!(!config.observability.metrics.enabled);
    }

    #[test]
    fn test_cache_is_required() {
        let toml = r#"
[sessions]
jwt_secret = "0123456789abcdef0123456789abcdef"
"#;
        let err = SessionCoreConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = format!("{}\nsurprise = true\n", MINIMAL);
        assert!(matches!(
            SessionCoreConfig::from_str(&toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_var_expansion() {
        let toml = r#"
[cache]
type = "memory"

[sessions]
jwt_secret = "${TEST_SESSION_SECRET}"
max_sessions_per_user = 3 # ${NOT_EXPANDED_IN_COMMENT}
"#;
        temp_env::with_var(
            "TEST_SESSION_SECRET",
            Some("abcdefghijklmnopqrstuvwxyz0123456789"),
            || {
                let config = SessionCoreConfig::from_str(toml).unwrap();
                assert_eq!(
                    config.sessions.jwt_secret,
                    "abcdefghijklmnopqrstuvwxyz0123456789"
                );
                assert_eq!(config.sessions.max_sessions_per_user, 3);
            },
        );
    }

    #[test]
    #[serial]
    fn test_missing_env_var() {
        temp_env::with_var_unset("TEST_SESSION_SECRET_MISSING", || {
            let err = expand_env_vars("secret = \"${TEST_SESSION_SECRET_MISSING}\"").unwrap_err();
            assert!(
                matches!(err, ConfigError::EnvVarNotFound(ref name) if name == "TEST_SESSION_SECRET_MISSING")
            );
        });
    }

    #[test]
    fn test_expand_preserves_trailing_newline() {
        assert_eq!(expand_env_vars("a = 1").unwrap(), "a = 1");
        assert_eq!(expand_env_vars("a = 1\n").unwrap(), "a = 1\n");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = SessionCoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sessions.access_token_ttl_secs, 7200);

        let missing = SessionCoreConfig::from_file("/nonexistent/session-core.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_, _))));
    }
}
