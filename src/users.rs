//! Login eligibility checks against the user-management service.

use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, thiserror::Error)]
pub enum UserDirectoryError {
    #[error("User directory unavailable: {0}")]
    Unavailable(String),
}

/// Answers "does this user exist and may it log in".
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_login_allowed(&self, user_id: &str) -> Result<bool, UserDirectoryError>;
}

/// In-memory directory. Users are enabled or disabled explicitly; unknown
/// users are refused unless the directory was built with [`StaticUserDirectory::allow_all`].
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: DashMap<String, bool>,
    allow_unknown: bool,
}

impl StaticUserDirectory {
    pub fn new<I, S>(enabled_users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: enabled_users.into_iter().map(|id| (id.into(), true)).collect(),
            allow_unknown: false,
        }
    }

    /// Accept any user that has not been explicitly disabled.
    pub fn allow_all() -> Self {
        Self {
            users: DashMap::new(),
            allow_unknown: true,
        }
    }

    pub fn set_enabled(&self, user_id: impl Into<String>, enabled: bool) {
        self.users.insert(user_id.into(), enabled);
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn is_login_allowed(&self, user_id: &str) -> Result<bool, UserDirectoryError> {
        Ok(self
            .users
            .get(user_id)
            .map(|enabled| *enabled)
            .unwrap_or(self.allow_unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_users_only() {
        let directory = StaticUserDirectory::new(["u1", "u2"]);
        assert!(directory.is_login_allowed("u1").await.unwrap());
        assert!(!directory.is_login_allowed("stranger").await.unwrap());

        directory.set_enabled("u2", false);
        assert!(!directory.is_login_allowed("u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_allow_all_respects_disabled() {
        let directory = StaticUserDirectory::allow_all();
        assert!(directory.is_login_allowed("anyone").await.unwrap());

        directory.set_enabled("banned", false);
        assert!(!directory.is_login_allowed("banned").await.unwrap());
    }
}
