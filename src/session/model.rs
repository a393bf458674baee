use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tokens::{IssuedTokens, TokenPair};

/// Maximum length for device info string fields (user agent, device name, etc.).
pub const DEVICE_INFO_MAX_LENGTH: usize = 512;

/// Truncate a string to a maximum byte length, ensuring valid UTF-8 boundaries.
pub(crate) fn truncate_device_field(value: String, max_len: usize) -> String {
    if value.len() <= max_len {
        return value;
    }
    // Find the last valid char boundary at or before max_len
    let mut end = max_len;
    while !value.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    value[..end].to_string()
}

/// New opaque session id: `sess_` followed by 16 hex chars.
pub fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("sess_{}", &id[..16])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "revoked" => Ok(SessionStatus::Revoked),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Client device details captured at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub user_agent: String,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with all string fields truncated to safe lengths.
    pub fn new(
        device_id: String,
        device_type: String,
        device_name: String,
        app_version: String,
        user_agent: String,
    ) -> Self {
        Self {
            device_id: truncate_device_field(device_id, DEVICE_INFO_MAX_LENGTH),
            device_type: truncate_device_field(device_type, DEVICE_INFO_MAX_LENGTH),
            device_name: truncate_device_field(device_name, DEVICE_INFO_MAX_LENGTH),
            app_version: truncate_device_field(app_version, DEVICE_INFO_MAX_LENGTH),
            user_agent: truncate_device_field(user_agent, DEVICE_INFO_MAX_LENGTH),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub location: String,
}

/// The token pair currently bound to a session, with absolute expiries.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInfo")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

impl From<&IssuedTokens> for TokenInfo {
    fn from(tokens: &IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        }
    }
}

/// Login request context. Every field is an opaque string passed through
/// into [`DeviceInfo`] and [`NetworkInfo`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginContext {
    pub platform: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub location: String,
    /// e.g. "password", "sms". Only carried into the durable mirror.
    #[serde(default)]
    pub login_method: String,
}

impl LoginContext {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            self.device_id.clone(),
            self.device_type.clone(),
            self.device_name.clone(),
            self.app_version.clone(),
            self.user_agent.clone(),
        )
    }

    pub fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            ip_address: self.ip_address.clone(),
            location: self.location.clone(),
        }
    }
}

/// A live session as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub platform: String,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    pub tokens: TokenInfo,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Equal to the refresh token expiry.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Build a fresh active session from newly issued tokens.
    pub fn new(
        session_id: String,
        user_id: String,
        context: &LoginContext,
        tokens: &IssuedTokens,
    ) -> Self {
        Self {
            session_id,
            user_id,
            platform: context.platform.clone(),
            device: context.device_info(),
            network: context.network_info(),
            tokens: TokenInfo::from(tokens),
            status: SessionStatus::Active,
            created_at: tokens.issued_at,
            last_active_at: tokens.issued_at,
            expires_at: tokens.refresh_expires_at,
        }
    }

    /// Past its absolute expiry, or carrying an activity stamp beyond it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at || self.last_active_at > self.expires_at
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            platform: self.platform.clone(),
            device: self.device.clone(),
            network: self.network.clone(),
            status: self.status,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            expires_at: self.expires_at,
        }
    }

    /// Flatten into hash fields. Timestamps are RFC 3339.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            field("user_id", &self.user_id),
            field("platform", &self.platform),
            field("device_id", &self.device.device_id),
            field("device_type", &self.device.device_type),
            field("device_name", &self.device.device_name),
            field("app_version", &self.device.app_version),
            field("user_agent", &self.device.user_agent),
            field("ip_address", &self.network.ip_address),
            field("location", &self.network.location),
            field("status", self.status.as_str()),
            field("created_at", &self.created_at.to_rfc3339()),
            field("last_active_at", &self.last_active_at.to_rfc3339()),
            field("expires_at", &self.expires_at.to_rfc3339()),
        ];
        fields.extend(token_fields(&self.tokens));
        fields
    }

    /// Rebuild a session from its hash fields.
    pub fn from_fields(
        session_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let text = |name: &str| fields.get(name).cloned().unwrap_or_default();
        let required = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| format!("missing field {}", name))
        };
        let timestamp = |name: &str| -> Result<DateTime<Utc>, String> {
            let raw = required(name)?;
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("invalid {}: {}", name, e))
        };

        Ok(Self {
            session_id: session_id.to_string(),
            user_id: required("user_id")?,
            platform: text("platform"),
            device: DeviceInfo {
                device_id: text("device_id"),
                device_type: text("device_type"),
                device_name: text("device_name"),
                app_version: text("app_version"),
                user_agent: text("user_agent"),
            },
            network: NetworkInfo {
                ip_address: text("ip_address"),
                location: text("location"),
            },
            tokens: TokenInfo {
                access_token: required("access_token")?,
                refresh_token: required("refresh_token")?,
                access_expires_at: timestamp("access_expires_at")?,
                refresh_expires_at: timestamp("refresh_expires_at")?,
            },
            status: required("status")?.parse()?,
            created_at: timestamp("created_at")?,
            last_active_at: timestamp("last_active_at")?,
            expires_at: timestamp("expires_at")?,
        })
    }
}

/// Hash fields describing a token pair.
pub(crate) fn token_fields(tokens: &TokenInfo) -> Vec<(String, String)> {
    vec![
        field("access_token", &tokens.access_token),
        field("refresh_token", &tokens.refresh_token),
        field("access_expires_at", &tokens.access_expires_at.to_rfc3339()),
        field("refresh_expires_at", &tokens.refresh_expires_at.to_rfc3339()),
    ]
}

fn field(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

/// Session view returned to callers. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub platform: String,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session: SessionInfo,
    pub tokens: TokenPair,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tokens::TokenIssuer;

    fn sample() -> Session {
        let issuer = TokenIssuer::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
        .unwrap();
        let tokens = issuer.issue("u1", "sess_1", "app").unwrap();
        let context = LoginContext {
            device_type: "ios".into(),
            ip_address: "10.0.0.1".into(),
            ..LoginContext::new("app").with_device("d1")
        };
        Session::new("sess_1".into(), "u1".into(), &context, &tokens)
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 21);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_fields_round_trip() {
        let session = sample();
        let fields: HashMap<String, String> = session.to_fields().into_iter().collect();
        let restored = Session::from_fields("sess_1", &fields).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.device.device_id, "d1");
        assert_eq!(restored.expires_at, session.tokens.refresh_expires_at);
    }

    #[test]
    fn test_from_fields_rejects_partial_record() {
        let mut fields: HashMap<String, String> = sample().to_fields().into_iter().collect();
        fields.remove("access_token");
        let err = Session::from_fields("sess_1", &fields).unwrap_err();
        assert!(err.contains("access_token"));

        // touch on a vanished record can leave only the activity field behind
        let orphan: HashMap<String, String> =
            [("last_active_at".to_string(), Utc::now().to_rfc3339())].into();
        assert!(Session::from_fields("sess_1", &orphan).is_err());
    }

    #[test]
    fn test_expiry_rules() {
        let mut session = sample();
        let now = session.created_at;
        assert!(!session.is_expired_at(now));
        assert!(session.is_expired_at(session.expires_at + chrono::Duration::seconds(1)));

        session.last_active_at = session.expires_at + chrono::Duration::seconds(1);
        assert!(session.is_expired_at(now), "activity past expiry counts as expired");
    }

    #[test]
    fn test_device_fields_truncated() {
        let long = "é".repeat(400); // 800 bytes
        let device = DeviceInfo::new(
            "d".into(),
            String::new(),
            long.clone(),
            String::new(),
            long,
        );
        assert!(device.device_name.len() <= DEVICE_INFO_MAX_LENGTH);
        assert_eq!(device.device_name.len(), 512);
        assert!(device.user_agent.is_char_boundary(device.user_agent.len()));
    }

    #[test]
    fn test_token_info_debug_redacted() {
        let session = sample();
        let rendered = format!("{:?}", session.tokens);
        assert!(!rendered.contains(&session.tokens.access_token));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("revoked".parse::<SessionStatus>(), Ok(SessionStatus::Revoked));
        assert!("gone".parse::<SessionStatus>().is_err());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
    }
}
