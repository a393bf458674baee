//! Session lifecycle: issuance, validation, rotation, revocation and expiry.
//!
//! [`SessionService`] is the entry point. It composes the cache-backed
//! [`CacheSessionStore`] (system of record for live sessions), the
//! [`QuotaEnforcer`], the [`SessionSweeper`], the durable mirror and the
//! event publisher.

mod error;
mod model;
mod quota;
mod service;
mod store;
mod sweeper;

pub use error::{SessionError, SessionResult};
pub use model::{
    CreatedSession, DEVICE_INFO_MAX_LENGTH, DeviceInfo, LoginContext, NetworkInfo, Session,
    SessionInfo, SessionStatus, TokenInfo, new_session_id,
};
pub use quota::QuotaEnforcer;
pub use service::SessionService;
pub use store::CacheSessionStore;
pub use sweeper::{SessionSweeper, SweepReport, start_session_sweeper};

#[cfg(test)]
pub(crate) mod fixtures {
    use std::{sync::Arc, time::Duration};

    use chrono::{DateTime, Utc};

    use super::{CacheSessionStore, LoginContext, Session, new_session_id};
    use crate::{
        cache::MemoryCache,
        config::MemoryCacheConfig,
        events::{EventBus, EventPublisher},
        tokens::TokenIssuer,
    };

    pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

    /// Store, publisher and issuer sharing one in-memory cache.
    /// Access tokens live one minute, refresh tokens one hour.
    pub struct Fixture {
        pub store: CacheSessionStore,
        pub events: EventPublisher,
        pub issuer: TokenIssuer,
    }

    impl Fixture {
        pub fn new() -> Self {
            let cache = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
            Self {
                store: CacheSessionStore::new(cache.clone(), Duration::from_secs(3600)),
                events: EventPublisher::new(Arc::new(EventBus::new()), cache, "inst_test"),
                issuer: TokenIssuer::new(
                    TEST_SECRET.as_bytes(),
                    Duration::from_secs(60),
                    Duration::from_secs(3600),
                )
                .unwrap(),
            }
        }
    }

    /// Create and store a session whose tokens were issued at `issued_at`.
    pub async fn stored_session(fx: &Fixture, user_id: &str, issued_at: DateTime<Utc>) -> Session {
        let id = new_session_id();
        let tokens = fx.issuer.issue_at(user_id, &id, "app", issued_at).unwrap();
        let session = Session::new(id, user_id.to_string(), &LoginContext::new("app"), &tokens);
        fx.store.create(&session).await.unwrap();
        session
    }
}
