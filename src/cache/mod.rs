mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::{SessionKeys, TokenKind, hash_token};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{Cache, MessageStream};

use crate::config::CacheConfig;

/// Build the configured cache backend.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn Cache>> {
    match config {
        CacheConfig::None => Err(CacheError::NotConfigured),
        CacheConfig::Memory(cfg) => {
            tracing::warn!("Using in-memory session cache; sessions are not shared across instances");
            Ok(Arc::new(MemoryCache::new(cfg)))
        }
        #[cfg(feature = "redis")]
        CacheConfig::Redis(cfg) => Ok(Arc::new(RedisCache::from_config(cfg).await?)),
    }
}
