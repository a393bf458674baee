use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cache configuration.
///
/// The cache is the system of record for live sessions: session records,
/// per-user indexes, token lookups, the activity index and the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// No cache. The service refuses to start without one.
    #[default]
    None,

    /// In-memory cache. Good for tests and single-node deployments.
    /// Sessions are lost on restart and never shared between nodes.
    Memory(MemoryCacheConfig),

    /// Redis cache. Required for multi-node deployments.
    #[cfg(feature = "redis")]
    Redis(RedisCacheConfig),
}

impl CacheConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, CacheConfig::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::None => Ok(()),
            CacheConfig::Memory(c) => c.validate(),
            #[cfg(feature = "redis")]
            CacheConfig::Redis(c) => c.validate(),
        }
    }
}

/// In-memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Maximum number of values and session records held at once.
    /// Expired entries are reclaimed when full; live ones are never evicted,
    /// so writes of new keys fail until space frees up.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Buffered messages per pub/sub channel before slow subscribers lag.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory cache max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_channel_capacity() -> usize {
    1024
}

/// Redis cache configuration.
#[cfg(feature = "redis")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    /// For clusters: redis://host1:port1,host2:port2,...
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all cache keys and channels.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Enable TLS for Redis connections.
    #[serde(default)]
    pub tls: bool,

    /// Cluster mode configuration.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

#[cfg(feature = "redis")]
impl RedisCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        if self.tls && !self.url.split(',').all(|u| u.trim().starts_with("rediss://")) {
            return Err(ConfigError::Validation(
                "Redis tls = true requires rediss:// URLs".into(),
            ));
        }
        Ok(())
    }
}

/// Redis cluster configuration.
#[cfg(feature = "redis")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    /// Read from replicas for read operations.
    #[serde(default)]
    pub read_from_replicas: bool,

    /// Number of retries for cluster operations.
    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    /// Connection timeout for cluster nodes in seconds.
    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Response timeout for cluster operations in seconds.
    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

#[cfg(feature = "redis")]
fn default_redis_timeout() -> u64 {
    5
}

#[cfg(feature = "redis")]
fn default_key_prefix() -> String {
    "sc:".to_string()
}

#[cfg(feature = "redis")]
fn default_cluster_retries() -> u32 {
    3
}

#[cfg(feature = "redis")]
fn default_cluster_connection_timeout() -> u64 {
    5
}

#[cfg(feature = "redis")]
fn default_cluster_response_timeout() -> u64 {
    1
}
