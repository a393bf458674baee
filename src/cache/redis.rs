use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use redis::{
    ConnectionInfo, IntoConnectionInfo, Value, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};
use tokio::sync::OnceCell;

use super::{
    error::{CacheError, CacheResult},
    traits::{Cache, MessageStream},
};
use crate::config::RedisCacheConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
/// Both connection types are cheap to clone and multiplex commands, so one
/// connection is shared by every caller.
#[derive(Clone)]
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Macro to execute a Redis command on either connection type.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Macro to execute a Redis script on either connection type.
macro_rules! redis_script {
    ($conn:expr, $script:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $script.invoke_async(c).await,
            RedisConn::Cluster(ref mut c) => $script.invoke_async(c).await,
        }
    };
}

/// Writes fields into a hash only if it still exists.
/// Returns 1 when written, 0 when the key is gone.
/// ARGV[1] is the TTL in seconds (0 keeps the current expiry), the rest are
/// field/value pairs.
const HASH_SET_EXISTING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    local ttl = tonumber(ARGV[1])
    if #ARGV > 1 then
        redis.call('HSET', KEYS[1], unpack(ARGV, 2))
    end
    if ttl > 0 then
        redis.call('EXPIRE', KEYS[1], ttl)
    end
    return 1
end
return 0
"#;

/// Internal enum to hold either a standalone or cluster Redis client.
enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

pub struct RedisCache {
    connection: RedisConnection,
    /// Shared multiplexed connection, opened on first use.
    shared: OnceCell<RedisConn>,
    /// Dedicated client for SUBSCRIBE. In cluster mode this targets the first
    /// node; classic pub/sub messages are broadcast to every node.
    pubsub_client: redis::Client,
    key_prefix: String,
    connect_timeout: Duration,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let (connection, pubsub_client) = if let Some(cluster_config) = &config.cluster {
            // Cluster mode: parse nodes from URL (comma-separated)
            // e.g., "redis://host1:6379,host2:6379,host3:6379"
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{}", s)
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            let Some(first_node) = nodes.first().cloned() else {
                return Err(CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            };

            let mut builder = redis::cluster::ClusterClientBuilder::new(nodes);
            if cluster_config.read_from_replicas {
                builder = builder.read_from_replicas();
            }
            builder = builder.retries(cluster_config.retries);
            builder = builder
                .connection_timeout(Duration::from_secs(cluster_config.connection_timeout_secs));
            builder =
                builder.response_timeout(Duration::from_secs(cluster_config.response_timeout_secs));

            let cluster_client = builder.build()?;
            (
                RedisConnection::Cluster(cluster_client),
                redis::Client::open(first_node)?,
            )
        } else {
            let client = redis::Client::open(config.url.as_str())?;
            (RedisConnection::Standalone(client.clone()), client)
        };

        Ok(Self {
            connection,
            shared: OnceCell::new(),
            pubsub_client,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn open_connection(&self) -> CacheResult<RedisConn> {
        let connect = async {
            match &self.connection {
                RedisConnection::Standalone(client) => {
                    let conn = client.get_multiplexed_async_connection().await?;
                    Ok::<_, CacheError>(RedisConn::Standalone(conn))
                }
                RedisConnection::Cluster(client) => {
                    let conn = client.get_async_connection().await?;
                    Ok(RedisConn::Cluster(conn))
                }
            }
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| CacheError::Timeout(self.connect_timeout))?
    }

    /// Get a handle to the shared connection, connecting on first use.
    async fn get_connection(&self) -> CacheResult<RedisConn> {
        let conn = self
            .shared
            .get_or_try_init(|| self.open_connection())
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let data: Option<Vec<u8>> = redis_cmd!(conn, redis::cmd("GET").arg(&full_key))?;

        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        if ttl.as_secs() > 0 {
            let _: () = redis_cmd!(
                conn,
                redis::cmd("SETEX")
                    .arg(&full_key)
                    .arg(ttl.as_secs())
                    .arg(value)
            )?;
        } else {
            let _: () = redis_cmd!(conn, redis::cmd("SET").arg(&full_key).arg(value))?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let _: () = redis_cmd!(conn, redis::cmd("DEL").arg(&full_key))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let count: i64 = redis_cmd!(conn, redis::cmd("EXISTS").arg(&full_key))?;
        Ok(count > 0)
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&full_key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = redis_cmd!(conn, cmd)?;

        if let Some(ttl) = ttl
            && ttl.as_secs() > 0
        {
            let _: i64 = redis_cmd!(conn, redis::cmd("EXPIRE").arg(&full_key).arg(ttl.as_secs()))?;
        }

        Ok(())
    }

    async fn hash_set_existing(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let script = redis::Script::new(HASH_SET_EXISTING_SCRIPT);
        let mut invocation = script.key(&full_key);
        invocation.arg(ttl.map(|t| t.as_secs()).unwrap_or(0));
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let written: i64 = redis_script!(conn, invocation)?;

        Ok(written == 1)
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let fields: HashMap<String, String> =
            redis_cmd!(conn, redis::cmd("HGETALL").arg(&full_key))?;

        Ok(fields)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // SADD returns the number of elements added (0 if already exists, 1 if new)
        let added: i64 = redis_cmd!(conn, redis::cmd("SADD").arg(&full_key).arg(member))?;

        if let Some(ttl) = ttl
            && ttl.as_secs() > 0
        {
            let _: i64 = redis_cmd!(conn, redis::cmd("EXPIRE").arg(&full_key).arg(ttl.as_secs()))?;
        }

        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let removed: i64 = redis_cmd!(conn, redis::cmd("SREM").arg(&full_key).arg(member))?;

        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let members: Vec<String> = redis_cmd!(conn, redis::cmd("SMEMBERS").arg(&full_key))?;

        Ok(members)
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        // ZADD returns the number of elements added (0 if updated, 1 if new)
        let added: i64 = redis_cmd!(
            conn,
            redis::cmd("ZADD").arg(&full_key).arg(score).arg(member)
        )?;

        Ok(added > 0)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let removed: i64 = redis_cmd!(conn, redis::cmd("ZREM").arg(&full_key).arg(member))?;

        Ok(removed > 0)
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> CacheResult<Vec<(String, f64)>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(&full_key)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .arg("WITHSCORES");

        if offset > 0 || limit.is_some() {
            // A negative count means "all remaining"
            let count = limit.map_or(-1, |limit| limit as i64);
            cmd.arg("LIMIT").arg(offset).arg(count);
        }

        let value: Value = redis_cmd!(conn, cmd)?;

        // Parse response: [member1, score1, member2, score2, ...]
        let mut results = Vec::new();
        if let Value::Array(arr) = value {
            let mut iter = arr.into_iter();
            while let (Some(member_val), Some(score_val)) = (iter.next(), iter.next()) {
                let member = match member_val {
                    Value::BulkString(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    _ => continue,
                };
                let score = match score_val {
                    Value::BulkString(bytes) => {
                        String::from_utf8_lossy(&bytes).parse().unwrap_or(0.0)
                    }
                    Value::Double(f) => f,
                    Value::Int(i) => i as f64,
                    _ => 0.0,
                };
                results.push((member, score));
            }
        }

        Ok(results)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<usize> {
        let mut conn = self.get_connection().await?;
        let full_channel = self.prefixed_key(channel);

        let receivers: i64 = redis_cmd!(
            conn,
            redis::cmd("PUBLISH").arg(&full_channel).arg(payload)
        )?;

        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let full_channel = self.prefixed_key(channel);

        let mut pubsub = tokio::time::timeout(
            self.connect_timeout,
            self.pubsub_client.get_async_pubsub(),
        )
        .await
        .map_err(|_| CacheError::Timeout(self.connect_timeout))??;
        pubsub.subscribe(&full_channel).await?;

        tracing::debug!(channel = %full_channel, "Subscribed to Redis channel");

        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed())
    }
}

/// Redis spells unbounded score ranges as `-inf` / `+inf`.
fn score_bound(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}
