use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::CacheResult;

/// Stream of raw payloads received on a pub/sub channel.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from cache
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes in cache with TTL. A zero TTL means no expiry.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a key of any type
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check whether a key of any type exists and has not expired
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────────
    // HASH Operations (session records)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Write fields into a hash, creating it if needed.
    /// When `ttl` is provided the expiry is (re)set to it.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    /// Write fields into a hash only if the hash already exists.
    /// Returns false without writing anything when the key is absent, so a
    /// late update never resurrects a deleted record. When `ttl` is provided
    /// the expiry of an existing hash is reset to it.
    async fn hash_set_existing(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Get all fields of a hash. Missing keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    // ─────────────────────────────────────────────────────────────────────────────
    // SET Operations (user-sessions index)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Add a member to a set. Returns true if the member was newly added.
    /// When `ttl` is provided the set's expiry is refreshed to it on every call.
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Remove a member from a set. Returns true if the member was removed.
    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// Get all members of a set.
    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────────
    // SORTED SET Operations (activity index)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Add or re-score a member. Returns true if the member was newly added.
    async fn zset_add(&self, key: &str, score: f64, member: &str) -> CacheResult<bool>;

    /// Remove a member. Returns true if the member was present.
    async fn zset_remove(&self, key: &str, member: &str) -> CacheResult<bool>;

    /// Members with `min <= score <= max`, ordered by score then member.
    /// `offset` skips that many matches before `limit` is applied.
    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> CacheResult<Vec<(String, f64)>>;

    // ─────────────────────────────────────────────────────────────────────────────
    // PUB/SUB
    // ─────────────────────────────────────────────────────────────────────────────

    /// Publish a payload. Returns the number of receivers that got it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<usize>;

    /// Subscribe to a channel. The stream ends when the underlying
    /// connection or channel closes.
    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream>;
}
