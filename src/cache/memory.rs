use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{StreamExt, stream};
use tokio::sync::broadcast;

use super::{
    error::{CacheError, CacheResult},
    traits::{Cache, MessageStream},
};
use crate::config::MemoryCacheConfig;

fn expiry_from(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

fn is_past(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|exp| Instant::now() > exp)
}

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, expires_at: Option<Instant>) -> Self {
        Self { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        is_past(self.expires_at)
    }
}

/// Entry for hash storage with expiration
struct HashEntry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn new(expires_at: Option<Instant>) -> Self {
        Self {
            fields: HashMap::new(),
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        is_past(self.expires_at)
    }
}

/// Entry for set storage with expiration
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl SetEntry {
    fn new(expires_at: Option<Instant>) -> Self {
        Self {
            members: HashSet::new(),
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        is_past(self.expires_at)
    }
}

/// In-memory cache implementation using DashMap for concurrent access.
///
/// # Multi-Node Deployments
///
/// **WARNING**: This cache is NOT suitable for multi-node deployments.
///
/// Each node keeps its own sessions and its own pub/sub channels, so a session
/// created on one node is unknown to every other node and revocations do not
/// propagate. Use [`RedisCache`](super::RedisCache) when more than one instance
/// serves traffic.
pub struct MemoryCache {
    data: Arc<DashMap<String, CacheEntry>>,
    hashes: Arc<DashMap<String, HashEntry>>,
    sets: Arc<DashMap<String, SetEntry>>,
    zsets: Arc<DashMap<String, HashMap<String, f64>>>,
    channels: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    max_entries: usize,
    channel_capacity: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            hashes: Arc::new(DashMap::new()),
            sets: Arc::new(DashMap::new()),
            zsets: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    fn stored_entries(&self) -> usize {
        self.data.len() + self.hashes.len()
    }

    /// Make room for a write to `key`.
    ///
    /// Only expired entries are ever dropped. Live values are token index
    /// entries whose sessions still depend on them, so a full cache refuses
    /// new keys instead of evicting them. Overwrites of existing keys always
    /// succeed.
    fn ensure_capacity(&self, key: &str) -> CacheResult<()> {
        if self.data.contains_key(key) || self.hashes.contains_key(key) {
            return Ok(());
        }
        if self.stored_entries() < self.max_entries {
            return Ok(());
        }

        self.data.retain(|_, entry| !entry.is_expired());
        self.hashes.retain(|_, entry| !entry.is_expired());
        self.sets.retain(|_, entry| !entry.is_expired());

        if self.stored_entries() < self.max_entries {
            Ok(())
        } else {
            Err(CacheError::CapacityExceeded(self.max_entries))
        }
    }

    fn purge_expired(&self, key: &str) {
        self.data.remove_if(key, |_, e| e.is_expired());
        self.hashes.remove_if(key, |_, e| e.is_expired());
        self.sets.remove_if(key, |_, e| e.is_expired());
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.data.remove_if(key, |_, e| e.is_expired());

        Ok(self.data.get(key).map(|entry| entry.data.clone()))
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.ensure_capacity(key)?;

        self.data.insert(
            key.to_string(),
            CacheEntry::new(value.to_vec(), expiry_from(ttl)),
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        self.hashes.remove(key);
        self.sets.remove(key);
        self.zsets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.purge_expired(key);
        Ok(self.data.contains_key(key)
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.zsets.contains_key(key))
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.ensure_capacity(key)?;

        match self.hashes.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                if entry.is_expired() {
                    *entry = HashEntry::new(None);
                }
                entry.fields.extend(fields.iter().cloned());
                if let Some(ttl) = ttl {
                    entry.expires_at = expiry_from(ttl);
                }
            }
            Entry::Vacant(e) => {
                let mut entry = HashEntry::new(ttl.and_then(expiry_from));
                entry.fields.extend(fields.iter().cloned());
                e.insert(entry);
            }
        }

        Ok(())
    }

    async fn hash_set_existing(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        self.hashes.remove_if(key, |_, e| e.is_expired());

        match self.hashes.get_mut(key) {
            Some(mut entry) => {
                entry.fields.extend(fields.iter().cloned());
                if let Some(ttl) = ttl {
                    entry.expires_at = expiry_from(ttl);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.hashes.remove_if(key, |_, e| e.is_expired());

        Ok(self
            .hashes
            .get(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        match self.sets.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                if entry.is_expired() {
                    *entry = SetEntry::new(None);
                }
                if let Some(ttl) = ttl {
                    entry.expires_at = expiry_from(ttl);
                }
                Ok(entry.members.insert(member.to_string()))
            }
            Entry::Vacant(e) => {
                let mut entry = SetEntry::new(ttl.and_then(expiry_from));
                entry.members.insert(member.to_string());
                e.insert(entry);
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.sets.remove_if(key, |_, e| e.is_expired());

        let removed = match self.sets.get_mut(key) {
            Some(mut entry) => entry.members.remove(member),
            None => false,
        };
        // Redis drops empty sets; mirror that so `exists` agrees.
        self.sets.remove_if(key, |_, e| e.members.is_empty());
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.sets.remove_if(key, |_, e| e.is_expired());

        Ok(self
            .sets
            .get(key)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> CacheResult<bool> {
        let mut zset = self.zsets.entry(key.to_string()).or_default();
        Ok(zset.insert(member.to_string(), score).is_none())
    }

    async fn zset_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let removed = match self.zsets.get_mut(key) {
            Some(mut zset) => zset.remove(member).is_some(),
            None => false,
        };
        self.zsets.remove_if(key, |_, z| z.is_empty());
        Ok(removed)
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> CacheResult<Vec<(String, f64)>> {
        let Some(zset) = self.zsets.get(key) else {
            return Ok(Vec::new());
        };

        let mut members: Vec<(String, f64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        drop(zset);

        // Same ordering as Redis: score, then member lexicographically.
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(members
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> CacheResult<usize> {
        match self.channels.get(channel) {
            // No subscribers is not an error, same as Redis PUBLISH returning 0
            Some(sender) => Ok(sender.send(payload.to_vec()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        let channel = channel.to_string();
        let messages = stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                channel = %channel,
                                skipped,
                                "In-memory subscriber lagged, messages dropped"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(messages.boxed())
    }
}
