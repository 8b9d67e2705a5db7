//! Process-local cache store.
//!
//! TTLs are enforced on read: an expired entry is never returned, and is
//! evicted the moment someone looks at it. Entries nobody reads again are
//! swept out periodically from the write path.
//!
//! Expiry uses [`tokio::time::Instant`] so tests can drive it with a paused
//! clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CacheError, CacheStore};

/// Every this many writes, expired entries are purged.
const PURGE_EVERY_WRITES: u64 = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl_secs: Option<u64>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl_secs.map(|secs| now + Duration::from_secs(secs)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory [`CacheStore`]. Not shared between processes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    fn note_write(&self) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PURGE_EVERY_WRITES == 0 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        let entry = Entry::new(value.to_string(), ttl_secs, Instant::now());
        self.entries.insert(key.to_string(), entry);
        self.note_write();
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, entry)| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live_value(key).is_some())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".into(), None, now));
        if !entry.is_live(now) {
            *entry = Entry::new("0".into(), None, now);
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::Backend(format!("value at '{}' is not an integer", key)))?;
        let next = current
            .checked_add(by)
            .ok_or_else(|| CacheError::Backend(format!("increment of '{}' would overflow", key)))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let now = Instant::now();
        let applied = match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                true
            }
            _ => false,
        };
        if !applied {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(applied)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Ok(keys.iter().map(|key| self.live_value(key)).collect())
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let previous = self
            .entries
            .insert(key.to_string(), Entry::new(value.to_string(), None, now));
        self.note_write();
        Ok(previous.filter(|entry| entry.is_live(now)).map(|entry| entry.value))
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_read_after_ttl_is_absent() {
        let cache = MemoryCache::new();
        cache.set("latest_blocks:10", "[1,2,3]", Some(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(
            cache.get("latest_blocks:10").await.unwrap().as_deref(),
            Some("[1,2,3]")
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("latest_blocks:10").await.unwrap(), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn entries_without_ttl_never_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn incr_starts_at_zero_and_rejects_non_integers() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("stats:tx", 1).await.unwrap(), 1);
        assert_eq!(cache.incr("stats:tx", 5).await.unwrap(), 6);

        cache.set("word", "hello", None).await.unwrap();
        assert!(cache.incr("word", 1).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expire_applies_only_to_live_keys() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();

        assert!(cache.expire("k", 5).await.unwrap());
        assert!(!cache.expire("missing", 5).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn mget_is_positional() {
        let cache = MemoryCache::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set("c", "3", None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            cache.mget(&keys).await.unwrap(),
            vec![Some("1".into()), None, Some("3".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn get_set_returns_previous_live_value_and_clears_ttl() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get_set("k", "one").await.unwrap(), None);

        cache.set("k", "two", Some(1)).await.unwrap();
        assert_eq!(cache.get_set("k", "three").await.unwrap().as_deref(), Some("two"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn del_and_flush() {
        let cache = MemoryCache::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();

        assert!(cache.del("a").await.unwrap());
        assert!(!cache.del("a").await.unwrap());

        cache.flush_all().await.unwrap();
        assert!(cache.is_empty());
        assert!(cache.health_check().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("short", "x", Some(1)).await.unwrap();
        cache.set("long", "y", Some(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
