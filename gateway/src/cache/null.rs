//! A cache that stores nothing.
//!
//! Used when caching is switched off, or as the fallback when Redis is down
//! and an operator would rather pay full upstream cost than share stale
//! state between replicas. Modeled on the no-op metrics recorder pattern:
//! every call succeeds and has no effect.

use async_trait::async_trait;

use super::{CacheError, CacheStore};

/// Always misses, accepts every write, reports healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

#[async_trait]
impl CacheStore for NullCache {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: Option<u64>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    /// Nothing is stored, so the counter never moves past `by`.
    async fn incr(&self, _key: &str, by: i64) -> Result<i64, CacheError> {
        Ok(by)
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Ok(vec![None; keys.len()])
    }

    async fn get_set(&self, _key: &str, _value: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        Ok(true)
    }
}
