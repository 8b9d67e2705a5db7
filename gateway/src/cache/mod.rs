//! # Cache Layer
//!
//! Cache-aside storage for upstream responses, plus a couple of shared
//! counters. Three backends implement [`CacheStore`]:
//!
//! | Backend | Use |
//! |---|---|
//! | [`RedisCache`] | Production. Shared across gateway replicas. |
//! | [`MemoryCache`] | Single-process deployments, tests, Redis fallback. |
//! | [`NullCache`] | Caching disabled. Every read misses. |
//!
//! Components never talk to a backend directly. They go through
//! [`CacheLayer`], which swallows backend errors (logging and counting them)
//! and returns miss/no-op defaults. A dead cache makes the gateway slower; it
//! never makes a request fail.
//!
//! ## Backend selection
//!
//! [`connect`] builds the backend named in configuration. When Redis cannot
//! be reached at startup the configured `fallback` backend is used instead;
//! with no fallback configured, startup fails. Nothing is inferred from the
//! runtime environment.

mod memory;
mod null;
mod redis;

pub use self::memory::MemoryCache;
pub use self::null::NullCache;
pub use self::redis::RedisCache;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CacheBackend, CacheConfig};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Store Contract
// ---------------------------------------------------------------------------

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,

    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// A string key-value store with optional per-key expiry.
///
/// TTLs are whole seconds. Implementations must be internally synchronised
/// and must bound every operation in time.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value`, replacing any existing entry. `ttl_secs = None` means
    /// no expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError>;

    /// Deletes a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Adds `by` to an integer counter (missing keys start at 0) and returns
    /// the new value.
    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError>;

    /// Sets a TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError>;

    /// Multi-get; the result is positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Atomically replaces a value, returning the previous one. Clears any TTL.
    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, CacheError>;

    /// Drops every entry in this store.
    async fn flush_all(&self) -> Result<(), CacheError>;

    /// Round-trips to the backend.
    async fn health_check(&self) -> Result<bool, CacheError>;
}

// ---------------------------------------------------------------------------
// CacheLayer
// ---------------------------------------------------------------------------

/// Error-absorbing facade over a [`CacheStore`]. Cheap to clone.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    metrics: SharedMetrics,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, metrics: SharedMetrics) -> Self {
        Self { store, metrics }
    }

    /// Name of the backing store.
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    fn absorb(&self, op: &'static str, key: &str, e: CacheError) {
        self.metrics.cache_errors_total.inc();
        warn!(backend = self.store.name(), op, key, error = %e, "cache operation failed");
    }

    /// Looks up a key. Backend errors read as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let value = match self.store.get(key).await {
            Ok(v) => v,
            Err(e) => {
                self.absorb("get", key, e);
                None
            }
        };
        if value.is_some() {
            self.metrics.cache_hits_total.inc();
        } else {
            self.metrics.cache_misses_total.inc();
        }
        value
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        if let Err(e) = self.store.set(key, value, ttl_secs).await {
            self.absorb("set", key, e);
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        self.store.del(key).await.unwrap_or_else(|e| {
            self.absorb("del", key, e);
            false
        })
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            self.absorb("exists", key, e);
            false
        })
    }

    /// Increments a counter. Returns 0 when the backend fails.
    pub async fn incr(&self, key: &str, by: i64) -> i64 {
        self.store.incr(key, by).await.unwrap_or_else(|e| {
            self.absorb("incr", key, e);
            0
        })
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.store.expire(key, ttl_secs).await.unwrap_or_else(|e| {
            self.absorb("expire", key, e);
            false
        })
    }

    /// Multi-get. A backend failure reads as all misses.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        if keys.is_empty() {
            return Vec::new();
        }
        match self.store.mget(keys).await {
            Ok(values) => values,
            Err(e) => {
                self.absorb("mget", &keys.join(","), e);
                vec![None; keys.len()]
            }
        }
    }

    pub async fn get_set(&self, key: &str, value: &str) -> Option<String> {
        self.store.get_set(key, value).await.unwrap_or_else(|e| {
            self.absorb("getset", key, e);
            None
        })
    }

    /// Flushes the store. Returns `false` if the backend refused.
    pub async fn flush_all(&self) -> bool {
        match self.store.flush_all().await {
            Ok(()) => {
                warn!(backend = self.store.name(), "cache flushed");
                true
            }
            Err(e) => {
                self.absorb("flush", "*", e);
                false
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await.unwrap_or_else(|e| {
            self.absorb("ping", "", e);
            false
        })
    }

    /// Reads and decodes a JSON value. Undecodable payloads are misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "ignoring undecodable cache entry");
                None
            }
        }
    }

    /// Encodes and stores a JSON value.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: Option<u64>) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl_secs).await,
            Err(e) => warn!(key, error = %e, "failed to encode cache entry"),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn local_store(backend: CacheBackend) -> Option<Arc<dyn CacheStore>> {
    match backend {
        CacheBackend::Memory => Some(Arc::new(MemoryCache::new())),
        CacheBackend::Null => Some(Arc::new(NullCache)),
        CacheBackend::Redis => None,
    }
}

/// Builds the configured cache backend.
pub async fn connect(config: &CacheConfig, metrics: SharedMetrics) -> Result<CacheLayer, CacheError> {
    let store = match local_store(config.backend) {
        Some(store) => store,
        None => match RedisCache::connect(&config.redis_url, config.op_timeout()).await {
            Ok(redis) => Arc::new(redis) as Arc<dyn CacheStore>,
            Err(e) => match config.fallback.and_then(local_store) {
                Some(fallback) => {
                    warn!(
                        error = %e,
                        fallback = fallback.name(),
                        "redis unavailable, using fallback cache backend"
                    );
                    fallback
                }
                None => return Err(e),
            },
        },
    };
    Ok(CacheLayer::new(store, metrics))
}
