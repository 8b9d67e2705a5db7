//! Redis-backed cache store.
//!
//! Uses a [`ConnectionManager`], which multiplexes one connection and
//! reconnects on its own after a drop. Every command is wrapped in the
//! configured operation timeout so a stalled Redis can only ever slow a
//! request down by that much.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, FromRedisValue, RedisError};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::info;

use super::{CacheError, CacheStore};

/// Upper bound on establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            CacheError::Connection(e.to_string())
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}

/// [`CacheStore`] over a Redis server.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    /// Opens a managed connection to `url`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Connection(format!("timed out connecting to {}", url)))??;

        info!(url, "connected to redis");
        Ok(Self { conn, op_timeout })
    }

    async fn run<T: FromRedisValue + Send>(&self, cmd: Cmd) -> Result<T, CacheError> {
        let mut conn = self.conn.clone();
        let result = timeout(self.op_timeout, cmd.query_async::<_, T>(&mut conn))
            .await
            .map_err(|_| CacheError::Timeout)?;
        Ok(result?)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.run(::redis::cmd("GET").arg(key).clone()).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), CacheError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl.max(1));
        }
        self.run::<()>(cmd).await
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let removed: i64 = self.run(::redis::cmd("DEL").arg(key).clone()).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let found: i64 = self.run(::redis::cmd("EXISTS").arg(key).clone()).await?;
        Ok(found > 0)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.run(::redis::cmd("INCRBY").arg(key).arg(by).clone()).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let applied: i64 = self
            .run(::redis::cmd("EXPIRE").arg(key).arg(ttl_secs).clone())
            .await?;
        Ok(applied == 1)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = ::redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        self.run(cmd).await
    }

    async fn get_set(&self, key: &str, value: &str) -> Result<Option<String>, CacheError> {
        self.run(::redis::cmd("GETSET").arg(key).arg(value).clone())
            .await
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        // FLUSHDB rather than FLUSHALL: only the selected database is ours.
        self.run::<()>(::redis::cmd("FLUSHDB")).await
    }

    async fn health_check(&self) -> Result<bool, CacheError> {
        let pong: String = self.run(::redis::cmd("PING")).await?;
        Ok(pong == "PONG")
    }
}
