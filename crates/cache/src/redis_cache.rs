//! Distributed cache backend over Redis.
//!
//! [`RedisCache`] wraps a [`ConnectionManager`], a multiplexed connection that
//! reconnects on its own and is safe to share between tasks. Every command is
//! bounded by the configured operation timeout so a stalled server turns into
//! a [`CacheError::Timeout`] instead of a stalled request.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{AsyncIter, Client, Cmd, FromRedisValue, RedisResult, aio::ConnectionManager};

use crate::{
    backend::CacheBackend,
    error::{CacheError, CacheResult},
};

/// Number of keys requested per `SCAN` step and per `DEL` batch.
const SCAN_BATCH: usize = 500;

/// Redis-backed [`CacheBackend`].
///
/// Cloning is cheap and every clone shares the same multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").field("operation_timeout", &self.operation_timeout).finish()
    }
}

impl RedisCache {
    /// Opens a connection to `url` and confirms it with `PING`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`] if `url` is not a valid connection string
    /// - [`CacheError::Timeout`] if the server does not answer within `connect_timeout`
    /// - [`CacheError::Unavailable`] if the connection is refused
    #[tracing::instrument(skip(url))]
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> CacheResult<Self> {
        let client = Client::open(url)
            .map_err(|e| CacheError::config(format!("invalid redis url: {}", e.category())))?;

        let mut conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await??;
        let _: String =
            tokio::time::timeout(connect_timeout, redis::cmd("PING").query_async(&mut conn))
                .await??;

        Ok(Self { conn, operation_timeout })
    }

    /// Runs one command against a fresh handle on the shared connection.
    async fn run<T: FromRedisValue + Send>(&self, cmd: &Cmd) -> CacheResult<T> {
        let mut conn = self.conn.clone();
        let result =
            tokio::time::timeout(self.operation_timeout, cmd.query_async(&mut conn)).await?;
        Ok(result?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects zero.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

async fn scan_keys(mut conn: ConnectionManager, pattern: String) -> RedisResult<Vec<String>> {
    let mut cmd = redis::cmd("SCAN");
    cmd.cursor_arg(0).arg("MATCH").arg(&pattern).arg("COUNT").arg(SCAN_BATCH);
    let mut iter: AsyncIter<'_, String> = cmd.iter_async(&mut conn).await?;
    let mut keys = Vec::new();
    while let Some(key) = iter.next_item().await {
        keys.push(key);
    }
    Ok(keys)
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.run(redis::cmd("GET").arg(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        match ttl {
            // An already-expired write is a delete.
            Some(ttl) if ttl.is_zero() => self.delete(key).await,
            Some(ttl) => {
                let millis = ttl_millis(ttl);
                self.run(redis::cmd("SET").arg(key).arg(value.as_ref()).arg("PX").arg(millis)).await
            },
            None => self.run(redis::cmd("SET").arg(key).arg(value.as_ref())).await,
        }
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<bool> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value.as_ref())
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let _removed: u64 = self.run(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let count: u64 = self.run(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let pattern = format!("{}*", escape_glob(prefix));
        // A full keyspace walk gets a wider budget than a single command.
        let budget = self.operation_timeout.saturating_mul(20);
        let keys = tokio::time::timeout(budget, scan_keys(self.conn.clone(), pattern)).await??;

        let mut removed = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let count: u64 = self.run(redis::cmd("DEL").arg(chunk)).await?;
            removed += count;
        }
        tracing::debug!(removed, "cleared prefix");
        Ok(removed)
    }
}

/// Escapes glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
