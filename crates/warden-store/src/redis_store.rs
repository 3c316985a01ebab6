//! Redis implementation of the key-value store
//!
//! Holds one multiplexed connection that is opened lazily and dropped after
//! any failed command, so the next call reconnects. A Redis outage therefore surfaces
//! per call as `StoreUnavailable` instead of preventing startup.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::future::Future;
use tokio::sync::Mutex;
use warden_core::{KeyValueStore, RedisConfig, Result, WardenError};

/// Redis-backed key-value store
pub struct RedisKeyValueStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisKeyValueStore {
    /// Create a store for the configured URL; no connection is opened yet
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| WardenError::ConfigError(format!("Invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Redis connection failed");
                WardenError::StoreUnavailable(format!("Redis connection failed: {e}"))
            })?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command, discarding the cached connection if it fails
    async fn run<T, F, Fut>(&self, op: &str, command: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match command(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                *self.connection.lock().await = None;
                Err(WardenError::StoreUnavailable(format!("Redis {op} failed: {e}")))
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("GET", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.run("SETEX", |mut conn| async move {
            let _: () = conn.set_ex(key, value, ttl_secs).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run("DEL", |mut conn| async move {
            let _: i64 = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.run("GETDEL", |mut conn| async move { conn.get_del(key).await })
            .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        self.run("EXPIRE", |mut conn| async move {
            let _: i64 = conn.expire(key, seconds).await?;
            Ok(())
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        // -2: missing, -1: no expiry
        let remaining: i64 = self
            .run("TTL", |mut conn| async move { conn.ttl(key).await })
            .await?;
        Ok((remaining >= 0).then_some(remaining))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.run("SADD", |mut conn| async move {
            let _: i64 = conn.sadd(key, members.to_vec()).await?;
            Ok(())
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.run("SREM", |mut conn| async move {
            let _: i64 = conn.srem(key, member).await?;
            Ok(())
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run("SMEMBERS", |mut conn| async move { conn.smembers(key).await })
            .await
    }

    async fn ping(&self) -> Result<()> {
        let _pong: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}
