//! Redis-backed KV store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::error::Result;
use crate::script::KvScript;
use crate::store::KvStore;

/// KV store backed by a pooled Redis connection.
///
/// Scripts are sent with `EVALSHA` and fall back to `EVAL` when the server
/// has not seen them yet; the hashed [`redis::Script`] objects are kept per
/// script name.
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
    scripts: Arc<DashMap<&'static str, redis::Script>>,
}

impl RedisKvStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            scripts: Arc::new(DashMap::new()),
        }
    }

    /// Builds a pool from `config` and verifies that a connection can be
    /// obtained.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

        let store = Self::new(pool);
        store.ping().await?;
        tracing::info!("Connected to Redis");
        Ok(store)
    }

    /// The underlying pool, for callers that need raw commands.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    fn prepared(&self, script: &KvScript) -> redis::Script {
        self.scripts
            .entry(script.name())
            .or_insert_with(|| redis::Script::new(script.lua()))
            .clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1_i64).await?;
        Ok(value)
    }

    async fn eval(&self, script: &KvScript, keys: &[String], args: &[String]) -> Result<i64> {
        let prepared = self.prepared(script);
        let mut invocation = prepared.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.conn().await?;
        let result: i64 = invocation.invoke_async(&mut conn).await?;
        tracing::trace!(script = script.name(), result, "script executed");
        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}
