//! Redis-backed shared cache.
//!
//! Safe for multi-instance deployments: scripts run server-side through
//! `EVALSHA`, so concurrent callers on different hosts never interleave inside
//! a read-modify-write.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{info, trace};

use super::{AtomicScript, CacheClient};
use crate::error::Result;

/// A [`CacheClient`] talking to Redis over a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    /// Compiled scripts by name, so the SHA1 is computed once
    scripts: DashMap<&'static str, Script>,
}

impl RedisCache {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis");

        Ok(Self {
            conn,
            scripts: DashMap::new(),
        })
    }

    fn script(&self, script: &'static AtomicScript) -> Script {
        self.scripts
            .entry(script.name())
            .or_insert_with(|| Script::new(script.lua()))
            .clone()
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn eval(&self, script: &'static AtomicScript, key: &str, args: &[i64]) -> Result<Vec<i64>> {
        let compiled = self.script(script);
        let mut invocation = compiled.prepare_invoke();
        invocation.key(key);
        for arg in args {
            invocation.arg(*arg);
        }

        let mut conn = self.conn.clone();
        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;

        trace!(script = script.name(), key = %key, reply = ?reply, "Evaluated script in Redis");
        Ok(reply)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("scripts", &self.scripts.len())
            .finish()
    }
}
