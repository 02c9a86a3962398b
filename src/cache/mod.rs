//! Shared cache abstraction.
//!
//! Sessions use the plain key/value half of [`CacheClient`]. Rate limiters use
//! [`CacheClient::eval`], which runs an [`AtomicScript`] as a single atomic
//! read-modify-write against one key. Redis executes the script's Lua source
//! server-side; [`MemoryCache`] runs the equivalent native evaluator under its
//! lock, so both backends give the same answers for the same inputs.

mod memory;
mod redis;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Hash fields of a script-managed record. Empty means the key does not exist.
pub type Fields = HashMap<String, i64>;

/// What a native evaluator wants done with the record after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptWrite {
    /// Leave the stored record untouched
    Keep,
    /// Persist the (mutated) fields and set the key to expire after `ttl_millis`
    Store { ttl_millis: u64 },
}

/// Result of running a native evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Reply handed back to the caller, mirroring the Lua script's return table
    pub reply: Vec<i64>,
    pub write: ScriptWrite,
}

/// A keyed atomic read-modify-write program.
pub struct AtomicScript {
    name: &'static str,
    lua: &'static str,
    native: fn(&mut Fields, &[i64]) -> ScriptOutcome,
}

impl AtomicScript {
    pub const fn new(
        name: &'static str,
        lua: &'static str,
        native: fn(&mut Fields, &[i64]) -> ScriptOutcome,
    ) -> Self {
        Self { name, lua, native }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lua source executed by Redis via `EVALSHA`.
    pub fn lua(&self) -> &'static str {
        self.lua
    }

    /// Run the native evaluator against `fields`.
    pub fn apply(&self, fields: &mut Fields, args: &[i64]) -> ScriptOutcome {
        (self.native)(fields, args)
    }
}

impl fmt::Debug for AtomicScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicScript").field("name", &self.name).finish()
    }
}

/// Cache operations consumed by the session and rate limiting subsystems.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Upsert a string value with an expiry, replacing any prior value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a key. Missing keys are not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Atomically run `script` against `key` with integer arguments.
    async fn eval(&self, script: &'static AtomicScript, key: &str, args: &[i64]) -> Result<Vec<i64>>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
