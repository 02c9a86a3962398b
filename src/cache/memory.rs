//! Process-local cache with clock-driven expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{AtomicScript, CacheClient, Fields, ScriptWrite};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(Fields),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: u64,
}

/// How often, in clock time, a write sweeps out expired entries.
const SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep_at: u64,
}

impl Entries {
    fn sweep(&mut self, now: u64) -> usize {
        let before = self.map.len();
        self.map.retain(|_, e| e.expires_at > now);
        self.next_sweep_at = now + SWEEP_INTERVAL_MS;
        before - self.map.len()
    }

    /// Called on every write so keys that are never read again still go away.
    fn insert(&mut self, key: &str, entry: Entry, now: u64) {
        if now >= self.next_sweep_at {
            let removed = self.sweep(now);
            if removed > 0 {
                debug!(removed = removed, "Swept expired cache entries");
            }
        }
        self.map.insert(key.to_string(), entry);
    }
}

/// A [`CacheClient`] backed by a mutex-guarded map.
///
/// Every operation, including script evaluation, runs under one lock, which
/// makes `eval` atomic within the process. Suitable for single-instance
/// deployments and tests; it does not coordinate across processes.
///
/// Expired entries are dropped when read, and by a full sweep that runs on
/// write at most once per [`SWEEP_INTERVAL_MS`] of clock time.
pub struct MemoryCache {
    entries: Mutex<Entries>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create an empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cache whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            clock,
        }
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        entries.map.get(key).is_some_and(|e| e.expires_at > now)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        entries.map.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.lock().sweep(now)
    }

    /// Store a raw value, bypassing serialization. Useful for seeding legacy data.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        let now = self.clock.now_millis();
        self.entries.lock().insert(
            key,
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl.as_millis() as u64,
            },
            now,
        );
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        match entries.map.get(key) {
            Some(entry) if entry.expires_at <= now => {
                trace!(key = %key, "Evicting expired entry");
                entries.map.remove(key);
                Ok(None)
            }
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(Entry {
                value: Value::Hash(_),
                ..
            }) => {
                debug!(key = %key, "GET on a hash entry, treating as absent");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.insert_raw(key, value, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().map.remove(key);
        Ok(())
    }

    async fn eval(&self, script: &'static AtomicScript, key: &str, args: &[i64]) -> Result<Vec<i64>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        let mut fields = match entries.map.get(key) {
            Some(Entry {
                value: Value::Hash(fields),
                expires_at,
            }) if *expires_at > now => fields.clone(),
            _ => Fields::new(),
        };

        let outcome = script.apply(&mut fields, args);
        if let ScriptWrite::Store { ttl_millis } = outcome.write {
            entries.insert(
                key,
                Entry {
                    value: Value::Hash(fields),
                    expires_at: now + ttl_millis,
                },
                now,
            );
        }

        trace!(
            script = script.name(),
            key = %key,
            reply = ?outcome.reply,
            "Evaluated script in memory"
        );

        Ok(outcome.reply)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
