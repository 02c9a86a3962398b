//! Sliding-window throttling with an escalating cooldown ladder.
//!
//! Each allowed attempt moves the key one rung up the ladder, so the next
//! attempt must wait longer. A key left idle for `idle_reset` starts over at
//! the bottom; `reset` clears it immediately (e.g. after a successful login).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::key::LimiterKey;
use crate::cache::{AtomicScript, CacheClient, Fields, ScriptOutcome, ScriptWrite};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, WardenError};

/// Default cooldown ladder in seconds.
pub const DEFAULT_TIMEOUTS_SECS: [u64; 9] = [1, 2, 4, 8, 16, 30, 60, 180, 300];
/// Default idle period after which a key starts over.
pub const DEFAULT_IDLE_RESET_SECS: u64 = 600;

/// Cooldown ladder and idle reset of a throttler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    timeouts: Vec<Duration>,
    idle_reset: Duration,
}

impl ThrottleConfig {
    pub fn new(timeouts: Vec<Duration>, idle_reset: Duration) -> Result<Self> {
        let Some(longest) = timeouts.iter().max() else {
            return Err(WardenError::Config(
                "throttle needs at least one timeout".to_string(),
            ));
        };
        if idle_reset <= *longest {
            return Err(WardenError::Config(format!(
                "throttle idle reset ({}s) must exceed the longest timeout ({}s)",
                idle_reset.as_secs(),
                longest.as_secs()
            )));
        }
        Ok(Self {
            timeouts,
            idle_reset,
        })
    }

    pub fn from_secs(timeouts: &[u64], idle_reset_secs: u64) -> Result<Self> {
        Self::new(
            timeouts.iter().map(|s| Duration::from_secs(*s)).collect(),
            Duration::from_secs(idle_reset_secs),
        )
    }

    pub fn timeouts(&self) -> &[Duration] {
        &self.timeouts
    }

    pub fn idle_reset(&self) -> Duration {
        self.idle_reset
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            timeouts: DEFAULT_TIMEOUTS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            idle_reset: Duration::from_secs(DEFAULT_IDLE_RESET_SECS),
        }
    }
}

const THROTTLE_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local idle_reset = tonumber(ARGV[2])
local last = #ARGV - 3

local index = nil
local updated_at = nil
local fields = redis.call("HGETALL", key)
for i = 1, #fields, 2 do
    if fields[i] == "index" then
        index = tonumber(fields[i + 1])
    elseif fields[i] == "updated_at" then
        updated_at = tonumber(fields[i + 1])
    end
end

if index == nil or updated_at == nil or now - updated_at >= idle_reset then
    redis.call("HSET", key, "index", 0, "updated_at", now)
    redis.call("PEXPIRE", key, idle_reset)
    return {1, 0}
end

index = math.min(index, last)
if now - updated_at < tonumber(ARGV[3 + index]) then
    return {0, index}
end

index = math.min(index + 1, last)
redis.call("HSET", key, "index", index, "updated_at", now)
redis.call("PEXPIRE", key, idle_reset)
return {1, index}
"#;

fn throttle_native(fields: &mut Fields, args: &[i64]) -> ScriptOutcome {
    let now = args[0];
    let idle_reset = args[1];
    let timeouts = &args[2..];
    let last = timeouts.len().saturating_sub(1) as i64;

    let store = |fields: &mut Fields, index: i64| {
        fields.insert("index".to_string(), index);
        fields.insert("updated_at".to_string(), now);
        ScriptOutcome {
            reply: vec![1, index],
            write: ScriptWrite::Store {
                ttl_millis: idle_reset.max(1) as u64,
            },
        }
    };

    let existing = match (fields.get("index"), fields.get("updated_at")) {
        (Some(&index), Some(&updated_at)) => Some((index, updated_at)),
        _ => None,
    };
    let (index, updated_at) = match existing {
        Some((index, updated_at)) if now - updated_at < idle_reset => (index, updated_at),
        _ => return store(fields, 0),
    };

    let index = index.clamp(0, last);
    if now - updated_at < timeouts[index as usize] {
        return ScriptOutcome {
            reply: vec![0, index],
            write: ScriptWrite::Keep,
        };
    }

    store(fields, (index + 1).min(last))
}

/// Atomic throttle check. Args: `[now_ms, idle_reset_ms, timeout_ms...]`; reply: `[allowed, index]`.
pub(crate) static THROTTLE_SCRIPT: AtomicScript =
    AtomicScript::new("throttle", THROTTLE_LUA, throttle_native);

/// Escalating-cooldown limiter backed by the shared cache.
pub struct Throttler {
    name: String,
    prefix: String,
    config: ThrottleConfig,
    cache: Arc<dyn CacheClient>,
    clock: Arc<dyn Clock>,
}

impl Throttler {
    pub fn new(name: &str, prefix: &str, config: ThrottleConfig, cache: Arc<dyn CacheClient>) -> Self {
        Self::with_clock(name, prefix, config, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &str,
        prefix: &str,
        config: ThrottleConfig,
        cache: Arc<dyn CacheClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            config,
            cache,
            clock,
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        LimiterKey::new(&self.prefix, &self.name, key).to_storage_key()
    }

    fn script_args(&self) -> Vec<i64> {
        let mut args = Vec::with_capacity(self.config.timeouts.len() + 2);
        args.push(self.clock.now_millis() as i64);
        args.push(self.config.idle_reset.as_millis() as i64);
        args.extend(self.config.timeouts.iter().map(|t| t.as_millis() as i64));
        args
    }
}

#[async_trait]
impl RateLimiterBackend for Throttler {
    /// Each call counts as a single attempt; `cost` is ignored.
    async fn consume(&self, key: &str, _cost: u32) -> Result<bool> {
        let storage_key = self.storage_key(key);
        let reply = self
            .cache
            .eval(&THROTTLE_SCRIPT, &storage_key, &self.script_args())
            .await?;
        let allowed = reply.first().copied().unwrap_or(0) == 1;

        trace!(
            limiter = %self.name,
            key = %storage_key,
            step = ?reply.get(1),
            allowed = allowed,
            "Throttle consume"
        );
        if !allowed {
            debug!(limiter = %self.name, key = %key, "Throttled");
        }

        Ok(allowed)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.cache.del(&self.storage_key(key)).await
    }

    fn strategy(&self) -> &'static str {
        "throttle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;

    fn throttler(config: ThrottleConfig) -> (Throttler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let throttler = Throttler::with_clock("login", "ratelimit", config, cache, clock.clone());
        (throttler, clock)
    }

    #[test]
    fn test_config_validation() {
        assert!(ThrottleConfig::from_secs(&[], 10).is_err());
        assert!(ThrottleConfig::from_secs(&[1, 5], 5).is_err());
        assert!(ThrottleConfig::from_secs(&[1, 5], 6).is_ok());
        assert_eq!(ThrottleConfig::default().timeouts().len(), 9);
    }

    #[tokio::test]
    async fn test_rapid_second_attempt_is_denied() {
        let (throttler, _) = throttler(ThrottleConfig::default());

        assert!(throttler.consume("user", 1).await.unwrap());
        assert!(!throttler.consume("user", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_lifts_lockout() {
        let (throttler, _) = throttler(ThrottleConfig::default());

        assert!(throttler.consume("user", 1).await.unwrap());
        assert!(!throttler.consume("user", 1).await.unwrap());

        throttler.reset("user").await.unwrap();
        assert!(throttler.consume("user", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_cooldown_escalates() {
        let (throttler, clock) = throttler(ThrottleConfig::from_secs(&[1, 2, 4], 60).unwrap());

        assert!(throttler.consume("k", 1).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        // now on the 2s rung
        clock.advance(Duration::from_secs(1));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        // top rung (4s) is sticky
        clock.advance(Duration::from_secs(3));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(4));
        assert!(throttler.consume("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_denied_attempt_does_not_extend_cooldown() {
        let (throttler, clock) = throttler(ThrottleConfig::from_secs(&[2, 4], 60).unwrap());

        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_millis(1_500));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_millis(500));
        assert!(throttler.consume("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_key_starts_over() {
        let (throttler, clock) = throttler(ThrottleConfig::from_secs(&[1, 30], 60).unwrap());

        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(throttler.consume("k", 1).await.unwrap());
        // back on the 1s rung
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());
    }

    async fn redis_throttler(config: ThrottleConfig) -> (Throttler, Arc<ManualClock>) {
        use crate::cache::RedisCache;

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let cache: Arc<dyn CacheClient> = Arc::new(RedisCache::connect(&url).await.unwrap());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let prefix = format!("warden-test-{}", crate::crypto::random_token(6));
        let throttler = Throttler::with_clock("login", &prefix, config, cache, clock.clone());
        (throttler, clock)
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_cooldown_escalates() {
        let (throttler, clock) = redis_throttler(ThrottleConfig::from_secs(&[1, 2, 4], 60).unwrap()).await;

        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        clock.advance(Duration::from_secs(3));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(4));
        assert!(throttler.consume("k", 1).await.unwrap());

        throttler.reset("k").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_denied_attempt_does_not_extend_cooldown() {
        let (throttler, clock) = redis_throttler(ThrottleConfig::from_secs(&[2, 4], 60).unwrap()).await;

        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_millis(1_500));
        assert!(!throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_millis(500));
        assert!(throttler.consume("k", 1).await.unwrap());

        throttler.reset("k").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_idle_key_starts_over() {
        let (throttler, clock) = redis_throttler(ThrottleConfig::from_secs(&[1, 30], 60).unwrap()).await;

        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        // the record is still in Redis; the script restarts it from the clock
        clock.advance(Duration::from_secs(60));
        assert!(throttler.consume("k", 1).await.unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(throttler.consume("k", 1).await.unwrap());

        throttler.reset("k").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_reset_lifts_lockout() {
        let (throttler, _) = redis_throttler(ThrottleConfig::default()).await;

        assert!(throttler.consume("user", 1).await.unwrap());
        assert!(!throttler.consume("user", 1).await.unwrap());

        throttler.reset("user").await.unwrap();
        assert!(throttler.consume("user", 1).await.unwrap());
        throttler.reset("user").await.unwrap();
    }

    #[test]
    fn test_native_script_keeps_record_on_deny() {
        let mut fields = Fields::new();
        let args = [1_000, 60_000, 1_000, 2_000];

        let outcome = throttle_native(&mut fields, &args);
        assert_eq!(outcome.reply, vec![1, 0]);

        let outcome = throttle_native(&mut fields, &[1_500, 60_000, 1_000, 2_000]);
        assert_eq!(outcome.reply, vec![0, 0]);
        assert_eq!(outcome.write, ScriptWrite::Keep);
        assert_eq!(fields.get("updated_at"), Some(&1_000));
    }
}
