//! Token bucket state and the refill/charge algorithm.
//!
//! The same arithmetic backs the in-process strategy, the native evaluator of
//! the shared strategy's script, and (transliterated) its Lua source.

use std::time::Duration;

use crate::cache::{AtomicScript, Fields, ScriptOutcome, ScriptWrite};
use crate::error::{Result, WardenError};

/// Shortest store TTL handed to a bucket record.
const MIN_BUCKET_TTL_MS: i64 = 1000;

/// Capacity and refill rate of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum tokens the bucket holds
    pub max: u32,
    /// Time to regain one token
    pub refill_interval: Duration,
}

impl TokenBucketConfig {
    pub fn new(max: u32, refill_interval: Duration) -> Result<Self> {
        if max == 0 {
            return Err(WardenError::Config(
                "token bucket max must be greater than zero".to_string(),
            ));
        }
        if refill_interval.as_millis() == 0 {
            return Err(WardenError::Config(
                "token bucket refill interval must be at least 1ms".to_string(),
            ));
        }
        Ok(Self {
            max,
            refill_interval,
        })
    }

    pub(crate) fn interval_millis(&self) -> u64 {
        self.refill_interval.as_millis() as u64
    }
}

/// Remaining tokens and the time of the last refill computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub count: i64,
    /// Epoch milliseconds
    pub refilled_at: u64,
}

impl Bucket {
    /// Bucket created by the first `consume` on a key.
    ///
    /// The first touch is always allowed, even when `cost > max`; the count is
    /// clamped at zero so it never leaves `[0, max]`.
    pub fn first_touch(max: u32, cost: u32, now: u64) -> Self {
        Self {
            count: (i64::from(max) - i64::from(cost)).max(0),
            refilled_at: now,
        }
    }

    /// Add whole refills elapsed since `refilled_at`, capped at `max`.
    pub fn refill(&mut self, max: u32, interval_millis: u64, now: u64) {
        let elapsed = now.saturating_sub(self.refilled_at);
        let refills = (elapsed / interval_millis.max(1)) as i64;
        self.count = (self.count.saturating_add(refills)).min(i64::from(max));
        self.refilled_at = self.refilled_at.max(now);
    }

    /// Charge `cost` tokens if available.
    pub fn try_charge(&mut self, cost: u32) -> bool {
        if self.count < i64::from(cost) {
            return false;
        }
        self.count -= i64::from(cost);
        true
    }

    /// Refill then charge. Returns whether the consumption is allowed.
    pub fn consume(&mut self, config: &TokenBucketConfig, cost: u32, now: u64) -> bool {
        self.refill(config.max, config.interval_millis(), now);
        self.try_charge(cost)
    }

    /// How long the store should keep the record: until it would be full again.
    pub fn ttl_millis(&self, max: u32, interval_millis: u64) -> u64 {
        let missing = (i64::from(max) - self.count).max(0);
        (missing.saturating_mul(interval_millis as i64)).max(MIN_BUCKET_TTL_MS) as u64
    }
}

const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local max = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local count = nil
local refilled_at = nil
local fields = redis.call("HGETALL", key)
for i = 1, #fields, 2 do
    if fields[i] == "count" then
        count = tonumber(fields[i + 1])
    elseif fields[i] == "refilled_at" then
        refilled_at = tonumber(fields[i + 1])
    end
end

local allowed = 1
if count == nil or refilled_at == nil then
    count = math.max(max - cost, 0)
    refilled_at = now
else
    local refills = math.floor(math.max(now - refilled_at, 0) / interval)
    count = math.min(count + refills, max)
    refilled_at = math.max(refilled_at, now)
    if count < cost then
        allowed = 0
    else
        count = count - cost
    end
end

redis.call("HSET", key, "count", count, "refilled_at", refilled_at)
redis.call("PEXPIRE", key, math.max((max - count) * interval, 1000))
return {allowed, count}
"#;

fn token_bucket_native(fields: &mut Fields, args: &[i64]) -> ScriptOutcome {
    let max = args[0].max(0) as u32;
    let interval = args[1].max(1) as u64;
    let cost = args[2].max(0) as u32;
    let now = args[3].max(0) as u64;

    let existing = match (fields.get("count"), fields.get("refilled_at")) {
        (Some(&count), Some(&refilled_at)) => Some(Bucket {
            count,
            refilled_at: refilled_at.max(0) as u64,
        }),
        _ => None,
    };

    let (bucket, allowed) = match existing {
        None => (Bucket::first_touch(max, cost, now), true),
        Some(mut bucket) => {
            bucket.refill(max, interval, now);
            let allowed = bucket.try_charge(cost);
            (bucket, allowed)
        }
    };

    fields.insert("count".to_string(), bucket.count);
    fields.insert("refilled_at".to_string(), bucket.refilled_at as i64);

    ScriptOutcome {
        reply: vec![i64::from(allowed), bucket.count],
        write: ScriptWrite::Store {
            ttl_millis: bucket.ttl_millis(max, interval),
        },
    }
}

/// Atomic refill-and-charge. Args: `[max, interval_ms, cost, now_ms]`; reply: `[allowed, count]`.
pub(crate) static TOKEN_BUCKET_SCRIPT: AtomicScript =
    AtomicScript::new("token_bucket", TOKEN_BUCKET_LUA, token_bucket_native);
