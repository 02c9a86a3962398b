//! Rate limit rules configuration.
//!
//! Limiters are declared by name. Each entry picks a strategy and its
//! parameters:
//!
//! ```yaml
//! key_prefix: ratelimit
//! limiters:
//!   login:
//!     strategy: throttle
//!     timeouts_secs: [1, 2, 4, 8, 16, 30, 60, 180, 300]
//!     idle_reset_secs: 600
//!   api:
//!     strategy: token_bucket
//!     max: 100
//!     refill_interval_secs: 1
//!     store: shared
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::bucket::TokenBucketConfig;
use super::key::LimiterKey;
use super::throttle::{ThrottleConfig, DEFAULT_IDLE_RESET_SECS, DEFAULT_TIMEOUTS_SECS};
use crate::error::{Result, WardenError};

/// A complete set of named limiter rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitRules {
    /// Prefix for every limiter record in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Map of limiter name to its rule
    #[serde(default)]
    pub limiters: HashMap<String, LimiterRule>,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            limiters: HashMap::new(),
        }
    }
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

/// Where a token bucket keeps its state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStore {
    /// Shared cache; correct across instances
    #[default]
    Shared,
    /// Process memory; single instance or local pre-filter only
    Memory,
}

/// A single limiter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LimiterRule {
    TokenBucket {
        max: u32,
        refill_interval_secs: u64,
        #[serde(default)]
        store: BucketStore,
    },
    Throttle {
        #[serde(default = "default_timeouts")]
        timeouts_secs: Vec<u64>,
        #[serde(default = "default_idle_reset")]
        idle_reset_secs: u64,
    },
}

fn default_timeouts() -> Vec<u64> {
    DEFAULT_TIMEOUTS_SECS.to_vec()
}

fn default_idle_reset() -> u64 {
    DEFAULT_IDLE_RESET_SECS
}

impl LimiterRule {
    /// Check the rule's parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterRule::TokenBucket {
                max,
                refill_interval_secs,
                ..
            } => TokenBucketConfig::new(*max, Duration::from_secs(*refill_interval_secs)).map(|_| ()),
            LimiterRule::Throttle {
                timeouts_secs,
                idle_reset_secs,
            } => ThrottleConfig::from_secs(timeouts_secs, *idle_reset_secs).map(|_| ()),
        }
    }
}

impl RateLimitRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Validate every limiter, naming the first bad one.
    pub fn validate(&self) -> Result<()> {
        for (name, rule) in &self.limiters {
            LimiterKey::check_limiter_name(name)?;
            rule.validate().map_err(|e| {
                WardenError::Config(format!("limiter '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Add rules from `other`, replacing limiters with the same name.
    pub fn merge(&mut self, other: RateLimitRules) {
        self.limiters.extend(other.limiters);
    }

    pub fn get(&self, name: &str) -> Option<&LimiterRule> {
        self.limiters.get(name)
    }
}
