//! Rate limiting strategies and state management.

mod backend;
mod bucket;
mod key;
mod limiter;
mod memory;
mod throttle;
mod token_bucket;
pub mod rules;

pub use backend::RateLimiterBackend;
pub use bucket::{Bucket, TokenBucketConfig};
pub use key::LimiterKey;
pub use limiter::RateLimiters;
pub use memory::{MemoryBucketStore, TokenBucketMemory};
pub use rules::{BucketStore, LimiterRule, RateLimitRules};
pub use throttle::{ThrottleConfig, Throttler};
pub use token_bucket::TokenBucketShared;
