//! Per-key request throttling
//!
//! - `limiter` - token bucket and sliding window accounting
//! - `queue` - FIFO task queue that respects a limiter
//! - `registry` - named limiters shared across subsystems

mod limiter;
mod queue;
mod registry;

pub use limiter::{RateLimitDecision, RateLimitStrategy, RateLimitUsage, RateLimiter, RateLimiterConfig};
pub use queue::RateLimitedQueue;
pub use registry::RateLimiterRegistry;
