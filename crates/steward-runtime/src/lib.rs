//! # Steward Runtime
//!
//! Resilience services for long-running managed servers.
//!
//! ## Modules
//!
//! - `process` - subprocess lifecycle: spawn, stop, budgeted restarts, liveness polling
//! - `health` - periodic probing with exponential-backoff reconnection
//! - `pool` - per-server connection slots with idle/age sweeping
//! - `rate_limit` - token bucket / sliding window throttling and rate-limited queueing
//!
//! Each service is an independent instance; construct what you need, share
//! it behind an `Arc`, and tear it down explicitly (`cleanup_all`,
//! `shutdown`, `destroy`) when the host shuts down.

pub mod health;
pub mod pool;
pub mod process;
pub mod rate_limit;

pub use health::{
    Connection, ConnectionFactory, HealthListener, HealthMonitor, MonitorConfig,
    MonitorConfigUpdate,
};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use process::{OutputRing, ProcessManager, ProcessManagerConfig};
pub use rate_limit::{
    RateLimitDecision, RateLimitStrategy, RateLimitUsage, RateLimitedQueue, RateLimiter,
    RateLimiterConfig, RateLimiterRegistry,
};
