//! Connection pool integration tests
//!
//! Acquire/release semantics and sweeper expiry, all on the paused tokio
//! clock so idle and age deadlines can be crossed exactly.

use std::collections::HashMap;
use std::time::Duration;

use steward_runtime::PoolConfig;


/// Two slots per server so exhaustion is easy to arrange.
pub fn small_pool_config() -> PoolConfig {
    PoolConfig {
        max_connections_per_server: 2,
        max_idle_time: Duration::from_secs(60),
        max_connection_age: Duration::from_secs(300),
        sweep_interval: Duration::from_secs(1),
        acquire_timeout: Duration::from_secs(5),
    }
}

pub fn no_headers() -> HashMap<String, String> {
    HashMap::new()
}
