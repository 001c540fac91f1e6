use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Tuning knobs for connection pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots per server; acquire waits once all are active
    pub max_connections_per_server: usize,
    /// Idle connections older than this are swept
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
    /// Connections are retired at this age even if recently used
    #[serde(with = "humantime_serde")]
    pub max_connection_age: Duration,
    /// How often the sweeper scans for expired connections
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How long acquire waits on an exhausted pool before giving up
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: 10,
            max_idle_time: Duration::from_secs(60),
            max_connection_age: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// View of a pooled connection handed out by acquire. The slot stays marked
/// active until the caller releases or removes it by id.
#[derive(Debug, Clone)]
pub struct PooledConnection {
    pub id: Uuid,
    pub server_id: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
    pub active: bool,
}

/// Aggregate slot counts, per server or pool-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
}
