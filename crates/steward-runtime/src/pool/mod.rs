//! Connection pooling with idle and age-based eviction
//!
//! - `connection` - pooled connection views and pool configuration
//! - `manager` - per-server slot pools with backpressure and sweeping

mod connection;
mod manager;

pub use connection::{PoolConfig, PoolStats, PooledConnection};
pub use manager::ConnectionPool;
