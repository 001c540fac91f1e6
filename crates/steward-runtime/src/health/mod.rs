//! Health monitoring with automatic reconnection
//!
//! - `factory` - connection seams the monitor probes through
//! - `monitor` - periodic probing, exponential backoff, listener fan-out

mod factory;
mod monitor;

pub use factory::{Connection, ConnectionFactory, HealthListener};
pub use monitor::{HealthMonitor, MonitorConfig, MonitorConfigUpdate};
