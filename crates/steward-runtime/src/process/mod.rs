//! Subprocess lifecycle management
//!
//! - `manager` - spawn/stop/restart with liveness polling and restart budgets
//! - `output` - bounded capture of child stdout/stderr

mod manager;
mod output;

pub use manager::{ProcessManager, ProcessManagerConfig};
pub use output::OutputRing;
