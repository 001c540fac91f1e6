//! Domain entities and value objects
//!
//! Shared vocabulary for the runtime services:
//! - Server descriptions (ServerConfig, EndpointConfig)
//! - Process lifecycle (ProcessState, ProcessSnapshot)
//! - Health classification (HealthStatus, ServerHealth)

mod health;
mod process;
mod server;

pub use health::*;
pub use process::*;
pub use server::*;
