//! # Steward Core
//!
//! Domain types and error taxonomy for the Steward runtime services.
//!
//! ## Modules
//!
//! - `domain` - Core entities (ServerConfig, ProcessSnapshot, ServerHealth)
//! - `error` - Per-service error enums (ProcessError, HealthError, ...)

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{HealthError, PoolError, ProcessError, QueueError, RateLimitError};
