//! Error taxonomy shared by the runtime services.
//!
//! Each service has its own enum so callers can match on the failures they
//! can actually handle; everything converts into `anyhow::Error` at the edges.

use std::time::Duration;
use thiserror::Error;

use crate::domain::EndpointKind;

/// Failures from subprocess lifecycle operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS refused to create the process (missing executable, bad cwd, ...).
    #[error("failed to spawn process for '{server_id}': {source}")]
    Spawn {
        server_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no tracked process for '{server_id}'")]
    NotFound { server_id: String },

    #[error("cannot spawn '{server_id}': {kind} servers are not subprocesses")]
    UnsupportedEndpoint {
        server_id: String,
        kind: EndpointKind,
    },

    #[error("restart limit reached for '{server_id}' ({count}/{limit} restarts used)")]
    RestartLimitExceeded {
        server_id: String,
        count: u32,
        limit: u32,
    },
}

/// Failures from health probing and reconnection.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe for '{server_id}' timed out after {timeout:?}")]
    ProbeTimeout { server_id: String, timeout: Duration },

    #[error("connection to '{server_id}' is offline: {source}")]
    Offline {
        server_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("'{server_id}' is not monitored")]
    NotMonitored { server_id: String },
}

/// Failures from connection pool acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for a '{server_id}' connection")]
    Timeout { server_id: String, waited: Duration },
}

/// Failures from rate limit enforcement.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for '{key}', retry in {retry_after:?}")]
    Exceeded { key: String, retry_after: Duration },
}

/// Failures surfaced to tasks waiting in a rate-limited queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue was cleared before the task ran")]
    Cleared,
}
