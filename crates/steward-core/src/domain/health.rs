use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse health classification derived from probe latency and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probes succeed well inside the configured timeout
    Healthy,
    /// Probes succeed but take 80% of the timeout or longer
    Degraded,
    /// The last probe or reconnect attempt failed
    Offline,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Offline => "offline",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health record kept per monitored server, refreshed on every probe and
/// reconnect outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHealth {
    pub server_id: String,
    pub status: HealthStatus,
    pub last_check_at: DateTime<Utc>,
    /// Seconds since monitoring started for this server
    pub uptime_secs: u64,
    /// Latency of the most recent successful probe
    pub response_time_ms: Option<u64>,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl ServerHealth {
    /// Initial record for a server that has not been probed yet.
    pub fn unprobed(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            status: HealthStatus::Offline,
            last_check_at: Utc::now(),
            uptime_secs: 0,
            response_time_ms: None,
            failure_count: 0,
            last_error: None,
        }
    }
}
