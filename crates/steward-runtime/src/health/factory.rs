use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use steward_core::{ServerConfig, ServerHealth};

/// Opens and tears down connections on behalf of the health monitor.
///
/// The monitor never talks to a transport directly; implementations decide
/// what "connect" means for their endpoint (spawn-and-handshake for stdio,
/// an HTTP session for remote servers, a stub in tests).
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> anyhow::Result<Arc<dyn Connection>>;

    async fn disconnect(&self, server_id: &str) -> anyhow::Result<()>;
}

/// A live connection that can answer a lightweight liveness probe.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Round-trip a liveness request and report how long it took.
    async fn probe(&self) -> anyhow::Result<Duration>;
}

/// Callback invoked after every probe and reconnect outcome.
///
/// Listeners run on the monitor's probe task; panics are caught and logged
/// so one broken listener cannot poison the others.
pub trait HealthListener: Send + Sync {
    fn on_health_changed(&self, health: &ServerHealth);
}

impl<F> HealthListener for F
where
    F: Fn(&ServerHealth) + Send + Sync,
{
    fn on_health_changed(&self, health: &ServerHealth) {
        self(health)
    }
}
