//! Shared test utilities and fixtures for Steward integration tests.

use std::time::Duration;

use steward_core::ServerConfig;
use steward_runtime::ProcessManagerConfig;

pub use mocks::{ConnectScript, MockFactory, PanickingListener, RecordingListener};

/// Stdio config running a short shell script, portable across platforms.
pub fn shell_server(id: &str, script: &str) -> ServerConfig {
    #[cfg(windows)]
    {
        ServerConfig::stdio(id, "cmd").with_args(["/C", script])
    }
    #[cfg(not(windows))]
    {
        ServerConfig::stdio(id, "sh").with_args(["-c", script])
    }
}

/// A server that stays up until it is killed.
pub fn sleeping_server(id: &str) -> ServerConfig {
    #[cfg(windows)]
    {
        shell_server(id, "ping -n 31 127.0.0.1 > NUL")
    }
    #[cfg(not(windows))]
    {
        shell_server(id, "sleep 30")
    }
}

/// Process manager config tightened so lifecycle tests finish quickly.
pub fn fast_process_config() -> ProcessManagerConfig {
    ProcessManagerConfig {
        monitor_interval: Duration::from_millis(50),
        grace_period: Duration::from_secs(2),
        restart_delay: Duration::from_millis(20),
        max_restarts: 3,
        output_capacity: 5000,
    }
}

/// Let spawned tasks run without moving the (paused) clock.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Install a compact subscriber once; handy when debugging a failing test
/// with `RUST_LOG=steward_runtime=debug`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
