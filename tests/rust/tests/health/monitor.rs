//! Probe scheduling, failure classification, and reconnect backoff.

use std::time::Duration;

use pretty_assertions::assert_eq;
use steward_core::{HealthError, HealthStatus, ServerConfig};
use steward_runtime::{HealthMonitor, MonitorConfigUpdate};
use tests::{settle, ConnectScript, MockFactory};
use tokio::time::{advance, Instant};

use super::{quiet_config, ticking_config};

fn server(id: &str) -> ServerConfig {
    ServerConfig::http(id, format!("http://localhost:9000/{id}"))
}

// ============================================================================
// Probe outcomes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_probe_runs_immediately() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;

    assert_eq!(factory.connect_count(), 1);
    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.response_time_ms, Some(10));
    assert_eq!(health.failure_count, 0);
    assert_eq!(health.uptime_secs, 0);
    assert!(health.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_is_degraded_not_offline() {
    // Budget is 5s; anything at or past 80% of it counts as degraded.
    let factory = MockFactory::healthy(Duration::from_millis(4500));
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.response_time_ms, Some(4500));
    assert_eq!(health.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_probes_repeat_on_the_interval() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);

    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hung_connect_times_out_and_goes_offline() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    factory.push_script([ConnectScript::Hang]);
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;

    // The probe is still stuck inside its 5s budget.
    advance(Duration::from_secs(5)).await;
    settle().await;

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Offline);
    assert_eq!(health.failure_count, 1);
    assert!(health.response_time_ms.is_none());
    assert!(health.last_error.as_deref().unwrap().contains("timed out"));

    // First reconnect fires one retry_delay later and succeeds.
    advance(Duration::from_secs(1)).await;
    settle().await;

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.failure_count, 0);
    assert_eq!(factory.connect_count(), 2);
    assert_eq!(factory.disconnect_count(), 1);
}

// ============================================================================
// Reconnect backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_probes_back_off_exponentially() {
    let factory = MockFactory::failing("connection refused");
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());
    let start = Instant::now();

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    // Retry 1 at +1s.
    advance(Duration::from_millis(999)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 1);
    advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);

    // Retry 2 doubles to +2s after the previous failure.
    advance(Duration::from_millis(1999)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);
    advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 3);

    // Retry 3 doubles again to +4s.
    advance(Duration::from_millis(3999)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 3);
    advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 4);

    let offsets: Vec<Duration> = factory
        .connect_times()
        .iter()
        .map(|t| *t - start)
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(7),
        ]
    );

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Offline);
    assert_eq!(health.failure_count, 4);
    assert!(health.last_error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausts_after_max_retries() {
    let factory = MockFactory::failing("connection refused");
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;

    // Initial probe plus retries at +1s, +3s, +7s; nothing after that until
    // the next periodic probe (600s away). Sleeping lets the paused clock
    // auto-advance through each backoff deadline; a single `advance` jump
    // would strand timers scheduled mid-jump.
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;

    assert_eq!(factory.connect_count(), 4);
    assert_eq!(monitor.get_health("docs").unwrap().failure_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_the_failure_streak() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    factory.push_script([ConnectScript::Fail { error: "boom".into() }]);
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(monitor.get_health("docs").unwrap().failure_count, 1);

    // The scheduled reconnect succeeds and clears the streak.
    advance(Duration::from_secs(1)).await;
    settle().await;

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.failure_count, 0);
    assert!(health.last_error.is_none());

    // The periodic loop is still alive and probes again at the interval.
    advance(Duration::from_secs(599)).await;
    settle().await;

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.response_time_ms, Some(10));
    assert_eq!(factory.connect_count(), 3);
}

// ============================================================================
// Manual reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_succeeds_and_cancels_pending_retry() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    factory.push_script([ConnectScript::Fail { error: "refused".into() }]);
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());
    let config = server("docs");

    monitor.start_monitoring(config.clone());
    settle().await;
    assert_eq!(monitor.get_health("docs").unwrap().failure_count, 1);

    let health = monitor.manual_reconnect(&config).await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.failure_count, 0);

    // The retry that was due at +1s was cancelled by the manual action.
    advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);
    assert_eq!(factory.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_failure_stays_offline() {
    let factory = MockFactory::failing("nope");
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());
    let config = server("docs");

    monitor.start_monitoring(config.clone());
    settle().await;

    let err = monitor.manual_reconnect(&config).await.unwrap_err();
    assert!(matches!(err, HealthError::Offline { .. }));
    assert!(err.to_string().contains("nope"));

    let health = monitor.get_health("docs").unwrap();
    assert_eq!(health.status, HealthStatus::Offline);
    assert_eq!(health.failure_count, 2);

    // A failed manual attempt does not schedule retries of its own.
    advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_requires_monitoring() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    let err = monitor.manual_reconnect(&server("ghost")).await.unwrap_err();
    assert!(matches!(err, HealthError::NotMonitored { .. }));
    assert_eq!(factory.connect_count(), 0);
}

// ============================================================================
// Registration lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_monitoring_cancels_probes_and_retries() {
    let factory = MockFactory::failing("refused");
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    assert!(monitor.stop_monitoring("docs"));
    assert!(monitor.get_health("docs").is_none());

    // Neither the pending retry nor the periodic loop fires afterwards.
    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    assert!(!monitor.stop_monitoring("docs"));
}

#[tokio::test(start_paused = true)]
async fn test_restarting_monitoring_replaces_the_registration() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    advance(Duration::from_secs(10)).await;
    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 2);
    assert_eq!(monitor.get_health("docs").unwrap().uptime_secs, 0);

    // Only the new loop's schedule survives: a single probe 30s after the
    // re-registration, none from the old loop.
    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_registration_keeps_one_probe_loop() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    // Re-register without yielding in between; only the second loop may
    // survive, with its handle owned by the surviving record.
    monitor.start_monitoring(server("docs"));
    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);

    // Stopping cancels that loop; nothing keeps probing behind our back.
    assert!(monitor.stop_monitoring("docs"));
    advance(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_all_health_covers_every_server() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), quiet_config());

    monitor.start_monitoring(server("docs"));
    monitor.start_monitoring(server("search"));
    settle().await;

    let mut ids: Vec<String> = monitor
        .get_all_health()
        .into_iter()
        .map(|h| h.server_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["docs".to_string(), "search".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_uptime_tracks_monitoring_duration() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(monitor.get_health("docs").unwrap().uptime_secs, 0);

    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(monitor.get_health("docs").unwrap().uptime_secs, 30);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_all_monitoring() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    monitor.start_monitoring(server("docs"));
    monitor.start_monitoring(server("search"));
    settle().await;
    assert_eq!(factory.connect_count(), 2);

    monitor.shutdown();
    assert!(monitor.get_all_health().is_empty());

    advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);
}

// ============================================================================
// Config updates
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_config_update_applies_on_the_next_cycle() {
    let factory = MockFactory::healthy(Duration::from_millis(10));
    let monitor = HealthMonitor::new(factory.as_factory(), ticking_config());

    monitor.start_monitoring(server("docs"));
    settle().await;
    assert_eq!(factory.connect_count(), 1);

    monitor.update_config(MonitorConfigUpdate {
        interval: Some(Duration::from_secs(5)),
        ..Default::default()
    });
    assert_eq!(monitor.config().interval, Duration::from_secs(5));
    assert_eq!(monitor.config().max_retries, 3);

    // The sleep armed before the update still runs its full 30s; the next
    // cycle picks up the 5s interval.
    advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 2);

    advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(factory.connect_count(), 3);
}
