use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use steward_core::{HealthError, HealthStatus, ServerConfig, ServerHealth};

use super::factory::{ConnectionFactory, HealthListener};

/// Tuning knobs for periodic health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between periodic probes of each monitored server
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Budget for one connect or probe round trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Reconnect attempts scheduled per failure streak
    pub max_retries: u32,
    /// Base delay before the first reconnect; doubles per consecutive failure
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Partial config for live updates; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfigUpdate {
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

/// Periodically probes monitored servers through a [`ConnectionFactory`],
/// classifies the results, and drives reconnection with exponential backoff.
///
/// Probe latency under 80% of the timeout counts as healthy; anything slower
/// is degraded. A failed probe marks the server offline and schedules a
/// reconnect at `retry_delay * 2^(failures - 1)`, up to `max_retries`
/// attempts per failure streak. Registered listeners observe every probe
/// and reconnect outcome.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    factory: Arc<dyn ConnectionFactory>,
    config: RwLock<MonitorConfig>,
    entries: DashMap<String, MonitorEntry>,
    listeners: RwLock<HashMap<Uuid, Arc<dyn HealthListener>>>,
}

struct MonitorEntry {
    health: ServerHealth,
    config: ServerConfig,
    /// When monitoring began, basis for uptime
    started: Instant,
    probe_task: Option<JoinHandle<()>>,
    backoff_task: Option<JoinHandle<()>>,
}

impl MonitorEntry {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
        if let Some(task) = self.backoff_task.take() {
            task.abort();
        }
    }
}

impl HealthMonitor {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                factory,
                config: RwLock::new(config),
                entries: DashMap::new(),
                listeners: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Begin monitoring a server: probes immediately, then on every interval.
    /// Monitoring the same id again replaces the previous registration.
    pub fn start_monitoring(&self, config: ServerConfig) {
        let server_id = config.id.clone();
        let task = tokio::spawn(probe_loop(self.inner.clone(), server_id.clone()));
        let entry = MonitorEntry {
            health: ServerHealth::unprobed(&server_id),
            config,
            started: Instant::now(),
            probe_task: Some(task),
            backoff_task: None,
        };
        // One insert, handle already attached: concurrent registrations for
        // the same id can't cross handles, and the displaced registration
        // takes its loop down with it.
        if let Some(mut old) = self.inner.entries.insert(server_id.clone(), entry) {
            old.abort_tasks();
            debug!(server_id = %server_id, "[HealthMonitor] Replacing existing registration");
        }
        info!(server_id = %server_id, "[HealthMonitor] Monitoring started");
    }

    /// Stop monitoring and drop the health record. Cancels the probe loop
    /// and any pending reconnect.
    pub fn stop_monitoring(&self, server_id: &str) -> bool {
        match self.inner.entries.remove(server_id) {
            Some((_, mut entry)) => {
                entry.abort_tasks();
                info!(server_id = %server_id, "[HealthMonitor] Monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Tear down the connection and dial again right now, bypassing backoff.
    pub async fn manual_reconnect(&self, config: &ServerConfig) -> Result<ServerHealth, HealthError> {
        let server_id = config.id.clone();
        if !self.inner.entries.contains_key(&server_id) {
            return Err(HealthError::NotMonitored { server_id });
        }

        // Manual action supersedes any scheduled retry.
        if let Some(mut entry) = self.inner.entries.get_mut(&server_id) {
            if let Some(task) = entry.backoff_task.take() {
                task.abort();
            }
        }

        info!(server_id = %server_id, "[HealthMonitor] Manual reconnect requested");
        match try_reconnect(&self.inner, config).await {
            Ok(()) => {
                record_reconnected(&self.inner, &server_id);
                self.get_health(&server_id)
                    .ok_or(HealthError::NotMonitored { server_id })
            }
            Err(e) => {
                record_failure(&self.inner, &server_id, e.to_string(), false);
                Err(HealthError::Offline {
                    server_id,
                    source: e,
                })
            }
        }
    }

    pub fn get_health(&self, server_id: &str) -> Option<ServerHealth> {
        self.inner.entries.get(server_id).map(|e| e.health.clone())
    }

    pub fn get_all_health(&self) -> Vec<ServerHealth> {
        self.inner.entries.iter().map(|e| e.health.clone()).collect()
    }

    /// Register a listener for probe and reconnect outcomes. Returns a token
    /// for [`Self::remove_listener`].
    pub fn add_listener(&self, listener: Arc<dyn HealthListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.listeners.write().insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: Uuid) -> bool {
        self.inner.listeners.write().remove(&id).is_some()
    }

    /// Merge a partial config; running probe loops pick the new values up on
    /// their next cycle.
    pub fn update_config(&self, update: MonitorConfigUpdate) {
        let mut config = self.inner.config.write();
        if let Some(interval) = update.interval {
            config.interval = interval;
        }
        if let Some(timeout) = update.timeout {
            config.timeout = timeout;
        }
        if let Some(max_retries) = update.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retry_delay) = update.retry_delay {
            config.retry_delay = retry_delay;
        }
        debug!(
            interval = ?config.interval,
            timeout = ?config.timeout,
            max_retries = config.max_retries,
            retry_delay = ?config.retry_delay,
            "[HealthMonitor] Config updated"
        );
    }

    pub fn config(&self) -> MonitorConfig {
        self.inner.config.read().clone()
    }

    /// Stop every probe loop and drop all records and listeners.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, mut entry)) = self.inner.entries.remove(&id) {
                entry.abort_tasks();
            }
        }
        self.inner.listeners.write().clear();
        info!("[HealthMonitor] Shut down");
    }
}

async fn probe_loop(inner: Arc<MonitorInner>, server_id: String) {
    loop {
        probe_once(&inner, &server_id).await;
        let interval = inner.config.read().interval;
        sleep(interval).await;
        if !inner.entries.contains_key(&server_id) {
            return;
        }
    }
}

async fn probe_once(inner: &Arc<MonitorInner>, server_id: &str) {
    let Some(config) = inner.entries.get(server_id).map(|e| e.config.clone()) else {
        return;
    };
    let budget = inner.config.read().timeout;

    let outcome: anyhow::Result<Duration> = async {
        let connection = timeout(budget, inner.factory.connect(&config))
            .await
            .map_err(|_| probe_timeout(server_id, budget))??;
        let latency = timeout(budget, connection.probe())
            .await
            .map_err(|_| probe_timeout(server_id, budget))??;
        Ok(latency)
    }
    .await;

    match outcome {
        Ok(latency) => record_success(inner, server_id, latency),
        Err(e) => record_failure(inner, server_id, e.to_string(), true),
    }
}

fn probe_timeout(server_id: &str, budget: Duration) -> anyhow::Error {
    anyhow::Error::new(HealthError::ProbeTimeout {
        server_id: server_id.to_string(),
        timeout: budget,
    })
}

fn record_success(inner: &Arc<MonitorInner>, server_id: &str, latency: Duration) {
    let snapshot = {
        let Some(mut entry) = inner.entries.get_mut(server_id) else { return };
        let budget = inner.config.read().timeout;
        let degraded = latency >= budget.mul_f64(0.8);

        entry.health.status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        entry.health.response_time_ms = Some(latency.as_millis() as u64);
        entry.health.failure_count = 0;
        entry.health.last_error = None;
        entry.health.last_check_at = Utc::now();
        entry.health.uptime_secs = entry.started.elapsed().as_secs();

        // The server answered on its own; a pending retry is stale.
        if let Some(task) = entry.backoff_task.take() {
            task.abort();
        }
        entry.health.clone()
    };

    debug!(
        server_id = %server_id,
        status = %snapshot.status,
        response_time_ms = ?snapshot.response_time_ms,
        "[HealthMonitor] Probe succeeded"
    );
    notify_listeners(inner, &snapshot);
}

fn record_failure(inner: &Arc<MonitorInner>, server_id: &str, error: String, schedule_retry: bool) {
    let Some((snapshot, retry_in)) = ({
        inner.entries.get_mut(server_id).map(|mut entry| {
            entry.health.status = HealthStatus::Offline;
            entry.health.failure_count += 1;
            entry.health.response_time_ms = None;
            entry.health.last_error = Some(error.clone());
            entry.health.last_check_at = Utc::now();
            entry.health.uptime_secs = entry.started.elapsed().as_secs();

            let config = inner.config.read();
            let attempt = entry.health.failure_count;
            let retry_in = (schedule_retry && attempt <= config.max_retries)
                .then(|| config.retry_delay * 2u32.saturating_pow(attempt - 1));
            (entry.health.clone(), retry_in)
        })
    }) else {
        return;
    };

    warn!(
        server_id = %server_id,
        failures = snapshot.failure_count,
        error = %error,
        "[HealthMonitor] Probe failed"
    );

    match retry_in {
        Some(delay) => schedule_reconnect(inner, server_id, delay),
        None if schedule_retry => {
            debug!(
                server_id = %server_id,
                "[HealthMonitor] Retry budget exhausted, waiting for periodic probe"
            );
        }
        None => {}
    }

    notify_listeners(inner, &snapshot);
}

fn schedule_reconnect(inner: &Arc<MonitorInner>, server_id: &str, delay: Duration) {
    let task = tokio::spawn(reconnect_after(inner.clone(), server_id.to_string(), delay));
    match inner.entries.get_mut(server_id) {
        Some(mut entry) => {
            // Newest schedule wins; cancel any earlier pending retry.
            if let Some(old) = entry.backoff_task.replace(task) {
                old.abort();
            }
        }
        None => task.abort(),
    }
    debug!(server_id = %server_id, delay = ?delay, "[HealthMonitor] Reconnect scheduled");
}

async fn reconnect_after(inner: Arc<MonitorInner>, server_id: String, delay: Duration) {
    sleep(delay).await;
    let Some(config) = inner.entries.get(&server_id).map(|e| e.config.clone()) else {
        return;
    };
    info!(server_id = %server_id, "[HealthMonitor] Attempting reconnect");
    match try_reconnect(&inner, &config).await {
        Ok(()) => record_reconnected(&inner, &server_id),
        Err(e) => record_failure(&inner, &server_id, e.to_string(), true),
    }
}

async fn try_reconnect(inner: &Arc<MonitorInner>, config: &ServerConfig) -> anyhow::Result<()> {
    if let Err(e) = inner.factory.disconnect(&config.id).await {
        debug!(server_id = %config.id, error = %e, "[HealthMonitor] Disconnect before reconnect failed");
    }
    let budget = inner.config.read().timeout;
    timeout(budget, inner.factory.connect(config))
        .await
        .map_err(|_| probe_timeout(&config.id, budget))??;
    Ok(())
}

fn record_reconnected(inner: &Arc<MonitorInner>, server_id: &str) {
    let snapshot = {
        let Some(mut entry) = inner.entries.get_mut(server_id) else { return };
        entry.health.status = HealthStatus::Healthy;
        entry.health.failure_count = 0;
        entry.health.last_error = None;
        entry.health.last_check_at = Utc::now();
        entry.health.uptime_secs = entry.started.elapsed().as_secs();
        entry.health.clone()
    };

    info!(server_id = %server_id, "[HealthMonitor] Reconnected");
    notify_listeners(inner, &snapshot);
}

fn notify_listeners(inner: &Arc<MonitorInner>, health: &ServerHealth) {
    let listeners: Vec<Arc<dyn HealthListener>> =
        inner.listeners.read().values().cloned().collect();
    for listener in listeners {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            listener.on_health_changed(health);
        }));
        if result.is_err() {
            warn!(server_id = %health.server_id, "[HealthMonitor] Health listener panicked");
        }
    }
}
