use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use steward_core::{EndpointConfig, ProcessError, ProcessSnapshot, ProcessState, ServerConfig};

use super::output::OutputRing;

/// Tuning knobs for subprocess supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessManagerConfig {
    /// How often the liveness tick polls each child
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// How long a graceful stop waits before escalating to a hard kill
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Settle time between the stop and start halves of a restart
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,
    /// Restarts allowed per server until the budget is reset
    pub max_restarts: u32,
    /// Characters of combined stdout/stderr retained per server
    pub output_capacity: usize,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            max_restarts: 3,
            output_capacity: 5000,
        }
    }
}

/// Supervises stdio server subprocesses: spawn, liveness polling, graceful
/// stop, and budgeted restarts.
///
/// Every child is spawned with piped stdout/stderr; reader tasks feed a
/// bounded [`OutputRing`] so recent output is available for diagnostics.
/// A per-child liveness task notices unexpected exits and folds them into
/// the tracked state.
pub struct ProcessManager {
    config: ProcessManagerConfig,
    processes: DashMap<String, Arc<Mutex<ProcessEntry>>>,
}

struct ProcessEntry {
    server_id: String,
    config: ServerConfig,
    state: ProcessState,
    pid: Option<u32>,
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    /// Monotonic spawn instant, basis for uptime
    started: Option<Instant>,
    uptime_secs: u64,
    restart_count: u32,
    last_error: Option<String>,
    output: Arc<Mutex<OutputRing>>,
    monitor_task: Option<JoinHandle<()>>,
    reader_tasks: Vec<JoinHandle<()>>,
}

impl ProcessEntry {
    fn snapshot(&self) -> ProcessSnapshot {
        let uptime_secs = match (self.state, self.started) {
            (ProcessState::Running, Some(started)) => Some(started.elapsed().as_secs()),
            _ => self.started_at.is_some().then_some(self.uptime_secs),
        };
        ProcessSnapshot {
            server_id: self.server_id.clone(),
            pid: self.pid,
            state: self.state,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            restart_count: self.restart_count,
            uptime_secs,
            last_error: self.last_error.clone(),
        }
    }
}

impl ProcessManager {
    pub fn new(config: ProcessManagerConfig) -> Self {
        Self {
            config,
            processes: DashMap::new(),
        }
    }

    /// Spawn the subprocess described by `config`, or return the existing
    /// snapshot if one is already running under the same id.
    ///
    /// Only stdio endpoints can be spawned; HTTP servers are remote and
    /// rejected with [`ProcessError::UnsupportedEndpoint`].
    pub async fn start_server(&self, config: &ServerConfig) -> Result<ProcessSnapshot, ProcessError> {
        match self.processes.entry(config.id.clone()) {
            Entry::Occupied(mut occupied) => {
                {
                    let entry = occupied.get().lock();
                    if entry.state == ProcessState::Running {
                        debug!(server_id = %config.id, pid = ?entry.pid, "[ProcessManager] Already running, reusing process");
                        return Ok(entry.snapshot());
                    }
                }
                // Stale terminal record: replace it with a fresh spawn
                let fresh = self.spawn_entry(config)?;
                let snapshot = fresh.lock().snapshot();
                occupied.insert(fresh);
                Ok(snapshot)
            }
            Entry::Vacant(vacant) => {
                let fresh = self.spawn_entry(config)?;
                let snapshot = fresh.lock().snapshot();
                vacant.insert(fresh);
                Ok(snapshot)
            }
        }
    }

    /// Stop a tracked subprocess and drop its record.
    ///
    /// Graceful stops send SIGTERM and wait up to the configured grace
    /// period before killing; `force` skips straight to the kill.
    pub async fn stop_server(&self, server_id: &str, force: bool) -> Result<(), ProcessError> {
        let entry = self
            .processes
            .get(server_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ProcessError::NotFound {
                server_id: server_id.to_string(),
            })?;

        info!(server_id = %server_id, force, "[ProcessManager] Stopping server");
        self.terminate(&entry, force, ProcessState::Stopped).await;
        // Drop only the record we terminated; a concurrent start may have
        // replaced it while we waited for the exit.
        self.processes
            .remove_if(server_id, |_, current| Arc::ptr_eq(current, &entry));
        Ok(())
    }

    /// Stop and respawn a server, consuming one restart from its budget.
    ///
    /// When `config` is omitted the configuration remembered from the last
    /// start is reused. Fails with [`ProcessError::RestartLimitExceeded`]
    /// once the budget is used up, until [`Self::reset_restart_count`].
    pub async fn restart_server(
        &self,
        server_id: &str,
        config: Option<&ServerConfig>,
    ) -> Result<ProcessSnapshot, ProcessError> {
        let existing = self.processes.get(server_id).map(|r| r.value().clone());

        let (used, remembered) = match &existing {
            Some(entry) => {
                let guard = entry.lock();
                (guard.restart_count, Some(guard.config.clone()))
            }
            None => (0, None),
        };

        let attempt = used + 1;
        if attempt > self.config.max_restarts {
            warn!(
                server_id = %server_id,
                used,
                limit = self.config.max_restarts,
                "[ProcessManager] Restart limit reached"
            );
            return Err(ProcessError::RestartLimitExceeded {
                server_id: server_id.to_string(),
                count: used,
                limit: self.config.max_restarts,
            });
        }

        let config = match config.cloned().or(remembered) {
            Some(config) => config,
            None => {
                return Err(ProcessError::NotFound {
                    server_id: server_id.to_string(),
                })
            }
        };

        info!(server_id = %server_id, attempt, "[ProcessManager] Restarting server");

        if let Some(entry) = &existing {
            self.terminate(entry, false, ProcessState::Restarting).await;
        }

        // Let the OS release the old pid and pipes before respawning.
        sleep(self.config.restart_delay).await;

        let snapshot = match self.start_server(&config).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // The respawn never happened; the old record must not sit in
                // `restarting`. Surface the failure on it instead.
                if let Some(entry) = self.processes.get(server_id).map(|r| r.value().clone()) {
                    let mut guard = entry.lock();
                    if guard.state == ProcessState::Restarting {
                        guard.state = ProcessState::Error;
                        guard.last_error = Some(e.to_string());
                    }
                }
                return Err(e);
            }
        };

        // start_server built a fresh record; carry the restart budget over.
        if let Some(entry) = self.processes.get(&config.id).map(|r| r.value().clone()) {
            let mut guard = entry.lock();
            guard.restart_count = attempt;
            return Ok(guard.snapshot());
        }
        Ok(snapshot)
    }

    /// Force-stop every tracked subprocess. Used on shutdown.
    pub async fn cleanup_all(&self) {
        let ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "[ProcessManager] Stopping all managed processes");
        let stops = ids.iter().map(|id| self.stop_server(id, true));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                debug!(error = %e, "[ProcessManager] Cleanup stop failed");
            }
        }
    }

    pub fn get_process_state(&self, server_id: &str) -> Option<ProcessSnapshot> {
        self.processes
            .get(server_id)
            .map(|entry| entry.value().lock().snapshot())
    }

    pub fn get_all_processes(&self) -> Vec<ProcessSnapshot> {
        self.processes
            .iter()
            .map(|entry| entry.value().lock().snapshot())
            .collect()
    }

    /// Recent combined stdout/stderr for a tracked server.
    pub fn get_output(&self, server_id: &str) -> Option<String> {
        self.processes.get(server_id).map(|entry| {
            let guard = entry.value().lock();
            let output = guard.output.lock().contents().to_string();
            output
        })
    }

    /// Hand a server a fresh restart budget after an operator intervention.
    pub fn reset_restart_count(&self, server_id: &str) -> bool {
        match self.processes.get(server_id) {
            Some(entry) => {
                entry.value().lock().restart_count = 0;
                debug!(server_id = %server_id, "[ProcessManager] Restart budget reset");
                true
            }
            None => false,
        }
    }

    fn spawn_entry(&self, config: &ServerConfig) -> Result<Arc<Mutex<ProcessEntry>>, ProcessError> {
        let EndpointConfig::Stdio { command, args, env, cwd } = &config.endpoint else {
            return Err(ProcessError::UnsupportedEndpoint {
                server_id: config.id.clone(),
                kind: config.endpoint.kind(),
            });
        };
        let server_id = config.id.clone();

        // Resolve against PATH up front for a clear error instead of a raw ENOENT.
        let resolved = which::which(command)
            .or_else(|_| which::which(format!("{command}.exe")))
            .map_err(|_| ProcessError::Spawn {
                server_id: server_id.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("command not found: {command}. Ensure it's installed and in PATH"),
                ),
            })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            server_id: server_id.clone(),
            source: e,
        })?;
        let pid = child.id();

        let output = Arc::new(Mutex::new(OutputRing::new(self.config.output_capacity)));
        let mut reader_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            reader_tasks.push(spawn_output_reader(server_id.clone(), "stdout", stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            reader_tasks.push(spawn_output_reader(server_id.clone(), "stderr", stderr, output.clone()));
        }

        info!(server_id = %server_id, pid = ?pid, command = %command, "[ProcessManager] Spawned server process");

        let entry = Arc::new(Mutex::new(ProcessEntry {
            server_id: server_id.clone(),
            config: config.clone(),
            state: ProcessState::Running,
            pid,
            child: Some(child),
            started_at: Some(Utc::now()),
            stopped_at: None,
            started: Some(Instant::now()),
            uptime_secs: 0,
            restart_count: 0,
            last_error: None,
            output,
            monitor_task: None,
            reader_tasks,
        }));

        let monitor = self.spawn_monitor(server_id, Arc::downgrade(&entry));
        entry.lock().monitor_task = Some(monitor);
        Ok(entry)
    }

    /// Kill the child and finalize the record without removing it from the
    /// map; the caller decides whether the record survives (restart) or is
    /// dropped (stop).
    async fn terminate(&self, entry: &Arc<Mutex<ProcessEntry>>, force: bool, final_state: ProcessState) {
        let (child, pid, monitor, readers, server_id) = {
            let mut guard = entry.lock();
            guard.state = if final_state == ProcessState::Restarting {
                ProcessState::Restarting
            } else {
                ProcessState::Stopping
            };
            (
                guard.child.take(),
                guard.pid,
                guard.monitor_task.take(),
                std::mem::take(&mut guard.reader_tasks),
                guard.server_id.clone(),
            )
        };

        if let Some(task) = monitor {
            task.abort();
        }

        let was_live = child.is_some();
        if let Some(mut child) = child {
            if force {
                let _ = child.start_kill();
            } else {
                send_term(&mut child, pid);
            }

            match timeout(self.config.grace_period, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server_id = %server_id, %status, "[ProcessManager] Process exited");
                }
                Ok(Err(e)) => {
                    warn!(server_id = %server_id, error = %e, "[ProcessManager] Failed waiting for process exit");
                }
                Err(_) => {
                    warn!(
                        server_id = %server_id,
                        grace = ?self.config.grace_period,
                        "[ProcessManager] Grace period elapsed, killing process"
                    );
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        // Readers hit EOF once the child is gone; reap them promptly.
        for task in readers {
            task.abort();
        }

        let mut guard = entry.lock();
        // A child that already exited keeps the uptime its exit recorded.
        if was_live {
            guard.uptime_secs = guard
                .started
                .map(|s| s.elapsed().as_secs())
                .unwrap_or(guard.uptime_secs);
            guard.stopped_at = Some(Utc::now());
        }
        guard.state = final_state;
        guard.pid = None;
    }

    /// Periodic liveness poll. Notices children that exited on their own and
    /// records a clean stop or an error, then ends itself.
    fn spawn_monitor(&self, server_id: String, entry: Weak<Mutex<ProcessEntry>>) -> JoinHandle<()> {
        let period = self.config.monitor_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the child just spawned.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entry) = entry.upgrade() else { return };
                let mut guard = entry.lock();
                if guard.state != ProcessState::Running {
                    return;
                }
                let Some(child) = guard.child.as_mut() else { return };
                match child.try_wait() {
                    Ok(None) => {
                        guard.uptime_secs = guard
                            .started
                            .map(|s| s.elapsed().as_secs())
                            .unwrap_or(guard.uptime_secs);
                        trace!(server_id = %server_id, uptime_secs = guard.uptime_secs, "[ProcessManager] Liveness tick");
                    }
                    Ok(Some(status)) => {
                        guard.child = None;
                        guard.stopped_at = Some(Utc::now());
                        guard.uptime_secs = guard
                            .started
                            .map(|s| s.elapsed().as_secs())
                            .unwrap_or(guard.uptime_secs);
                        if status.success() {
                            guard.state = ProcessState::Stopped;
                            info!(server_id = %server_id, "[ProcessManager] Process exited cleanly");
                        } else {
                            guard.state = ProcessState::Error;
                            guard.last_error = Some(format!("process exited unexpectedly: {status}"));
                            warn!(server_id = %server_id, %status, "[ProcessManager] Process exited unexpectedly");
                        }
                        return;
                    }
                    Err(e) => {
                        warn!(server_id = %server_id, error = %e, "[ProcessManager] Failed to poll process status");
                    }
                }
            }
        })
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(ProcessManagerConfig::default())
    }
}

fn spawn_output_reader<R>(
    server_id: String,
    stream: &'static str,
    reader: R,
    output: Arc<Mutex<OutputRing>>,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(server_id = %server_id, "[{}] {}", stream, line);
                    output.lock().push_line(&line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(server_id = %server_id, error = %e, "[ProcessManager] Output reader ended");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn send_term(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match pid {
        Some(pid) => {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_term(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}
