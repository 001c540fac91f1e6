use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use steward_core::PoolError;

use super::connection::{PoolConfig, PoolStats, PooledConnection};

/// Bookkeeping pool of reusable connection slots, grouped per server.
///
/// Acquire prefers an idle slot with a matching target, then a free slot,
/// then evicts the least recently used idle slot for another target. When
/// every slot is active it parks on a per-server [`Notify`] until a release
/// or removal opens one up, failing with [`PoolError::Timeout`] past the
/// configured deadline. A background sweeper retires idle and aged slots.
pub struct ConnectionPool {
    config: PoolConfig,
    pools: Arc<DashMap<String, ServerPool>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct ServerPool {
    connections: Vec<ConnEntry>,
    released: Arc<Notify>,
}

struct ConnEntry {
    id: Uuid,
    target: String,
    headers: HashMap<String, String>,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    active: bool,
}

impl ConnEntry {
    fn new(target: &str, headers: &HashMap<String, String>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            target: target.to_string(),
            headers: headers.clone(),
            created_at: now,
            last_used_at: now,
            use_count: 1,
            active: true,
        }
    }

    fn snapshot(&self, server_id: &str) -> PooledConnection {
        PooledConnection {
            id: self.id,
            server_id: server_id.to_string(),
            target: self.target.clone(),
            headers: self.headers.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            use_count: self.use_count,
            active: self.active,
        }
    }
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: Arc::new(DashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the background sweeper. No-op if it is already running.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let pools = self.pools.clone();
        let config = self.config.clone();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep(&pools, &config);
            }
        }));
        info!(interval = ?self.config.sweep_interval, "[ConnectionPool] Sweeper started");
    }

    /// Claim a connection slot for `server_id`, creating one if the pool has
    /// room. Waits up to `acquire_timeout` when every slot is active.
    pub async fn acquire(
        &self,
        server_id: &str,
        target: &str,
        headers: &HashMap<String, String>,
    ) -> Result<PooledConnection, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let released;
            let mut notified = {
                let mut pool = self.pools.entry(server_id.to_string()).or_default();
                let sp = pool.value_mut();

                // Prefer an idle slot already pointing at the same target.
                if let Some(entry) = sp
                    .connections
                    .iter_mut()
                    .find(|c| !c.active && c.target == target)
                {
                    entry.active = true;
                    entry.last_used_at = Instant::now();
                    entry.use_count += 1;
                    debug!(server_id, connection_id = %entry.id, "[ConnectionPool] Reusing idle connection");
                    return Ok(entry.snapshot(server_id));
                }

                if sp.connections.len() < self.config.max_connections_per_server {
                    let entry = ConnEntry::new(target, headers);
                    let snapshot = entry.snapshot(server_id);
                    debug!(
                        server_id,
                        connection_id = %entry.id,
                        total = sp.connections.len() + 1,
                        "[ConnectionPool] Created connection"
                    );
                    sp.connections.push(entry);
                    return Ok(snapshot);
                }

                // Full. Retire the least recently used idle slot (its target
                // differs, or the reuse branch would have taken it).
                if let Some(idx) = sp
                    .connections
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.active)
                    .min_by_key(|(_, c)| c.last_used_at)
                    .map(|(idx, _)| idx)
                {
                    let evicted = sp.connections.swap_remove(idx);
                    debug!(
                        server_id,
                        connection_id = %evicted.id,
                        "[ConnectionPool] Evicted idle connection to make room"
                    );
                    let entry = ConnEntry::new(target, headers);
                    let snapshot = entry.snapshot(server_id);
                    sp.connections.push(entry);
                    return Ok(snapshot);
                }

                // Every slot is active. notify_waiters only reaches futures
                // that are already registered, so enable the wakeup before
                // the pool unlocks.
                released = sp.released.clone();
                let mut notified = Box::pin(released.notified());
                notified.as_mut().enable();
                notified
            };

            debug!(server_id, "[ConnectionPool] Pool exhausted, waiting for a release");
            if timeout_at(deadline, notified.as_mut()).await.is_err() {
                return Err(PoolError::Timeout {
                    server_id: server_id.to_string(),
                    waited: self.config.acquire_timeout,
                });
            }
        }
    }

    /// Return a connection to the pool, leaving it idle and reusable.
    /// Unknown ids are ignored.
    pub fn release(&self, connection_id: Uuid) {
        for mut pool in self.pools.iter_mut() {
            let sp = pool.value_mut();
            if let Some(entry) = sp.connections.iter_mut().find(|c| c.id == connection_id) {
                entry.active = false;
                entry.last_used_at = Instant::now();
                sp.released.notify_one();
                debug!(connection_id = %connection_id, "[ConnectionPool] Connection released");
                return;
            }
        }
        debug!(connection_id = %connection_id, "[ConnectionPool] Release of unknown connection ignored");
    }

    /// Drop a connection from the pool entirely, active or not.
    pub fn remove(&self, connection_id: Uuid) -> bool {
        for mut pool in self.pools.iter_mut() {
            let sp = pool.value_mut();
            if let Some(idx) = sp.connections.iter().position(|c| c.id == connection_id) {
                sp.connections.swap_remove(idx);
                // A slot opened up for anyone waiting.
                sp.released.notify_one();
                debug!(connection_id = %connection_id, "[ConnectionPool] Connection removed");
                return true;
            }
        }
        false
    }

    /// Drop every connection pooled for one server.
    pub fn clear_server(&self, server_id: &str) -> usize {
        match self.pools.remove(server_id) {
            Some((_, pool)) => {
                let dropped = pool.connections.len();
                // Wake waiters so they retry against the now-empty pool.
                pool.released.notify_waiters();
                info!(server_id, dropped, "[ConnectionPool] Cleared server pool");
                dropped
            }
            None => 0,
        }
    }

    /// Drop every pooled connection for every server.
    pub fn clear_all(&self) -> usize {
        let server_ids: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        let mut dropped = 0;
        for server_id in server_ids {
            dropped += self.clear_server(&server_id);
        }
        dropped
    }

    /// Slot counts for one server, or across the whole pool.
    pub fn get_stats(&self, server_id: Option<&str>) -> PoolStats {
        let mut stats = PoolStats::default();
        match server_id {
            Some(id) => {
                if let Some(pool) = self.pools.get(id) {
                    accumulate(&mut stats, &pool.connections);
                }
            }
            None => {
                for pool in self.pools.iter() {
                    accumulate(&mut stats, &pool.connections);
                }
            }
        }
        stats
    }

    /// Stop the sweeper and drop all pools. Safe to call more than once.
    pub fn destroy(&self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        let dropped = self.clear_all();
        info!(dropped, "[ConnectionPool] Destroyed");
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

fn accumulate(stats: &mut PoolStats, connections: &[ConnEntry]) {
    for entry in connections {
        stats.total += 1;
        if entry.active {
            stats.active += 1;
        } else {
            stats.idle += 1;
        }
    }
}

/// Retire idle slots past `max_idle_time` or `max_connection_age`.
/// Active slots are never swept.
fn sweep(pools: &DashMap<String, ServerPool>, config: &PoolConfig) {
    let now = Instant::now();
    let mut evicted = 0usize;
    for mut pool in pools.iter_mut() {
        let sp = pool.value_mut();
        let before = sp.connections.len();
        sp.connections.retain(|c| {
            if c.active {
                return true;
            }
            let idle_expired = now.duration_since(c.last_used_at) > config.max_idle_time;
            let age_expired = now.duration_since(c.created_at) > config.max_connection_age;
            !(idle_expired || age_expired)
        });
        let dropped = before - sp.connections.len();
        if dropped > 0 {
            evicted += dropped;
            sp.released.notify_waiters();
        }
    }
    if evicted > 0 {
        debug!(evicted, "[ConnectionPool] Swept expired connections");
    }
    pools.retain(|_, sp| !sp.connections.is_empty());
}
