use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::limiter::{RateLimiter, RateLimiterConfig};

/// Named rate limiters shared across subsystems.
///
/// The first `get_or_create` for a name decides its config; later calls
/// reuse the existing limiter and their config is ignored.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str, config: RateLimiterConfig) -> Arc<RateLimiter> {
        let entry = self.limiters.entry(name.to_string()).or_insert_with(|| {
            debug!(name, "[RateLimiterRegistry] Created limiter");
            Arc::new(RateLimiter::new(config))
        });
        Arc::clone(&entry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.limiters.remove(name).is_some()
    }

    /// Run [`RateLimiter::cleanup`] on every limiter, then drop limiters
    /// left with no keys. Returns how many keys were dropped overall.
    pub fn cleanup(&self) -> usize {
        let mut dropped_keys = 0;
        for limiter in self.limiters.iter() {
            dropped_keys += limiter.cleanup();
        }
        self.limiters.retain(|_, limiter| limiter.key_count() > 0);
        dropped_keys
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
