use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use steward_core::RateLimitError;

/// Algorithm used to account requests against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Tokens refill continuously, pro rata to elapsed time
    #[default]
    TokenBucket,
    /// Every request timestamp is kept; only those inside the window count
    SlidingWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(default)]
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            strategy: RateLimitStrategy::TokenBucket,
        }
    }
}

/// Outcome of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the window after this decision
    pub remaining: u32,
    /// How long until a denied request would be allowed
    pub retry_after: Option<Duration>,
}

/// Read-only usage report for one key.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitUsage {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window fully resets
    pub resets_in: Duration,
}

/// Per-key request throttling over a shared window configuration.
///
/// Keys are created lazily on first check. Token buckets start full and
/// refill pro rata to elapsed time; the refill timestamp only advances when
/// at least one whole token accrues, so fractional progress is never lost.
pub struct RateLimiter {
    config: RateLimiterConfig,
    keys: DashMap<String, KeyState>,
}

enum KeyState {
    Bucket { tokens: u32, last_refill: Instant },
    Window { hits: VecDeque<Instant> },
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            keys: DashMap::new(),
        }
    }

    /// Record one request against `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| self.fresh_state(now));

        let decision = match state.value_mut() {
            KeyState::Bucket { tokens, last_refill } => self.check_bucket(now, tokens, last_refill),
            KeyState::Window { hits } => self.check_window(now, hits),
        };

        if !decision.allowed {
            debug!(key, retry_after = ?decision.retry_after, "[RateLimiter] Request denied");
        }
        decision
    }

    /// Like [`Self::check`] but folds denial into the error taxonomy.
    pub fn enforce(&self, key: &str) -> Result<(), RateLimitError> {
        let decision = self.check(key);
        if decision.allowed {
            Ok(())
        } else {
            Err(RateLimitError::Exceeded {
                key: key.to_string(),
                retry_after: decision.retry_after.unwrap_or_default(),
            })
        }
    }

    /// Current usage for `key` without consuming anything.
    pub fn get_usage(&self, key: &str) -> RateLimitUsage {
        let max = self.config.max_requests;
        let now = Instant::now();
        let Some(state) = self.keys.get(key) else {
            return RateLimitUsage {
                used: 0,
                limit: max,
                remaining: max,
                resets_in: Duration::ZERO,
            };
        };

        match state.value() {
            KeyState::Bucket { tokens, last_refill } => {
                let refill = self.accrued_tokens(now, *last_refill);
                let available = (*tokens + refill).min(max);
                RateLimitUsage {
                    used: max - available,
                    limit: max,
                    remaining: available,
                    resets_in: if available == max {
                        Duration::ZERO
                    } else {
                        (*last_refill + self.config.window).duration_since(now)
                    },
                }
            }
            KeyState::Window { hits } => {
                let in_window = match now.checked_sub(self.config.window) {
                    Some(cutoff) => hits.iter().filter(|t| **t >= cutoff).count() as u32,
                    None => hits.len() as u32,
                };
                RateLimitUsage {
                    used: in_window,
                    limit: max,
                    remaining: max.saturating_sub(in_window),
                    resets_in: hits
                        .front()
                        .map(|oldest| (*oldest + self.config.window).duration_since(now))
                        .unwrap_or(Duration::ZERO),
                }
            }
        }
    }

    /// Forget all state for `key`; its next check starts a fresh window.
    pub fn reset(&self, key: &str) -> bool {
        self.keys.remove(key).is_some()
    }

    pub fn reset_all(&self) {
        self.keys.clear();
    }

    /// Drop key state that no longer affects decisions: full buckets quiet
    /// for a whole window, and window keys with no in-window hits. Returns
    /// how many keys were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let max = self.config.max_requests;
        let window = self.config.window;
        let before = self.keys.len();

        self.keys.retain(|_, state| match state {
            KeyState::Bucket { tokens, last_refill } => {
                let refill = self.accrued_tokens(now, *last_refill);
                let available = (*tokens + refill).min(max);
                available < max || now.duration_since(*last_refill) < window
            }
            KeyState::Window { hits } => {
                if let Some(cutoff) = now.checked_sub(window) {
                    while hits.front().is_some_and(|t| *t < cutoff) {
                        hits.pop_front();
                    }
                }
                !hits.is_empty()
            }
        });

        let removed = before.saturating_sub(self.keys.len());
        if removed > 0 {
            debug!(removed, "[RateLimiter] Dropped idle keys");
        }
        removed
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn fresh_state(&self, now: Instant) -> KeyState {
        match self.config.strategy {
            RateLimitStrategy::TokenBucket => KeyState::Bucket {
                tokens: self.config.max_requests,
                last_refill: now,
            },
            RateLimitStrategy::SlidingWindow => KeyState::Window { hits: VecDeque::new() },
        }
    }

    /// Whole tokens accrued since `last_refill`, capped at the bucket size.
    fn accrued_tokens(&self, now: Instant, last_refill: Instant) -> u32 {
        let max = self.config.max_requests as u128;
        let window_ms = self.config.window.as_millis().max(1);
        let elapsed_ms = now.duration_since(last_refill).as_millis();
        (elapsed_ms.saturating_mul(max) / window_ms).min(max) as u32
    }

    fn check_bucket(&self, now: Instant, tokens: &mut u32, last_refill: &mut Instant) -> RateLimitDecision {
        let max = self.config.max_requests;
        let refill = self.accrued_tokens(now, *last_refill);
        if refill > 0 {
            *tokens = (*tokens + refill).min(max);
            *last_refill = now;
        }

        if *tokens > 0 {
            *tokens -= 1;
            RateLimitDecision {
                allowed: true,
                remaining: *tokens,
                retry_after: None,
            }
        } else {
            let per_token = self.config.window / max.max(1);
            let since_refill = now.duration_since(*last_refill);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(per_token.saturating_sub(since_refill)),
            }
        }
    }

    fn check_window(&self, now: Instant, hits: &mut VecDeque<Instant>) -> RateLimitDecision {
        let max = self.config.max_requests;
        let window = self.config.window;

        if let Some(cutoff) = now.checked_sub(window) {
            while hits.front().is_some_and(|t| *t < cutoff) {
                hits.pop_front();
            }
        }

        if (hits.len() as u32) < max {
            hits.push_back(now);
            RateLimitDecision {
                allowed: true,
                remaining: max - hits.len() as u32,
                retry_after: None,
            }
        } else {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + window).duration_since(now))
                .unwrap_or(window);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(retry_after),
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
