use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use steward_core::QueueError;

use super::limiter::RateLimiter;

/// Pause between retries when a denial carries no hint.
const DRAIN_RETRY_FALLBACK: Duration = Duration::from_millis(50);

/// FIFO task queue gated by a [`RateLimiter`].
///
/// Tasks run strictly in enqueue order. When the head task's key is
/// throttled the whole queue pauses for the limiter's `retry_after`, so a
/// hot key holds back later tasks on other keys. The drain task starts with
/// the first enqueue and ends itself when the queue empties.
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    limiter: Arc<RateLimiter>,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueuedItem>,
    draining: bool,
    drain_task: Option<JoinHandle<()>>,
}

struct QueuedItem {
    key: String,
    run: BoxFuture<'static, ()>,
}

impl RateLimitedQueue {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                limiter,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// Queue a task behind `key`'s rate limit.
    ///
    /// The task is registered immediately; the returned future resolves with
    /// its output once it has run, or with [`QueueError::Cleared`] if the
    /// queue is cleared first.
    pub fn enqueue<T, F>(
        &self,
        key: impl Into<String>,
        task: F,
    ) -> impl Future<Output = Result<T, QueueError>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run = async move {
            // The waiter may have given up; discard the output then.
            let _ = tx.send(task.await);
        }
        .boxed();

        {
            let mut state = self.inner.state.lock();
            state.items.push_back(QueuedItem { key: key.into(), run });
            if !state.draining {
                state.draining = true;
                state.drain_task = Some(tokio::spawn(drain(self.inner.clone())));
            }
        }

        async move { rx.await.map_err(|_| QueueError::Cleared) }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Drop every queued task; their completion futures resolve with
    /// [`QueueError::Cleared`]. Tasks already handed to the runtime finish.
    pub fn clear(&self) {
        let (dropped, drain_task) = {
            let mut state = self.inner.state.lock();
            let dropped = state.items.len();
            state.items.clear();
            state.draining = false;
            (dropped, state.drain_task.take())
        };
        if let Some(task) = drain_task {
            task.abort();
        }
        if dropped > 0 {
            debug!(dropped, "[RateLimitedQueue] Queue cleared");
        }
    }
}

/// Runs queued tasks in order, pausing whenever the head task's key is
/// denied. Ends itself once the queue is empty.
async fn drain(inner: Arc<QueueInner>) {
    loop {
        let key = {
            let mut state = inner.state.lock();
            match state.items.front() {
                Some(item) => item.key.clone(),
                None => {
                    state.draining = false;
                    state.drain_task = None;
                    return;
                }
            }
        };

        let decision = inner.limiter.check(&key);
        if decision.allowed {
            let item = inner.state.lock().items.pop_front();
            // Emptied by a concurrent clear; the consumed token is forfeit.
            if let Some(item) = item {
                tokio::spawn(item.run);
            }
        } else {
            let pause = decision.retry_after.unwrap_or(DRAIN_RETRY_FALLBACK);
            debug!(key = %key, pause = ?pause, "[RateLimitedQueue] Head task throttled");
            sleep(pause).await;
        }
    }
}
