use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A single abort-capable token threaded through `chat`, retry, the rate
/// limiter, provider HTTP calls, agent runs and tool runs. Cloning shares
/// the same underlying flag — cancelling any clone cancels all of them.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Builds a composite token that cancels as soon as either `self` or
    /// `timeout` elapses (spec §4.8 step 4: `caller OR timer`). The
    /// background watcher task exits once either side fires.
    pub fn with_timeout(&self, timeout: Duration) -> CancelToken {
        let composite = CancelToken::new();
        let parent = self.clone();
        let child = composite.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => {}
                () = tokio::time::sleep(timeout) => {}
            }
            child.cancel();
        });
        composite
    }

    /// Builds a child token that cancels whenever `self` does, but can
    /// also be cancelled independently — used by `race` (spec §4.8) to
    /// abort the non-winning candidates without touching the caller's
    /// own token.
    pub fn child(&self) -> CancelToken {
        let composite = CancelToken::new();
        let parent = self.clone();
        let child = composite.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child.cancel();
        });
        composite
    }
}

/// Canonical cancellation error, raised at the nearest suspension point
/// when a token is aborted mid-wait.
#[derive(Debug, thiserror::Error)]
#[error("operation aborted")]
pub struct Aborted;

/// Sleeps for `dur`, returning early with [`Aborted`] if `cancel` fires first.
pub async fn sleep_cancellable(dur: Duration, cancel: &CancelToken) -> Result<(), Aborted> {
    if cancel.is_cancelled() {
        return Err(Aborted);
    }
    tokio::select! {
        () = tokio::time::sleep(dur) => Ok(()),
        () = cancel.cancelled() => Err(Aborted),
    }
}
