use crate::cancel::{Aborted, CancelToken, sleep_cancellable};
use feather_core::DispatchError;
use std::future::Future;
use std::time::{Duration, Instant};

/// Jitter strategy applied to the backoff wait (spec §4.1 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    Full,
}

/// Error classification a retryable failure must expose: whether a numeric
/// status code was attached, and a server-supplied `retry-after` hint.
pub trait Retryable {
    fn status(&self) -> Option<u16>;
    fn retry_after_secs(&self) -> Option<u64>;
}

impl Retryable for DispatchError {
    fn status(&self) -> Option<u16> {
        DispatchError::status(self)
    }

    fn retry_after_secs(&self) -> Option<u64> {
        DispatchError::retry_after_secs(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub attempt: u32,
    pub wait_ms: u64,
}

pub struct RetryOpts<E> {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter: Jitter,
    pub max_total_ms: Option<u64>,
    /// Returns `true` if a failure carrying this status should be retried.
    /// Default: 408, 429, 500-599 (`feather_core::errors::default_status_retry`).
    pub status_retry: Box<dyn Fn(u16) -> bool + Send + Sync>,
    pub on_retry: Option<Box<dyn Fn(&RetryEvent) + Send + Sync>>,
    pub cancel: CancelToken,
    _marker: std::marker::PhantomData<E>,
}

impl<E> Default for RetryOpts<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_ms: 250,
            max_ms: 3000,
            jitter: Jitter::Full,
            max_total_ms: None,
            status_retry: Box::new(feather_core::errors::default_status_retry),
            on_retry: None,
            cancel: CancelToken::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error(transparent)]
    Operation(E),
    #[error("operation aborted")]
    Aborted,
}

impl<E> From<Aborted> for RetryError<E> {
    fn from(_: Aborted) -> Self {
        RetryError::Aborted
    }
}

/// Retries `f` up to `opts.max_attempts` times with exponential backoff,
/// jitter and server-hint honoring (spec §4.1). `f` receives the 0-based
/// attempt index and is called at least once.
pub async fn retry<F, Fut, T, E>(f: F, opts: RetryOpts<E>) -> Result<T, RetryError<E>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let start = Instant::now();
    let mut last_err: Option<E> = None;

    for attempt in 0..opts.max_attempts {
        if opts.cancel.is_cancelled() {
            return Err(RetryError::Aborted);
        }
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt + 1 == opts.max_attempts;
                if is_last {
                    return Err(RetryError::Operation(err));
                }

                if let Some(status) = err.status()
                    && !(opts.status_retry)(status)
                {
                    return Err(RetryError::Operation(err));
                }

                let a = attempt + 1;
                let base_wait = ((opts.base_ms as f64) * 2f64.powi(a as i32 - 1)).min(opts.max_ms as f64);
                let mut wait_ms = base_wait as u64;
                let mut jitter_suppressed = false;

                if let Some(retry_after) = err.retry_after_secs() {
                    wait_ms = wait_ms.max(retry_after * 1000);
                    jitter_suppressed = true;
                }

                if !jitter_suppressed && opts.jitter == Jitter::Full {
                    let lo = 0.5 * wait_ms as f64;
                    let hi = 1.5 * wait_ms as f64;
                    wait_ms = (lo + fastrand::f64() * (hi - lo)) as u64;
                }

                if let Some(max_total) = opts.max_total_ms
                    && start.elapsed().as_millis() as u64 + wait_ms > max_total
                {
                    return Err(RetryError::Operation(err));
                }

                if let Some(on_retry) = &opts.on_retry {
                    on_retry(&RetryEvent { attempt: a, wait_ms });
                }
                tracing::debug!(attempt = a, wait_ms, "retrying after failure");

                sleep_cancellable(Duration::from_millis(wait_ms), &opts.cancel).await?;
                last_err = Some(err);
            }
        }
    }

    // max_attempts == 0 never calls f(); otherwise unreachable since the
    // loop always returns on its last iteration.
    match last_err {
        Some(err) => Err(RetryError::Operation(err)),
        None => unreachable!("retry called with max_attempts == 0"),
    }
}
