use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
enum State {
    Closed,
    Open { next_try: Instant },
    HalfOpen,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Inner {
    state: State,
    /// Timestamps of soft failures within the last `window`.
    failures: VecDeque<Instant>,
}

/// A state change observed by [`Breaker::fail`]/[`Breaker::success`], for
/// callers that need to publish it (spec §4.3 "state changes are published
/// to the dispatcher").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State unchanged.
    None,
    /// Tripped closed/half-open -> open.
    Opened,
    /// Probe succeeded half-open -> closed.
    Closed,
}

/// Rolling-window circuit breaker guarding a single provider slot
/// (spec §4.3). `threshold` soft failures within `window` trip the
/// breaker; it stays open for `cooldown`, then lets a single probe
/// through in half-open.
pub struct Breaker {
    threshold: usize,
    cooldown: Duration,
    window: Duration,
    inner: Mutex<Inner>,
}

impl Breaker {
    pub fn new(threshold: usize, cooldown: Duration, window: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            window,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failures: VecDeque::new(),
            }),
        }
    }

    /// `true` if a call may currently proceed. Transitions `Open -> HalfOpen`
    /// (and lets the caller through as the probe) once `cooldown` elapses.
    pub async fn can_pass(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open { next_try } => {
                if Instant::now() >= next_try {
                    info!("circuit breaker transitioning open -> half-open");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// A soft failure trips the breaker after `threshold` within `window`;
    /// any soft failure while half-open re-opens with a fresh cooldown.
    /// No-op for hard (client-caused) errors — they must never count.
    /// Returns the transition observed, if any, so the caller can publish
    /// it (spec §4.3).
    pub async fn fail(&self, hard: bool) -> Transition {
        if hard {
            return Transition::None;
        }
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.state {
            State::HalfOpen => {
                warn!("circuit breaker probe failed: half-open -> open");
                inner.failures.clear();
                inner.failures.push_back(now);
                inner.state = State::Open {
                    next_try: now + self.cooldown,
                };
                Transition::Opened
            }
            State::Closed => {
                inner.failures.push_back(now);
                let cutoff = now - self.window;
                while inner.failures.front().is_some_and(|&t| t < cutoff) {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.threshold {
                    warn!(
                        failures = inner.failures.len(),
                        "circuit breaker tripped: closed -> open"
                    );
                    inner.state = State::Open {
                        next_try: now + self.cooldown,
                    };
                    Transition::Opened
                } else {
                    Transition::None
                }
            }
            State::Open { .. } => Transition::None,
        }
    }

    /// A success in half-open closes the breaker and clears the window.
    /// A success while closed is a no-op (the window only tracks failures).
    /// Returns the transition observed, if any.
    pub async fn success(&self) -> Transition {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, State::HalfOpen) {
            info!("circuit breaker transitioning half-open -> closed");
            inner.state = State::Closed;
            inner.failures.clear();
            Transition::Closed
        } else {
            Transition::None
        }
    }

    pub async fn state_name(&self) -> &'static str {
        match self.inner.lock().await.state {
            State::Closed => "closed",
            State::Open { .. } => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(5000), Duration::from_millis(10000))
    }
}
