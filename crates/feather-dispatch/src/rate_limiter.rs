use crate::cancel::{Aborted, CancelToken};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Static rate for one key: `rps` tokens refilled per second, capped at
/// `burst` (defaults to `rps` when unset, per spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub rps: f64,
    pub burst: f64,
}

impl Limit {
    pub fn new(rps: f64) -> Self {
        Self { rps, burst: rps }
    }

    pub fn with_burst(rps: f64, burst: f64) -> Self {
        Self { rps, burst }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<(u64, oneshot::Sender<()>)>,
    pump_running: bool,
    next_waiter_id: u64,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
            pump_running: false,
            next_waiter_id: 0,
        }
    }

    fn refill(&mut self, limit: &Limit) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * limit.rps).min(limit.burst);
        self.last_refill = now;
    }
}

/// Per-key token bucket rate limiter with FIFO waiter fairness (spec §4.2).
///
/// Limits are fixed at construction (`providerId:modelName` keys, set up
/// once by the dispatcher from config). A key absent from `limits` is
/// unlimited: `tryTake`/`take` always succeed immediately.
pub struct RateLimiter {
    limits: HashMap<String, Limit>,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, Limit>) -> Self {
        Self {
            limits,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refills lazily; consumes one token and returns `true` if available.
    /// Unknown keys are treated as unlimited and always return `true`.
    pub fn try_take(&self, key: &str) -> bool {
        let Some(limit) = self.limits.get(key) else {
            return true;
        };
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(limit.burst));
        bucket.refill(limit);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns immediately if a token is available; otherwise enqueues a
    /// FIFO waiter and suspends until the background pump grants a token
    /// or `cancel` fires.
    pub async fn take(&self, key: &str, cancel: &CancelToken) -> Result<(), Aborted> {
        if cancel.is_cancelled() {
            return Err(Aborted);
        }
        if self.try_take(key) {
            return Ok(());
        }
        let Some(limit) = self.limits.get(key).copied() else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        let waiter_id = {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets
                .get_mut(key)
                .expect("bucket initialized by the try_take call above");
            let id = bucket.next_waiter_id;
            bucket.next_waiter_id += 1;
            bucket.waiters.push_back((id, tx));
            if !bucket.pump_running {
                bucket.pump_running = true;
                self.spawn_pump(key.to_string(), limit);
            }
            id
        };

        tokio::select! {
            res = rx => res.map_err(|_| Aborted),
            () = cancel.cancelled() => {
                let mut buckets = self.buckets.lock().unwrap();
                if let Some(bucket) = buckets.get_mut(key) {
                    bucket.waiters.retain(|(id, _)| *id != waiter_id);
                }
                Err(Aborted)
            }
        }
    }

    /// Background task: wakes up as tokens become available and drains
    /// FIFO waiters one token each, until the queue is empty.
    fn spawn_pump(&self, key: String, limit: Limit) {
        let buckets = self.buckets.clone();
        tokio::spawn(async move {
            loop {
                let sleep_for = {
                    let mut guard = buckets.lock().unwrap();
                    let Some(bucket) = guard.get_mut(&key) else {
                        return;
                    };
                    bucket.refill(&limit);
                    while bucket.tokens >= 1.0 {
                        let Some((_, waiter)) = bucket.waiters.pop_front() else {
                            break;
                        };
                        bucket.tokens -= 1.0;
                        let _ = waiter.send(());
                    }
                    if bucket.waiters.is_empty() {
                        bucket.pump_running = false;
                        return;
                    }
                    let deficit = (1.0 - bucket.tokens).max(0.0);
                    Duration::from_secs_f64(deficit / limit.rps)
                };
                tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
            }
        });
    }
}
