use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Session,
    User,
    Global,
}

/// A single configured rule: `count > limit` within `interval` fails the
/// step (spec §4.13).
#[derive(Clone)]
pub struct QuotaRule {
    pub name: String,
    pub scope: QuotaScope,
    pub limit: u64,
    pub interval: Duration,
    /// `metadata` key to read for `Scope::User` (default `"userId"`).
    pub metadata_key: Option<String>,
    /// Append `:<tool>` to the derived key when set (spec §4.13).
    pub include_tool: bool,
}

impl QuotaRule {
    pub fn new(name: impl Into<String>, scope: QuotaScope, limit: u64, interval: Duration) -> Self {
        Self {
            name: name.into(),
            scope,
            limit,
            interval,
            metadata_key: None,
            include_tool: false,
        }
    }

    pub fn including_tool(mut self) -> Self {
        self.include_tool = true;
        self
    }

    pub fn with_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = Some(key.into());
        self
    }
}

pub struct ConsumeArgs<'a> {
    pub session_id: &'a str,
    pub metadata: &'a HashMap<String, Value>,
    pub tool: Option<&'a str>,
}

/// Raised when any configured rule's counter exceeds its limit (spec §4.13,
/// §7's `QUOTA_EXCEEDED`). `details` carries the failing rule/limit so the
/// loop can attach them to the emitted `AgentError`.
#[derive(Debug, Clone)]
pub struct QuotaExceeded {
    pub rule: String,
    pub limit: u64,
    pub count: u64,
}

/// `consume({sessionId, metadata?, tool?}) -> ()`, atomically incrementing
/// every configured rule's counter and failing if any rule's count now
/// exceeds its limit (spec §4.13).
#[async_trait]
pub trait Quota: Send + Sync {
    async fn consume(&self, args: ConsumeArgs<'_>) -> Result<(), QuotaExceeded>;
}

/// Derives the counter key for a rule given the current call's scope
/// inputs (spec §4.13's key-derivation rules).
fn derive_key(rule: &QuotaRule, args: &ConsumeArgs<'_>) -> Option<String> {
    let mut key = match rule.scope {
        QuotaScope::Session => args.session_id.to_string(),
        QuotaScope::User => {
            let metadata_key = rule.metadata_key.as_deref().unwrap_or("userId");
            let user_id = args.metadata.get(metadata_key).and_then(Value::as_str)?;
            if user_id.trim().is_empty() {
                return None;
            }
            user_id.to_string()
        }
        QuotaScope::Global => "global".to_string(),
    };
    if rule.include_tool && let Some(tool) = args.tool {
        key.push(':');
        key.push_str(tool);
    }
    Some(key)
}

struct Counter {
    count: u64,
    reset_at: DateTime<Utc>,
}

/// In-process reference quota implementation: per-`(rule, key)` `{count,
/// resetAt}`, reset lazily when `now >= resetAt` (spec §4.13).
#[derive(Default)]
pub struct InProcessQuota {
    rules: Vec<QuotaRule>,
    counters: Mutex<HashMap<(String, String), Counter>>,
}

impl InProcessQuota {
    pub fn new(rules: Vec<QuotaRule>) -> Self {
        Self {
            rules,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Quota for InProcessQuota {
    async fn consume(&self, args: ConsumeArgs<'_>) -> Result<(), QuotaExceeded> {
        let now = Utc::now();
        let mut counters = self.counters.lock().unwrap();
        for rule in &self.rules {
            let Some(key) = derive_key(rule, &args) else {
                continue;
            };
            let entry = counters
                .entry((rule.name.clone(), key))
                .or_insert_with(|| Counter {
                    count: 0,
                    reset_at: now + chrono::Duration::from_std(rule.interval).unwrap_or_default(),
                });
            if now >= entry.reset_at {
                entry.count = 0;
                entry.reset_at = now + chrono::Duration::from_std(rule.interval).unwrap_or_default();
            }
            entry.count += 1;
            if entry.count > rule.limit {
                return Err(QuotaExceeded {
                    rule: rule.name.clone(),
                    limit: rule.limit,
                    count: entry.count,
                });
            }
        }
        Ok(())
    }
}

/// Reference sketch of a distributed quota backed by a Redis-like atomic
/// `INCR`+`PEXPIRE` primitive (spec §4.13): namespaced key
/// `<ns>:<rule>:<key>`, a loaded Lua-equivalent script invoked per call,
/// reloaded on a cache-miss (`NOSCRIPT`) and transparently retried. The
/// concrete client is out of scope (spec §1's memory/telemetry backends
/// carve-out applies equally to a distributed counter store); this trait
/// documents the contract a real client would implement.
#[async_trait]
pub trait AtomicCounterClient: Send + Sync {
    /// Atomically increments `key` by 1, sets its TTL to `ttl` if newly
    /// created, and returns the post-increment count. `NOSCRIPT` (the
    /// script not being loaded yet) is handled internally by the client:
    /// reload and retry once.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> anyhow::Result<u64>;
}

pub struct DistributedQuota<C: AtomicCounterClient> {
    namespace: String,
    rules: Vec<QuotaRule>,
    client: C,
}

impl<C: AtomicCounterClient> DistributedQuota<C> {
    pub fn new(namespace: impl Into<String>, rules: Vec<QuotaRule>, client: C) -> Self {
        Self {
            namespace: namespace.into(),
            rules,
            client,
        }
    }
}

#[async_trait]
impl<C: AtomicCounterClient> Quota for DistributedQuota<C> {
    async fn consume(&self, args: ConsumeArgs<'_>) -> Result<(), QuotaExceeded> {
        for rule in &self.rules {
            let Some(key) = derive_key(rule, &args) else {
                continue;
            };
            let namespaced = format!("{}:{}:{}", self.namespace, rule.name, key);
            let count = self
                .client
                .incr_with_ttl(&namespaced, rule.interval)
                .await
                .unwrap_or(0);
            if count > rule.limit {
                return Err(QuotaExceeded {
                    rule: rule.name.clone(),
                    limit: rule.limit,
                    count,
                });
            }
        }
        Ok(())
    }
}
