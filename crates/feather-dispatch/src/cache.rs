use crate::fingerprint::{sha256_hex, stable_json_string};
use async_trait::async_trait;
use feather_core::{ChatRequest, ChatResponse, Role};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A cached value plus the metadata needed to expire it. Cloning a record
/// (and the `T` inside it) is how reads/writes "deep clone" — Rust values
/// own their data, so `Clone` already gives the no-shared-references
/// guarantee the cache contract requires.
#[derive(Clone)]
pub struct CacheRecord<T: Clone> {
    pub value: T,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<T: Clone> CacheRecord<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache backend contract (spec §4.5). Implementations own their own
/// concurrency; records are never mutated once stored.
#[async_trait]
pub trait Store<T: Clone + Send + Sync>: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheRecord<T>>;
    async fn set(&self, key: &str, record: CacheRecord<T>);
    async fn delete(&self, key: &str);
}

/// Default in-process store. Evicts lazily: an expired entry is dropped the
/// next time it's read, not on a background timer.
pub struct InMemoryStore<T: Clone + Send + Sync> {
    entries: Mutex<HashMap<String, CacheRecord<T>>>,
}

impl<T: Clone + Send + Sync> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Store<T> for InMemoryStore<T> {
    async fn get(&self, key: &str) -> Option<CacheRecord<T>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(record) if record.is_expired() => {
                entries.remove(key);
                None
            }
            Some(record) => Some(record.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, record: CacheRecord<T>) {
        self.entries.lock().await.insert(key.to_string(), record);
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

#[derive(Debug, Clone)]
pub struct PromptCacheConfig {
    pub max_temperature: f32,
    pub allow_multi_step: bool,
    pub ttl: Duration,
}

impl Default for PromptCacheConfig {
    fn default() -> Self {
        Self {
            max_temperature: 0.3,
            allow_multi_step: false,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptDecision {
    pub cacheable: bool,
    pub key: Option<String>,
    pub hit: Option<ChatResponse>,
}

/// Normalized request fingerprint -> cached response store (spec §4.5).
pub struct PromptCache<S: Store<ChatResponse> = InMemoryStore<ChatResponse>> {
    store: S,
    config: PromptCacheConfig,
}

impl PromptCache<InMemoryStore<ChatResponse>> {
    pub fn new(config: PromptCacheConfig) -> Self {
        Self {
            store: InMemoryStore::default(),
            config,
        }
    }
}

impl<S: Store<ChatResponse>> PromptCache<S> {
    pub fn with_store(store: S, config: PromptCacheConfig) -> Self {
        Self { store, config }
    }

    /// A request is cacheable if `temperature <= maxTemperature` and either
    /// multi-step caching is allowed, or it is single-turn: exactly one
    /// `user` message and no `assistant`/`tool` messages.
    pub fn is_cacheable(&self, req: &ChatRequest) -> bool {
        if req.messages.is_empty() {
            return false;
        }
        if req.temperature.is_some_and(|t| t > self.config.max_temperature) {
            return false;
        }
        if self.config.allow_multi_step {
            return true;
        }
        let has_assistant_or_tool = req
            .messages
            .iter()
            .any(|m| matches!(m.role, Role::Assistant | Role::Tool));
        let user_count = req.messages.iter().filter(|m| m.role == Role::User).count();
        !has_assistant_or_tool && user_count == 1
    }

    pub fn key_for(&self, provider: &str, model: &str, req: &ChatRequest) -> String {
        let payload = json!({
            "version": 1,
            "provider": provider,
            "model": model,
            "request": sanitize_request(req),
        });
        format!("prompt:v1:{}", sha256_hex(&stable_json_string(&payload)))
    }

    /// Computes the key, probes the store, and returns a decision carrying
    /// a deep-cloned hit if one was present and unexpired.
    pub async fn prepare(&self, provider: &str, model: &str, req: &ChatRequest) -> PromptDecision {
        if !self.is_cacheable(req) {
            return PromptDecision {
                cacheable: false,
                key: None,
                hit: None,
            };
        }
        let key = self.key_for(provider, model, req);
        let hit = self.store.get(&key).await.map(|record| record.value);
        PromptDecision {
            cacheable: true,
            key: Some(key),
            hit,
        }
    }

    /// Persists `response` under the decision's key. No-op if the decision
    /// was marked uncacheable (no key).
    pub async fn write(&self, decision: &PromptDecision, response: &ChatResponse) {
        if let Some(key) = &decision.key {
            self.store
                .set(key, CacheRecord::new(response.clone(), self.config.ttl))
                .await;
        }
    }
}

fn sanitize_request(req: &ChatRequest) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": crate::fingerprint::normalize_whitespace(&m.content),
                "toolName": m.tool_name,
            })
        })
        .collect();
    let mut obj = serde_json::Map::new();
    obj.insert("model".into(), json!(req.model));
    obj.insert("messages".into(), Value::Array(messages));
    if let Some(t) = req.temperature {
        obj.insert("temperature".into(), json!(t));
    }
    if let Some(mt) = req.max_tokens {
        obj.insert("maxTokens".into(), json!(mt));
    }
    if let Some(tp) = req.top_p {
        obj.insert("topP".into(), json!(tp));
    }
    Value::Object(obj)
}
