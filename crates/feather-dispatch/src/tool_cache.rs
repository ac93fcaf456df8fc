use crate::cache::{CacheRecord, InMemoryStore, Store};
use crate::fingerprint::{sha256_hex, stable_json_string};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ToolCacheDecision {
    pub cacheable: bool,
    pub key: Option<String>,
    pub hit: Option<Value>,
}

/// `(toolName, stableJson(args))` fingerprint -> cached tool result (spec
/// §4.6). Cacheable iff the tool declares a positive TTL; `serde_json::Value`
/// is a tree by construction, so the source spec's cycle/function/symbol
/// key-computation failures have no analogue here — key computation for a
/// `Value` cannot fail.
pub struct ToolCache<S: Store<Value> = InMemoryStore<Value>> {
    store: S,
}

impl ToolCache<InMemoryStore<Value>> {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::default(),
        }
    }
}

impl Default for ToolCache<InMemoryStore<Value>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store<Value>> ToolCache<S> {
    pub fn with_store(store: S) -> Self {
        Self { store }
    }

    pub fn key_for(tool_name: &str, args: &Value) -> String {
        format!("{tool_name}:{}", sha256_hex(&stable_json_string(args)))
    }

    pub async fn prepare(&self, tool_name: &str, cache_ttl_secs: u64, args: &Value) -> ToolCacheDecision {
        if cache_ttl_secs == 0 {
            return ToolCacheDecision {
                cacheable: false,
                key: None,
                hit: None,
            };
        }
        let key = Self::key_for(tool_name, args);
        let hit = self.store.get(&key).await.map(|record| record.value);
        ToolCacheDecision {
            cacheable: true,
            key: Some(key),
            hit,
        }
    }

    pub async fn write(&self, decision: &ToolCacheDecision, result: &Value, ttl_secs: u64) {
        if let Some(key) = &decision.key {
            self.store
                .set(key, CacheRecord::new(result.clone(), Duration::from_secs(ttl_secs)))
                .await;
        }
    }
}
