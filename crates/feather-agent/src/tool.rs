use async_trait::async_trait;
use feather_dispatch::CancelToken;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a tool invocation needs besides its parsed input (spec §4.11
/// step 4's `{cancel, metadata}`).
#[derive(Clone, Default)]
pub struct ToolContext {
    pub cancel: Option<CancelToken>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// A named, schema-describing, invokable action (spec §4.10, §4.11). Mirrors
/// the teacher's `Tool` trait, generalized to the spec's tool-cache TTL and
/// JSON-native input/output.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema the input must satisfy; `None` means no schema check.
    fn parameters(&self) -> Option<Value> {
        None
    }
    /// Positive TTL (seconds) opts this tool into the tool-result cache
    /// (spec §4.11 step 3); zero (the default) disables caching.
    fn cache_ttl_secs(&self) -> u64 {
        0
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;

    fn to_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters().unwrap_or_else(|| serde_json::json!({"type": "object"})),
        })
    }
}

/// Registers tools by name and builds the manifest a planner is shown
/// (spec §4.10's "tool manifest"). Execution/caching/policy application
/// lives in the agent loop, not here — this is a pure lookup table, unlike
/// the teacher's `ToolRegistry` which also owns its middleware chain.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "tool registry: overwriting duplicate tool");
        }
        self.tools.insert(name, tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn manifest(&self) -> Vec<Value> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
            .into_iter()
            .map(|n| self.tools[n].to_schema())
            .collect()
    }
}

#[cfg(test)]
mod tests;
