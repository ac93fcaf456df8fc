use serde_json::Value;

/// One turn in a conversation. `role` is one of `system`, `user`, `assistant`,
/// `tool`, or `summary`. User/system/assistant content is plain text; tool
/// content carries a tool name and an opaque value that the orchestrator
/// never interprets, only serializes when fingerprinting for the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present only on `role: Tool` turns.
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Summary,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Summary => "summary",
        }
    }
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(name.into()),
        }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            role: Role::Summary,
            content: content.into(),
            tool_name: None,
        }
    }
}

/// Request body for a single `chat` call. Numeric bounds are enforced by
/// [`ChatRequest::validate`] before any I/O happens (spec §3 invariant).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(format!("temperature {t} out of range [0, 2]"));
        }
        if let Some(mt) = self.max_tokens
            && mt < 1
        {
            return Err("maxTokens must be >= 1".to_string());
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(format!("topP {p} out of range [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub raw: Option<Value>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}
