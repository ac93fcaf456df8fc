use crate::message::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Per-1K-token pricing for one model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// A model declared by a [`ProviderEntry`]: its canonical name, any aliases
/// it is also reachable under, and its pricing.
#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    pub aliases: Vec<String>,
    pub pricing: ModelPricing,
}

impl ModelDecl {
    pub fn matches(&self, name_or_alias: &str) -> bool {
        self.name == name_or_alias || self.aliases.iter().any(|a| a == name_or_alias)
    }
}

/// A registered provider slot: the caller-chosen key, the adapter instance,
/// and the models it declares pricing/aliases for.
#[derive(Clone)]
pub struct ProviderEntry {
    pub key: String,
    pub instance: Arc<dyn LLMProvider>,
    pub models: Vec<ModelDecl>,
}

/// Accumulated request/token/error counters for a single provider slot.
#[derive(Debug, Clone, Default)]
pub struct ProviderMetrics {
    pub request_count: u64,
    pub token_count: u64,
    pub error_count: u64,
}

/// A single streamed chat chunk.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content_delta: String,
    pub done: bool,
}

/// Capability contract every backend implements. Concrete provider HTTP
/// codecs (OpenAI/Anthropic JSON + SSE shapes) are out of this crate's
/// scope — see `feather-providers` for example adapters.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse>;

    /// Streaming chat. Default errors — only providers that declare the
    /// `stream` capability need to implement this. The returned stream is
    /// `'static`: implementations must not borrow through `self` into it
    /// (clone whatever state the stream needs up front) so a dispatcher
    /// can hand the stream back to its own caller detached from the
    /// provider's lifetime.
    async fn stream(&self, _req: &ChatRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<ChatChunk>>> {
        Err(anyhow::anyhow!("provider does not support streaming"))
    }

    fn supports_stream(&self) -> bool {
        false
    }

    /// Pre-warm the underlying HTTP connection. No-op by default.
    async fn warmup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics::default()
    }

    /// Convenience retry wrapper carried on the trait itself, so any
    /// provider gets basic retry without extra plumbing. This is
    /// deliberately simpler than `feather-dispatch`'s retry component
    /// (spec §4.1): no cancellation, no jitter, no server-hint honoring —
    /// callers who need those reach for the dispatcher instead. Plain
    /// exponential backoff capped at `max_delay_ms`.
    async fn chat_with_retry(
        &self,
        req: &ChatRequest,
        retry_config: Option<ChatRetryConfig>,
    ) -> anyhow::Result<ChatResponse> {
        let config = retry_config.unwrap_or_default();
        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.chat(req).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < config.max_retries {
                        let delay = (config.initial_delay_ms as f64
                            * config.backoff_multiplier.powi(attempt as i32))
                        .min(config.max_delay_ms as f64) as u64;
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("all retry attempts failed")))
    }
}

/// Tunables for [`LLMProvider::chat_with_retry`]'s plain backoff.
#[derive(Debug, Clone, Copy)]
pub struct ChatRetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ChatRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests;
