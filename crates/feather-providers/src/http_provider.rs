use async_trait::async_trait;
use feather_core::errors::ProviderError;
use feather_core::message::{ChatRequest, ChatResponse, Role, TokenUsage};
use feather_core::provider::{LLMProvider, ProviderMetrics};
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Per-model pricing a provider adapter needs to stamp `cost_usd` on its
/// own responses (the dispatcher only ever reads what the provider hands
/// back, spec §4.8 step 6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Generic adapter for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI, OpenRouter, Groq, local proxies, ...). Anthropic's distinct
/// wire format is out of scope (spec §1 Non-goals: "concrete provider HTTP
/// codecs"); this one concrete codec exists only as a worked example.
pub struct HttpChatProvider {
    name: String,
    api_key: String,
    base_url: String,
    client: Client,
    pricing: HashMap<String, ModelPricing>,
    metrics: Mutex<ProviderMetrics>,
}

impl HttpChatProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        pricing: HashMap<String, ModelPricing>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            pricing,
            metrics: Mutex::new(ProviderMetrics::default()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn cost_usd(&self, model: &str, usage: &TokenUsage) -> f64 {
        let pricing = self.pricing.get(model).copied().unwrap_or_default();
        (usage.input_tokens as f64 / 1000.0) * pricing.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * pricing.output_per_1k
    }

    fn to_payload(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| match m.role {
                Role::Tool => json!({
                    "role": "tool",
                    "content": m.content,
                    "name": m.tool_name,
                }),
                _ => json!({"role": m.role.as_str(), "content": m.content}),
            })
            .collect();

        let mut payload = json!({
            "model": req.model,
            "messages": messages,
        });
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = req.top_p {
            payload["top_p"] = json!(top_p);
        }
        payload
    }

    fn parse_response(&self, model: &str, body: Value) -> anyhow::Result<ChatResponse> {
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let usage = TokenUsage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };
        let cost_usd = self.cost_usd(model, &usage);

        Ok(ChatResponse {
            content,
            raw: Some(body),
            usage,
            cost_usd,
        })
    }
}

#[async_trait]
impl LLMProvider for HttpChatProvider {
    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let payload = self.to_payload(req);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("{} request failed: {e}", self.name)))?;

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();

            {
                let mut metrics = self.metrics.lock().unwrap();
                metrics.error_count += 1;
            }

            let mut err = ProviderError::new(format!(
                "{} responded {}: {}",
                self.name,
                status.as_u16(),
                body
            ))
            .with_status(status.as_u16());
            if let Some(id) = request_id {
                err = err.with_request_id(id);
            }
            if let Some(secs) = retry_after {
                err = err.with_retry_after(secs);
            }
            return Err(err.into());
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("{} returned invalid JSON: {e}", self.name)))?;

        let response = self.parse_response(&req.model, body)?;

        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.request_count += 1;
            metrics.token_count += response.usage.total();
        }

        Ok(response)
    }

    fn metrics(&self) -> ProviderMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests;
