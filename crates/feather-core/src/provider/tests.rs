use super::*;
use crate::message::{ChatRequest, ChatResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FlakyProvider {
    calls: AtomicUsize,
    fail_first_n: usize,
}

#[async_trait]
impl LLMProvider for FlakyProvider {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first_n {
            return Err(anyhow::anyhow!("transient failure {n}"));
        }
        Ok(ChatResponse {
            content: "ok".to_string(),
            raw: None,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
        })
    }
}

fn req() -> ChatRequest {
    ChatRequest {
        model: "m".to_string(),
        messages: vec![Message::user("hi")],
        temperature: None,
        max_tokens: None,
        top_p: None,
    }
}

#[tokio::test(start_paused = true)]
async fn chat_with_retry_recovers_after_transient_failures() {
    let provider = FlakyProvider { calls: AtomicUsize::new(0), fail_first_n: 2 };
    let resp = provider
        .chat_with_retry(&req(), Some(ChatRetryConfig { initial_delay_ms: 1, max_delay_ms: 5, ..Default::default() }))
        .await
        .unwrap();
    assert_eq!(resp.content, "ok");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn chat_with_retry_gives_up_after_max_retries() {
    let provider = FlakyProvider { calls: AtomicUsize::new(0), fail_first_n: 100 };
    let config = ChatRetryConfig { max_retries: 2, initial_delay_ms: 1, max_delay_ms: 5, ..Default::default() };
    let err = provider.chat_with_retry(&req(), Some(config)).await.unwrap_err();
    assert!(err.to_string().contains("transient failure"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn default_provider_does_not_support_streaming() {
    struct Bare;
    #[async_trait]
    impl LLMProvider for Bare {
        async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
            unreachable!()
        }
    }
    assert!(!Bare.supports_stream());
}
