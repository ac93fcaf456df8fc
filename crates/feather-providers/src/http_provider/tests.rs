use super::*;
use feather_core::message::Message;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pricing(model: &str, input: f64, output: f64) -> HashMap<String, ModelPricing> {
    let mut m = HashMap::new();
    m.insert(model.to_string(), ModelPricing { input_per_1k: input, output_per_1k: output });
    m
}

fn req(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![Message::user("hi")],
        temperature: None,
        max_tokens: None,
        top_p: None,
    }
}

#[tokio::test]
async fn chat_parses_content_usage_and_computes_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello there"}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 50}
        })))
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new(
        "test",
        "sk-test",
        server.uri(),
        pricing("gpt-4o", 0.01, 0.02),
    );

    let response = provider.chat(&req("gpt-4o")).await.unwrap();
    assert_eq!(response.content, "hello there");
    assert_eq!(response.usage.input_tokens, 100);
    assert_eq!(response.usage.output_tokens, 50);
    // (100/1000)*0.01 + (50/1000)*0.02 = 0.001 + 0.001
    assert!((response.cost_usd - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn chat_surfaces_status_and_retry_after_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("rate limited"),
        )
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new("test", "sk-test", server.uri(), HashMap::new());
    let err = provider.chat(&req("gpt-4o")).await.unwrap_err();
    let provider_err = err.downcast_ref::<ProviderError>().expect("ProviderError");
    assert_eq!(provider_err.status, Some(429));
    assert_eq!(provider_err.retry_after, Some(7));
    assert!(provider_err.retryable);
}

#[tokio::test]
async fn missing_pricing_entry_defaults_to_zero_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "x"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })))
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new("test", "sk-test", server.uri(), HashMap::new());
    let response = provider.chat(&req("unknown-model")).await.unwrap();
    assert_eq!(response.cost_usd, 0.0);
}
