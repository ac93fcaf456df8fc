use super::*;
use feather_core::{
    ChatChunk, ChatResponse, EventObserver, LLMProvider, Message, ModelDecl, ModelPricing, ProviderEntry, TokenUsage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

struct CapturingObserver {
    events: StdMutex<Vec<Event>>,
}

impl CapturingObserver {
    fn new() -> Self {
        Self { events: StdMutex::new(Vec::new()) }
    }
}

impl EventObserver for CapturingObserver {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct ScriptedProvider {
    calls: AtomicU32,
    script: Vec<Result<&'static str, (u16, Option<u64>)>>,
    delay: Duration,
}

#[async_trait::async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.script[i.min(self.script.len() - 1)] {
            Ok(content) => Ok(ChatResponse {
                content: content.to_string(),
                raw: None,
                usage: TokenUsage::default(),
                cost_usd: 0.0,
            }),
            Err((status, retry_after)) => {
                let mut err = feather_core::ProviderError::new("upstream failure").with_status(status);
                if let Some(ra) = retry_after {
                    err = err.with_retry_after(ra);
                }
                Err(err.into())
            }
        }
    }
}

fn entry(key: &str, provider: ScriptedProvider) -> ProviderEntry {
    ProviderEntry {
        key: key.to_string(),
        instance: Arc::new(provider),
        models: vec![ModelDecl {
            name: "m1".to_string(),
            aliases: vec![],
            pricing: ModelPricing::default(),
        }],
    }
}

fn dispatcher(registry: ProviderRegistry) -> Dispatcher {
    Dispatcher::new(
        Arc::new(registry),
        Arc::new(RateLimiter::new(HashMap::new())),
        Vec::new(),
        EventBus::new(),
        DispatcherConfig::default(),
    )
}

fn dispatcher_with_events(registry: ProviderRegistry, events: EventBus) -> Dispatcher {
    Dispatcher::new(
        Arc::new(registry),
        Arc::new(RateLimiter::new(HashMap::new())),
        Vec::new(),
        events,
        DispatcherConfig::default(),
    )
}

fn args() -> ChatArgs {
    ChatArgs::new(vec![Message::user("hi")])
}

#[tokio::test]
async fn fallback_returns_first_success_after_bad_provider_fails() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "bad",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Err((500, None))],
            delay: Duration::ZERO,
        },
    ));
    registry.add(entry(
        "good",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Ok("ok")],
            delay: Duration::ZERO,
        },
    ));
    let mut d = dispatcher(registry);
    d.config.default_retry.max_attempts = Some(1);

    let providers = vec![
        ProviderRef { provider: "bad".to_string(), model: Some("m1".to_string()) },
        ProviderRef { provider: "good".to_string(), model: Some("m1".to_string()) },
    ];
    let resp = d.fallback(&providers, &args()).await.unwrap();
    assert_eq!(resp.content, "ok");
}

#[tokio::test]
async fn race_resolves_with_the_faster_provider() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "slow",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Ok("50")],
            delay: Duration::from_millis(50),
        },
    ));
    registry.add(entry(
        "fast",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Ok("10")],
            delay: Duration::from_millis(5),
        },
    ));
    let d = dispatcher(registry);

    let providers = vec![
        ProviderRef { provider: "slow".to_string(), model: Some("m1".to_string()) },
        ProviderRef { provider: "fast".to_string(), model: Some("m1".to_string()) },
    ];
    let resp = d.race(&providers, &args()).await.unwrap();
    assert_eq!(resp.content, "10");
}

#[tokio::test]
async fn breaker_opens_after_threshold_failures_and_short_circuits() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "flaky",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Err((500, None))],
            delay: Duration::ZERO,
        },
    ));
    let mut d = dispatcher(registry);
    d.config.default_retry.max_attempts = Some(1);
    d.config.breaker_threshold = 2;

    for _ in 0..2 {
        let mut a = args();
        a.provider = Some("flaky".to_string());
        a.model = Some("m1".to_string());
        assert!(d.chat(a).await.is_err());
    }

    let mut a = args();
    a.provider = Some("flaky".to_string());
    a.model = Some("m1".to_string());
    let err = d.chat(a).await.unwrap_err();
    assert!(matches!(err, DispatchError::CircuitOpen(_)));
}

#[tokio::test]
async fn breaker_trip_emits_breaker_open_event() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "flaky",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Err((500, None))],
            delay: Duration::ZERO,
        },
    ));
    let observer = Arc::new(CapturingObserver::new());
    let mut d = dispatcher_with_events(registry, EventBus::new().with_observer(observer.clone()));
    d.config.default_retry.max_attempts = Some(1);
    d.config.breaker_threshold = 1;

    let mut a = args();
    a.provider = Some("flaky".to_string());
    a.model = Some("m1".to_string());
    assert!(d.chat(a).await.is_err());

    let events = observer.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BreakerOpen { provider } if provider == "flaky")));
}

#[tokio::test]
async fn retries_emit_call_retry_events() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "flaky",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Err((500, None)), Ok("recovered")],
            delay: Duration::ZERO,
        },
    ));
    let observer = Arc::new(CapturingObserver::new());
    let mut d = dispatcher_with_events(registry, EventBus::new().with_observer(observer.clone()));
    d.config.default_retry = RetryOverride {
        max_attempts: Some(2),
        base_ms: Some(1),
        max_ms: Some(1),
        max_total_ms: None,
    };

    let mut a = args();
    a.provider = Some("flaky".to_string());
    a.model = Some("m1".to_string());
    let resp = d.chat(a).await.unwrap();
    assert_eq!(resp.content, "recovered");

    let events = observer.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(e, Event::CallRetry { attempt, .. } if *attempt == 1)));
}

#[tokio::test]
async fn contract_violation_rejected_before_any_provider_call() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "p",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Ok("unused")],
            delay: Duration::ZERO,
        },
    ));
    let d = dispatcher(registry);
    let mut a = ChatArgs::new(vec![]);
    a.provider = Some("p".to_string());
    a.model = Some("m1".to_string());
    let err = d.chat(a).await.unwrap_err();
    assert!(matches!(err, DispatchError::Contract(_)));
}

struct ScriptedStreamProvider {
    chunks: Vec<&'static str>,
}

#[async_trait::async_trait]
impl LLMProvider for ScriptedStreamProvider {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        unreachable!("test only exercises stream()")
    }

    async fn stream(
        &self,
        _req: &ChatRequest,
    ) -> anyhow::Result<feather_core::BoxStream<'static, anyhow::Result<ChatChunk>>> {
        let items: Vec<anyhow::Result<ChatChunk>> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Ok(ChatChunk {
                    content_delta: c.to_string(),
                    done: i == self.chunks.len() - 1,
                })
            })
            .collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }

    fn supports_stream(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn stream_chat_yields_every_chunk_in_order() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry_with(
        "p",
        ScriptedStreamProvider { chunks: vec!["hel", "lo"] },
    ));
    let d = dispatcher(registry);
    let mut a = args();
    a.provider = Some("p".to_string());
    a.model = Some("m1".to_string());

    let mut stream = d.stream_chat(a).await.unwrap();
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk.unwrap().content_delta);
    }
    assert_eq!(out, "hello");
}

#[tokio::test]
async fn stream_chat_rejects_a_provider_without_streaming_support() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry(
        "p",
        ScriptedProvider {
            calls: AtomicU32::new(0),
            script: vec![Ok("unused")],
            delay: Duration::ZERO,
        },
    ));
    let d = dispatcher(registry);
    let mut a = args();
    a.provider = Some("p".to_string());
    a.model = Some("m1".to_string());

    let err = d.stream_chat(a).await.unwrap_err();
    assert!(matches!(err, DispatchError::Llm { retryable: false, .. }));
}

struct DelayedStreamProvider {
    chunks: Vec<&'static str>,
    delay_per_chunk: Duration,
}

#[async_trait::async_trait]
impl LLMProvider for DelayedStreamProvider {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        unreachable!("test only exercises stream()")
    }

    async fn stream(
        &self,
        _req: &ChatRequest,
    ) -> anyhow::Result<feather_core::BoxStream<'static, anyhow::Result<ChatChunk>>> {
        let chunks = self.chunks.clone();
        let delay = self.delay_per_chunk;
        let s = futures_util::stream::unfold(0usize, move |i| async move {
            if i >= chunks.len() {
                return None;
            }
            tokio::time::sleep(delay).await;
            let chunk = ChatChunk {
                content_delta: chunks[i].to_string(),
                done: i == chunks.len() - 1,
            };
            Some((Ok(chunk), i + 1))
        });
        Ok(Box::pin(s))
    }

    fn supports_stream(&self) -> bool {
        true
    }
}

fn entry_delayed(key: &str, provider: DelayedStreamProvider) -> ProviderEntry {
    ProviderEntry {
        key: key.to_string(),
        instance: Arc::new(provider),
        models: vec![ModelDecl {
            name: "m1".to_string(),
            aliases: vec![],
            pricing: ModelPricing::default(),
        }],
    }
}

#[tokio::test]
async fn stream_chat_stops_after_cancel_is_fired_mid_stream() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry_delayed(
        "p",
        DelayedStreamProvider { chunks: vec!["a", "b", "c"], delay_per_chunk: Duration::from_millis(30) },
    ));
    let d = dispatcher(registry);
    let cancel = CancelToken::new();
    let mut a = args();
    a.provider = Some("p".to_string());
    a.model = Some("m1".to_string());
    a.cancel = Some(cancel.clone());

    let mut stream = d.stream_chat(a).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.content_delta, "a");

    cancel.cancel();
    // The remaining chunks are each gated behind a 30ms sleep; cancellation
    // only has to win a race against that, not against an instantly-ready
    // stream, so this is deterministic rather than flaky.
    assert!(stream.next().await.is_none());
}

fn entry_with(key: &str, provider: ScriptedStreamProvider) -> ProviderEntry {
    ProviderEntry {
        key: key.to_string(),
        instance: Arc::new(provider),
        models: vec![ModelDecl {
            name: "m1".to_string(),
            aliases: vec![],
            pricing: ModelPricing::default(),
        }],
    }
}

#[tokio::test]
async fn map_preserves_index_order_despite_varied_completion_times() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    let d = dispatcher(registry);
    let items = vec![30u64, 10, 20];
    let out = d
        .map(
            items,
            |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, DispatchError>(ms)
            },
            4,
            CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out, vec![30, 10, 20]);
}
