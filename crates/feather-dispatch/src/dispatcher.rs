//! Composes rate limiting, circuit breaking, middleware (incl. prompt
//! caching) and retry into a single `chat` call, plus the fan-out wrappers
//! (`fallback`, `race`, `map`) described in spec §4.8.

use crate::breaker::{Breaker, Transition as BreakerTransition};
use crate::cache::{PromptCache, PromptDecision};
use crate::cancel::CancelToken;
use crate::middleware::{BoxFuture, ControlFlow, Middleware, run_chain};
use crate::rate_limiter::RateLimiter;
use crate::registry::{NoProvider, ProviderRegistry, Selection};
use crate::retry::{RetryOpts, RetryError, retry};
use async_trait::async_trait;
use feather_core::{
    BoxStream, ChatChunk, ChatRequest, ChatResponse, DispatchError, Event, EventBus, Message,
    ProviderEntry, ProviderError,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Caller-overridable subset of [`RetryOpts`]. Kept plain-data (no boxed
/// classifiers) so it can ride along on [`ChatArgs`], which must be cheaply
/// cloneable for the fan-out wrappers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub base_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub max_total_ms: Option<u64>,
}

#[derive(Clone)]
pub struct ChatArgs {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub cancel: Option<CancelToken>,
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryOverride>,
}

impl ChatArgs {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            provider: None,
            model: None,
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            cancel: None,
            timeout_ms: None,
            retry: None,
        }
    }
}

/// One entry in a fan-out candidate list (spec §4.8 "fan-out wrappers").
#[derive(Debug, Clone)]
pub struct ProviderRef {
    pub provider: String,
    pub model: Option<String>,
}

pub struct DispatcherConfig {
    pub default_timeout_ms: u64,
    pub breaker_threshold: usize,
    pub breaker_cooldown: Duration,
    pub breaker_window: Duration,
    pub default_retry: RetryOverride,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_millis(5000),
            breaker_window: Duration::from_millis(10_000),
            default_retry: RetryOverride {
                max_attempts: Some(3),
                base_ms: Some(250),
                max_ms: Some(3000),
                max_total_ms: None,
            },
        }
    }
}

/// The middleware context threaded through the dispatcher's request
/// pipeline (spec §4.4, §4.8 step 6).
pub struct DispatchContext {
    pub provider: String,
    pub model: String,
    pub request: ChatRequest,
    pub request_id: String,
    pub start: Instant,
    pub response: Option<ChatResponse>,
    cache_decision: Option<PromptDecision>,
}

/// Short-circuits the chain on a prompt-cache hit, persists on a clean
/// miss. The authoritative implementation of spec §4.5's middleware hook.
pub struct PromptCacheMiddleware {
    pub cache: Arc<PromptCache>,
}

#[async_trait]
impl Middleware<DispatchContext> for PromptCacheMiddleware {
    async fn pre(&self, ctx: &mut DispatchContext) -> anyhow::Result<ControlFlow> {
        let decision = self
            .cache
            .prepare(&ctx.provider, &ctx.model, &ctx.request)
            .await;
        if let Some(hit) = decision.hit.clone() {
            tracing::debug!(provider = %ctx.provider, model = %ctx.model, "prompt cache hit");
            ctx.response = Some(hit);
            ctx.cache_decision = Some(decision);
            return Ok(ControlFlow::ShortCircuit);
        }
        ctx.cache_decision = Some(decision);
        Ok(ControlFlow::Continue)
    }

    async fn post(&self, ctx: &mut DispatchContext) -> anyhow::Result<()> {
        let already_hit = ctx
            .cache_decision
            .as_ref()
            .is_some_and(|d| d.hit.is_some());
        if already_hit {
            return Ok(());
        }
        if let (Some(decision), Some(response)) = (&ctx.cache_decision, &ctx.response) {
            self.cache.write(decision, response).await;
        }
        Ok(())
    }
}

fn classify_provider_error(provider_key: &str, err: anyhow::Error) -> DispatchError {
    match err.downcast::<ProviderError>() {
        Ok(pe) => DispatchError::Llm {
            provider: provider_key.to_string(),
            message: pe.message,
            status: pe.status,
            request_id: pe.request_id,
            retryable: pe.retryable,
            retry_after: pe.retry_after,
        },
        Err(err) => DispatchError::Llm {
            provider: provider_key.to_string(),
            message: err.to_string(),
            status: None,
            request_id: None,
            retryable: true,
            retry_after: None,
        },
    }
}

/// Emits `Event::BreakerOpen`/`BreakerClose` for a transition observed by
/// `breaker.fail`/`breaker.success` (spec §4.3 "state changes are published
/// to the dispatcher").
fn publish_breaker_transition(events: &EventBus, provider_key: &str, transition: BreakerTransition) {
    match transition {
        BreakerTransition::Opened => events.emit(Event::BreakerOpen {
            provider: provider_key.to_string(),
        }),
        BreakerTransition::Closed => events.emit(Event::BreakerClose {
            provider: provider_key.to_string(),
        }),
        BreakerTransition::None => {}
    }
}

fn build_retry_opts(
    config: &DispatcherConfig,
    cancel: CancelToken,
    over: Option<RetryOverride>,
    events: EventBus,
    provider: String,
    model: String,
    request_id: String,
) -> RetryOpts<DispatchError> {
    let over = over.unwrap_or(config.default_retry);
    let base = RetryOpts::default();
    RetryOpts {
        max_attempts: over.max_attempts.unwrap_or(base.max_attempts),
        base_ms: over.base_ms.unwrap_or(base.base_ms),
        max_ms: over.max_ms.unwrap_or(base.max_ms),
        max_total_ms: over.max_total_ms,
        cancel,
        on_retry: Some(Box::new(move |ev: &crate::retry::RetryEvent| {
            events.emit(Event::CallRetry {
                provider: provider.clone(),
                model: model.clone(),
                request_id: request_id.clone(),
                attempt: ev.attempt,
                wait_ms: ev.wait_ms,
            });
        })),
        ..base
    }
}

/// Composes provider selection, the breaker gate, rate limiting, the
/// middleware chain and retry into a single `chat` call (spec §4.8).
/// Owns one breaker per provider slot and a shared rate limiter keyed
/// `providerId:modelName`.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    breakers: AsyncMutex<HashMap<String, Arc<Breaker>>>,
    middleware: Vec<Arc<dyn Middleware<DispatchContext>>>,
    events: EventBus,
    config: DispatcherConfig,
    total_cost_usd: Mutex<f64>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        limiter: Arc<RateLimiter>,
        middleware: Vec<Arc<dyn Middleware<DispatchContext>>>,
        events: EventBus,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            limiter,
            breakers: AsyncMutex::new(HashMap::new()),
            middleware,
            events,
            config,
            total_cost_usd: Mutex::new(0.0),
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        *self.total_cost_usd.lock().unwrap()
    }

    async fn breaker_for(&self, provider_key: &str) -> Arc<Breaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(provider_key.to_string())
            .or_insert_with(|| {
                Arc::new(Breaker::new(
                    self.config.breaker_threshold,
                    self.config.breaker_cooldown,
                    self.config.breaker_window,
                ))
            })
            .clone()
    }

    fn select(&self, provider: Option<&str>, model: Option<&str>) -> Result<Selection, DispatchError> {
        if let Some(p) = provider {
            let entry = self
                .registry
                .get(p)
                .ok_or_else(|| DispatchError::NoProvider(model.map(String::from)))?;
            let decl = model
                .and_then(|m| entry.models.iter().find(|d| d.matches(m)))
                .or_else(|| entry.models.first())
                .ok_or_else(|| DispatchError::NoProvider(model.map(String::from)))?;
            return Ok(Selection {
                entry,
                model: decl.name.clone(),
                input_per_1k: decl.pricing.input_per_1k,
                output_per_1k: decl.pricing.output_per_1k,
            });
        }
        self.registry
            .choose(model)
            .map_err(|NoProvider(m)| DispatchError::NoProvider(m))
    }

    async fn terminal(
        ctx: &mut DispatchContext,
        provider_entry: ProviderEntry,
        cancel: CancelToken,
        retry_opts: RetryOpts<DispatchError>,
        provider_key: String,
    ) -> anyhow::Result<()> {
        // `retry`'s closure is `Fn`, called once per attempt, so the
        // request is cloned once up front and cheaply re-cloned per
        // attempt rather than captured through `ctx` itself.
        let request = ctx.request.clone();
        let result = retry(
            move |_attempt| {
                let provider = provider_entry.instance.clone();
                let req = request.clone();
                let cancel = cancel.clone();
                let provider_key = provider_key.clone();
                async move {
                    tokio::select! {
                        res = provider.chat(&req) => res.map_err(|e| classify_provider_error(&provider_key, e)),
                        () = cancel.cancelled() => Err(DispatchError::Aborted),
                    }
                }
            },
            retry_opts,
        )
        .await;

        match result {
            Ok(response) => {
                ctx.response = Some(response);
                Ok(())
            }
            Err(RetryError::Operation(e)) => Err(e.into()),
            Err(RetryError::Aborted) => Err(DispatchError::Aborted.into()),
        }
    }

    /// Validates, selects a provider, gates on the breaker, waits on the
    /// rate limiter, then runs the middleware chain around a retry-wrapped
    /// provider call (spec §4.8 steps 1-7).
    pub async fn chat(&self, args: ChatArgs) -> Result<ChatResponse, DispatchError> {
        let request = ChatRequest {
            model: args.model.clone().unwrap_or_default(),
            messages: args.messages,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            top_p: args.top_p,
        };
        request.validate().map_err(DispatchError::Contract)?;

        let selection = self.select(args.provider.as_deref(), args.model.as_deref())?;
        let provider_key = selection.entry.key.clone();
        let model = selection.model.clone();

        let breaker = self.breaker_for(&provider_key).await;
        if !breaker.can_pass().await {
            return Err(DispatchError::CircuitOpen(provider_key));
        }

        let caller_cancel = args.cancel.unwrap_or_default();
        let timeout_ms = args.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let inner_cancel = caller_cancel.with_timeout(Duration::from_millis(timeout_ms));

        let limiter_key = format!("{provider_key}:{model}");
        if self.limiter.take(&limiter_key, &inner_cancel).await.is_err() {
            return Err(DispatchError::Aborted);
        }

        let request_id = Uuid::new_v4().to_string();
        self.events.emit(Event::CallStart {
            provider: provider_key.clone(),
            model: model.clone(),
            request_id: request_id.clone(),
        });

        let mut ctx = DispatchContext {
            provider: provider_key.clone(),
            model: model.clone(),
            request: ChatRequest { model: model.clone(), ..request },
            request_id: request_id.clone(),
            start: Instant::now(),
            response: None,
            cache_decision: None,
        };

        let retry_opts = build_retry_opts(
            &self.config,
            inner_cancel.clone(),
            args.retry,
            self.events.clone(),
            provider_key.clone(),
            model.clone(),
            request_id.clone(),
        );
        let provider_entry = selection.entry;
        let terminal_provider_key = provider_key.clone();

        let result = run_chain(&self.middleware, &mut ctx, move |ctx| {
            Box::pin(Self::terminal(ctx, provider_entry, inner_cancel, retry_opts, terminal_provider_key))
                as BoxFuture<'_, anyhow::Result<()>>
        })
        .await;

        match result {
            Ok(()) => {
                let response = ctx.response.take().expect("terminal sets ctx.response on success");
                let transition = breaker.success().await;
                publish_breaker_transition(&self.events, &provider_key, transition);
                *self.total_cost_usd.lock().unwrap() += response.cost_usd;
                self.events.emit(Event::CallSuccess {
                    provider: provider_key,
                    model,
                    request_id,
                    cost_usd: response.cost_usd,
                });
                Ok(response)
            }
            Err(err) => {
                let dispatch_err = err.downcast::<DispatchError>().unwrap_or_else(DispatchError::Internal);
                let transition = breaker.fail(dispatch_err.is_hard()).await;
                publish_breaker_transition(&self.events, &provider_key, transition);
                self.events.emit(Event::CallError {
                    provider: provider_key,
                    model,
                    request_id,
                    error: dispatch_err.to_string(),
                });
                Err(dispatch_err)
            }
        }
    }

    /// Streaming chat (spec §4.8 "Streaming"): selects and gates a provider
    /// the same way `chat` does, then defers to the provider's own `stream`
    /// and emits a lazy sequence of `{contentDelta}` chunks. No retry or
    /// prompt-cache middleware wraps a stream — caching a partial reply
    /// makes no sense, and a dropped connection mid-stream is the caller's
    /// to retry as a fresh call. The stream ends on provider-signalled
    /// completion or `args.cancel`/`timeout_ms` firing, whichever is first.
    pub async fn stream_chat(
        &self,
        args: ChatArgs,
    ) -> Result<BoxStream<'static, anyhow::Result<ChatChunk>>, DispatchError> {
        let request = ChatRequest {
            model: args.model.clone().unwrap_or_default(),
            messages: args.messages,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            top_p: args.top_p,
        };
        request.validate().map_err(DispatchError::Contract)?;

        let selection = self.select(args.provider.as_deref(), args.model.as_deref())?;
        let provider_key = selection.entry.key.clone();
        let model = selection.model.clone();

        let breaker = self.breaker_for(&provider_key).await;
        if !breaker.can_pass().await {
            return Err(DispatchError::CircuitOpen(provider_key));
        }

        let caller_cancel = args.cancel.unwrap_or_default();
        let timeout_ms = args.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let inner_cancel = caller_cancel.with_timeout(Duration::from_millis(timeout_ms));

        let limiter_key = format!("{provider_key}:{model}");
        if self.limiter.take(&limiter_key, &inner_cancel).await.is_err() {
            return Err(DispatchError::Aborted);
        }

        if !selection.entry.instance.supports_stream() {
            return Err(DispatchError::Llm {
                provider: provider_key.clone(),
                message: format!("provider '{provider_key}' does not support streaming"),
                status: None,
                request_id: None,
                retryable: false,
                retry_after: None,
            });
        }

        let req = ChatRequest { model: model.clone(), ..request };
        let inner_stream = selection
            .entry
            .instance
            .stream(&req)
            .await
            .map_err(|e| classify_provider_error(&provider_key, e))?;

        // A scoped-acquisition wrapper (spec §9): the underlying reader is
        // owned by `inner_stream` and dropped the moment `unfold` stops
        // polling it, whether that's a natural end or `cancel` firing.
        let wrapped = futures_util::stream::unfold(
            (inner_stream, inner_cancel),
            |(mut inner, cancel)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                tokio::select! {
                    next = inner.next() => next.map(|item| (item, (inner, cancel))),
                    () = cancel.cancelled() => None,
                }
            },
        );
        Ok(Box::pin(wrapped))
    }

    /// Sequential fallback: first success wins; the last error is returned
    /// if every candidate fails (spec §4.8, §8 scenario 1).
    pub async fn fallback(
        &self,
        providers: &[ProviderRef],
        base: &ChatArgs,
    ) -> Result<ChatResponse, DispatchError> {
        let mut last_err = None;
        for p in providers {
            let args = self.derive_args(base, p);
            match self.chat(args).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(DispatchError::NoProvider(None)))
    }

    /// Concurrent race: resolves with the first success and cancels every
    /// other in-flight candidate (spec §4.8, §8 scenario 2). If all fail,
    /// the last observed error is returned.
    pub async fn race(&self, providers: &[ProviderRef], base: &ChatArgs) -> Result<ChatResponse, DispatchError> {
        let caller_cancel = base.cancel.clone().unwrap_or_default();
        let mut cancels = Vec::with_capacity(providers.len());
        let mut set = futures_util::stream::FuturesUnordered::new();

        for p in providers {
            let call_cancel = caller_cancel.child();
            cancels.push(call_cancel.clone());
            let mut args = self.derive_args(base, p);
            args.cancel = Some(call_cancel);
            set.push(async move { self.chat(args).await });
        }

        let mut last_err = None;
        while let Some(res) = set.next().await {
            match res {
                Ok(resp) => {
                    for c in &cancels {
                        c.cancel();
                    }
                    return Ok(resp);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(DispatchError::NoProvider(None)))
    }

    /// Runs at most `concurrency` invocations of `f` in parallel over
    /// `items`, preserving index order in the result and halting new
    /// dispatches once `cancel` fires or an item errors (spec §4.8).
    pub async fn map<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        f: F,
        concurrency: usize,
        cancel: CancelToken,
    ) -> Result<Vec<R>, DispatchError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = Result<R, DispatchError>> + Send,
    {
        let concurrency = concurrency.max(1);
        let n = items.len();
        let mut slots: Vec<Option<R>> = (0..n).map(|_| None).collect();

        let mut stream = futures_util::stream::iter(items.into_iter().enumerate())
            .map(|(i, item)| {
                let cancel = cancel.clone();
                let f = &f;
                async move {
                    if cancel.is_cancelled() {
                        return (i, Err(DispatchError::Aborted));
                    }
                    (i, f(item).await)
                }
            })
            .buffer_unordered(concurrency);

        while let Some((i, res)) = stream.next().await {
            match res {
                Ok(v) => slots[i] = Some(v),
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            }
        }

        Ok(slots
            .into_iter()
            .map(|v| v.expect("every slot filled or function returned early on error"))
            .collect())
    }

    fn derive_args(&self, base: &ChatArgs, p: &ProviderRef) -> ChatArgs {
        ChatArgs {
            provider: Some(p.provider.clone()),
            model: p.model.clone().or_else(|| base.model.clone()),
            messages: base.messages.clone(),
            temperature: base.temperature,
            max_tokens: base.max_tokens,
            top_p: base.top_p,
            cancel: base.cancel.clone(),
            timeout_ms: base.timeout_ms,
            retry: base.retry,
        }
    }
}

#[cfg(test)]
mod tests;
