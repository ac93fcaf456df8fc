pub mod breaker;
pub mod cache;
pub mod cancel;
pub mod dispatcher;
pub mod fingerprint;
pub mod middleware;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod tool_cache;

pub use breaker::{Breaker, Transition as BreakerTransition};
pub use cache::{CacheRecord, InMemoryStore, PromptCache, PromptCacheConfig, PromptDecision, Store};
pub use cancel::{Aborted, CancelToken, sleep_cancellable};
pub use dispatcher::{ChatArgs, Dispatcher, DispatcherConfig, ProviderRef};
pub use fingerprint::{canonicalize, normalize_whitespace, sha256_hex, stable_json_string};
pub use middleware::{BoxFuture, ControlFlow, Middleware, run_chain};
pub use rate_limiter::{Limit, RateLimiter};
pub use registry::{ModelRef, NoProvider, ProviderRegistry, Selection, SelectionPolicy, infer_provider_from_model, parse_model_ref, resolve_provider};
pub use retry::{Jitter, RetryError, RetryEvent, RetryOpts, Retryable, retry};
pub use tool_cache::{ToolCache, ToolCacheDecision};
