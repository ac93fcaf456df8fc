pub mod errors;
pub mod event;
pub mod message;
pub mod plan;
pub mod provider;

pub use errors::{AgentError, AgentErrorKind, DispatchError, ProviderError};
pub use event::{Event, EventBus, EventObserver, StepStatus};
pub use message::{ChatRequest, ChatResponse, Message, Role, TokenUsage};
pub use plan::{AgentPlan, AgentRunResult, PlannedAction, StepTrace};
pub use provider::{
    BoxStream, ChatChunk, ChatRetryConfig, LLMProvider, ModelDecl, ModelPricing, ProviderEntry,
    ProviderMetrics,
};
