use thiserror::Error;

/// Typed error hierarchy for the dispatcher (spec §7).
///
/// Use at module boundaries — `chat`, retry, the breaker, provider
/// selection. Leaf-level plumbing keeps using `anyhow::Result` and
/// converts into `Internal` via `?`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("no provider available for model {0:?}")]
    NoProvider(Option<String>),

    #[error("circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("provider {provider} error: {message}")]
    Llm {
        provider: String,
        message: String,
        status: Option<u16>,
        request_id: Option<String>,
        retryable: bool,
        retry_after: Option<u64>,
    },

    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether this error should be retried by the retry component (spec
    /// §4.1 step 1's default `statusRetry`: 408, 429, 500-599 only).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm {
                status, retryable, ..
            } => {
                retryable
                    .then_some(())
                    .is_some_and(|()| status.is_none_or(default_status_retry))
            }
            Self::Aborted | Self::Contract(_) | Self::NoProvider(_) | Self::CircuitOpen(_) => {
                false
            }
            Self::Internal(_) => false,
        }
    }

    /// Breaker classification: hard errors (client-caused, 4xx except 408/429)
    /// never count against the breaker (spec §4.3).
    pub fn is_hard(&self) -> bool {
        match self {
            Self::Llm { status, .. } => status.is_some_and(|s| !default_status_retry(s)),
            _ => true,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Llm { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Llm { status, .. } => *status,
            _ => None,
        }
    }
}

/// Default `statusRetry` classifier: 408, 429, 500-599.
pub fn default_status_retry(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// Common currency for provider adapters to report structured failure
/// information (HTTP status, request id, server retry hint) through
/// `anyhow::Error`. The dispatcher downcasts to this when classifying a
/// provider call's outcome; providers that just return a plain `anyhow!`
/// are treated as unknown/soft (retryable) by default.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
    pub request_id: Option<String>,
    pub retryable: bool,
    pub retry_after: Option<u64>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            request_id: None,
            retryable: true,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.retryable = default_status_retry(status);
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// Closed set of agent-loop error kinds (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    Aborted,
    InvalidPlanFormat,
    InvalidPlanFinal,
    PlanEmptyActions,
    MaxActionsExceeded,
    UnknownTool,
    ToolExecutionFailed,
    ToolNotAllowed,
    ToolValidationFailed,
    QuotaExceeded,
    MaxIterationsExceeded,
    UnexpectedError,
}

impl AgentErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aborted => "ABORTED",
            Self::InvalidPlanFormat => "INVALID_PLAN_FORMAT",
            Self::InvalidPlanFinal => "INVALID_PLAN_FINAL",
            Self::PlanEmptyActions => "PLAN_EMPTY_ACTIONS",
            Self::MaxActionsExceeded => "MAX_ACTIONS_EXCEEDED",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ToolNotAllowed => "TOOL_NOT_ALLOWED",
            Self::ToolValidationFailed => "TOOL_VALIDATION_FAILED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::MaxIterationsExceeded => "MAX_ITERATIONS_EXCEEDED",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

/// An agent-loop error: a closed kind plus a human message, optional cause,
/// and optional structured details (e.g. the failing quota rule/limit).
#[derive(Debug, Error)]
#[error("{kind_str}: {message}", kind_str = self.kind.as_str())]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<anyhow::Error>,
    pub details: Option<serde_json::Value>,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            details: None,
        }
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
