use serde_json::Value;
use std::sync::Arc;

/// Every event carries `{type, sessionId?, agentId?}` plus type-specific
/// fields (spec §6). Represented as a flat enum rather than a generic
/// `{type, fields}` bag so emitters get compile-time field checking.
#[derive(Debug, Clone)]
pub enum Event {
    CallStart {
        provider: String,
        model: String,
        request_id: String,
    },
    CallSuccess {
        provider: String,
        model: String,
        request_id: String,
        cost_usd: f64,
    },
    CallError {
        provider: String,
        model: String,
        request_id: String,
        error: String,
    },
    CallRetry {
        provider: String,
        model: String,
        request_id: String,
        attempt: u32,
        wait_ms: u64,
    },
    BreakerOpen {
        provider: String,
    },
    BreakerClose {
        provider: String,
    },
    AgentRunStart {
        session_id: String,
        input: String,
    },
    AgentRunComplete {
        session_id: String,
        output: String,
        steps: usize,
        iteration_count: usize,
        elapsed_ms: u64,
    },
    AgentRunError {
        session_id: String,
        error: String,
        steps: usize,
        iteration_count: usize,
        elapsed_ms: u64,
    },
    AgentStepStart {
        session_id: String,
        iteration: usize,
        context_turns: usize,
        context_tokens: Option<u64>,
    },
    AgentStepDone {
        session_id: String,
        iteration: usize,
        status: StepStatus,
        duration_ms: u64,
    },
    AgentPlan {
        session_id: String,
        iteration: usize,
        plan_summary: String,
        duration_ms: u64,
    },
    AgentToolStart {
        session_id: String,
        iteration: usize,
        tool: String,
        cached: bool,
    },
    AgentToolEnd {
        session_id: String,
        iteration: usize,
        tool: String,
        cached: bool,
        duration_ms: u64,
    },
    AgentToolError {
        session_id: String,
        iteration: usize,
        tool: String,
        error: String,
    },
    AgentToolBlocked {
        session_id: String,
        iteration: usize,
        tool: String,
        reason: String,
    },
    AgentQuotaBlocked {
        session_id: String,
        iteration: usize,
        tool: Option<String>,
        error: String,
    },
    AgentMemoryAppend {
        session_id: String,
        role: String,
    },
    AgentMemorySummarize {
        session_id: String,
    },
    AgentMemoryTrim {
        session_id: String,
        retain_turns: usize,
    },
}

impl Event {
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::CallStart { .. } => "call.start",
            Event::CallSuccess { .. } => "call.success",
            Event::CallError { .. } => "call.error",
            Event::CallRetry { .. } => "call.retry",
            Event::BreakerOpen { .. } => "breaker.open",
            Event::BreakerClose { .. } => "breaker.close",
            Event::AgentRunStart { .. } => "agent.run.start",
            Event::AgentRunComplete { .. } => "agent.run.complete",
            Event::AgentRunError { .. } => "agent.run.error",
            Event::AgentStepStart { .. } => "agent.step.start",
            Event::AgentStepDone { .. } => "agent.step.done",
            Event::AgentPlan { .. } => "agent.plan",
            Event::AgentToolStart { .. } => "agent.tool.start",
            Event::AgentToolEnd { .. } => "agent.tool.end",
            Event::AgentToolError { .. } => "agent.tool.error",
            Event::AgentToolBlocked { .. } => "agent.tool.blocked",
            Event::AgentQuotaBlocked { .. } => "agent.quota.blocked",
            Event::AgentMemoryAppend { .. } => "agent.memory.append",
            Event::AgentMemorySummarize { .. } => "agent.memory.summarize",
            Event::AgentMemoryTrim { .. } => "agent.memory.trim",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::AgentRunStart { session_id, .. }
            | Event::AgentRunComplete { session_id, .. }
            | Event::AgentRunError { session_id, .. }
            | Event::AgentStepStart { session_id, .. }
            | Event::AgentStepDone { session_id, .. }
            | Event::AgentPlan { session_id, .. }
            | Event::AgentToolStart { session_id, .. }
            | Event::AgentToolEnd { session_id, .. }
            | Event::AgentToolError { session_id, .. }
            | Event::AgentToolBlocked { session_id, .. }
            | Event::AgentQuotaBlocked { session_id, .. }
            | Event::AgentMemoryAppend { session_id, .. }
            | Event::AgentMemorySummarize { session_id }
            | Event::AgentMemoryTrim { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Best-effort structured payload for sinks that serialize events
    /// (NDJSON, metrics). Field names mirror spec §6's event schema.
    pub fn fields(&self) -> Value {
        match self {
            Event::CallStart {
                provider,
                model,
                request_id,
            } => serde_json::json!({"provider": provider, "model": model, "requestId": request_id}),
            Event::CallSuccess {
                provider,
                model,
                request_id,
                cost_usd,
            } => {
                serde_json::json!({"provider": provider, "model": model, "requestId": request_id, "costUSD": cost_usd})
            }
            Event::CallError {
                provider,
                model,
                request_id,
                error,
            } => {
                serde_json::json!({"provider": provider, "model": model, "requestId": request_id, "error": error})
            }
            Event::CallRetry {
                provider,
                model,
                request_id,
                attempt,
                wait_ms,
            } => {
                serde_json::json!({"provider": provider, "model": model, "requestId": request_id, "attempt": attempt, "waitMs": wait_ms})
            }
            Event::BreakerOpen { provider } | Event::BreakerClose { provider } => {
                serde_json::json!({"provider": provider})
            }
            Event::AgentRunStart { input, .. } => serde_json::json!({"input": input}),
            Event::AgentRunComplete {
                output,
                steps,
                iteration_count,
                elapsed_ms,
                ..
            } => {
                serde_json::json!({"output": output, "steps": steps, "iterationCount": iteration_count, "elapsedMs": elapsed_ms})
            }
            Event::AgentRunError {
                error,
                steps,
                iteration_count,
                elapsed_ms,
                ..
            } => {
                serde_json::json!({"error": error, "steps": steps, "iterationCount": iteration_count, "elapsedMs": elapsed_ms})
            }
            Event::AgentStepStart {
                iteration,
                context_turns,
                context_tokens,
                ..
            } => {
                serde_json::json!({"iteration": iteration, "contextTurns": context_turns, "contextTokens": context_tokens})
            }
            Event::AgentStepDone {
                iteration,
                status,
                duration_ms,
                ..
            } => {
                serde_json::json!({"iteration": iteration, "status": status.as_str(), "durationMs": duration_ms})
            }
            Event::AgentPlan {
                iteration,
                plan_summary,
                duration_ms,
                ..
            } => {
                serde_json::json!({"iteration": iteration, "plan": plan_summary, "durationMs": duration_ms})
            }
            Event::AgentToolStart {
                iteration,
                tool,
                cached,
                ..
            } => serde_json::json!({"iteration": iteration, "tool": tool, "cached": cached}),
            Event::AgentToolEnd {
                iteration,
                tool,
                cached,
                duration_ms,
                ..
            } => {
                serde_json::json!({"iteration": iteration, "tool": tool, "cached": cached, "durationMs": duration_ms})
            }
            Event::AgentToolError {
                iteration,
                tool,
                error,
                ..
            } => serde_json::json!({"iteration": iteration, "tool": tool, "error": error}),
            Event::AgentToolBlocked {
                iteration,
                tool,
                reason,
                ..
            } => serde_json::json!({"iteration": iteration, "tool": tool, "error": reason}),
            Event::AgentQuotaBlocked {
                iteration,
                tool,
                error,
                ..
            } => serde_json::json!({"iteration": iteration, "tool": tool, "error": error}),
            Event::AgentMemoryAppend { role, .. } => serde_json::json!({"turn": role}),
            Event::AgentMemorySummarize { .. } => serde_json::json!({}),
            Event::AgentMemoryTrim { retain_turns, .. } => {
                serde_json::json!({"retainTurns": retain_turns})
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Continue,
    Final,
    Error,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Continue => "continue",
            StepStatus::Final => "final",
            StepStatus::Error => "error",
        }
    }
}

/// Synchronous observer callback. Exceptions/panics in an observer must
/// never destabilize the caller — implementations of [`EventBus::emit`]
/// catch_unwind around each observer (spec §4.15, §5).
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Fan-out to zero or more observers. Observer failures are swallowed.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: Event) {
        for obs in &self.observers {
            let obs = obs.clone();
            let ev = event.clone();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| obs.on_event(&ev))).is_err()
            {
                tracing::warn!(event = event.type_name(), "event observer panicked; swallowed");
            }
        }
    }
}
