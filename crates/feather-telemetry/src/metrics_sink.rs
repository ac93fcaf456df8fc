use feather_core::{Event, EventObserver};

/// Maps event types to `metrics` crate counter/histogram instruments (spec
/// §2, A.5: "a thin adapter over the `metrics` facade" standing in for a
/// full OTel meter exporter, which stays a Non-goal). Install any
/// `metrics::Recorder` (e.g. `metrics-exporter-prometheus`) before
/// constructing this; without one the macros below are harmless no-ops.
#[derive(Default)]
pub struct MetricsObserver;

impl MetricsObserver {
    pub fn new() -> Self {
        Self
    }
}

impl EventObserver for MetricsObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::CallStart { provider, model, .. } => {
                metrics::counter!("feather_call_start_total", "provider" => provider.clone(), "model" => model.clone())
                    .increment(1);
            }
            Event::CallSuccess {
                provider,
                model,
                cost_usd,
                ..
            } => {
                metrics::counter!("feather_call_success_total", "provider" => provider.clone(), "model" => model.clone())
                    .increment(1);
                metrics::histogram!("feather_call_cost_usd", "provider" => provider.clone(), "model" => model.clone())
                    .record(*cost_usd);
            }
            Event::CallError { provider, model, .. } => {
                metrics::counter!("feather_call_error_total", "provider" => provider.clone(), "model" => model.clone())
                    .increment(1);
            }
            Event::CallRetry {
                provider, wait_ms, ..
            } => {
                metrics::counter!("feather_call_retry_total", "provider" => provider.clone()).increment(1);
                metrics::histogram!("feather_retry_wait_ms", "provider" => provider.clone())
                    .record(*wait_ms as f64);
            }
            Event::BreakerOpen { provider } => {
                metrics::counter!("feather_breaker_open_total", "provider" => provider.clone()).increment(1);
            }
            Event::BreakerClose { provider } => {
                metrics::counter!("feather_breaker_close_total", "provider" => provider.clone()).increment(1);
            }
            Event::AgentRunStart { .. } => {
                metrics::counter!("feather_agent_run_start_total").increment(1);
            }
            Event::AgentRunComplete { elapsed_ms, .. } => {
                metrics::counter!("feather_agent_run_complete_total").increment(1);
                metrics::histogram!("feather_agent_run_elapsed_ms").record(*elapsed_ms as f64);
            }
            Event::AgentRunError { elapsed_ms, .. } => {
                metrics::counter!("feather_agent_run_error_total").increment(1);
                metrics::histogram!("feather_agent_run_elapsed_ms").record(*elapsed_ms as f64);
            }
            Event::AgentToolStart { tool, .. } => {
                metrics::counter!("feather_tool_start_total", "tool" => tool.clone()).increment(1);
            }
            Event::AgentToolEnd {
                tool,
                cached,
                duration_ms,
                ..
            } => {
                metrics::counter!("feather_tool_end_total", "tool" => tool.clone()).increment(1);
                if *cached {
                    metrics::counter!("feather_tool_cache_hit_total", "tool" => tool.clone()).increment(1);
                }
                metrics::histogram!("feather_tool_duration_ms", "tool" => tool.clone())
                    .record(*duration_ms as f64);
            }
            Event::AgentToolError { tool, .. } => {
                metrics::counter!("feather_tool_error_total", "tool" => tool.clone()).increment(1);
            }
            Event::AgentToolBlocked { tool, .. } => {
                metrics::counter!("feather_tool_blocked_total", "tool" => tool.clone()).increment(1);
            }
            Event::AgentQuotaBlocked { tool, .. } => {
                let tool = tool.clone().unwrap_or_else(|| "-".to_string());
                metrics::counter!("feather_quota_blocked_total", "tool" => tool).increment(1);
            }
            Event::AgentMemoryAppend { .. }
            | Event::AgentMemorySummarize { .. }
            | Event::AgentMemoryTrim { .. }
            | Event::AgentStepStart { .. }
            | Event::AgentStepDone { .. }
            | Event::AgentPlan { .. } => {}
        }
    }
}
