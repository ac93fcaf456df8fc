use chrono::{DateTime, Utc};
use feather_core::{Event, EventObserver, StepStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Running/finalized metrics for a single agent run (spec §4.15). Held by
/// [`RunTracker`] only while the run is in flight; a snapshot is handed to
/// the tracker's completion callback and the live entry dropped, matching
/// spec §9's "no cycles / the run tracker holds references only while a
/// run is active."
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub session_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<u64>,
    pub iteration_count: usize,
    pub plan_duration_ms_total: u64,
    pub step_duration_ms_total: u64,
    pub tool_duration_ms_total: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub tool_cache_hits: u64,
    pub tool_blocked: u64,
    pub quota_blocked: u64,
    pub memory_appends: u64,
    pub memory_summarizes: u64,
    pub memory_trims: u64,
    pub context_tokens_total: u64,
    pub context_tokens_max: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl RunMetrics {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            elapsed_ms: None,
            iteration_count: 0,
            plan_duration_ms_total: 0,
            step_duration_ms_total: 0,
            tool_duration_ms_total: 0,
            tool_calls: 0,
            tool_errors: 0,
            tool_cache_hits: 0,
            tool_blocked: 0,
            quota_blocked: 0,
            memory_appends: 0,
            memory_summarizes: 0,
            memory_trims: 0,
            context_tokens_total: 0,
            context_tokens_max: 0,
        }
    }
}

/// Consumes the typed event stream and maintains per-session running
/// metrics, handing a finalized [`RunMetrics`] snapshot to `on_complete`
/// when a run reaches `run.complete`/`run.error` (spec §4.15).
pub struct RunTracker {
    live: Mutex<HashMap<String, RunMetrics>>,
    on_complete: Option<Box<dyn Fn(&RunMetrics) + Send + Sync>>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            on_complete: None,
        }
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a callback invoked once, with the finalized snapshot, every
    /// time a tracked run completes or errors.
    pub fn with_on_complete(on_complete: impl Fn(&RunMetrics) + Send + Sync + 'static) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// A point-in-time copy of a still-running session's metrics, if any.
    pub fn snapshot(&self, session_id: &str) -> Option<RunMetrics> {
        self.live.lock().unwrap().get(session_id).cloned()
    }
}

impl EventObserver for RunTracker {
    fn on_event(&self, event: &Event) {
        let mut live = self.live.lock().unwrap();

        match event {
            Event::AgentRunStart { session_id, .. } => {
                live.insert(session_id.clone(), RunMetrics::new(session_id));
            }
            Event::AgentStepStart {
                session_id,
                context_turns: _,
                context_tokens,
                ..
            } => {
                if let Some(m) = live.get_mut(session_id)
                    && let Some(tokens) = context_tokens
                {
                    m.context_tokens_total += tokens;
                    m.context_tokens_max = m.context_tokens_max.max(*tokens);
                }
            }
            Event::AgentStepDone {
                session_id,
                status,
                duration_ms,
                ..
            } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.step_duration_ms_total += duration_ms;
                    if *status == StepStatus::Continue {
                        m.iteration_count += 1;
                    }
                }
            }
            Event::AgentPlan {
                session_id,
                duration_ms,
                ..
            } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.plan_duration_ms_total += duration_ms;
                }
            }
            Event::AgentToolStart { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.tool_calls += 1;
                }
            }
            Event::AgentToolEnd {
                session_id,
                cached,
                duration_ms,
                ..
            } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.tool_duration_ms_total += duration_ms;
                    if *cached {
                        m.tool_cache_hits += 1;
                    }
                }
            }
            Event::AgentToolError { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.tool_errors += 1;
                }
            }
            Event::AgentToolBlocked { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.tool_blocked += 1;
                }
            }
            Event::AgentQuotaBlocked { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.quota_blocked += 1;
                }
            }
            Event::AgentMemoryAppend { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.memory_appends += 1;
                }
            }
            Event::AgentMemorySummarize { session_id } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.memory_summarizes += 1;
                }
            }
            Event::AgentMemoryTrim { session_id, .. } => {
                if let Some(m) = live.get_mut(session_id) {
                    m.memory_trims += 1;
                }
            }
            Event::AgentRunComplete {
                session_id,
                elapsed_ms,
                ..
            } => {
                if let Some(mut m) = live.remove(session_id) {
                    m.status = RunStatus::Completed;
                    m.completed_at = Some(Utc::now());
                    m.elapsed_ms = Some(*elapsed_ms);
                    if let Some(cb) = &self.on_complete {
                        cb(&m);
                    }
                }
            }
            Event::AgentRunError {
                session_id,
                elapsed_ms,
                ..
            } => {
                if let Some(mut m) = live.remove(session_id) {
                    m.status = RunStatus::Error;
                    m.completed_at = Some(Utc::now());
                    m.elapsed_ms = Some(*elapsed_ms);
                    if let Some(cb) = &self.on_complete {
                        cb(&m);
                    }
                }
            }
            _ => {}
        }
    }
}
