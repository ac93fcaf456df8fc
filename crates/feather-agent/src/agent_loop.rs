use crate::planner::{Planner, PlannerContext};
use crate::policy::{AfterToolEvaluation, BeforeToolCtx, NoopPolicy, Policy};
use crate::quota::{ConsumeArgs, Quota};
use crate::tool::{ToolContext, ToolRegistry};
use feather_core::{
    AgentError, AgentErrorKind, AgentPlan, AgentRunResult, Event, EventBus, Message, PlannedAction,
    Role, StepStatus, StepTrace,
};
use feather_dispatch::{CancelToken, ToolCache, ToolCacheDecision};
use feather_memory::{ContextOpts, MemoryManager, MemoryTurn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Tunables for a single [`Agent`] (spec §4.11, §5).
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_actions_per_plan: usize,
    /// Synthesize a final message and stop when the current plan is
    /// structurally identical (tool sequence + canonical input fingerprint)
    /// to the previous iteration's (spec §4.11 S2).
    pub loop_detect: bool,
    pub context: ContextOpts,
    pub default_tool_cache_ttl_override: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_actions_per_plan: 8,
            loop_detect: true,
            context: ContextOpts::default(),
            default_tool_cache_ttl_override: None,
        }
    }
}

/// Caller-supplied hook checked each iteration before acting (spec §4.11
/// S3): `should_stop({iteration}) -> Option<message>`.
pub type StopHook = Box<dyn Fn(usize) -> Option<String> + Send + Sync>;

/// Bounded plan→act→observe state machine (spec §4.11). Owns its tool map
/// and caches; the memory backend and planner are caller-injected (spec
/// §3's "Lifecycle/ownership").
pub struct Agent<M: MemoryManager, P: Planner> {
    memory: Arc<M>,
    planner: P,
    tools: ToolRegistry,
    policy: Arc<dyn Policy>,
    quota: Option<Arc<dyn Quota>>,
    tool_cache: Option<ToolCache>,
    events: EventBus,
    config: AgentConfig,
    stop_hook: Option<StopHook>,
}

fn plan_fingerprint(actions: &[PlannedAction]) -> String {
    let tuples: Vec<(String, String)> = actions
        .iter()
        .map(|a| (a.tool.clone(), feather_dispatch::stable_json_string(&a.input)))
        .collect();
    feather_dispatch::stable_json_string(&serde_json::to_value(tuples).unwrap_or(Value::Null))
}

fn plan_summary(plan: &AgentPlan) -> String {
    match plan {
        AgentPlan::Actions(actions) => {
            let tools: Vec<&str> = actions.iter().map(|a| a.tool.as_str()).collect();
            format!("actions: [{}]", tools.join(", "))
        }
        AgentPlan::Final(content) => format!("final: {content}"),
    }
}

fn memory_turns_to_messages(turns: &[MemoryTurn]) -> Vec<Message> {
    turns
        .iter()
        .map(|t| Message {
            role: t.role,
            content: t.content.clone(),
            tool_name: None,
        })
        .collect()
}

impl<M: MemoryManager, P: Planner> Agent<M, P> {
    pub fn new(memory: Arc<M>, planner: P, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            memory,
            planner,
            tools,
            policy: Arc::new(NoopPolicy),
            quota: None,
            tool_cache: None,
            events: EventBus::new(),
            config,
            stop_hook: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn Quota>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_tool_cache(mut self, cache: ToolCache) -> Self {
        self.tool_cache = Some(cache);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_stop_hook(mut self, hook: StopHook) -> Self {
        self.stop_hook = Some(hook);
        self
    }

    /// Folds a session's older turns into a summary (spec §4.9
    /// `summarize`), emitting `Event::AgentMemorySummarize` on success.
    /// Maintenance operation — callers invoke it outside the plan→act
    /// cycle, typically on a schedule or context-budget trigger.
    pub async fn summarize_memory(&self, session_id: &str) -> anyhow::Result<()> {
        self.memory.summarize(session_id).await?;
        self.events.emit(Event::AgentMemorySummarize {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Keeps only the most recent `retain_turns` (spec §4.9 `trim`),
    /// emitting `Event::AgentMemoryTrim` on success.
    pub async fn trim_memory(&self, session_id: &str, retain_turns: usize) -> anyhow::Result<()> {
        self.memory.trim(session_id, retain_turns).await?;
        self.events.emit(Event::AgentMemoryTrim {
            session_id: session_id.to_string(),
            retain_turns,
        });
        Ok(())
    }

    /// Runs a full plan→act→observe cycle for one user input, returning
    /// once a final assistant message is produced or the run fails (spec
    /// §4.11's S0-S7 state machine).
    pub async fn run(
        &self,
        session_id: &str,
        input: &str,
        metadata: HashMap<String, Value>,
        cancel: Option<CancelToken>,
    ) -> AgentRunResult {
        let started = Instant::now();

        // S0 Init
        if session_id.trim().is_empty() || input.trim().is_empty() {
            return AgentRunResult::Error {
                error: AgentError::new(
                    AgentErrorKind::UnexpectedError,
                    "sessionId and input must be non-empty",
                ),
                steps: Vec::new(),
                iteration_count: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }
        if let Err(e) = self.memory.append(session_id, MemoryTurn::new(Role::User, input)).await {
            return AgentRunResult::Error {
                error: AgentError::new(AgentErrorKind::UnexpectedError, "failed to append user turn").with_cause(e),
                steps: Vec::new(),
                iteration_count: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }
        self.events.emit(Event::AgentMemoryAppend {
            session_id: session_id.to_string(),
            role: Role::User.as_str().to_string(),
        });
        self.events.emit(Event::AgentRunStart {
            session_id: session_id.to_string(),
            input: input.to_string(),
        });

        let mut iteration = 0usize;
        let mut steps: Vec<StepTrace> = Vec::new();
        let mut previous_plan_fingerprint: Option<String> = None;

        loop {
            match self
                .step(session_id, &metadata, iteration, cancel.as_ref(), &mut previous_plan_fingerprint)
                .await
            {
                StepOutcome::Continue(trace) => {
                    steps.push(trace);
                    iteration += 1;
                }
                StepOutcome::Final(content, trace) => {
                    steps.push(trace);
                    let output = Message::assistant(content);
                    match self.memory.append(session_id, MemoryTurn::new(Role::Assistant, &output.content)).await {
                        Ok(()) => self.events.emit(Event::AgentMemoryAppend {
                            session_id: session_id.to_string(),
                            role: Role::Assistant.as_str().to_string(),
                        }),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to append final assistant turn; returning result anyway");
                        }
                    }
                    self.events.emit(Event::AgentRunComplete {
                        session_id: session_id.to_string(),
                        output: output.content.clone(),
                        steps: steps.len(),
                        iteration_count: iteration,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    return AgentRunResult::Completed {
                        output,
                        steps,
                        iteration_count: iteration,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }
                StepOutcome::Error(error, trace) => {
                    steps.push(trace);
                    self.events.emit(Event::AgentRunError {
                        session_id: session_id.to_string(),
                        error: error.message.clone(),
                        steps: steps.len(),
                        iteration_count: iteration,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    return AgentRunResult::Error {
                        error,
                        steps,
                        iteration_count: iteration,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }
        }
    }

    async fn step(
        &self,
        session_id: &str,
        metadata: &HashMap<String, Value>,
        iteration: usize,
        cancel: Option<&CancelToken>,
        previous_plan_fingerprint: &mut Option<String>,
    ) -> StepOutcome {
        let step_started = Instant::now();

        // S1 Step
        if iteration >= self.config.max_iterations {
            let error = AgentError::new(
                AgentErrorKind::MaxIterationsExceeded,
                format!("exceeded maxIterations ({})", self.config.max_iterations),
            );
            let trace = self.error_trace(session_id, iteration, "", Vec::new(), step_started);
            return StepOutcome::Error(error, trace);
        }
        if let Some(c) = cancel
            && c.is_cancelled()
        {
            let error = AgentError::new(AgentErrorKind::Aborted, "run was cancelled");
            let trace = self.error_trace(session_id, iteration, "", Vec::new(), step_started);
            return StepOutcome::Error(error, trace);
        }

        let turns = match self.memory.get_context(session_id, self.config.context).await {
            Ok(t) => t,
            Err(e) => {
                let error = AgentError::new(AgentErrorKind::UnexpectedError, "failed to load context").with_cause(e);
                let trace = self.error_trace(session_id, iteration, "", Vec::new(), step_started);
                return StepOutcome::Error(error, trace);
            }
        };
        let context_tokens: u64 = turns.iter().filter_map(|t| t.tokens).sum();
        self.events.emit(Event::AgentStepStart {
            session_id: session_id.to_string(),
            iteration,
            context_turns: turns.len(),
            context_tokens: Some(context_tokens),
        });

        let messages = memory_turns_to_messages(&turns);
        let last_user_input = turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("");

        // S2 Plan
        let plan_started = Instant::now();
        let planner_ctx = PlannerContext {
            session_id,
            input: last_user_input,
            context: &messages,
            metadata,
            iteration,
            cancel,
            prompt: None,
        };
        let plan = match self.planner.plan(&planner_ctx).await {
            Ok(p) => p,
            Err(e) => {
                let trace = self.error_trace(session_id, iteration, "", Vec::new(), step_started);
                return StepOutcome::Error(e, trace);
            }
        };
        self.events.emit(Event::AgentPlan {
            session_id: session_id.to_string(),
            iteration,
            plan_summary: plan_summary(&plan),
            duration_ms: plan_started.elapsed().as_millis() as u64,
        });

        let actions = match plan {
            AgentPlan::Final(content) => {
                return StepOutcome::Final(
                    content,
                    self.done_trace(session_id, iteration, "final", Vec::new(), step_started),
                );
            }
            AgentPlan::Actions(actions) => actions,
        };
        let actions_summary = {
            let tools: Vec<&str> = actions.iter().map(|a| a.tool.as_str()).collect();
            format!("actions: [{}]", tools.join(", "))
        };
        if actions.is_empty() {
            let error = AgentError::new(AgentErrorKind::PlanEmptyActions, "plan had zero actions");
            let trace = self.error_trace(session_id, iteration, &actions_summary, Vec::new(), step_started);
            return StepOutcome::Error(error, trace);
        }
        if actions.len() > self.config.max_actions_per_plan {
            let error = AgentError::new(
                AgentErrorKind::MaxActionsExceeded,
                format!(
                    "plan had {} actions, exceeding maxActionsPerPlan ({})",
                    actions.len(),
                    self.config.max_actions_per_plan
                ),
            );
            let trace = self.error_trace(session_id, iteration, &actions_summary, Vec::new(), step_started);
            return StepOutcome::Error(error, trace);
        }

        let fingerprint = plan_fingerprint(&actions);
        if self.config.loop_detect && previous_plan_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return StepOutcome::Final(
                "I repeated the same plan twice in a row, so I'm stopping here.".to_string(),
                self.done_trace(session_id, iteration, "final (loop detected)", Vec::new(), step_started),
            );
        }
        *previous_plan_fingerprint = Some(fingerprint);

        // S3 Stop hook
        if let Some(hook) = &self.stop_hook
            && let Some(message) = hook(iteration)
        {
            return StepOutcome::Final(message, self.done_trace(session_id, iteration, "final (stop hook)", Vec::new(), step_started));
        }

        // S4 Act
        let mut tool_results = Vec::with_capacity(actions.len());
        for action in &actions {
            match self.act(session_id, metadata, iteration, action, cancel).await {
                Ok(success) => tool_results.push((action.tool.clone(), success)),
                Err(e) => {
                    let trace = self.error_trace(session_id, iteration, &actions_summary, tool_results, step_started);
                    return StepOutcome::Error(e, trace);
                }
            }
        }

        // S5 StepDone
        StepOutcome::Continue(self.done_trace(session_id, iteration, &actions_summary, tool_results, step_started))
    }

    fn done_trace(
        &self,
        session_id: &str,
        iteration: usize,
        plan_summary: &str,
        tool_results: Vec<(String, bool)>,
        step_started: Instant,
    ) -> StepTrace {
        let duration_ms = step_started.elapsed().as_millis() as u64;
        let status = if tool_results.iter().any(|(_, ok)| !ok) {
            StepStatus::Error
        } else if plan_summary.starts_with("final") {
            StepStatus::Final
        } else {
            StepStatus::Continue
        };
        self.events.emit(Event::AgentStepDone {
            session_id: session_id.to_string(),
            iteration,
            status,
            duration_ms,
        });
        StepTrace {
            iteration,
            plan_summary: plan_summary.to_string(),
            tool_results,
            duration_ms,
        }
    }

    /// Builds the `StepTrace` for an iteration that raised an `AgentError`
    /// (spec §4.11 S7: "on any raised AgentError, attach the partial step;
    /// emit step.done status=error"). Status is always `Error` regardless
    /// of `tool_results`, unlike [`Self::done_trace`].
    fn error_trace(
        &self,
        session_id: &str,
        iteration: usize,
        plan_summary: &str,
        tool_results: Vec<(String, bool)>,
        step_started: Instant,
    ) -> StepTrace {
        let duration_ms = step_started.elapsed().as_millis() as u64;
        self.events.emit(Event::AgentStepDone {
            session_id: session_id.to_string(),
            iteration,
            status: StepStatus::Error,
            duration_ms,
        });
        StepTrace {
            iteration,
            plan_summary: plan_summary.to_string(),
            tool_results,
            duration_ms,
        }
    }

    async fn act(
        &self,
        session_id: &str,
        metadata: &HashMap<String, Value>,
        iteration: usize,
        action: &PlannedAction,
        cancel: Option<&CancelToken>,
    ) -> Result<bool, AgentError> {
        // step 1: Policy.beforeTool
        let tool_ctx = ToolContext {
            cancel: cancel.cloned(),
            metadata: metadata.clone(),
        };
        let before = self
            .policy
            .before_tool(
                action,
                &BeforeToolCtx {
                    session_id,
                    iteration,
                    tool_ctx: &tool_ctx,
                },
            )
            .map_err(|violation| {
                self.events.emit(Event::AgentToolBlocked {
                    session_id: session_id.to_string(),
                    iteration,
                    tool: action.tool.clone(),
                    reason: violation.message.clone(),
                });
                let kind = if violation.not_allowed {
                    AgentErrorKind::ToolNotAllowed
                } else {
                    AgentErrorKind::ToolValidationFailed
                };
                AgentError::new(kind, violation.message)
            })?;
        let action = before.action;

        let Some(tool) = self.tools.get(&action.tool) else {
            self.events.emit(Event::AgentToolBlocked {
                session_id: session_id.to_string(),
                iteration,
                tool: action.tool.clone(),
                reason: "unknown tool".to_string(),
            });
            return Err(AgentError::new(
                AgentErrorKind::UnknownTool,
                format!("no tool registered under '{}'", action.tool),
            ));
        };

        // step 2: Quota.consume
        if let Some(quota) = &self.quota
            && let Err(exceeded) = quota
                .consume(ConsumeArgs {
                    session_id,
                    metadata,
                    tool: Some(action.tool.as_str()),
                })
                .await
        {
            self.events.emit(Event::AgentQuotaBlocked {
                session_id: session_id.to_string(),
                iteration,
                tool: Some(action.tool.clone()),
                error: format!("rule '{}' exceeded limit {}", exceeded.rule, exceeded.limit),
            });
            return Err(AgentError::new(
                AgentErrorKind::QuotaExceeded,
                format!("quota rule '{}' exceeded (limit {})", exceeded.rule, exceeded.limit),
            )
            .with_details(serde_json::json!({"rule": exceeded.rule, "limit": exceeded.limit, "count": exceeded.count})));
        }

        // step 3: tool cache probe
        let cache_ttl = self
            .config
            .default_tool_cache_ttl_override
            .unwrap_or_else(|| tool.cache_ttl_secs());
        let decision: Option<ToolCacheDecision> = if let Some(cache) = &self.tool_cache {
            Some(cache.prepare(&action.tool, cache_ttl, &action.input).await)
        } else {
            None
        };
        let cache_hit = decision.as_ref().and_then(|d| d.hit.clone());

        // step 4: run the tool (unless cache hit)
        let tool_started = Instant::now();
        self.events.emit(Event::AgentToolStart {
            session_id: session_id.to_string(),
            iteration,
            tool: action.tool.clone(),
            cached: cache_hit.is_some(),
        });

        let raw_result = if let Some(hit) = cache_hit {
            hit
        } else {
            match tool.execute(action.input.clone(), &tool_ctx).await {
                Ok(result) if !result.is_error => result.content,
                Ok(result) => {
                    self.events.emit(Event::AgentToolError {
                        session_id: session_id.to_string(),
                        iteration,
                        tool: action.tool.clone(),
                        error: result.content.to_string(),
                    });
                    return Err(AgentError::new(
                        AgentErrorKind::ToolExecutionFailed,
                        format!("tool '{}' reported an error", action.tool),
                    )
                    .with_details(result.content));
                }
                Err(e) => {
                    self.events.emit(Event::AgentToolError {
                        session_id: session_id.to_string(),
                        iteration,
                        tool: action.tool.clone(),
                        error: e.to_string(),
                    });
                    return Err(AgentError::new(
                        AgentErrorKind::ToolExecutionFailed,
                        format!("tool '{}' raised an exception", action.tool),
                    )
                    .with_cause(e));
                }
            }
        };

        // step 5: Policy.afterTool
        let after = self
            .policy
            .after_tool(
                raw_result,
                &AfterToolEvaluation {
                    session_id,
                    iteration,
                    action: &action,
                },
            )
            .map_err(|violation| {
                self.events.emit(Event::AgentToolError {
                    session_id: session_id.to_string(),
                    iteration,
                    tool: action.tool.clone(),
                    error: violation.message.clone(),
                });
                AgentError::new(AgentErrorKind::ToolValidationFailed, violation.message)
            })?;

        // step 6: cache write on a fresh miss
        if let (Some(cache), Some(d)) = (&self.tool_cache, &decision)
            && d.hit.is_none()
            && d.cacheable
        {
            cache.write(d, &after.result, cache_ttl).await;
        }

        // step 7: tool.end + memory append
        self.events.emit(Event::AgentToolEnd {
            session_id: session_id.to_string(),
            iteration,
            tool: action.tool.clone(),
            cached: decision.as_ref().is_some_and(|d| d.hit.is_some()),
            duration_ms: tool_started.elapsed().as_millis() as u64,
        });
        let sanitized_content = after.result.to_string();
        match self
            .memory
            .append(session_id, MemoryTurn::new(Role::Tool, format!("{}: {}", action.tool, sanitized_content)))
            .await
        {
            Ok(()) => self.events.emit(Event::AgentMemoryAppend {
                session_id: session_id.to_string(),
                role: Role::Tool.as_str().to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, tool = %action.tool, "failed to append tool turn to memory");
            }
        }

        Ok(true)
    }
}

enum StepOutcome {
    Continue(StepTrace),
    Final(String, StepTrace),
    Error(AgentError, StepTrace),
}

#[cfg(test)]
mod tests;
