use super::*;
use crate::policy::AllowListPolicy;
use crate::quota::{InProcessQuota, QuotaRule, QuotaScope};
use crate::tool::{Tool, ToolResult};
use async_trait::async_trait;
use feather_memory::{InProcessStore, Memory, MemoryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn memory() -> Arc<Memory<InProcessStore>> {
    Arc::new(Memory::new(InProcessStore::new(), MemoryConfig::default()))
}

struct ScriptedPlanner {
    plans: std::sync::Mutex<std::collections::VecDeque<AgentPlan>>,
}

impl ScriptedPlanner {
    fn new(plans: Vec<AgentPlan>) -> Self {
        Self {
            plans: std::sync::Mutex::new(plans.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _ctx: &PlannerContext<'_>) -> Result<AgentPlan, AgentError> {
        let mut plans = self.plans.lock().unwrap();
        Ok(plans.pop_front().unwrap_or_else(|| AgentPlan::final_message("out of script")))
    }
}

struct EchoTool {
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes input"
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::ok(input))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "boom"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        Err(anyhow::anyhow!("kaboom"))
    }
}

fn registry_with_echo() -> ToolRegistry {
    let mut r = ToolRegistry::new();
    r.register(Arc::new(EchoTool { calls: AtomicUsize::new(0) }));
    r
}

#[tokio::test]
async fn immediate_final_completes_without_acting() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::final_message("hello!")]);
    let agent = Agent::new(memory(), planner, ToolRegistry::new(), AgentConfig::default());
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Completed { output, iteration_count, .. } => {
            assert_eq!(output.content, "hello!");
            assert_eq!(iteration_count, 0);
        }
        AgentRunResult::Error { error, .. } => panic!("unexpected error: {error}"),
    }
}

#[tokio::test]
async fn runs_a_tool_then_finishes() {
    let planner = ScriptedPlanner::new(vec![
        AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!({"x": 1}),
        }]),
        AgentPlan::final_message("done"),
    ]);
    let agent = Agent::new(memory(), planner, registry_with_echo(), AgentConfig::default());
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Completed { output, steps, iteration_count, .. } => {
            assert_eq!(output.content, "done");
            assert_eq!(iteration_count, 1);
            assert_eq!(steps.len(), 2);
            assert_eq!(steps[0].tool_results, vec![("echo".to_string(), true)]);
        }
        AgentRunResult::Error { error, .. } => panic!("unexpected error: {error}"),
    }
}

struct CapturingObserver {
    events: std::sync::Mutex<Vec<Event>>,
}

impl CapturingObserver {
    fn new() -> Self {
        Self { events: std::sync::Mutex::new(Vec::new()) }
    }
}

impl feather_core::EventObserver for CapturingObserver {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn unknown_tool_fails_the_run() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::actions(vec![PlannedAction {
        tool: "nonexistent".to_string(),
        input: Value::Null,
    }])]);
    let observer = Arc::new(CapturingObserver::new());
    let agent = Agent::new(memory(), planner, ToolRegistry::new(), AgentConfig::default())
        .with_event_bus(EventBus::new().with_observer(observer.clone()));
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Error { error, steps, .. } => {
            assert_eq!(error.kind, AgentErrorKind::UnknownTool);
            // The failing iteration's partial step is attached (spec §8
            // scenario 5), not dropped.
            assert_eq!(steps.len(), 1);
            assert!(steps[0].plan_summary.contains("nonexistent"));
        }
        AgentRunResult::Completed { .. } => panic!("expected failure"),
    }

    let events = observer.events.lock().unwrap();
    let step_done_error = events.iter().any(|e| {
        matches!(e, Event::AgentStepDone { status: StepStatus::Error, .. })
    });
    assert!(step_done_error, "expected an agent.step.done{{status=error}} event");
}

#[tokio::test]
async fn tool_not_in_allow_list_is_blocked() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::actions(vec![PlannedAction {
        tool: "echo".to_string(),
        input: Value::Null,
    }])]);
    let agent = Agent::new(memory(), planner, registry_with_echo(), AgentConfig::default())
        .with_policy(Arc::new(AllowListPolicy::new(Vec::<String>::new())));
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Error { error, .. } => assert_eq!(error.kind, AgentErrorKind::ToolNotAllowed),
        AgentRunResult::Completed { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn tool_execution_failure_is_wrapped() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::actions(vec![PlannedAction {
        tool: "boom".to_string(),
        input: Value::Null,
    }])]);
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FailingTool));
    let agent = Agent::new(memory(), planner, registry, AgentConfig::default());
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Error { error, .. } => assert_eq!(error.kind, AgentErrorKind::ToolExecutionFailed),
        AgentRunResult::Completed { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn quota_exceeded_fails_the_run() {
    let planner = ScriptedPlanner::new(vec![
        AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!(1),
        }]),
        AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!(2),
        }]),
    ]);
    let quota = InProcessQuota::new(vec![QuotaRule::new(
        "per-session-tool-calls",
        QuotaScope::Session,
        1,
        Duration::from_secs(60),
    )]);
    let agent = Agent::new(memory(), planner, registry_with_echo(), AgentConfig::default())
        .with_quota(Arc::new(quota));
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Error { error, .. } => assert_eq!(error.kind, AgentErrorKind::QuotaExceeded),
        AgentRunResult::Completed { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn max_iterations_exceeded_fails_the_run() {
    let mut plans = Vec::new();
    for _ in 0..5 {
        plans.push(AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!(fastrand_stub()),
        }]));
    }
    let planner = ScriptedPlanner::new(plans);
    let config = AgentConfig {
        max_iterations: 2,
        loop_detect: false,
        ..AgentConfig::default()
    };
    let agent = Agent::new(memory(), planner, registry_with_echo(), config);
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Error { error, .. } => assert_eq!(error.kind, AgentErrorKind::MaxIterationsExceeded),
        AgentRunResult::Completed { .. } => panic!("expected failure"),
    }
}

// Distinct, deterministic per-iteration inputs so loop detection (tested
// separately) doesn't also trigger here.
fn fastrand_stub() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[tokio::test]
async fn repeated_identical_plan_triggers_loop_detection() {
    let planner = ScriptedPlanner::new(vec![
        AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!("same"),
        }]),
        AgentPlan::actions(vec![PlannedAction {
            tool: "echo".to_string(),
            input: serde_json::json!("same"),
        }]),
    ]);
    let agent = Agent::new(memory(), planner, registry_with_echo(), AgentConfig::default());
    let result = agent.run("s1", "hi", HashMap::new(), None).await;
    match result {
        AgentRunResult::Completed { iteration_count, .. } => {
            // Stopped after the first action ran once; the repeated plan
            // synthesized a final instead of running the tool again.
            assert_eq!(iteration_count, 1);
        }
        AgentRunResult::Error { error, .. } => panic!("unexpected error: {error}"),
    }
}

#[tokio::test]
async fn empty_session_id_fails_fast() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::final_message("x")]);
    let agent = Agent::new(memory(), planner, ToolRegistry::new(), AgentConfig::default());
    let result = agent.run("", "hi", HashMap::new(), None).await;
    assert!(!result.is_completed());
}

#[tokio::test]
async fn cancelled_token_aborts_before_planning() {
    let planner = ScriptedPlanner::new(vec![AgentPlan::final_message("should not get here")]);
    let agent = Agent::new(memory(), planner, ToolRegistry::new(), AgentConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = agent.run("s1", "hi", HashMap::new(), Some(cancel)).await;
    match result {
        AgentRunResult::Error { error, .. } => assert_eq!(error.kind, AgentErrorKind::Aborted),
        AgentRunResult::Completed { .. } => panic!("expected abort"),
    }
}
