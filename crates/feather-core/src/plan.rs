use crate::errors::AgentError;
use crate::message::Message;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub tool: String,
    pub input: Value,
}

/// Exactly one of a list of tool actions, or a final assistant message
/// (spec §3). Constructed only through [`AgentPlan::actions`] /
/// [`AgentPlan::final_message`] so the "exactly one of" invariant can't be
/// broken by direct field construction.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPlan {
    Actions(Vec<PlannedAction>),
    Final(String),
}

impl AgentPlan {
    pub fn actions(actions: Vec<PlannedAction>) -> Self {
        Self::Actions(actions)
    }

    pub fn final_message(content: impl Into<String>) -> Self {
        Self::Final(content.into())
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

#[derive(Debug, Clone)]
pub struct StepTrace {
    pub iteration: usize,
    pub plan_summary: String,
    pub tool_results: Vec<(String, bool)>,
    pub duration_ms: u64,
}

/// Tagged sum result of a full agent run (spec §3).
#[derive(Debug)]
pub enum AgentRunResult {
    Completed {
        output: Message,
        steps: Vec<StepTrace>,
        iteration_count: usize,
        elapsed_ms: u64,
    },
    Error {
        error: AgentError,
        steps: Vec<StepTrace>,
        iteration_count: usize,
        elapsed_ms: u64,
    },
}

impl AgentRunResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}
