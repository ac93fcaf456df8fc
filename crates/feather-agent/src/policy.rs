use crate::tool::ToolContext;
use feather_core::PlannedAction;
use serde_json::Value;
use std::collections::HashSet;

/// What a `beforeTool` check inspects (spec §4.11 step 1, §4.12).
pub struct BeforeToolCtx<'a> {
    pub session_id: &'a str,
    pub iteration: usize,
    pub tool_ctx: &'a ToolContext,
}

/// What an `afterTool` check inspects (spec §4.11 step 5, §4.12).
pub struct AfterToolEvaluation<'a> {
    pub session_id: &'a str,
    pub iteration: usize,
    pub action: &'a PlannedAction,
}

/// Raised by `beforeTool`/`afterTool` to block or fail an action. `message`
/// is attached to the resulting `AgentError`; `sanitize` tells the loop
/// whether the attempted input must be scrubbed from any event it emits
/// (spec §4.12's "blocked actions are sanitized... to prevent leaking the
/// raw attempted input").
#[derive(Debug, Clone)]
pub struct PolicyViolation {
    pub message: String,
    pub not_allowed: bool,
}

impl PolicyViolation {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            not_allowed: false,
        }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            not_allowed: true,
        }
    }
}

/// Outcome of `beforeTool`: the (possibly rewritten) action to actually
/// run, with its input already parsed/validated.
pub struct BeforeToolOutcome {
    pub action: PlannedAction,
}

/// Outcome of `afterTool`: the (possibly redacted) result plus an optional
/// audit payload the loop attaches to the `tool.end` event.
pub struct AfterToolOutcome {
    pub result: Value,
    pub audit: Option<Value>,
}

/// Tool allow-list, schema validation, input/output redaction and audit
/// hooks (spec §4.12). Implementations compose; [`AllowListPolicy`] covers
/// the common case.
pub trait Policy: Send + Sync {
    fn before_tool(&self, action: &PlannedAction, ctx: &BeforeToolCtx<'_>) -> Result<BeforeToolOutcome, PolicyViolation>;

    fn after_tool(
        &self,
        result: Value,
        ctx: &AfterToolEvaluation<'_>,
    ) -> Result<AfterToolOutcome, PolicyViolation> {
        let _ = ctx;
        Ok(AfterToolOutcome { result, audit: None })
    }
}

/// Allows only a fixed set of tool names through; everything else is
/// rejected with `TOOL_NOT_ALLOWED` (surfaced by the loop).
pub struct AllowListPolicy {
    allowed: HashSet<String>,
}

impl AllowListPolicy {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Policy for AllowListPolicy {
    fn before_tool(&self, action: &PlannedAction, _ctx: &BeforeToolCtx<'_>) -> Result<BeforeToolOutcome, PolicyViolation> {
        if !self.allowed.contains(&action.tool) {
            return Err(PolicyViolation::not_allowed(format!(
                "tool '{}' is not in the allow-list",
                action.tool
            )));
        }
        Ok(BeforeToolOutcome {
            action: action.clone(),
        })
    }
}

/// Accepts every tool, performs no redaction. The loop's default when the
/// caller supplies no policy.
pub struct NoopPolicy;

impl Policy for NoopPolicy {
    fn before_tool(&self, action: &PlannedAction, _ctx: &BeforeToolCtx<'_>) -> Result<BeforeToolOutcome, PolicyViolation> {
        Ok(BeforeToolOutcome {
            action: action.clone(),
        })
    }
}
