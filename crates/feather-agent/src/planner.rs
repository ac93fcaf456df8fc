use async_trait::async_trait;
use feather_core::{AgentError, AgentErrorKind, AgentPlan, Message, PlannedAction};
use feather_dispatch::CancelToken;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Read-only view a planner is handed each step (spec §4.10).
pub struct PlannerContext<'a> {
    pub session_id: &'a str,
    pub input: &'a str,
    pub context: &'a [Message],
    pub metadata: &'a HashMap<String, Value>,
    pub iteration: usize,
    pub cancel: Option<&'a CancelToken>,
    /// Raw prompt the JSON-planner adapter assembled, if this invocation
    /// went through it. `None` for planners that build their own prompt.
    pub prompt: Option<&'a str>,
}

/// `planner(ctx) -> AgentPlan` (spec §4.10). Implementations decide how to
/// turn context into a plan; [`JsonPlanner`] is the adapter for a
/// free-text model callable.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &PlannerContext<'_>) -> Result<AgentPlan, AgentError>;
}

/// Raw shape a JSON-planner's model callable is expected to produce, before
/// normalization into [`AgentPlan`]. `actions` XOR `final` must be present
/// (spec §3's "exactly one of").
#[derive(Debug, Deserialize)]
struct RawPlan {
    actions: Option<Vec<RawAction>>,
    #[serde(rename = "final")]
    final_: Option<RawFinal>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    tool: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct RawFinal {
    content: String,
}

fn normalize(raw: RawPlan) -> Result<AgentPlan, AgentError> {
    match (raw.actions, raw.final_) {
        (Some(actions), None) => {
            if actions.is_empty() {
                return Err(AgentError::new(
                    AgentErrorKind::PlanEmptyActions,
                    "planner returned an empty actions list",
                ));
            }
            Ok(AgentPlan::actions(
                actions
                    .into_iter()
                    .map(|a| PlannedAction {
                        tool: a.tool,
                        input: a.input,
                    })
                    .collect(),
            ))
        }
        (None, Some(final_)) => Ok(AgentPlan::final_message(final_.content)),
        (None, None) => Err(AgentError::new(
            AgentErrorKind::InvalidPlanFormat,
            "plan has neither `actions` nor `final`",
        )),
        (Some(_), Some(_)) => Err(AgentError::new(
            AgentErrorKind::InvalidPlanFormat,
            "plan has both `actions` and `final`; exactly one is required",
        )),
    }
}

/// A model callable a [`JsonPlanner`] drives: given an assembled prompt,
/// return the model's raw text completion.
#[async_trait]
pub trait ModelCallable: Send + Sync {
    async fn complete(&self, prompt: &str, cancel: Option<&CancelToken>) -> anyhow::Result<String>;
}

/// Wraps a free-text model callable into a [`Planner`] (spec §4.10): builds
/// a system prompt plus tool manifest, invokes the model, extracts the
/// first balanced `{…}` object from the completion with a string-aware
/// scanner, and parses it as a [`RawPlan`]. On extraction/parse failure the
/// configured fallback produces a canned final message instead of failing
/// the run outright.
pub struct JsonPlanner<M: ModelCallable> {
    model: M,
    tool_manifest: Vec<Value>,
    fallback_message: String,
}

impl<M: ModelCallable> JsonPlanner<M> {
    pub fn new(model: M, tool_manifest: Vec<Value>) -> Self {
        Self {
            model,
            tool_manifest,
            fallback_message: "I couldn't determine the next action.".to_string(),
        }
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    fn system_prompt(&self) -> String {
        let manifest = serde_json::to_string_pretty(&self.tool_manifest).unwrap_or_default();
        format!(
            "You are an agent that must respond with exactly one JSON object: \
             either {{\"actions\": [{{\"tool\": string, \"input\": object}}, ...]}} \
             or {{\"final\": {{\"role\": \"assistant\", \"content\": string}}}}.\n\
             Available tools:\n{manifest}"
        )
    }

    fn fallback(&self) -> AgentPlan {
        AgentPlan::final_message(self.fallback_message.clone())
    }
}

#[async_trait]
impl<M: ModelCallable> Planner for JsonPlanner<M> {
    async fn plan(&self, ctx: &PlannerContext<'_>) -> Result<AgentPlan, AgentError> {
        let prompt = format!("{}\n\nUser input: {}", self.system_prompt(), ctx.input);
        let completion = self
            .model
            .complete(&prompt, ctx.cancel)
            .await
            .map_err(|e| AgentError::new(AgentErrorKind::InvalidPlanFormat, "planner model call failed").with_cause(e))?;

        let Some(json_slice) = extract_balanced_object(&completion) else {
            tracing::warn!("planner completion had no balanced JSON object; using fallback");
            return Ok(self.fallback());
        };

        match serde_json::from_str::<RawPlan>(json_slice) {
            Ok(raw) => match normalize(raw) {
                Ok(plan) => Ok(plan),
                Err(err) if matches!(err.kind, AgentErrorKind::InvalidPlanFormat) => {
                    tracing::warn!(error = %err.message, "planner produced invalid shape; using fallback");
                    Ok(self.fallback())
                }
                Err(err) => Err(err),
            },
            Err(e) => {
                tracing::warn!(error = %e, "planner JSON did not parse; using fallback");
                Ok(self.fallback())
            }
        }
    }
}

/// Finds the first top-level balanced `{...}` substring, tracking quote
/// state and backslash escapes so braces inside string literals don't
/// confuse the scan (spec §4.10).
fn extract_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests;
