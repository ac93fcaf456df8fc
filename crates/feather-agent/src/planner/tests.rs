use super::*;

struct ScriptedModel(String);

#[async_trait]
impl ModelCallable for ScriptedModel {
    async fn complete(&self, _prompt: &str, _cancel: Option<&CancelToken>) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

fn ctx<'a>(input: &'a str, metadata: &'a HashMap<String, Value>, context: &'a [Message]) -> PlannerContext<'a> {
    PlannerContext {
        session_id: "s1",
        input,
        context,
        metadata,
        iteration: 0,
        cancel: None,
        prompt: None,
    }
}

#[test]
fn extract_balanced_object_ignores_braces_inside_strings() {
    let text = r#"prefix {"final": {"content": "has a } brace"}} suffix"#;
    let extracted = extract_balanced_object(text).unwrap();
    assert_eq!(extracted, r#"{"final": {"content": "has a } brace"}}"#);
}

#[test]
fn extract_balanced_object_handles_escaped_quotes() {
    let text = r#"{"final": {"content": "she said \"hi\""}}"#;
    let extracted = extract_balanced_object(text).unwrap();
    assert_eq!(extracted, text);
}

#[test]
fn extract_balanced_object_returns_none_without_braces() {
    assert!(extract_balanced_object("no json here").is_none());
}

#[tokio::test]
async fn json_planner_parses_actions() {
    let model = ScriptedModel(r#"here: {"actions": [{"tool": "echo", "input": {"x": 1}}]}"#.to_string());
    let planner = JsonPlanner::new(model, vec![]);
    let metadata = HashMap::new();
    let plan = planner.plan(&ctx("hi", &metadata, &[])).await.unwrap();
    match plan {
        AgentPlan::Actions(actions) => {
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].tool, "echo");
        }
        AgentPlan::Final(_) => panic!("expected actions"),
    }
}

#[tokio::test]
async fn json_planner_parses_final() {
    let model = ScriptedModel(r#"{"final": {"role": "assistant", "content": "done"}}"#.to_string());
    let planner = JsonPlanner::new(model, vec![]);
    let metadata = HashMap::new();
    let plan = planner.plan(&ctx("hi", &metadata, &[])).await.unwrap();
    assert_eq!(plan, AgentPlan::final_message("done"));
}

#[tokio::test]
async fn json_planner_falls_back_on_unparseable_completion() {
    let model = ScriptedModel("I don't know what to do".to_string());
    let planner = JsonPlanner::new(model, vec![]).with_fallback_message("fallback!");
    let metadata = HashMap::new();
    let plan = planner.plan(&ctx("hi", &metadata, &[])).await.unwrap();
    assert_eq!(plan, AgentPlan::final_message("fallback!"));
}

#[tokio::test]
async fn json_planner_falls_back_when_both_shapes_present() {
    let model = ScriptedModel(
        r#"{"actions": [{"tool": "echo", "input": {}}], "final": {"role": "assistant", "content": "x"}}"#
            .to_string(),
    );
    let planner = JsonPlanner::new(model, vec![]).with_fallback_message("fallback!");
    let metadata = HashMap::new();
    let plan = planner.plan(&ctx("hi", &metadata, &[])).await.unwrap();
    assert_eq!(plan, AgentPlan::final_message("fallback!"));
}

#[tokio::test]
async fn json_planner_errors_on_empty_actions() {
    let model = ScriptedModel(r#"{"actions": []}"#.to_string());
    let planner = JsonPlanner::new(model, vec![]);
    let metadata = HashMap::new();
    let err = planner.plan(&ctx("hi", &metadata, &[])).await.unwrap_err();
    assert_eq!(err.kind, AgentErrorKind::PlanEmptyActions);
}
