use super::*;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input"
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::ok(input))
    }
}

#[tokio::test]
async fn register_and_get_round_trips() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    let tool = registry.get("echo").expect("registered tool");
    let result = tool
        .execute(serde_json::json!({"a": 1}), &ToolContext::default())
        .await
        .unwrap();
    assert_eq!(result.content, serde_json::json!({"a": 1}));
    assert!(!result.is_error);
}

#[test]
fn manifest_is_sorted_by_name() {
    struct B;
    #[async_trait]
    impl Tool for B {
        fn name(&self) -> &str {
            "bbb"
        }
        fn description(&self) -> &str {
            "b"
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(Value::Null))
        }
    }
    struct A;
    #[async_trait]
    impl Tool for A {
        fn name(&self) -> &str {
            "aaa"
        }
        fn description(&self) -> &str {
            "a"
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(Value::Null))
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(B));
    registry.register(Arc::new(A));
    let names: Vec<_> = registry
        .manifest()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["aaa", "bbb"]);
}

#[test]
fn contains_reflects_registration() {
    let mut registry = ToolRegistry::new();
    assert!(!registry.contains("echo"));
    registry.register(Arc::new(EchoTool));
    assert!(registry.contains("echo"));
}
