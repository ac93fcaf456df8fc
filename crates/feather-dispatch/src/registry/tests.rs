use super::*;
use feather_core::{ChatRequest, ChatResponse, LLMProvider, ModelPricing};
use std::sync::Arc;

struct StubProvider;

#[async_trait::async_trait]
impl LLMProvider for StubProvider {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        unreachable!("registry tests never invoke the provider")
    }
}

fn entry(key: &str, models: Vec<ModelDecl>) -> ProviderEntry {
    ProviderEntry {
        key: key.to_string(),
        instance: Arc::new(StubProvider),
        models,
    }
}

fn model(name: &str, input: f64, output: f64) -> ModelDecl {
    ModelDecl {
        name: name.to_string(),
        aliases: vec![],
        pricing: ModelPricing {
            input_per_1k: input,
            output_per_1k: output,
        },
    }
}

#[test]
fn first_policy_returns_first_registered_candidate() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry("a", vec![model("m1", 1.0, 1.0)]));
    registry.add(entry("b", vec![model("m1", 0.1, 0.1)]));

    let selection = registry.choose(Some("m1")).unwrap();
    assert_eq!(selection.entry.key, "a");
}

#[test]
fn roundrobin_cycles_through_candidates() {
    let registry = ProviderRegistry::new(SelectionPolicy::RoundRobin);
    registry.add(entry("a", vec![model("m1", 1.0, 1.0)]));
    registry.add(entry("b", vec![model("m1", 1.0, 1.0)]));

    let keys: Vec<String> = (0..4)
        .map(|_| registry.choose(Some("m1")).unwrap().entry.key)
        .collect();
    assert_eq!(keys, vec!["a", "b", "a", "b"]);
}

#[test]
fn cheapest_picks_lowest_combined_price_breaking_ties_by_registration_order() {
    let registry = ProviderRegistry::new(SelectionPolicy::Cheapest);
    registry.add(entry("expensive", vec![model("m1", 5.0, 5.0)]));
    registry.add(entry("cheap", vec![model("m1", 0.5, 0.5)]));
    registry.add(entry("also-cheap", vec![model("m1", 0.5, 0.5)]));

    let selection = registry.choose(Some("m1")).unwrap();
    assert_eq!(selection.entry.key, "cheap");
}

#[test]
fn no_candidates_yields_no_provider_error() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry("a", vec![model("m1", 1.0, 1.0)]));
    assert!(registry.choose(Some("missing-model")).is_err());
}

#[test]
fn missing_model_argument_considers_all_candidates() {
    let registry = ProviderRegistry::new(SelectionPolicy::First);
    registry.add(entry("a", vec![model("m1", 1.0, 1.0)]));
    assert!(registry.choose(None).is_ok());
}

#[test]
fn parse_model_ref_splits_known_prefixes() {
    let parsed = parse_model_ref("groq/llama-3.1-70b");
    assert_eq!(parsed.provider, Some("groq"));
    assert_eq!(parsed.model, "llama-3.1-70b");
}

#[test]
fn parse_model_ref_leaves_unknown_prefixes_alone() {
    let parsed = parse_model_ref("meta-llama/Llama-3.3-70B");
    assert_eq!(parsed.provider, None);
    assert_eq!(parsed.model, "meta-llama/Llama-3.3-70B");
}

#[test]
fn infer_provider_recognizes_well_known_model_prefixes() {
    assert_eq!(infer_provider_from_model("claude-3-opus"), Some("anthropic"));
    assert_eq!(infer_provider_from_model("gpt-4o"), Some("openai"));
    assert_eq!(infer_provider_from_model("unknown-model"), None);
}

#[test]
fn resolve_provider_prefers_explicit_over_prefix_over_inference() {
    assert_eq!(resolve_provider(Some("openrouter"), "groq/llama"), (Some("openrouter"), "llama"));
    assert_eq!(resolve_provider(None, "groq/llama"), (Some("groq"), "llama"));
    assert_eq!(resolve_provider(None, "claude-3-opus"), (Some("anthropic"), "claude-3-opus"));
}
