use feather_core::{ModelDecl, ProviderEntry};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    First,
    RoundRobin,
    Cheapest,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub entry: ProviderEntry,
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Error)]
#[error("no provider available for model {0:?}")]
pub struct NoProvider(pub Option<String>);

/// Alias/model -> provider selection under a fixed policy (spec §4.7).
pub struct ProviderRegistry {
    entries: Mutex<Vec<ProviderEntry>>,
    policy: SelectionPolicy,
    round_robin_counter: AtomicUsize,
}

impl ProviderRegistry {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            policy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, entry: ProviderEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Direct lookup by the caller-chosen provider key, bypassing policy.
    /// Used when the dispatcher is given an explicit `provider` argument
    /// (spec §4.8 step 2: "if provider+model given, look up directly").
    pub fn get(&self, key: &str) -> Option<ProviderEntry> {
        self.entries.lock().unwrap().iter().find(|e| e.key == key).cloned()
    }

    /// Lists candidates `(entry, model)` whose declared name or alias
    /// matches `model_or_alias` (all models if `None`), then applies the
    /// registry's policy. `NoProvider` if the candidate set is empty.
    pub fn choose(&self, model_or_alias: Option<&str>) -> Result<Selection, NoProvider> {
        let entries = self.entries.lock().unwrap();
        let candidates: Vec<(&ProviderEntry, &ModelDecl)> = entries
            .iter()
            .flat_map(|entry| entry.models.iter().map(move |model| (entry, model)))
            .filter(|(_, model)| match model_or_alias {
                None => true,
                Some(name) => model.matches(name),
            })
            .collect();

        if candidates.is_empty() {
            return Err(NoProvider(model_or_alias.map(String::from)));
        }

        let (entry, model) = match self.policy {
            SelectionPolicy::First => candidates[0],
            SelectionPolicy::RoundRobin => {
                let idx = self.round_robin_counter.fetch_add(1, Ordering::SeqCst) % candidates.len();
                candidates[idx]
            }
            SelectionPolicy::Cheapest => *candidates
                .iter()
                .min_by(|a, b| {
                    let cost = |m: &ModelDecl| m.pricing.input_per_1k + m.pricing.output_per_1k;
                    cost(a.1)
                        .partial_cmp(&cost(b.1))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("candidates is non-empty"),
        };

        Ok(Selection {
            entry: entry.clone(),
            model: model.name.clone(),
            input_per_1k: model.pricing.input_per_1k,
            output_per_1k: model.pricing.output_per_1k,
        })
    }
}

/// Parsed `provider/model` reference.
pub struct ModelRef<'a> {
    pub provider: Option<&'a str>,
    pub model: &'a str,
}

const KNOWN_PREFIXES: &[&str] = &[
    "anthropic",
    "openai",
    "gemini",
    "openrouter",
    "deepseek",
    "groq",
    "mistral",
    "ollama",
];

/// Parses `"provider/model"` notation. `provider` is `None` if there's no
/// slash, or the segment before it isn't a recognized prefix — this keeps
/// `meta-llama/Llama-3.3-70B` from being misread as provider `meta-llama`.
pub fn parse_model_ref(raw: &str) -> ModelRef<'_> {
    if let Some(idx) = raw.find('/') {
        let candidate = raw[..idx].to_lowercase();
        if KNOWN_PREFIXES.contains(&candidate.as_str()) && idx + 1 < raw.len() {
            return ModelRef {
                provider: Some(&raw[..idx]),
                model: &raw[idx + 1..],
            };
        }
    }
    ModelRef {
        provider: None,
        model: raw,
    }
}

/// Convenience fallback: infer a provider from well-known model name
/// prefixes. Returns `None` for anything not recognized.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    let m = model.to_lowercase();
    if m.starts_with("claude-") || m.starts_with("claude_") {
        Some("anthropic")
    } else if m.starts_with("gpt-") || m.starts_with("o1") || m.starts_with("o3") {
        Some("openai")
    } else if m.starts_with("gemini") {
        Some("gemini")
    } else if m.starts_with("deepseek") {
        Some("deepseek")
    } else if m.starts_with("mistral") {
        Some("mistral")
    } else {
        None
    }
}

/// 3-tier resolution ahead of [`ProviderRegistry::choose`]: explicit
/// provider argument, then `provider/model` prefix notation, then
/// name-inference. Returns the resolved `(provider, bare_model)` pair.
pub fn resolve_provider<'a>(explicit_provider: Option<&'a str>, model: &'a str) -> (Option<&'a str>, &'a str) {
    let model_ref = parse_model_ref(model);
    if let Some(p) = explicit_provider.or(model_ref.provider) {
        return (Some(p), model_ref.model);
    }
    (infer_provider_from_model(model_ref.model), model_ref.model)
}

#[cfg(test)]
mod tests;
