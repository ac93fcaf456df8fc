use crate::http_provider::{HttpChatProvider, ModelPricing as HttpModelPricing};
use feather_core::{ModelDecl, ModelPricing, ProviderEntry};
use feather_dispatch::{ProviderRegistry, SelectionPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONFIG_FILE_NAME: &str = "feather.config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub input_per1_k: f64,
    #[serde(default)]
    pub output_per1_k: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub api_key_env: String,
    pub base_url: String,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_policy() -> String {
    "first".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            providers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn selection_policy(&self) -> SelectionPolicy {
        match self.policy.as_str() {
            "roundrobin" => SelectionPolicy::RoundRobin,
            "cheapest" => SelectionPolicy::Cheapest,
            _ => SelectionPolicy::First,
        }
    }
}

/// Walks upward from `start` looking for `feather.config.json`, the way the
/// teacher resolves its home-directory config but rooted at the invocation
/// directory instead (spec §6: "located by walking upwards from cwd").
pub fn find_config_upwards(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// Falls back to `$XDG_CONFIG_HOME/feather/feather.config.json` (teacher
/// pattern: `dirs` + a well-known home-relative path) when the cwd walk
/// finds nothing.
fn home_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("feather").join(CONFIG_FILE_NAME))
}

/// Loads the config from `explicit_path` if given, else walks upward from
/// the current directory, then checks the user's config directory; falls
/// back to [`Config::default`] (empty provider set, `first` policy) if
/// nothing is found.
pub fn load_config(explicit_path: Option<&Path>) -> anyhow::Result<Config> {
    let resolved = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let cwd = env::current_dir()?;
            find_config_upwards(&cwd).or_else(|| home_config_path().filter(|p| p.is_file()))
        }
    };

    let Some(path) = resolved else {
        tracing::debug!("no config file found, using defaults");
        return Ok(Config::default());
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Builds a [`ProviderRegistry`] from `config`, instantiating an
/// [`HttpChatProvider`] per provider entry whose `apiKeyEnv` resolves to a
/// set environment variable. Providers with an unset key are omitted and
/// logged at `warn!`, never an error (spec §6: "Missing API-key env vars
/// cause that provider to be omitted").
pub fn build_registry(config: &Config) -> ProviderRegistry {
    let registry = ProviderRegistry::new(config.selection_policy());

    for (id, provider_config) in &config.providers {
        let Ok(api_key) = env::var(&provider_config.api_key_env) else {
            tracing::warn!(
                provider = id.as_str(),
                env = provider_config.api_key_env.as_str(),
                "omitting provider: api key env var not set"
            );
            continue;
        };

        let mut pricing = HashMap::new();
        let mut models = Vec::new();
        for model in &provider_config.models {
            pricing.insert(
                model.name.clone(),
                HttpModelPricing {
                    input_per_1k: model.input_per1_k,
                    output_per_1k: model.output_per1_k,
                },
            );
            models.push(ModelDecl {
                name: model.name.clone(),
                aliases: model.aliases.clone(),
                pricing: ModelPricing {
                    input_per_1k: model.input_per1_k,
                    output_per_1k: model.output_per1_k,
                },
            });
        }

        let instance = Arc::new(HttpChatProvider::new(
            id.clone(),
            api_key,
            provider_config.base_url.clone(),
            pricing,
        ));

        registry.add(ProviderEntry {
            key: id.clone(),
            instance,
            models,
        });
    }

    registry
}
