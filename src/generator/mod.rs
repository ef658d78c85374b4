//! Code-generation service clients.
//!
//! The repair loop only needs "one text request, one text response", so the
//! service sits behind a single-method trait:
//! - `OpenAiGenerator`: OpenAI-compatible Responses API over HTTPS
//! - `MockGenerator` (tests): scripted responses and recorded requests
//!
//! Credentials come from `OPENAI_API_KEY`, the model from `--model`,
//! `OPENAI_MODEL` or `[generator].model` in autofix.toml.

#[cfg(test)]
pub(crate) mod mock;
mod openai;

pub(crate) use openai::OpenAiGenerator;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::repair::prompt::RepairRequest;

/// Environment variable holding the service credential.
pub(crate) const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding the model identity.
pub(crate) const MODEL_ENV: &str = "OPENAI_MODEL";

/// Trait for code-generation services.
#[async_trait]
pub(crate) trait PatchGenerator: Send + Sync {
    /// Returns the generator name for display.
    fn name(&self) -> &'static str;

    /// Model identity used for requests.
    fn model(&self) -> &str;

    /// Sends the request and returns the raw response text.
    ///
    /// Called exactly once per repair attempt; implementations must not retry.
    async fn generate(&self, request: &RepairRequest) -> Result<String>;
}

/// Resolves the model to use.
/// Priority: CLI flag > `OPENAI_MODEL` env var > config file.
pub(crate) fn resolve_model(config: &GeneratorConfig, model_override: Option<&str>) -> String {
    let env_model = std::env::var(MODEL_ENV).ok();
    resolve_model_with_env(config, model_override, env_model.as_deref())
}

/// Internal helper for model resolution with explicit env var value.
/// Enables testing without modifying actual environment.
fn resolve_model_with_env(
    config: &GeneratorConfig,
    model_override: Option<&str>,
    env_model: Option<&str>,
) -> String {
    if let Some(m) = model_override.map(str::trim).filter(|m| !m.is_empty()) {
        debug!("Using CLI model override: {}", m);
        return m.to_string();
    }

    if let Some(m) = env_model.map(str::trim).filter(|m| !m.is_empty()) {
        debug!("Using {} env var: {}", MODEL_ENV, m);
        return m.to_string();
    }

    config.model.clone()
}

/// Reads the credential from the environment; blank values count as missing.
pub(crate) fn resolve_api_key() -> Option<String> {
    normalize_api_key(std::env::var(API_KEY_ENV).ok())
}

fn normalize_api_key(raw: Option<String>) -> Option<String> {
    raw.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_config_default() {
        let config = GeneratorConfig::default();
        assert_eq!(resolve_model_with_env(&config, None, None), "gpt-4o-mini");
    }

    #[test]
    fn test_resolve_model_env_overrides_config() {
        let config = GeneratorConfig::default();
        assert_eq!(
            resolve_model_with_env(&config, None, Some("gpt-4.1")),
            "gpt-4.1"
        );
    }

    #[test]
    fn test_resolve_model_cli_overrides_env() {
        let config = GeneratorConfig::default();
        assert_eq!(
            resolve_model_with_env(&config, Some("o3-mini"), Some("gpt-4.1")),
            "o3-mini"
        );
    }

    #[test]
    fn test_resolve_model_blank_values_fall_back() {
        let config = GeneratorConfig {
            model: "from-config".to_string(),
            ..GeneratorConfig::default()
        };
        assert_eq!(
            resolve_model_with_env(&config, Some("  "), Some("")),
            "from-config"
        );
    }

    #[test]
    fn test_normalize_api_key() {
        assert_eq!(normalize_api_key(None), None);
        assert_eq!(normalize_api_key(Some("   ".to_string())), None);
        assert_eq!(
            normalize_api_key(Some(" sk-test \n".to_string())),
            Some("sk-test".to_string())
        );
    }
}
