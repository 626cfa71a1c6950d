use std::time::Duration;

use crate::provider::{ModelId, ProviderKind};
use crate::{GatewayError, Result};

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Everything a [`Gateway`](crate::Gateway) needs to reach its provider.
///
/// Built explicitly by the caller and handed to the constructor; providers
/// never read the environment themselves. [`GatewayConfig::from_env`] is a
/// convenience for binaries.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `provider/model` identifier, e.g. `openai/gpt-4o`.
    pub model: String,
    pub api_key: Option<String>,
    /// Overrides the provider's default base URL (proxies, tests).
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Retries after the first attempt for 429/5xx responses.
    pub max_retries: u32,
    /// Path to the `claude` executable for the `claude-cli` provider.
    pub claude_executable: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            claude_executable: None,
        }
    }
}

impl GatewayConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Resolve the API key and base URL for `model` from the process
    /// environment.
    ///
    /// `AI_API_KEY` wins over the provider-specific variables
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...). `AI_BASE_URL` overrides
    /// the base URL.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        Self::from_lookup(model, |k| std::env::var(k).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup so
    /// tests never touch process-global state.
    pub fn from_lookup(
        model: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let model = model.into();
        let id: ModelId = model.parse()?;
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("AI_API_KEY").or_else(|| {
            id.provider
                .api_key_vars()
                .iter()
                .find_map(|k| non_empty(*k))
        });

        Ok(Self {
            model,
            api_key,
            base_url: non_empty("AI_BASE_URL"),
            claude_executable: non_empty("CLAUDE_EXECUTABLE"),
            ..Default::default()
        })
    }

    pub fn model_id(&self) -> Result<ModelId> {
        self.model.parse()
    }

    pub(crate) fn base_url_for(&self, provider: ProviderKind) -> Result<String> {
        self.base_url
            .as_deref()
            .or_else(|| provider.default_base_url())
            .map(|u| u.trim_end_matches('/').to_string())
            .ok_or_else(|| GatewayError::provider(provider.as_str(), "no base URL configured"))
    }

    pub(crate) fn api_key_for(&self, provider: ProviderKind) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GatewayError::MissingApiKey(provider.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn provider_specific_key_is_picked_up() {
        let cfg =
            GatewayConfig::from_lookup("openai/gpt-4o", env(&[("OPENAI_API_KEY", "sk-1")])).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("sk-1"));
        assert!(cfg.base_url.is_none());
    }

    #[test]
    fn generic_key_overrides_provider_key() {
        let cfg = GatewayConfig::from_lookup(
            "anthropic/claude-sonnet-4-5",
            env(&[("ANTHROPIC_API_KEY", "a"), ("AI_API_KEY", "b")]),
        )
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("b"));
    }

    #[test]
    fn gemini_key_is_second_choice_for_google() {
        let cfg = GatewayConfig::from_lookup(
            "google/gemini-2.0-flash",
            env(&[("GEMINI_API_KEY", "g")]),
        )
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("g"));
    }

    #[test]
    fn unsupported_provider_fails_early() {
        let err = GatewayConfig::from_lookup("mistral/large", env(&[])).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedProvider(_)));
    }

    #[test]
    fn base_url_override_strips_trailing_slash() {
        let cfg = GatewayConfig {
            base_url: Some("http://localhost:9000/".into()),
            ..GatewayConfig::new("openai/gpt-4o")
        };
        assert_eq!(
            cfg.base_url_for(ProviderKind::OpenAi).unwrap(),
            "http://localhost:9000"
        );
    }
}
