use std::fmt;
use std::str::FromStr;

use crate::GatewayError;

// ─── ProviderKind ─────────────────────────────────────────────────────────

/// The upstream text-generation backends the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Anthropic,
    Google,
    /// Local `claude` CLI subprocess (stream-json protocol).
    ClaudeCli,
}

impl ProviderKind {
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::OpenAi,
            ProviderKind::OpenRouter,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::ClaudeCli,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::ClaudeCli => "claude-cli",
        }
    }

    /// Base URL used when the config does not override it.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Google => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::ClaudeCli => None,
        }
    }

    /// Environment variables checked (in order) for this provider's API key.
    pub fn api_key_vars(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            ProviderKind::ClaudeCli => &[],
        }
    }

    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::ClaudeCli)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "claude-cli" | "claude-code" => Ok(ProviderKind::ClaudeCli),
            other => Err(GatewayError::UnsupportedProvider(other.to_string())),
        }
    }
}

// ─── ModelId ──────────────────────────────────────────────────────────────

/// A parsed `provider/model` identifier.
///
/// Only the first `/` separates provider from model, so OpenRouter ids such
/// as `openrouter/anthropic/claude-sonnet-4` keep their nested model path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelId {
    pub provider: ProviderKind,
    pub model: String,
}

impl FromStr for ModelId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| GatewayError::InvalidModelId(s.to_string()))?;
        if provider.is_empty() || model.is_empty() {
            return Err(GatewayError::InvalidModelId(s.to_string()));
        }
        Ok(ModelId {
            provider: provider.parse()?,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
