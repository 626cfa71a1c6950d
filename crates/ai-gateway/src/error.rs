use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("unsupported provider '{0}' (expected one of: openai, openrouter, anthropic, google, claude-cli)")]
    UnsupportedProvider(String),

    #[error("invalid model identifier '{0}': expected '<provider>/<model>'")]
    InvalidModelId(String),

    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("malformed model response ({reason})\n  response: {preview}")]
    MalformedResponse { reason: String, preview: String },

    #[error("model output is not a unified diff\n  response: {0}")]
    InvalidPatch(String),
}

impl GatewayError {
    pub(crate) fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
