use std::future::Future;
use std::time::Instant;

use crate::config::GatewayConfig;
use crate::provider::{ModelId, ProviderKind};
use crate::types::GenerateRequest;
use crate::{http, process, GatewayError, Result};

// ─── TextGenerator ────────────────────────────────────────────────────────

/// The single capability the pipeline needs from an AI provider.
///
/// [`Gateway`] is the production implementation; tests substitute canned
/// generators.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, req: GenerateRequest) -> impl Future<Output = Result<String>> + Send;

    /// Human-readable `provider/model` label for logs and reports.
    fn describe(&self) -> String;
}

// ─── Gateway ──────────────────────────────────────────────────────────────

/// Dispatches generation requests to the provider named in the model id.
pub struct Gateway {
    config: GatewayConfig,
    model: ModelId,
    client: reqwest::Client,
}

impl Gateway {
    /// Validate the config and build the HTTP client.
    ///
    /// Fails with `UnsupportedProvider`/`InvalidModelId` for a bad model id
    /// and `MissingApiKey` when an HTTP provider has no credentials.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let model = config.model_id()?;
        if model.provider.requires_api_key() {
            config.api_key_for(model.provider)?;
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::provider(model.provider.as_str(), e.to_string()))?;
        Ok(Self {
            config,
            model,
            client,
        })
    }

    pub fn model(&self) -> &ModelId {
        &self.model
    }

    async fn dispatch(&self, req: &GenerateRequest) -> Result<String> {
        let provider = self.model.provider;
        match provider {
            ProviderKind::ClaudeCli => {
                let exe = self.config.claude_executable.as_deref().unwrap_or("claude");
                process::generate(exe, &self.model.model, req, self.config.timeout).await
            }
            ProviderKind::OpenAi
            | ProviderKind::OpenRouter
            | ProviderKind::Anthropic
            | ProviderKind::Google => {
                let base_url = self.config.base_url_for(provider)?;
                let call = http::HttpCall {
                    provider,
                    base_url: &base_url,
                    api_key: self.config.api_key_for(provider)?,
                    model: &self.model.model,
                    max_retries: self.config.max_retries,
                };
                http::generate(&self.client, call, req).await
            }
        }
    }
}

impl TextGenerator for Gateway {
    async fn generate(&self, req: GenerateRequest) -> Result<String> {
        let started = Instant::now();
        tracing::info!(
            provider = %self.model.provider,
            model = %self.model.model,
            prompt_chars = req.prompt.len(),
            "generating"
        );
        let result = self.dispatch(&req).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(text) => tracing::info!(
                provider = %self.model.provider,
                elapsed_ms,
                response_chars = text.len(),
                "generation complete"
            ),
            Err(e) => tracing::warn!(
                provider = %self.model.provider,
                elapsed_ms,
                error = %e,
                "generation failed"
            ),
        }
        result
    }

    fn describe(&self) -> String {
        self.model.to_string()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
