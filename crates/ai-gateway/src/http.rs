//! Request/response envelopes for the HTTP providers.
//!
//! Each provider has its own wire shape; everything here collapses them to
//! plain text in, plain text out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;
use crate::types::GenerateRequest;
use crate::{GatewayError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const INITIAL_BACKOFF_MS: u64 = 1000;

// ─── OpenAI-compatible (openai, openrouter) ───────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

// ─── Anthropic Messages ───────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<MessagesBlock>,
}

#[derive(Deserialize)]
struct MessagesBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

// ─── Google generateContent ───────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

// ─── Dispatch ─────────────────────────────────────────────────────────────

pub(crate) struct HttpCall<'a> {
    pub provider: ProviderKind,
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
    pub max_retries: u32,
}

/// Send one generation request and return the provider's text.
pub(crate) async fn generate(
    client: &reqwest::Client,
    call: HttpCall<'_>,
    req: &GenerateRequest,
) -> Result<String> {
    let body = send_with_retry(client, &call, req).await?;
    parse_text(call.provider, &body)
}

fn build_request(
    client: &reqwest::Client,
    call: &HttpCall<'_>,
    req: &GenerateRequest,
) -> Result<reqwest::RequestBuilder> {
    let builder = match call.provider {
        ProviderKind::OpenAi | ProviderKind::OpenRouter => {
            let mut messages = Vec::with_capacity(2);
            if let Some(sp) = &req.system_prompt {
                messages.push(ChatMessage {
                    role: "system",
                    content: sp,
                });
            }
            messages.push(ChatMessage {
                role: "user",
                content: &req.prompt,
            });
            client
                .post(format!("{}/chat/completions", call.base_url))
                .bearer_auth(call.api_key)
                .json(&ChatRequest {
                    model: call.model,
                    messages,
                    max_tokens: req.max_tokens,
                    temperature: req.temperature,
                })
        }
        ProviderKind::Anthropic => client
            .post(format!("{}/messages", call.base_url))
            .header("x-api-key", call.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&MessagesRequest {
                model: call.model,
                max_tokens: req.max_tokens,
                temperature: req.temperature,
                system: req.system_prompt.as_deref(),
                messages: vec![ChatMessage {
                    role: "user",
                    content: &req.prompt,
                }],
            }),
        ProviderKind::Google => client
            .post(format!(
                "{}/models/{}:generateContent",
                call.base_url, call.model
            ))
            .header("x-goog-api-key", call.api_key)
            .json(&GeminiRequest {
                contents: vec![GeminiContent {
                    role: Some("user"),
                    parts: vec![GeminiPart { text: &req.prompt }],
                }],
                system_instruction: req.system_prompt.as_deref().map(|sp| GeminiContent {
                    role: None,
                    parts: vec![GeminiPart { text: sp }],
                }),
                generation_config: GeminiGenerationConfig {
                    max_output_tokens: req.max_tokens,
                    temperature: req.temperature,
                },
            }),
        ProviderKind::ClaudeCli => {
            return Err(GatewayError::provider(
                call.provider.as_str(),
                "not an HTTP provider",
            ))
        }
    };
    Ok(builder)
}

/// POST with retry on 429 and 5xx. Client errors fail immediately.
async fn send_with_retry(
    client: &reqwest::Client,
    call: &HttpCall<'_>,
    req: &GenerateRequest,
) -> Result<String> {
    let provider = call.provider.as_str();
    let mut attempt = 0u32;

    loop {
        let outcome = build_request(client, call, req)?.send().await;
        let retryable_msg = match outcome {
            Ok(response) => {
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::provider(provider, e.to_string()))?;
                if status.is_success() {
                    return Ok(text);
                }
                let msg = format!("HTTP {}: {}", status.as_u16(), truncate(&text, 500));
                if !(status.as_u16() == 429 || status.is_server_error()) {
                    return Err(GatewayError::provider(provider, msg));
                }
                msg
            }
            Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
            Err(e) => return Err(GatewayError::provider(provider, e.to_string())),
        };

        if attempt >= call.max_retries {
            return Err(GatewayError::provider(
                provider,
                format!("{retryable_msg} (gave up after {} attempt(s))", attempt + 1),
            ));
        }
        attempt += 1;
        let delay = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
        tracing::warn!(
            provider,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying generation: {retryable_msg}"
        );
        tokio::time::sleep(delay).await;
    }
}

fn parse_text(provider: ProviderKind, body: &str) -> Result<String> {
    let malformed = |e: serde_json::Error| GatewayError::MalformedResponse {
        reason: format!("{provider} envelope: {e}"),
        preview: truncate(body, 300).to_string(),
    };
    let empty = || GatewayError::MalformedResponse {
        reason: format!("{provider} returned no text"),
        preview: truncate(body, 300).to_string(),
    };

    match provider {
        ProviderKind::OpenAi | ProviderKind::OpenRouter => {
            let parsed: ChatResponse = serde_json::from_str(body).map_err(malformed)?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(empty)
        }
        ProviderKind::Anthropic => {
            let parsed: MessagesResponse = serde_json::from_str(body).map_err(malformed)?;
            let text: String = parsed
                .content
                .into_iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text)
                .collect();
            if text.is_empty() {
                Err(empty())
            } else {
                Ok(text)
            }
        }
        ProviderKind::Google => {
            let parsed: GeminiResponse = serde_json::from_str(body).map_err(malformed)?;
            let text: String = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();
            if text.is_empty() {
                Err(empty())
            } else {
                Ok(text)
            }
        }
        ProviderKind::ClaudeCli => Err(empty()),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
