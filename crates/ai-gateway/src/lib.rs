//! `ai-gateway`: one text-generation capability over several providers.
//!
//! The deployloop stages only ever need "prompt in, text out". This crate
//! owns everything between that call and the upstream API: parsing the
//! `provider/model` identifier, building each provider's request envelope,
//! retrying transient failures, and unwrapping the response back to text.
//!
//! # Architecture
//!
//! ```text
//! GatewayConfig ("anthropic/claude-sonnet-4-5", key, base url, timeout)
//!     │
//!     ▼
//! Gateway         ← implements TextGenerator
//!     │  ProviderKind tag picks the backend
//!     ├── http     openai · openrouter · anthropic · google envelopes
//!     └── process  local `claude` CLI over stream-json
//!     ▼
//! String          ← then extract_json / extract_patch for structured payloads
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ai_gateway::{Gateway, GatewayConfig, GenerateRequest, TextGenerator};
//!
//! let gateway = Gateway::new(GatewayConfig::from_env("openai/gpt-4o")?)?;
//! let text = gateway
//!     .generate(GenerateRequest::new("List three HTTP verbs as JSON"))
//!     .await?;
//! let (json, _strategy) = ai_gateway::extract_json(&text)?;
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod provider;
pub mod types;

mod http;
pub(crate) mod process;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use extract::{extract_json, extract_patch, strip_fence, JsonStrategy};
pub use gateway::{Gateway, TextGenerator};
pub use provider::{ModelId, ProviderKind};
pub use types::GenerateRequest;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
