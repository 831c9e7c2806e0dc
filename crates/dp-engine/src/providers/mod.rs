mod gemini;
mod openai;

use std::env;

use dp_contracts::credentials::CredentialSet;
use dp_contracts::errors::{DpError, DpResult, ErrorKind};
use dp_contracts::generation::{GeneratedImage, GenerationRequest};
use dp_contracts::providers::ProviderKind;
use serde_json::Value;

use crate::transport::HttpReply;

pub use gemini::{GeminiProvider, DEFAULT_GEMINI_API_BASE};
pub use openai::{OpenAiProvider, DEFAULT_OPENAI_API_BASE};

/// One vendor adapter: a single outbound request, mapped to a normalized
/// image or a normalized error. Adapters never retry.
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn generate(
        &self,
        request: &GenerationRequest,
        credentials: &CredentialSet,
    ) -> DpResult<GeneratedImage>;
}

/// API base URLs for each provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: DEFAULT_OPENAI_API_BASE.to_string(),
            gemini: DEFAULT_GEMINI_API_BASE.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Defaults, overridden by `OPENAI_API_BASE` / `GEMINI_API_BASE` when set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai: api_base_from_env("OPENAI_API_BASE").unwrap_or(defaults.openai),
            gemini: api_base_from_env("GEMINI_API_BASE").unwrap_or(defaults.gemini),
        }
    }
}

fn api_base_from_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

fn transport_error(provider: &str, err: anyhow::Error) -> DpError {
    DpError::unknown_provider(format!("{provider} request failed: {err:#}"))
}

fn success_json(provider: &str, reply: &HttpReply) -> DpResult<Value> {
    serde_json::from_slice(&reply.body).map_err(|err| {
        DpError::new(
            ErrorKind::MalformedResponse,
            format!("{provider} returned invalid JSON payload: {err}"),
        )
    })
}

/// `error.message` from a vendor error body, if any.
fn error_message(body: Option<&Value>) -> Option<String> {
    body?
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn error_code(body: Option<&Value>) -> Option<&str> {
    body?.get("error")?.get("code")?.as_str()
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
