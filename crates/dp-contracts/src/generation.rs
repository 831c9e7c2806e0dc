use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DpError;
use crate::providers::ProviderKind;

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_SIZE: &str = "1024x1024";
pub const DEFAULT_QUALITY: &str = "standard";

/// A single image request.
///
/// `provider` stays a raw tag so the facade can reject unknown names itself.
/// `size` and `quality` are passed through; unsupported values surface as
/// provider errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider: default_provider(),
            size: default_size(),
            quality: default_quality(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_size() -> String {
    DEFAULT_SIZE.to_string()
}

fn default_quality() -> String {
    DEFAULT_QUALITY.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Hosted by the provider; must be fetched.
    Url(String),
    /// Base64 bytes returned in the response body.
    Inline { data: String, mime_type: String },
}

impl ImagePayload {
    /// File extension for saving this payload. Hosted URLs are assumed PNG.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Url(_) => "png",
            Self::Inline { mime_type, .. } => {
                let lowered = mime_type.to_ascii_lowercase();
                if lowered.contains("jpeg") || lowered.contains("jpg") {
                    "jpg"
                } else if lowered.contains("webp") {
                    "webp"
                } else {
                    "png"
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub provider: ProviderKind,
    pub model: String,
    pub cost_usd: f64,
    pub image: ImagePayload,
    pub size: String,
    pub quality: String,
    pub revised_prompt: Option<String>,
    pub text: Option<String>,
}

/// Outcome of one generation call. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub provider: String,
    pub elapsed: Duration,
    pub outcome: Result<GeneratedImage, DpError>,
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn image(&self) -> Option<&GeneratedImage> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DpError> {
        self.outcome.as_ref().err()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn cost_usd(&self) -> f64 {
        self.image().map(|image| image.cost_usd).unwrap_or(0.0)
    }

    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        root.insert("success".to_string(), Value::Bool(self.is_success()));
        match &self.outcome {
            Ok(image) => {
                root.insert(
                    "provider".to_string(),
                    Value::String(image.provider.to_string()),
                );
                root.insert("model".to_string(), Value::String(image.model.clone()));
                root.insert("cost".to_string(), Value::from(image.cost_usd));
                match &image.image {
                    ImagePayload::Url(url) => {
                        root.insert("imageUrl".to_string(), Value::String(url.clone()));
                    }
                    ImagePayload::Inline { data, mime_type } => {
                        root.insert("imageBase64".to_string(), Value::String(data.clone()));
                        root.insert("mimeType".to_string(), Value::String(mime_type.clone()));
                    }
                }
                if let Some(revised) = &image.revised_prompt {
                    root.insert("revisedPrompt".to_string(), Value::String(revised.clone()));
                }
                if let Some(text) = &image.text {
                    root.insert("text".to_string(), Value::String(text.clone()));
                }
                root.insert("size".to_string(), Value::String(image.size.clone()));
                root.insert("quality".to_string(), Value::String(image.quality.clone()));
            }
            Err(err) => {
                root.insert("provider".to_string(), Value::String(self.provider.clone()));
                root.insert("error".to_string(), Value::String(err.message.clone()));
                root.insert(
                    "errorKind".to_string(),
                    Value::String(err.kind.as_str().to_string()),
                );
            }
        }
        root.insert(
            "generationTime".to_string(),
            Value::from(self.elapsed_seconds()),
        );
        Value::Object(root)
    }
}
