use std::sync::Arc;

use dp_contracts::credentials::{CredentialKey, CredentialSet};
use dp_contracts::errors::{DpError, DpResult, ErrorKind};
use dp_contracts::generation::{GeneratedImage, GenerationRequest, ImagePayload};
use dp_contracts::models::ModelSelector;
use dp_contracts::providers::ProviderKind;
use serde_json::{json, Value};
use tracing::debug;

use super::{error_message, non_empty_str, success_json, transport_error, ImageProvider};
use crate::transport::HttpTransport;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const SAFETY_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "PROHIBITED_CONTENT",
    "IMAGE_SAFETY",
    "BLOCKLIST",
    "SPII",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct InlineImage {
    data: String,
    mime_type: String,
}

pub struct GeminiProvider {
    api_base: String,
    transport: Arc<dyn HttpTransport>,
    models: ModelSelector,
}

impl GeminiProvider {
    pub fn new(api_base: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            api_base: api_base.into(),
            transport,
            models: ModelSelector::default(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn classify_failure(status: u16, body: Option<&Value>) -> DpError {
        match status {
            429 => DpError::new(
                ErrorKind::RateLimited,
                error_message(body).unwrap_or_else(|| {
                    "Gemini rate limit exceeded. Try again shortly.".to_string()
                }),
            ),
            401 | 403 => DpError::new(ErrorKind::Unauthorized, "Invalid Gemini credentials"),
            503 => DpError::new(
                ErrorKind::ServiceUnavailable,
                error_message(body)
                    .unwrap_or_else(|| "Gemini image service unavailable".to_string()),
            ),
            _ => DpError::unknown_provider(
                error_message(body)
                    .unwrap_or_else(|| format!("Gemini generation failed (HTTP {status})")),
            ),
        }
    }

    fn blocked_reason(body: &Value) -> Option<String> {
        if let Some(reason) = non_empty_str(
            body.get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason")),
        ) {
            return Some(reason.to_string());
        }
        let finish = non_empty_str(
            body.get("candidates")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|candidate| candidate.get("finishReason")),
        )?;
        SAFETY_FINISH_REASONS
            .contains(&finish)
            .then(|| finish.to_string())
    }

    fn candidate_parts(body: &Value) -> Vec<Value> {
        body.get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// First inline part carrying an `image/*` payload.
    fn extract_image(parts: &[Value]) -> Option<InlineImage> {
        parts.iter().find_map(|part| {
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
            let mime_type = non_empty_str(
                inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type")),
            )?;
            if !mime_type.starts_with("image/") {
                return None;
            }
            let data = non_empty_str(inline.get("data"))?;
            Some(InlineImage {
                data: data.to_string(),
                mime_type: mime_type.to_string(),
            })
        })
    }

    fn extract_text(parts: &[Value]) -> Option<String> {
        let text = parts
            .iter()
            .filter_map(|part| non_empty_str(part.get("text")))
            .collect::<Vec<&str>>()
            .join("\n");
        (!text.is_empty()).then_some(text)
    }
}

impl ImageProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        credentials: &CredentialSet,
    ) -> DpResult<GeneratedImage> {
        let Some(api_key) = credentials.get(CredentialKey::Gemini) else {
            return Err(DpError::missing_credential(
                "GEMINI_API_KEY not found in environment",
            ));
        };
        let selection = self
            .models
            .select(ProviderKind::Gemini, Some(request.quality.as_str()))
            .map_err(DpError::unknown_provider)?;
        if let Some(reason) = &selection.fallback_reason {
            debug!(provider = "gemini", %reason, "model tier fallback");
        }

        let endpoint = self.endpoint_for_model(&selection.model.name);
        let payload = json!({
            "contents": [{
                "parts": [{ "text": request.prompt }],
            }],
        });
        debug!(
            provider = "gemini",
            %endpoint,
            model = %selection.model.name,
            "sending image request"
        );

        let reply = self
            .transport
            .post_json(&endpoint, &[("x-goog-api-key", api_key)], &payload)
            .map_err(|err| transport_error("Gemini", err))?;
        if !reply.is_success() {
            return Err(Self::classify_failure(reply.status, reply.json().as_ref()));
        }

        let body = success_json("Gemini", &reply)?;
        let parts = Self::candidate_parts(&body);
        let Some(image) = Self::extract_image(&parts) else {
            if let Some(reason) = Self::blocked_reason(&body) {
                return Err(DpError::new(
                    ErrorKind::ContentPolicyViolation,
                    format!("Prompt blocked by Gemini safety filters ({reason})"),
                ));
            }
            return Err(DpError::unknown_provider(
                "Gemini response did not include an image",
            ));
        };

        Ok(GeneratedImage {
            provider: ProviderKind::Gemini,
            model: selection.model.name,
            cost_usd: selection.model.cost_per_image_usd,
            image: ImagePayload::Inline {
                data: image.data,
                mime_type: image.mime_type,
            },
            size: request.size.clone(),
            quality: request.quality.clone(),
            revised_prompt: None,
            text: Self::extract_text(&parts),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dp_contracts::credentials::{resolve_credentials, CredentialSet, CredentialSource};
    use dp_contracts::errors::ErrorKind;
    use dp_contracts::generation::{GenerationRequest, ImagePayload};
    use serde_json::{json, Value};

    use super::GeminiProvider;
    use crate::providers::ImageProvider;
    use crate::transport::testing::RecordingTransport;

    fn credentials() -> CredentialSet {
        resolve_credentials(&[CredentialSource::environment([(
            "GEMINI_API_KEY",
            "gem-test",
        )])])
    }

    fn provider(transport: &Arc<RecordingTransport>) -> GeminiProvider {
        GeminiProvider::new("https://gemini.test/v1beta", transport.clone())
    }

    fn image_response() -> Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is a calm hero image."},
                        {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                    ]
                },
                "finishReason": "STOP"
            }]
        })
    }

    #[test]
    fn sends_generate_content_with_api_key_header() -> anyhow::Result<()> {
        let transport = Arc::new(RecordingTransport::new().reply_json(200, image_response()));
        let request = GenerationRequest::new("calm hero")
            .with_provider("gemini")
            .with_quality("flash");
        let image = provider(&transport).generate(&request, &credentials())?;

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].url,
            "https://gemini.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(sent[0].header("x-goog-api-key"), Some("gem-test"));
        assert_eq!(sent[0].header("authorization"), None);
        assert_eq!(
            sent[0].body,
            Some(json!({"contents": [{"parts": [{"text": "calm hero"}]}]}))
        );
        assert_eq!(
            image.image,
            ImagePayload::Inline {
                data: "iVBORw0KGgo=".to_string(),
                mime_type: "image/png".to_string(),
            }
        );
        assert_eq!(image.model, "gemini-2.5-flash-image");
        assert_eq!(image.cost_usd, 0.0);
        assert_eq!(image.text.as_deref(), Some("Here is a calm hero image."));
        Ok(())
    }

    #[test]
    fn default_quality_uses_pro_preview_model() -> anyhow::Result<()> {
        let transport = Arc::new(RecordingTransport::new().reply_json(200, image_response()));
        let image = provider(&transport).generate(&GenerationRequest::new("x"), &credentials())?;
        assert_eq!(image.model, "gemini-3-pro-image-preview");
        assert!(transport.requests()[0]
            .url
            .ends_with("/models/gemini-3-pro-image-preview:generateContent"));
        Ok(())
    }

    #[test]
    fn snake_case_inline_data_is_accepted_and_non_images_skipped() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"inline_data": {"mime_type": "text/plain", "data": "aGk="}},
                        {"inline_data": {"mime_type": "image/jpeg", "data": "/9j/"}}
                    ]
                }
            }]
        });
        let transport = Arc::new(RecordingTransport::new().reply_json(200, body));
        let image = provider(&transport).generate(&GenerationRequest::new("x"), &credentials())?;
        assert_eq!(
            image.image,
            ImagePayload::Inline {
                data: "/9j/".to_string(),
                mime_type: "image/jpeg".to_string(),
            }
        );
        assert!(image.text.is_none());
        Ok(())
    }

    #[test]
    fn project_id_alone_is_not_a_usable_credential() {
        let transport = Arc::new(RecordingTransport::new());
        let project_only = resolve_credentials(&[CredentialSource::environment([(
            "GEMINI_PROJECT_ID",
            "proj",
        )])]);
        let err = provider(&transport)
            .generate(&GenerationRequest::new("x"), &project_only)
            .err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::MissingCredential));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn error_statuses_map_to_normalized_kinds() {
        let cases = [
            (429, ErrorKind::RateLimited),
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Unauthorized),
            (503, ErrorKind::ServiceUnavailable),
            (400, ErrorKind::UnknownProviderError),
        ];
        for (status, expected) in cases {
            let body = json!({"error": {"code": status, "message": "nope", "status": "X"}});
            let transport = Arc::new(RecordingTransport::new().reply_json(status, body));
            let err = provider(&transport)
                .generate(&GenerationRequest::new("x"), &credentials())
                .err();
            assert_eq!(err.map(|err| err.kind), Some(expected), "status {status}");
        }
    }

    #[test]
    fn safety_blocks_are_content_policy_violations() {
        let bodies = [
            json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}}),
            json!({"candidates": [{"finishReason": "IMAGE_SAFETY", "content": {"parts": []}}]}),
        ];
        for body in bodies {
            let transport = Arc::new(RecordingTransport::new().reply_json(200, body));
            let err = provider(&transport)
                .generate(&GenerationRequest::new("x"), &credentials())
                .err();
            assert_eq!(err.map(|err| err.kind), Some(ErrorKind::ContentPolicyViolation));
        }
    }

    #[test]
    fn text_only_success_is_an_unknown_provider_error() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "I can't draw that."}]},
                "finishReason": "STOP"
            }]
        });
        let transport = Arc::new(RecordingTransport::new().reply_json(200, body));
        let err = provider(&transport)
            .generate(&GenerationRequest::new("x"), &credentials())
            .err();
        assert_eq!(
            err.map(|err| (err.kind, err.message)),
            Some((
                ErrorKind::UnknownProviderError,
                "Gemini response did not include an image".to_string()
            ))
        );
    }
}
