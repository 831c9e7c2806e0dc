use std::sync::Arc;

use dp_contracts::credentials::{CredentialKey, CredentialSet};
use dp_contracts::errors::{DpError, DpResult, ErrorKind};
use dp_contracts::generation::{GeneratedImage, GenerationRequest, ImagePayload};
use dp_contracts::models::ModelSelector;
use dp_contracts::providers::ProviderKind;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    error_code, error_message, non_empty_str, success_json, transport_error, ImageProvider,
};
use crate::transport::HttpTransport;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    api_base: String,
    transport: Arc<dyn HttpTransport>,
    models: ModelSelector,
}

impl OpenAiProvider {
    pub fn new(api_base: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            api_base: api_base.into(),
            transport,
            models: ModelSelector::default(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/images/generations", self.api_base)
    }

    fn classify_failure(status: u16, body: Option<&Value>) -> DpError {
        match status {
            429 => DpError::new(
                ErrorKind::RateLimited,
                "Rate limit exceeded. Try again in 1 minute.",
            ),
            401 | 403 => DpError::new(ErrorKind::Unauthorized, "Invalid OpenAI API key"),
            _ if error_code(body) == Some("content_policy_violation") => DpError::new(
                ErrorKind::ContentPolicyViolation,
                "Prompt violated content policy",
            ),
            503 => DpError::new(
                ErrorKind::ServiceUnavailable,
                error_message(body)
                    .unwrap_or_else(|| "OpenAI image service unavailable".to_string()),
            ),
            _ => DpError::unknown_provider(
                error_message(body)
                    .unwrap_or_else(|| format!("DALL-E generation failed (HTTP {status})")),
            ),
        }
    }

    fn extract_image(body: &Value) -> DpResult<(ImagePayload, Option<String>)> {
        let Some(first) = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            return Err(DpError::unknown_provider(
                "DALL-E response did not include any images",
            ));
        };
        let revised_prompt = non_empty_str(first.get("revised_prompt")).map(str::to_string);
        if let Some(url) = non_empty_str(first.get("url")) {
            return Ok((ImagePayload::Url(url.to_string()), revised_prompt));
        }
        if let Some(data) = non_empty_str(first.get("b64_json")) {
            return Ok((
                ImagePayload::Inline {
                    data: data.to_string(),
                    mime_type: "image/png".to_string(),
                },
                revised_prompt,
            ));
        }
        Err(DpError::unknown_provider(
            "DALL-E response did not include an image URL",
        ))
    }
}

impl ImageProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        credentials: &CredentialSet,
    ) -> DpResult<GeneratedImage> {
        let Some(api_key) = credentials.get(CredentialKey::Openai) else {
            return Err(DpError::missing_credential(
                "OPENAI_API_KEY not found in environment",
            ));
        };
        let selection = self
            .models
            .select(ProviderKind::Openai, Some(request.quality.as_str()))
            .map_err(DpError::unknown_provider)?;
        if let Some(reason) = &selection.fallback_reason {
            debug!(provider = "openai", %reason, "model tier fallback");
        }

        let endpoint = self.endpoint();
        let payload = json!({
            "model": selection.model.name,
            "prompt": request.prompt,
            "size": request.size,
            "quality": request.quality,
            "n": 1,
        });
        let authorization = format!("Bearer {api_key}");
        debug!(
            provider = "openai",
            %endpoint,
            model = %selection.model.name,
            "sending image request"
        );

        let reply = self
            .transport
            .post_json(
                &endpoint,
                &[("Authorization", authorization.as_str())],
                &payload,
            )
            .map_err(|err| transport_error("OpenAI", err))?;
        if !reply.is_success() {
            return Err(Self::classify_failure(reply.status, reply.json().as_ref()));
        }

        let body = success_json("OpenAI", &reply)?;
        let (image, revised_prompt) = Self::extract_image(&body)?;
        Ok(GeneratedImage {
            provider: ProviderKind::Openai,
            model: selection.model.name,
            cost_usd: selection.model.cost_per_image_usd,
            image,
            size: request.size.clone(),
            quality: request.quality.clone(),
            revised_prompt,
            text: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dp_contracts::credentials::{resolve_credentials, CredentialSet, CredentialSource};
    use dp_contracts::errors::ErrorKind;
    use dp_contracts::generation::{GenerationRequest, ImagePayload};
    use serde_json::json;

    use super::OpenAiProvider;
    use crate::providers::ImageProvider;
    use crate::transport::testing::RecordingTransport;

    fn credentials() -> CredentialSet {
        resolve_credentials(&[CredentialSource::environment([(
            "OPENAI_API_KEY",
            "sk-test",
        )])])
    }

    fn provider(transport: &Arc<RecordingTransport>) -> OpenAiProvider {
        OpenAiProvider::new("https://openai.test/v1", transport.clone())
    }

    #[test]
    fn sends_dalle3_body_with_bearer_auth() -> anyhow::Result<()> {
        let transport = Arc::new(RecordingTransport::new().reply_json(
            200,
            json!({"data": [{"url": "https://img.test/1.png", "revised_prompt": "a bolder lamp"}]}),
        ));
        let request = GenerationRequest::new("a lamp").with_quality("hd");
        let image = provider(&transport).generate(&request, &credentials())?;

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://openai.test/v1/images/generations");
        assert_eq!(sent[0].header("authorization"), Some("Bearer sk-test"));
        assert_eq!(
            sent[0].body,
            Some(json!({
                "model": "dall-e-3",
                "prompt": "a lamp",
                "size": "1024x1024",
                "quality": "hd",
                "n": 1,
            }))
        );
        assert_eq!(image.image, ImagePayload::Url("https://img.test/1.png".to_string()));
        assert_eq!(image.revised_prompt.as_deref(), Some("a bolder lamp"));
        assert_eq!(image.cost_usd, 0.080);
        Ok(())
    }

    #[test]
    fn standard_and_unknown_quality_cost_the_base_rate() -> anyhow::Result<()> {
        for quality in ["standard", "ultra"] {
            let transport = Arc::new(
                RecordingTransport::new()
                    .reply_json(200, json!({"data": [{"url": "https://img.test/2.png"}]})),
            );
            let request = GenerationRequest::new("a lamp").with_quality(quality);
            let image = provider(&transport).generate(&request, &credentials())?;
            assert_eq!(image.cost_usd, 0.040);
            let sent = transport.requests();
            let sent_quality = sent[0].body.as_ref().map(|body| body["quality"].clone());
            assert_eq!(sent_quality, Some(json!(quality)));
        }
        Ok(())
    }

    #[test]
    fn missing_key_fails_without_a_request() {
        let transport = Arc::new(RecordingTransport::new());
        let err = provider(&transport)
            .generate(&GenerationRequest::new("a lamp"), &CredentialSet::default())
            .err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::MissingCredential));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn error_statuses_map_to_normalized_kinds() {
        let cases = [
            (429, json!({"error": {"message": "slow"}}), ErrorKind::RateLimited),
            (401, json!({"error": {"message": "bad key"}}), ErrorKind::Unauthorized),
            (403, json!({}), ErrorKind::Unauthorized),
            (
                400,
                json!({"error": {"code": "content_policy_violation", "message": "no"}}),
                ErrorKind::ContentPolicyViolation,
            ),
            (503, json!({}), ErrorKind::ServiceUnavailable),
            (500, json!({"error": {"message": "boom"}}), ErrorKind::UnknownProviderError),
        ];
        for (status, body, expected) in cases {
            let transport = Arc::new(RecordingTransport::new().reply_json(status, body));
            let err = provider(&transport)
                .generate(&GenerationRequest::new("a lamp"), &credentials())
                .err();
            assert_eq!(err.map(|err| err.kind), Some(expected), "status {status}");
        }
    }

    #[test]
    fn unknown_error_prefers_vendor_message() {
        let transport = Arc::new(
            RecordingTransport::new()
                .reply_json(400, json!({"error": {"message": "size is not supported"}})),
        );
        let err = provider(&transport)
            .generate(&GenerationRequest::new("a lamp").with_size("10x10"), &credentials())
            .err();
        assert_eq!(err.map(|err| err.message), Some("size is not supported".to_string()));
    }

    #[test]
    fn non_json_error_body_still_classifies() {
        let transport = Arc::new(
            RecordingTransport::new().reply_bytes(502, b"<html>bad gateway</html>".to_vec()),
        );
        let err = provider(&transport)
            .generate(&GenerationRequest::new("a lamp"), &credentials())
            .err();
        assert_eq!(
            err.map(|err| (err.kind, err.message)),
            Some((
                ErrorKind::UnknownProviderError,
                "DALL-E generation failed (HTTP 502)".to_string()
            ))
        );
    }

    #[test]
    fn success_without_image_is_an_unknown_provider_error() {
        let bodies = [
            json!({"data": []}),
            json!({"data": [{"revised_prompt": "x"}]}),
            json!({}),
        ];
        for body in bodies {
            let transport = Arc::new(RecordingTransport::new().reply_json(200, body));
            let err = provider(&transport)
                .generate(&GenerationRequest::new("a lamp"), &credentials())
                .err();
            assert_eq!(err.map(|err| err.kind), Some(ErrorKind::UnknownProviderError));
        }
    }

    #[test]
    fn success_with_invalid_json_is_malformed() {
        let transport =
            Arc::new(RecordingTransport::new().reply_bytes(200, b"not json".to_vec()));
        let err = provider(&transport)
            .generate(&GenerationRequest::new("a lamp"), &credentials())
            .err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::MalformedResponse));
    }

    #[test]
    fn transport_failure_is_reported_not_raised() {
        let transport = Arc::new(RecordingTransport::new().fail("connection refused"));
        let err = provider(&transport)
            .generate(&GenerationRequest::new("a lamp"), &credentials())
            .err();
        let err = err.map(|err| (err.kind, err.message.contains("connection refused")));
        assert_eq!(err, Some((ErrorKind::UnknownProviderError, true)));
    }
}
