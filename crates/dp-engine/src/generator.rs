use std::sync::Arc;
use std::time::Instant;

use dp_contracts::credentials::CredentialSet;
use dp_contracts::generation::{GenerationRequest, GenerationResult};
use dp_contracts::providers::ProviderKind;
use tracing::{debug, info, warn};

use crate::providers::{GeminiProvider, ImageProvider, OpenAiProvider, ProviderEndpoints};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Selects the adapter for a request, times the call, and folds every
/// outcome into a [`GenerationResult`].
pub struct ImageGenerator {
    credentials: CredentialSet,
    transport: Arc<dyn HttpTransport>,
    openai: OpenAiProvider,
    gemini: GeminiProvider,
}

impl ImageGenerator {
    pub fn new(
        credentials: CredentialSet,
        endpoints: &ProviderEndpoints,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            credentials,
            openai: OpenAiProvider::new(endpoints.openai.clone(), transport.clone()),
            gemini: GeminiProvider::new(endpoints.gemini.clone(), transport.clone()),
            transport,
        }
    }

    /// Generator backed by a blocking reqwest client.
    pub fn with_default_transport(
        credentials: CredentialSet,
        endpoints: &ProviderEndpoints,
    ) -> Self {
        Self::new(credentials, endpoints, Arc::new(ReqwestTransport::new()))
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// The transport shared with the adapters, for follow-up downloads.
    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub fn provider(&self, kind: ProviderKind) -> &dyn ImageProvider {
        match kind {
            ProviderKind::Openai => &self.openai,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    pub fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let outcome = request
            .provider
            .parse::<ProviderKind>()
            .and_then(|kind| {
                let adapter = self.provider(kind);
                debug!(provider = %adapter.kind(), "dispatching generation request");
                adapter.generate(request, &self.credentials)
            });
        let elapsed = started.elapsed();

        match &outcome {
            Ok(image) => info!(
                provider = %image.provider,
                model = %image.model,
                cost_usd = image.cost_usd,
                elapsed_s = elapsed.as_secs_f64(),
                "image generated"
            ),
            Err(err) => warn!(
                provider = %request.provider,
                kind = %err.kind,
                elapsed_s = elapsed.as_secs_f64(),
                "image generation failed: {err}"
            ),
        }

        GenerationResult {
            provider: request.provider.clone(),
            elapsed,
            outcome,
        }
    }
}
