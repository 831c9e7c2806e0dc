use crate::providers::ProviderKind;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Picks the model for a provider's quality input.
    ///
    /// Tiers match exactly. Unknown or missing quality values land on the
    /// provider's default tier; they are never rejected here.
    pub fn select(
        &self,
        provider: ProviderKind,
        quality: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let requested = quality
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let fallback_reason = if let Some(requested_tier) = requested.as_deref() {
            if let Some(model) = self.registry.find(provider, requested_tier) {
                return Ok(ModelSelection {
                    model,
                    requested,
                    fallback_reason: None,
                });
            }
            Some(format!(
                "Quality '{requested_tier}' is not a known tier for {provider}; using default."
            ))
        } else {
            Some("No quality specified; using default.".to_string())
        };

        let candidates = self.registry.by_provider(provider);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!("No models registered for provider '{provider}'."));
        };
        Ok(ModelSelection {
            model,
            requested,
            fallback_reason,
        })
    }
}
