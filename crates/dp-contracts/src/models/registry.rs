use indexmap::IndexMap;

use crate::providers::ProviderKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: ProviderKind,
    /// Quality tier this entry answers to (`standard`, `hd`, `flash`, `pro`).
    pub tier: String,
    pub cost_per_image_usd: f64,
}

impl ModelSpec {
    pub fn matches(&self, provider: ProviderKind, tier: &str) -> bool {
        self.provider == provider && self.tier == tier
    }
}

/// Fixed lookup of (provider, quality tier) to model id and per-image cost.
///
/// Costs are list prices, not billing data. The first entry registered for a
/// provider is its default tier.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ModelSpec> {
        self.models.get(key)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_provider(&self, provider: ProviderKind) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider)
            .cloned()
            .collect()
    }

    pub fn find(&self, provider: ProviderKind, tier: &str) -> Option<ModelSpec> {
        self.models
            .values()
            .find(|model| model.matches(provider, tier))
            .cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: ProviderKind, tier: &str, cost: f64| {
        map.insert(
            format!("{provider}/{tier}"),
            ModelSpec {
                name: name.to_string(),
                provider,
                tier: tier.to_string(),
                cost_per_image_usd: cost,
            },
        );
    };

    insert("dall-e-3", ProviderKind::Openai, "standard", 0.040);
    insert("dall-e-3", ProviderKind::Openai, "hd", 0.080);
    // Gemini image models are free during preview pricing.
    insert("gemini-3-pro-image-preview", ProviderKind::Gemini, "pro", 0.0);
    insert("gemini-2.5-flash-image", ProviderKind::Gemini, "flash", 0.0);

    map
}
