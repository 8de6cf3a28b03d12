//! Provider registry and model catalog.
//!
//! Every [`AiConfig`] names its provider explicitly; dispatch is a lookup in
//! the [`ProviderRegistry`], never a guess based on the model id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::cost::ModelPricing;
use super::litellm::{LiteLlmClient, LlmProvider};
use super::providers::OpenRouterProvider;
use crate::error::LlmError;

/// Backend family a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenRouter,
    LiteLlm,
}

impl ProviderKind {
    /// Stable string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::LiteLlm => "litellm",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "litellm" | "lite_llm" => Ok(Self::LiteLlm),
            other => Err(LlmError::ProviderUnavailable(other.to_string())),
        }
    }
}

/// The LLM configuration bound to one expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    pub temperature: f64,
    #[serde(default)]
    pub pricing: ModelPricing,
}

impl AiConfig {
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            temperature: 0.7,
            pricing: ModelPricing::free(),
        }
    }

    /// Set temperature, clamped to [0, 2].
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Price tier of a catalog model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Free,
    Budget,
    Premium,
}

/// One model that experts can be bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOption {
    pub provider: ProviderKind,
    pub model_id: String,
    pub tier: ModelTier,
    pub pricing: ModelPricing,
}

impl ModelOption {
    pub fn new(
        provider: ProviderKind,
        model_id: impl Into<String>,
        tier: ModelTier,
        pricing: ModelPricing,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            tier,
            pricing,
        }
    }

    /// Build an [`AiConfig`] for this model.
    pub fn to_config(&self, temperature: f64) -> AiConfig {
        AiConfig::new(self.provider, self.model_id.clone())
            .with_temperature(temperature)
            .with_pricing(self.pricing)
    }
}

/// Ordered set of models available for panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelOption>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        use ModelTier::*;
        use ProviderKind::*;
        Self {
            models: vec![
                ModelOption::new(
                    OpenRouter,
                    "meta-llama/llama-3.3-70b-instruct:free",
                    Free,
                    ModelPricing::free(),
                ),
                ModelOption::new(
                    OpenRouter,
                    "deepseek/deepseek-chat-v3-0324:free",
                    Free,
                    ModelPricing::free(),
                ),
                ModelOption::new(
                    OpenRouter,
                    "openai/gpt-4o-mini",
                    Budget,
                    ModelPricing::new(0.15, 0.60),
                ),
                ModelOption::new(
                    OpenRouter,
                    "google/gemini-2.0-flash-001",
                    Budget,
                    ModelPricing::new(0.10, 0.40),
                ),
                ModelOption::new(
                    OpenRouter,
                    "anthropic/claude-3.5-sonnet",
                    Premium,
                    ModelPricing::new(3.0, 15.0),
                ),
                ModelOption::new(
                    LiteLlm,
                    "openai/gpt-4o-mini",
                    Budget,
                    ModelPricing::new(0.15, 0.60),
                ),
            ],
        }
    }
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelOption>) -> Self {
        Self { models }
    }

    /// Models ordered cheapest first: by tier, then blended price, then
    /// catalog position.
    ///
    /// `pinned` restricts the chain to one provider; `free_only` keeps only
    /// free-tier models.
    pub fn fallback_chain(&self, pinned: Option<ProviderKind>, free_only: bool) -> Vec<ModelOption> {
        let mut chain: Vec<(usize, &ModelOption)> = self
            .models
            .iter()
            .enumerate()
            .filter(|(_, m)| pinned.is_none_or(|p| m.provider == p))
            .filter(|(_, m)| !free_only || m.tier == ModelTier::Free)
            .collect();

        chain.sort_by(|(ia, a), (ib, b)| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| a.pricing.blended().total_cmp(&b.pricing.blended()))
                .then_with(|| ia.cmp(ib))
        });

        chain.into_iter().map(|(_, m)| m.clone()).collect()
    }

    /// Look up pricing for a provider/model pair.
    pub fn pricing_for(&self, provider: ProviderKind, model_id: &str) -> Option<ModelPricing> {
        self.models
            .iter()
            .find(|m| m.provider == provider && m.model_id == model_id)
            .map(|m| m.pricing)
    }
}

/// Static map of provider kind to client.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from environment credentials.
    ///
    /// Providers whose credentials are missing are skipped; an empty
    /// registry is an error.
    pub fn from_env() -> Result<Self, LlmError> {
        let mut registry = Self::new();

        match OpenRouterProvider::from_env() {
            Ok(provider) => registry.register(ProviderKind::OpenRouter, Arc::new(provider)),
            Err(e) => tracing::debug!(error = %e, "OpenRouter not configured"),
        }
        match LiteLlmClient::from_env() {
            Ok(client) => registry.register(ProviderKind::LiteLlm, Arc::new(client)),
            Err(e) => tracing::debug!(error = %e, "LiteLLM not configured"),
        }

        if registry.is_empty() {
            return Err(LlmError::MissingApiKey("OPENROUTER_API_KEY or LITELLM_API_BASE"));
        }
        Ok(registry)
    }

    /// Register (or replace) a provider.
    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_provider(mut self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(kind, provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| LlmError::ProviderUnavailable(kind.to_string()))
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use async_trait::async_trait;

    struct NullProvider;

    #[async_trait]
    impl LlmProvider for NullProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::RequestFailed("null".into()))
        }
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenRouter".parse::<ProviderKind>().ok(), Some(ProviderKind::OpenRouter));
        assert_eq!("litellm".parse::<ProviderKind>().ok(), Some(ProviderKind::LiteLlm));
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_fallback_chain_is_cost_ascending() {
        let chain = ModelCatalog::default().fallback_chain(None, false);
        assert_eq!(chain.first().map(|m| m.tier), Some(ModelTier::Free));
        assert_eq!(chain.last().map(|m| m.tier), Some(ModelTier::Premium));

        let budget: Vec<_> = chain.iter().filter(|m| m.tier == ModelTier::Budget).collect();
        assert_eq!(budget[0].model_id, "google/gemini-2.0-flash-001");
    }

    #[test]
    fn test_fallback_chain_pinned_and_free_only() {
        let catalog = ModelCatalog::default();
        let pinned = catalog.fallback_chain(Some(ProviderKind::LiteLlm), false);
        assert!(pinned.iter().all(|m| m.provider == ProviderKind::LiteLlm));

        let free = catalog.fallback_chain(None, true);
        assert_eq!(free.len(), 2);
        assert!(free.iter().all(|m| m.pricing.is_free()));

        assert!(catalog.fallback_chain(Some(ProviderKind::LiteLlm), true).is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let registry =
            ProviderRegistry::new().with_provider(ProviderKind::LiteLlm, Arc::new(NullProvider));
        assert!(registry.get(ProviderKind::LiteLlm).is_ok());
        assert!(matches!(
            registry.get(ProviderKind::OpenRouter),
            Err(LlmError::ProviderUnavailable(_))
        ));
        assert_eq!(registry.kinds(), vec![ProviderKind::LiteLlm]);
    }

    #[test]
    fn test_ai_config_clamps_temperature() {
        let config = AiConfig::new(ProviderKind::OpenRouter, "m").with_temperature(5.0);
        assert_eq!(config.temperature, 2.0);
    }
}
