//! LLM integration for consensus-forge.
//!
//! Provides the OpenAI-compatible request/response types, the [`LlmProvider`]
//! trait, the OpenRouter and LiteLLM clients, explicit provider dispatch,
//! the retry controller, cost tracking and the response cache.
//!
//! # Retry
//!
//! Providers perform a single HTTP exchange per call. Callers wrap calls in
//! [`retry_with_backoff`], which classifies [`crate::error::LlmError`]s by
//! status code and message:
//!
//! ```ignore
//! use consensus_forge::llm::{retry_with_backoff, RetryConfig};
//!
//! let config = RetryConfig::default();
//! let response = retry_with_backoff(|| provider.generate(request.clone()), &config).await?;
//! ```
//!
//! # Cost Tracking
//!
//! ```ignore
//! use consensus_forge::llm::{CostTracker, ModelPricing, Usage};
//!
//! let tracker = CostTracker::new(10.0, 100.0); // $10/day, $100/month
//! let cost = tracker.record("openai/gpt-4o-mini", &Usage::new(800, 300), &ModelPricing::new(0.15, 0.6), None);
//! ```

pub mod cache;
pub mod cost;
pub mod litellm;
pub mod providers;
pub mod registry;
pub mod retry;

pub use cache::{
    CacheStats, CachedCompletion, ContentHash, InMemoryResponseCache, RedisResponseCache,
    ResponseCache,
};
pub use cost::{CostReport, CostTracker, ModelPricing, UsageRecord};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use providers::OpenRouterProvider;
pub use registry::{AiConfig, ModelCatalog, ModelOption, ModelTier, ProviderKind, ProviderRegistry};
pub use retry::{parse_retry_after, retry_with_backoff, RetryConfig, RetryError, Retryable};
