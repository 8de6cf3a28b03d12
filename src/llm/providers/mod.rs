//! Concrete LLM provider implementations.
//!
//! The LiteLLM client lives in [`super::litellm`] next to the shared wire
//! types; this module holds the hosted providers.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;
