//! consensus-forge: multi-expert LLM debate orchestration.
//!
//! This library convenes panels of LLM-backed experts, runs debate rounds
//! with retries, fallbacks and timeouts, scores consensus across rounds,
//! moderates stalled debates, and composes debates into multi-phase
//! patterns (tournament, adversarial, ensemble).

pub mod cli;
pub mod config;
pub mod debate;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{CacheError, ConfigError, LlmError, StoreError};

pub use config::EngineConfig;
pub use debate::{
    DebateEngine, DebateError, DebateRequest, DebateResult, DebateRunner, DebateState, PanelError,
};
pub use orchestrator::{DebatePattern, DebateSequence, Orchestrator, OrchestratorError};
