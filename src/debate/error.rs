//! Error types for panel resolution and the debate loop.

use thiserror::Error;

use super::types::{DebateState, ExpertProfile};
use crate::error::{ConfigError, StoreError};

/// Errors raised while assembling an expert panel.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Fewer experts matched the question than the minimum viable count.
    ///
    /// The partial panel is returned so the caller can decide whether to
    /// proceed with it.
    #[error("Panel underfilled: {matched} matching experts, {minimum} required")]
    Underfilled {
        matched: usize,
        minimum: usize,
        partial: Vec<ExpertProfile>,
    },

    #[error("Expert catalog is empty")]
    EmptyCatalog,

    #[error("No models available for the requested provider or budget")]
    NoModelsAvailable,

    #[error("Invalid panel size {requested}: must be between {min} and {max}")]
    InvalidPanelSize {
        requested: usize,
        min: usize,
        max: usize,
    },
}

/// Errors that can occur while running or controlling a debate.
#[derive(Debug, Error)]
pub enum DebateError {
    #[error("Panel resolution failed: {0}")]
    Panel(#[from] PanelError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cannot {command} a session in state {from}")]
    InvalidTransition {
        from: DebateState,
        command: &'static str,
    },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Debate configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Debate task ended unexpectedly: {0}")]
    Channel(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, DebateError>;
