//! Multi-phase orchestration.
//!
//! The orchestrator analyzes a question, selects a [`DebatePattern`] and
//! composes debates into phases:
//!
//! - `single`: one debate.
//! - `tournament`: pairwise elimination over the options the question names.
//! - `adversarial`: an advocacy debate per option, then a verdict debate.
//! - `ensemble`: independent debates, then a synthesis debate.

pub mod pattern;
pub mod runner;
pub mod sequence;

use thiserror::Error;

use crate::debate::DebateError;

pub use pattern::{extract_options, DebatePattern, PatternSelector, QuestionSignals, SignalLevel};
pub use runner::Orchestrator;
pub use sequence::{DebateSequence, FinalConclusion, PhaseResult, SubDebateResult};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Debate error: {0}")]
    Debate(#[from] DebateError),

    /// A phase produced no usable debate. `partial` holds every phase run so
    /// far, the failed one included, so its cost stays accounted for.
    #[error("Phase '{phase}' failed: {reason}")]
    PhaseFailed {
        phase: String,
        reason: String,
        partial: Box<DebateSequence>,
    },

    #[error("Pattern {pattern} needs at least two options named in the question")]
    NoOptions { pattern: DebatePattern },
}
