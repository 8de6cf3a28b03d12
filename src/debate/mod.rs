//! Multi-expert debates.
//!
//! A debate resolves a panel of experts, runs sequential rounds in which
//! every expert is consulted concurrently, scores consensus cumulatively
//! after each round, and ends in one of four terminal states.
//!
//! # Example
//!
//! ```rust,ignore
//! use consensus_forge::config::EngineConfig;
//! use consensus_forge::debate::{DebateEngine, DebateRequest};
//! use consensus_forge::llm::ProviderRegistry;
//!
//! let engine = DebateEngine::new(EngineConfig::from_env()?, ProviderRegistry::from_env()?);
//! let result = engine
//!     .run(DebateRequest::new("Should we migrate billing to Postgres?").with_max_rounds(3))
//!     .await?;
//! println!("{} -> {:?}", result.status, result.winner().map(|o| &o.text));
//! ```

pub mod consensus;
pub mod engine;
pub mod error;
pub mod events;
pub mod moderator;
pub mod notify;
pub mod panel;
pub mod prompts;
pub mod quality;
pub mod round;
pub mod session;
pub mod types;

pub use consensus::{ConsensusScorer, LexicalClusterer, OptionClusterer, OptionQuality};
pub use engine::{DebateEngine, DebateHandle, DebateRunner};
pub use error::{DebateError, EngineResult, PanelError};
pub use events::{DebateEvent, EventBus};
pub use moderator::{MetaModerator, ModeratorDecision};
pub use notify::{
    CompletionNotice, CompletionNotifier, LogNotifier, NotifyError, WebhookNotifier,
};
pub use panel::{default_catalog, ExpertTemplate, PanelResolver};
pub use quality::{
    ArgumentQuality, AssessedScores, LlmQualityAssessor, QualityAssessor, QualityMonitor,
};
pub use round::{parse_opinion, ParsedOpinion, RoundExecutor, RoundOutcome};
pub use session::SessionControl;
pub use types::{
    ConsensusCheck, ContextEntry, DebateRequest, DebateResult, DebateRound, DebateSession,
    DebateState, ExpertFailure, ExpertProfile, FailureReason, LiveMetadata, Opinion,
    QualityMetrics, RankedOption,
};
