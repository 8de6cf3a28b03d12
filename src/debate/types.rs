//! Debate data model.
//!
//! Rounds, opinions and results are immutable once built. The
//! [`DebateSession`] is the only mutable record and is what pollers read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::llm::{AiConfig, ProviderKind, Usage};

// ============================================================================
// Experts
// ============================================================================

/// An expert persona bound to an LLM configuration for one debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub id: String,
    pub name: String,
    /// Expertise tags used for panel matching.
    pub expertise: Vec<String>,
    pub description: String,
    pub ai_config: AiConfig,
    /// Tried in order when the primary configuration exhausts its retries.
    #[serde(default)]
    pub fallbacks: Vec<AiConfig>,
}

impl ExpertProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        expertise: Vec<String>,
        description: impl Into<String>,
        ai_config: AiConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expertise,
            description: description.into(),
            ai_config,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<AiConfig>) -> Self {
        self.fallbacks = fallbacks;
        self
    }
}

// ============================================================================
// Opinions and rounds
// ============================================================================

/// One expert's answer in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub expert_id: String,
    /// The stated recommendation; used for clustering.
    pub recommendation: String,
    pub reasoning: String,
    /// Always within [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    pub provider: ProviderKind,
    pub model: String,
    pub usage: Usage,
    pub cost_usd: f64,
    /// Served from the response cache.
    #[serde(default)]
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

/// Why an expert produced no opinion in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The per-expert timeout or the round deadline elapsed.
    TimedOut,
    RetriesExhausted { attempts: u32, message: String },
    Fatal { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::RetriesExhausted { attempts, message } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, message)
            }
            Self::Fatal { message } => write!(f, "{}", message),
        }
    }
}

/// A non-responsive expert recorded on a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertFailure {
    pub expert_id: String,
    pub reason: FailureReason,
}

/// A distinct option after clustering opinions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOption {
    pub text: String,
    pub score: f64,
    /// Mean confidence of the opinions backing this option.
    pub confidence: f64,
    /// Experts that backed this option in any round, in first-seen order.
    pub supporters: Vec<String>,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub reasoning: String,
}

/// Consensus evaluation after a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusCheck {
    pub has_consensus: bool,
    pub consensus_score: f64,
    pub top_options: Vec<RankedOption>,
    pub should_continue: bool,
    pub reasoning: String,
}

impl ConsensusCheck {
    /// Check for a round without any opinions.
    pub fn empty(rounds_remaining: u32) -> Self {
        Self {
            has_consensus: false,
            consensus_score: 0.0,
            top_options: Vec::new(),
            should_continue: rounds_remaining > 0,
            reasoning: "No opinions to evaluate".to_string(),
        }
    }

    pub fn leading_option(&self) -> Option<&RankedOption> {
        self.top_options.first()
    }
}

/// Per-round quality assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub average_confidence: f64,
    pub coherence_score: f64,
    pub diversity_score: f64,
    pub relevance_score: f64,
    /// Mean of the four scores above.
    pub overall_quality: f64,
    pub meets_thresholds: bool,
    pub groupthink: bool,
}

/// One completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-based and gap-free within a debate.
    pub round_number: u32,
    /// In panel order.
    pub opinions: Vec<Opinion>,
    pub failures: Vec<ExpertFailure>,
    pub consensus: ConsensusCheck,
    pub quality: Option<QualityMetrics>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DebateRound {
    pub fn cost_usd(&self) -> f64 {
        self.opinions.iter().map(|o| o.cost_usd).sum()
    }

    /// Short textual digest fed into the next round's prompts.
    pub fn summarize(&self) -> String {
        let mut summary = format!("Round {} positions:\n", self.round_number);
        for opinion in &self.opinions {
            summary.push_str(&format!(
                "- {} (confidence {:.2}): {}\n",
                opinion.expert_id, opinion.confidence, opinion.recommendation
            ));
        }
        if let Some(leader) = self.consensus.leading_option() {
            summary.push_str(&format!(
                "Leading option: {} (score {:.2})\n",
                leader.text, leader.score
            ));
        }
        summary
    }
}

// ============================================================================
// Session
// ============================================================================

/// Debate lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateState {
    Pending,
    Running,
    Paused,
    Completed,
    ConsensusReached,
    ForceConcluded,
    Failed,
}

impl DebateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::ConsensusReached | Self::ForceConcluded | Self::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::ConsensusReached => "consensus_reached",
            Self::ForceConcluded => "force_concluded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DebateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress figures surfaced to pollers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetadata {
    pub consensus_score: f64,
    pub dominant_position: Option<String>,
    pub active_experts: usize,
    pub last_round_summary: Option<String>,
    /// Opinions gathered so far.
    pub argument_count: usize,
}

/// Context injected into a running debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub text: String,
    pub injected_at: DateTime<Utc>,
    pub injected_by: String,
    /// First round whose prompts include this entry.
    pub applies_to_round: u32,
}

/// The mutable, persisted view of a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub debate_id: String,
    pub question: String,
    pub state: DebateState,
    pub current_round: u32,
    pub max_rounds: u32,
    pub live_metadata: LiveMetadata,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub additional_context: Vec<ContextEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Incremented on every write; stores ignore older revisions.
    pub revision: u64,
}

impl DebateSession {
    /// A fresh `pending` session.
    pub fn new(debate_id: impl Into<String>, question: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            debate_id: debate_id.into(),
            question: question.into(),
            state: DebateState::Pending,
            current_round: 0,
            max_rounds,
            live_metadata: LiveMetadata::default(),
            paused_at: None,
            pause_reason: None,
            additional_context: Vec::new(),
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
            error_message: None,
            revision: 0,
        }
    }

    /// Mark a write: bump the revision and refresh `updated_at`.
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    /// Context entries that apply to `round`, in insertion order.
    pub fn context_for_round(&self, round: u32) -> Vec<ContextEntry> {
        self.additional_context
            .iter()
            .filter(|entry| entry.applies_to_round <= round)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// Input for one debate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateRequest {
    pub question: String,
    /// Optional domain context included in every prompt.
    pub context: Option<String>,
    pub panel_size: Option<usize>,
    pub max_rounds: Option<u32>,
    pub consensus_threshold: Option<f64>,
    /// Restricts model binding to one provider.
    pub pinned_provider: Option<ProviderKind>,
    /// Use this panel instead of resolving one.
    pub panel: Option<Vec<ExpertProfile>>,
    /// Groups sessions that belong to one logical debate.
    pub debate_id: Option<String>,
}

impl DebateRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_panel_size(mut self, size: usize) -> Self {
        self.panel_size = Some(size);
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds.max(1));
        self
    }

    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn with_pinned_provider(mut self, provider: ProviderKind) -> Self {
        self.pinned_provider = Some(provider);
        self
    }

    pub fn with_panel(mut self, panel: Vec<ExpertProfile>) -> Self {
        self.panel = Some(panel);
        self
    }

    pub fn with_debate_id(mut self, debate_id: impl Into<String>) -> Self {
        self.debate_id = Some(debate_id.into());
        self
    }
}

/// Terminal outcome of a debate, created once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateResult {
    pub session_id: String,
    pub debate_id: String,
    pub question: String,
    pub status: DebateState,
    pub panel: Vec<ExpertProfile>,
    pub rounds: Vec<DebateRound>,
    pub final_ranking: Vec<RankedOption>,
    /// Sum of per-opinion costs.
    pub total_cost_usd: f64,
    /// Number of completed rounds.
    pub total_rounds: u32,
    pub consensus_score: f64,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl DebateResult {
    /// Build a result; totals are derived from `rounds`.
    pub fn new(
        session: &DebateSession,
        status: DebateState,
        panel: Vec<ExpertProfile>,
        rounds: Vec<DebateRound>,
        error_message: Option<String>,
    ) -> Self {
        let (final_ranking, consensus_score) = rounds
            .last()
            .map(|r| (r.consensus.top_options.clone(), r.consensus.consensus_score))
            .unwrap_or_default();

        Self {
            session_id: session.id.clone(),
            debate_id: session.debate_id.clone(),
            question: session.question.clone(),
            status,
            panel,
            total_cost_usd: rounds.iter().map(DebateRound::cost_usd).sum(),
            total_rounds: rounds.len() as u32,
            rounds,
            final_ranking,
            consensus_score,
            error_message,
            completed_at: Utc::now(),
        }
    }

    pub fn winner(&self) -> Option<&RankedOption> {
        self.final_ranking.first()
    }

    pub fn is_success(&self) -> bool {
        self.status != DebateState::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!DebateState::Pending.is_terminal());
        assert!(!DebateState::Running.is_terminal());
        assert!(!DebateState::Paused.is_terminal());
        assert!(DebateState::Completed.is_terminal());
        assert!(DebateState::ConsensusReached.is_terminal());
        assert!(DebateState::ForceConcluded.is_terminal());
        assert!(DebateState::Failed.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&DebateState::ConsensusReached).expect("serialize");
        assert_eq!(json, "\"consensus_reached\"");
        assert_eq!(DebateState::ForceConcluded.to_string(), "force_concluded");
    }

    #[test]
    fn test_context_for_round_keeps_order() {
        let mut session = DebateSession::new("d", "q", 3);
        for (text, round) in [("first", 2), ("second", 3), ("third", 2)] {
            session.additional_context.push(ContextEntry {
                text: text.to_string(),
                injected_at: Utc::now(),
                injected_by: "user".to_string(),
                applies_to_round: round,
            });
        }

        let texts: Vec<_> = session
            .context_for_round(2)
            .into_iter()
            .map(|e| e.text)
            .collect();
        assert_eq!(texts, vec!["first", "third"]);
        assert_eq!(session.context_for_round(3).len(), 3);
        assert!(session.context_for_round(1).is_empty());
    }

    #[test]
    fn test_touch_bumps_revision() {
        let mut session = DebateSession::new("d", "q", 3);
        let before = session.updated_at;
        session.touch();
        session.touch();
        assert_eq!(session.revision, 2);
        assert!(session.updated_at >= before);
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::RetriesExhausted {
            attempts: 6,
            message: "API error (503): down".to_string(),
        };
        assert_eq!(
            reason.to_string(),
            "retries exhausted after 6 attempts: API error (503): down"
        );
        assert_eq!(FailureReason::TimedOut.to_string(), "timed out");
    }
}
