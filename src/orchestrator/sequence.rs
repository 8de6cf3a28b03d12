//! Results of a multi-phase orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pattern::{DebatePattern, QuestionSignals};
use crate::debate::{DebateResult, RankedOption};

/// One debate inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubDebateResult {
    pub label: String,
    /// Options this debate was asked to decide between, if any.
    pub candidates: Vec<String>,
    pub result: Option<DebateResult>,
    /// Set when the debate could not be started.
    pub error: Option<String>,
}

impl SubDebateResult {
    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(DebateResult::is_success)
    }

    pub fn cost_usd(&self) -> f64 {
        self.result.as_ref().map_or(0.0, |r| r.total_cost_usd)
    }

    pub fn rounds(&self) -> u32 {
        self.result.as_ref().map_or(0, |r| r.total_rounds)
    }

    pub fn consensus_score(&self) -> f64 {
        self.result.as_ref().map_or(0.0, |r| r.consensus_score)
    }

    pub fn winner(&self) -> Option<&RankedOption> {
        self.result.as_ref().and_then(DebateResult::winner)
    }
}

/// A group of sub-debates run together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub sub_debates: Vec<SubDebateResult>,
    /// What the phase hands to the next one (tournament survivors, advocacy
    /// positions, ensemble answers).
    pub advancing: Vec<String>,
}

impl PhaseResult {
    /// Highest-consensus successful sub-debate that produced a winner.
    pub fn best(&self) -> Option<&SubDebateResult> {
        self.sub_debates
            .iter()
            .filter(|s| s.is_success() && s.winner().is_some())
            .fold(None, |best: Option<&SubDebateResult>, s| match best {
                Some(b) if b.consensus_score() >= s.consensus_score() => Some(b),
                _ => Some(s),
            })
    }
}

/// The answer synthesized from the last phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalConclusion {
    pub recommendation: String,
    pub consensus_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    /// Session the conclusion was taken from.
    pub source_session_id: String,
    pub alternatives: Vec<RankedOption>,
}

impl FinalConclusion {
    pub fn from_sub_debate(sub: &SubDebateResult, recommendation: Option<String>) -> Option<Self> {
        let result = sub.result.as_ref()?;
        let winner = result.winner()?;
        Some(Self {
            recommendation: recommendation.unwrap_or_else(|| winner.text.clone()),
            consensus_score: result.consensus_score,
            confidence: winner.confidence,
            reasoning: winner.reasoning.clone(),
            pros: winner.pros.clone(),
            cons: winner.cons.clone(),
            source_session_id: result.session_id.clone(),
            alternatives: result.final_ranking.iter().skip(1).cloned().collect(),
        })
    }
}

/// A full orchestration: every phase plus the final conclusion.
///
/// Phases are append-only; cost and round totals are always summed from
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSequence {
    pub id: String,
    pub question: String,
    pub pattern: DebatePattern,
    pub signals: QuestionSignals,
    phases: Vec<PhaseResult>,
    pub conclusion: Option<FinalConclusion>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DebateSequence {
    pub fn new(question: impl Into<String>, pattern: DebatePattern, signals: QuestionSignals) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            pattern,
            signals,
            phases: Vec::new(),
            conclusion: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    pub fn push_phase(&mut self, phase: PhaseResult) {
        self.phases.push(phase);
    }

    fn sub_debates(&self) -> impl Iterator<Item = &SubDebateResult> {
        self.phases.iter().flat_map(|p| p.sub_debates.iter())
    }

    /// Cost of every sub-debate in every phase, failed phases included.
    pub fn total_cost_usd(&self) -> f64 {
        self.sub_debates().map(SubDebateResult::cost_usd).sum()
    }

    pub fn total_rounds(&self) -> u32 {
        self.sub_debates().map(SubDebateResult::rounds).sum()
    }

    pub fn sub_debate_count(&self) -> usize {
        self.sub_debates().count()
    }

    pub fn finish(&mut self, conclusion: Option<FinalConclusion>) {
        self.conclusion = conclusion;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::{DebateResult, DebateState};

    fn sub(label: &str, cost: f64, rounds: u32) -> SubDebateResult {
        SubDebateResult {
            label: label.to_string(),
            candidates: Vec::new(),
            result: Some(DebateResult {
                session_id: label.to_string(),
                debate_id: "seq".to_string(),
                question: "q".to_string(),
                status: DebateState::Completed,
                panel: Vec::new(),
                rounds: Vec::new(),
                final_ranking: Vec::new(),
                total_cost_usd: cost,
                total_rounds: rounds,
                consensus_score: 0.5,
                error_message: None,
                completed_at: Utc::now(),
            }),
            error: None,
        }
    }

    #[test]
    fn test_totals_follow_phases() {
        let mut sequence =
            DebateSequence::new("q", DebatePattern::Ensemble, QuestionSignals::analyze("q"));
        assert_eq!(sequence.total_rounds(), 0);

        sequence.push_phase(PhaseResult {
            name: "ensemble".to_string(),
            sub_debates: vec![sub("a", 0.01, 2), sub("b", 0.02, 3)],
            advancing: Vec::new(),
        });
        sequence.push_phase(PhaseResult {
            name: "synthesis".to_string(),
            sub_debates: vec![sub("c", 0.005, 1)],
            advancing: Vec::new(),
        });

        assert_eq!(sequence.sub_debate_count(), 3);
        assert_eq!(sequence.total_rounds(), 6);
        assert!((sequence.total_cost_usd() - 0.035).abs() < 1e-12);
    }

    #[test]
    fn test_serialized_sequence_keeps_phases() {
        let mut sequence =
            DebateSequence::new("q", DebatePattern::Single, QuestionSignals::analyze("q"));
        sequence.push_phase(PhaseResult {
            name: "debate".to_string(),
            sub_debates: vec![sub("a", 0.01, 2)],
            advancing: Vec::new(),
        });
        let json = serde_json::to_string(&sequence).unwrap();
        let back: DebateSequence = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phases().len(), 1);
        assert_eq!(back.total_rounds(), 2);
    }
}
