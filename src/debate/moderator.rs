//! Meta-moderation from recent round trends.
//!
//! The moderator only recommends; the debate loop decides what to apply.

use serde::{Deserialize, Serialize};

use super::prompts::clarification_prompt;
use super::types::DebateRound;
use crate::config::ModeratorSettings;

/// Recommendation emitted after each non-final round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModeratorDecision {
    Continue,
    /// Add clarifying context to the next round's prompts.
    InjectContext { text: String, reason: String },
    /// Ask one expert to argue against the leading option next round.
    RequestDissent { expert_id: String, reason: String },
    /// Stop the debate early.
    Terminate { reason: String },
}

impl ModeratorDecision {
    pub fn is_intervention(&self) -> bool {
        !matches!(self, Self::Continue)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::InjectContext { .. } => "inject_context",
            Self::RequestDissent { .. } => "request_dissent",
            Self::Terminate { .. } => "terminate",
        }
    }
}

/// Rule-based moderator.
#[derive(Debug, Clone, Default)]
pub struct MetaModerator {
    settings: ModeratorSettings,
}

impl MetaModerator {
    pub fn new(settings: ModeratorSettings) -> Self {
        Self { settings }
    }

    /// Inspect the completed rounds and recommend the next step.
    ///
    /// Rules, first match wins: deadlock, groupthink, decline.
    pub fn review(&self, question: &str, rounds: &[DebateRound], threshold: f64) -> ModeratorDecision {
        let Some(latest) = rounds.last() else {
            return ModeratorDecision::Continue;
        };

        let window = self.settings.window.clamp(2, 3);
        if rounds.len() >= window {
            let scores: Vec<f64> = rounds[rounds.len() - window..]
                .iter()
                .map(|r| r.consensus.consensus_score)
                .collect();
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            let min = scores.iter().copied().fold(f64::MAX, f64::min);
            if max < threshold && max - min <= self.settings.deadlock_tolerance {
                return ModeratorDecision::Terminate {
                    reason: format!(
                        "Deadlock: consensus stuck between {:.2} and {:.2} for {} rounds",
                        min, max, window
                    ),
                };
            }
        }

        let groupthink = latest.quality.map(|q| q.groupthink).unwrap_or(false);
        if groupthink && !latest.consensus.has_consensus {
            // Least confident expert; later experts win ties.
            let dissenter = latest
                .opinions
                .iter()
                .rev()
                .min_by(|a, b| a.confidence.total_cmp(&b.confidence));
            if let Some(opinion) = dissenter {
                return ModeratorDecision::RequestDissent {
                    expert_id: opinion.expert_id.clone(),
                    reason: "Low diversity without consensus suggests groupthink".to_string(),
                };
            }
        }

        if let Some(previous) = rounds.len().checked_sub(2).map(|i| &rounds[i]) {
            let consensus_drop = previous.consensus.consensus_score - latest.consensus.consensus_score;
            let quality_drop = match (previous.quality, latest.quality) {
                (Some(before), Some(after)) => before.overall_quality - after.overall_quality,
                _ => 0.0,
            };
            if consensus_drop > self.settings.decline_tolerance
                || quality_drop > self.settings.decline_tolerance
            {
                let leading = latest.consensus.leading_option().map(|o| o.text.as_str());
                return ModeratorDecision::InjectContext {
                    text: clarification_prompt(question, leading),
                    reason: format!(
                        "Decline: consensus {:+.2}, quality {:+.2}",
                        -consensus_drop, -quality_drop
                    ),
                };
            }
        }

        ModeratorDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::types::{ConsensusCheck, Opinion, QualityMetrics};
    use crate::llm::{ProviderKind, Usage};
    use chrono::Utc;

    fn quality(overall: f64, groupthink: bool) -> QualityMetrics {
        QualityMetrics {
            average_confidence: overall,
            coherence_score: overall,
            diversity_score: if groupthink { 0.0 } else { 0.6 },
            relevance_score: overall,
            overall_quality: overall,
            meets_thresholds: true,
            groupthink,
        }
    }

    fn opinion(expert: &str, confidence: f64) -> Opinion {
        Opinion {
            expert_id: expert.to_string(),
            recommendation: "Option A".to_string(),
            reasoning: "same".to_string(),
            confidence,
            pros: vec![],
            cons: vec![],
            provider: ProviderKind::OpenRouter,
            model: "m".to_string(),
            usage: Usage::default(),
            cost_usd: 0.0,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    fn round(number: u32, score: f64, quality: QualityMetrics, opinions: Vec<Opinion>) -> DebateRound {
        DebateRound {
            round_number: number,
            opinions,
            failures: vec![],
            consensus: ConsensusCheck {
                has_consensus: score >= 0.7,
                consensus_score: score,
                top_options: vec![],
                should_continue: score < 0.7,
                reasoning: String::new(),
            },
            quality: Some(quality),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn moderator() -> MetaModerator {
        MetaModerator::new(ModeratorSettings::default())
    }

    #[test]
    fn test_first_round_continues() {
        let rounds = vec![round(1, 0.4, quality(0.6, false), vec![])];
        assert_eq!(moderator().review("q", &rounds, 0.7), ModeratorDecision::Continue);
        assert_eq!(moderator().review("q", &[], 0.7), ModeratorDecision::Continue);
    }

    #[test]
    fn test_flat_low_scores_are_a_deadlock() {
        let rounds = vec![
            round(1, 0.42, quality(0.6, false), vec![]),
            round(2, 0.44, quality(0.6, false), vec![]),
            round(3, 0.43, quality(0.6, false), vec![]),
        ];
        let decision = moderator().review("q", &rounds, 0.7);
        assert_eq!(decision.label(), "terminate");

        let moving = vec![
            round(1, 0.30, quality(0.6, false), vec![]),
            round(2, 0.45, quality(0.6, false), vec![]),
            round(3, 0.55, quality(0.6, false), vec![]),
        ];
        assert_eq!(moderator().review("q", &moving, 0.7), ModeratorDecision::Continue);
    }

    #[test]
    fn test_groupthink_requests_dissent_from_least_confident() {
        let rounds = vec![round(
            1,
            0.5,
            quality(0.6, true),
            vec![opinion("e1", 0.9), opinion("e2", 0.4), opinion("e3", 0.4)],
        )];
        match moderator().review("q", &rounds, 0.7) {
            ModeratorDecision::RequestDissent { expert_id, .. } => assert_eq!(expert_id, "e3"),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_decline_injects_clarification() {
        let rounds = vec![
            round(1, 0.6, quality(0.7, false), vec![]),
            round(2, 0.4, quality(0.7, false), vec![]),
        ];
        match moderator().review("Which vendor?", &rounds, 0.7) {
            ModeratorDecision::InjectContext { text, .. } => assert!(text.contains("Which vendor?")),
            other => panic!("unexpected decision: {:?}", other),
        }

        let quality_drop = vec![
            round(1, 0.5, quality(0.8, false), vec![]),
            round(2, 0.5, quality(0.5, false), vec![]),
        ];
        assert_eq!(
            moderator().review("q", &quality_drop, 0.7).label(),
            "inject_context"
        );
    }
}
