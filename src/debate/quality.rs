//! Per-round quality monitoring.
//!
//! Coherence and relevance come either from a lexical heuristic or from an
//! auxiliary model; diversity and average confidence are always computed
//! locally. LLM assessment is best-effort and falls back to the heuristic.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::consensus::OptionQuality;
use super::prompts::quality_assessment_prompt;
use super::types::{Opinion, QualityMetrics};
use crate::config::QualitySettings;
use crate::error::LlmError;
use crate::llm::{
    retry_with_backoff, AiConfig, GenerationRequest, LlmProvider, Message, RetryConfig,
};
use crate::utils::{extract_json_object, jaccard, keywords};

/// Reasoning length (in words) that earns the full reasoning share of coherence.
const FULL_REASONING_WORDS: f64 = 30.0;

/// Coherence and relevance as judged by an assessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssessedScores {
    pub coherence: f64,
    pub relevance: f64,
}

/// Scores a round's coherence and relevance.
#[async_trait]
pub trait QualityAssessor: Send + Sync {
    async fn assess(&self, question: &str, opinions: &[Opinion]) -> Result<AssessedScores, LlmError>;
}

/// Computes [`QualityMetrics`] for a round.
#[derive(Clone)]
pub struct QualityMonitor {
    settings: QualitySettings,
    assessor: Option<Arc<dyn QualityAssessor>>,
}

impl QualityMonitor {
    pub fn new(settings: QualitySettings) -> Self {
        Self {
            settings,
            assessor: None,
        }
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    /// Assess a round, using the auxiliary assessor when one is configured.
    pub async fn evaluate(&self, question: &str, opinions: &[Opinion]) -> QualityMetrics {
        if opinions.is_empty() {
            return self.evaluate_heuristic(question, opinions);
        }

        let scores = match &self.assessor {
            Some(assessor) => match assessor.assess(question, opinions).await {
                Ok(scores) => AssessedScores {
                    coherence: sanitize(scores.coherence),
                    relevance: sanitize(scores.relevance),
                },
                Err(e) => {
                    warn!(error = %e, "Quality assessor failed, using heuristic scores");
                    heuristic_scores(question, opinions)
                }
            },
            None => heuristic_scores(question, opinions),
        };

        self.combine(opinions, scores)
    }

    /// Pure heuristic assessment; no model calls.
    pub fn evaluate_heuristic(&self, question: &str, opinions: &[Opinion]) -> QualityMetrics {
        self.combine(opinions, heuristic_scores(question, opinions))
    }

    fn combine(&self, opinions: &[Opinion], scores: AssessedScores) -> QualityMetrics {
        let average_confidence = if opinions.is_empty() {
            0.0
        } else {
            opinions
                .iter()
                .map(|o| o.confidence.clamp(0.0, 1.0))
                .sum::<f64>()
                / opinions.len() as f64
        };
        let diversity_score = diversity(opinions);
        let overall_quality =
            (average_confidence + scores.coherence + diversity_score + scores.relevance) / 4.0;

        let meets_thresholds = !opinions.is_empty()
            && average_confidence >= self.settings.min_confidence
            && scores.coherence >= self.settings.min_coherence
            && scores.relevance >= self.settings.min_relevance;
        let groupthink =
            opinions.len() >= 2 && diversity_score < self.settings.groupthink_diversity;

        debug!(
            average_confidence,
            coherence = scores.coherence,
            diversity = diversity_score,
            relevance = scores.relevance,
            meets_thresholds,
            groupthink,
            "Round quality assessed"
        );

        QualityMetrics {
            average_confidence,
            coherence_score: scores.coherence,
            diversity_score,
            relevance_score: scores.relevance,
            overall_quality: overall_quality.clamp(0.0, 1.0),
            meets_thresholds,
            groupthink,
        }
    }
}

fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ============================================================================
// Heuristics
// ============================================================================

fn heuristic_scores(question: &str, opinions: &[Opinion]) -> AssessedScores {
    AssessedScores {
        coherence: coherence(opinions),
        relevance: relevance(question, opinions),
    }
}

/// Structure-based coherence: a stated recommendation, enough reasoning,
/// and at least one pro or con.
fn coherence(opinions: &[Opinion]) -> f64 {
    if opinions.is_empty() {
        return 0.0;
    }
    opinions.iter().map(opinion_coherence).sum::<f64>() / opinions.len() as f64
}

fn opinion_coherence(opinion: &Opinion) -> f64 {
    let mut score = 0.0;
    if !opinion.recommendation.trim().is_empty() {
        score += 0.25;
    }
    let words = opinion.reasoning.split_whitespace().count() as f64;
    score += 0.55 * (words / FULL_REASONING_WORDS).min(1.0);
    if !opinion.pros.is_empty() || !opinion.cons.is_empty() {
        score += 0.2;
    }
    score
}

/// Per-option quality signal for the consensus scorer: how well argued the
/// opinions backing an option are, weighted by their confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentQuality;

impl OptionQuality for ArgumentQuality {
    fn quality(&self, _option: &str, backing: &[&Opinion]) -> f64 {
        let weight: f64 = backing.iter().map(|o| o.confidence.clamp(0.0, 1.0)).sum();
        if weight <= 0.0 {
            return 0.0;
        }
        backing
            .iter()
            .map(|o| o.confidence.clamp(0.0, 1.0) * opinion_coherence(o))
            .sum::<f64>()
            / weight
    }
}

/// Mean pairwise keyword distance; a single opinion has no diversity.
fn diversity(opinions: &[Opinion]) -> f64 {
    if opinions.len() < 2 {
        return 0.0;
    }
    let sets: Vec<_> = opinions
        .iter()
        .map(|o| keywords(&format!("{} {}", o.recommendation, o.reasoning)))
        .collect();

    let mut distance = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            distance += 1.0 - jaccard(&sets[i], &sets[j]);
            pairs += 1;
        }
    }
    distance / pairs as f64
}

/// Share of question keywords each opinion mentions; covering half of them
/// counts as fully relevant.
fn relevance(question: &str, opinions: &[Opinion]) -> f64 {
    if opinions.is_empty() {
        return 0.0;
    }
    let question_terms = keywords(question);
    if question_terms.is_empty() {
        return 1.0;
    }
    let total: f64 = opinions
        .iter()
        .map(|o| {
            let terms = keywords(&format!("{} {}", o.recommendation, o.reasoning));
            let hits = question_terms.intersection(&terms).count() as f64;
            (2.0 * hits / question_terms.len() as f64).min(1.0)
        })
        .sum();
    total / opinions.len() as f64
}

// ============================================================================
// LLM assessor
// ============================================================================

/// Asks an auxiliary model to rate coherence and relevance.
pub struct LlmQualityAssessor {
    provider: Arc<dyn LlmProvider>,
    config: AiConfig,
    retry: RetryConfig,
    max_tokens: u32,
}

impl LlmQualityAssessor {
    pub fn new(provider: Arc<dyn LlmProvider>, config: AiConfig) -> Self {
        Self {
            provider,
            config,
            retry: RetryConfig::default(),
            max_tokens: 200,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Deserialize)]
struct AssessmentReply {
    coherence: Option<f64>,
    relevance: Option<f64>,
}

fn score_regex(field: &str) -> &'static Regex {
    static COHERENCE: OnceLock<Regex> = OnceLock::new();
    static RELEVANCE: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = if field == "coherence" {
        (&COHERENCE, r#"(?i)"?coherence"?\s*[:=]\s*([0-9]*\.?[0-9]+)"#)
    } else {
        (&RELEVANCE, r#"(?i)"?relevance"?\s*[:=]\s*([0-9]*\.?[0-9]+)"#)
    };
    cell.get_or_init(|| Regex::new(pattern).expect("Invalid regex for assessment score"))
}

/// Parse an assessor reply; JSON first, then `key: value` pairs.
pub fn parse_assessment(content: &str) -> Option<AssessedScores> {
    if let Some(json) = extract_json_object(content) {
        if let Ok(reply) = serde_json::from_str::<AssessmentReply>(&json) {
            if let (Some(coherence), Some(relevance)) = (reply.coherence, reply.relevance) {
                return Some(AssessedScores {
                    coherence: sanitize(coherence),
                    relevance: sanitize(relevance),
                });
            }
        }
    }

    let capture = |field: &str| -> Option<f64> {
        score_regex(field)
            .captures(content)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };
    Some(AssessedScores {
        coherence: sanitize(capture("coherence")?),
        relevance: sanitize(capture("relevance")?),
    })
}

#[async_trait]
impl QualityAssessor for LlmQualityAssessor {
    async fn assess(&self, question: &str, opinions: &[Opinion]) -> Result<AssessedScores, LlmError> {
        let request = GenerationRequest::new(
            &self.config.model_id,
            vec![
                Message::system("You are a strict debate quality reviewer. Reply with JSON only."),
                Message::user(quality_assessment_prompt(question, opinions)),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(self.max_tokens);

        let response = retry_with_backoff(|| self.provider.generate(request.clone()), &self.retry)
            .await
            .map_err(|e| e.into_inner())?;

        let content = response
            .first_content()
            .ok_or_else(|| LlmError::ParseError("Empty assessment response".to_string()))?;

        parse_assessment(content).ok_or_else(|| {
            LlmError::ParseError(format!("Unparseable assessment: {}", content.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, ProviderKind, Usage};
    use chrono::Utc;
    use std::sync::Mutex;

    fn opinion(expert: &str, recommendation: &str, reasoning: &str, confidence: f64) -> Opinion {
        Opinion {
            expert_id: expert.to_string(),
            recommendation: recommendation.to_string(),
            reasoning: reasoning.to_string(),
            confidence,
            pros: vec!["clear benefit".to_string()],
            cons: vec![],
            provider: ProviderKind::OpenRouter,
            model: "m".to_string(),
            usage: Usage::default(),
            cost_usd: 0.0,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    const QUESTION: &str = "Should we migrate the billing database to Postgres?";

    #[test]
    fn test_heuristic_scores_on_relevant_round() {
        let opinions = vec![
            opinion(
                "e1",
                "Migrate billing to Postgres",
                "Postgres gives the billing database stronger transactional guarantees and \
                 better tooling for reporting, which reduces the operational burden over time \
                 and keeps finance reconciliation simple for the whole team going forward.",
                0.8,
            ),
            opinion(
                "e2",
                "Delay the migration one quarter",
                "Vendor contracts renew next quarter so migrating now wastes prepaid capacity \
                 and distracts the team from compliance work.",
                0.6,
            ),
        ];
        let monitor = QualityMonitor::new(QualitySettings::default());
        let metrics = monitor.evaluate_heuristic(QUESTION, &opinions);

        assert!((metrics.average_confidence - 0.7).abs() < 1e-9);
        assert!(metrics.coherence_score > 0.8);
        assert!(metrics.relevance_score >= 0.3);
        assert!(metrics.diversity_score > 0.5);
        assert!(metrics.meets_thresholds);
        assert!(!metrics.groupthink);
        let mean = (metrics.average_confidence
            + metrics.coherence_score
            + metrics.diversity_score
            + metrics.relevance_score)
            / 4.0;
        assert!((metrics.overall_quality - mean).abs() < 1e-9);
    }

    #[test]
    fn test_identical_opinions_flag_groupthink() {
        let text = "Postgres is the right choice for billing";
        let opinions = vec![
            opinion("e1", "Migrate to Postgres", text, 0.9),
            opinion("e2", "Migrate to Postgres", text, 0.9),
            opinion("e3", "Migrate to Postgres", text, 0.9),
        ];
        let metrics = QualityMonitor::new(QualitySettings::default())
            .evaluate_heuristic(QUESTION, &opinions);
        assert_eq!(metrics.diversity_score, 0.0);
        assert!(metrics.groupthink);
    }

    #[test]
    fn test_low_confidence_fails_thresholds() {
        let opinions = vec![opinion(
            "e1",
            "Migrate billing to Postgres",
            "Postgres suits the billing database",
            0.2,
        )];
        let metrics = QualityMonitor::new(QualitySettings::default())
            .evaluate_heuristic(QUESTION, &opinions);
        assert!(!metrics.meets_thresholds);
        assert!(!metrics.groupthink);
        assert_eq!(metrics.diversity_score, 0.0);
    }

    #[test]
    fn test_empty_round() {
        let metrics =
            QualityMonitor::new(QualitySettings::default()).evaluate_heuristic(QUESTION, &[]);
        assert_eq!(metrics.overall_quality, 0.0);
        assert!(!metrics.meets_thresholds);
    }

    #[test]
    fn test_parse_assessment_variants() {
        let scores = parse_assessment(r#"{"coherence": 0.8, "relevance": 1.7}"#).unwrap();
        assert_eq!(scores.coherence, 0.8);
        assert_eq!(scores.relevance, 1.0);

        let scores = parse_assessment("Coherence: 0.4\nRelevance = .9").unwrap();
        assert_eq!(scores.coherence, 0.4);
        assert_eq!(scores.relevance, 0.9);

        assert!(parse_assessment("looks fine to me").is_none());
    }

    struct ScriptedProvider {
        reply: Mutex<Option<String>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let content = self.reply.lock().unwrap().clone();
            match content {
                Some(content) => Ok(GenerationResponse {
                    id: "r".to_string(),
                    model: request.model,
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(content),
                        finish_reason: "stop".to_string(),
                    }],
                    usage: Usage::new(10, 5),
                }),
                None => Err(LlmError::api(400, "bad request")),
            }
        }
    }

    fn assessor(reply: Option<&str>) -> Arc<dyn QualityAssessor> {
        Arc::new(LlmQualityAssessor::new(
            Arc::new(ScriptedProvider {
                reply: Mutex::new(reply.map(str::to_string)),
            }),
            AiConfig::new(ProviderKind::OpenRouter, "assessor"),
        ))
    }

    #[tokio::test]
    async fn test_llm_assessor_scores_are_used() {
        let opinions = vec![opinion("e1", "Migrate", "short", 0.9)];
        let monitor = QualityMonitor::new(QualitySettings::default())
            .with_assessor(assessor(Some(r#"{"coherence": 0.95, "relevance": 0.85}"#)));
        let metrics = monitor.evaluate(QUESTION, &opinions).await;
        assert_eq!(metrics.coherence_score, 0.95);
        assert_eq!(metrics.relevance_score, 0.85);
    }

    #[tokio::test]
    async fn test_llm_assessor_failure_falls_back() {
        let opinions = vec![opinion("e1", "Migrate", "short", 0.9)];
        let expected = QualityMonitor::new(QualitySettings::default())
            .evaluate_heuristic(QUESTION, &opinions);

        for reply in [None, Some("no numbers here")] {
            let monitor =
                QualityMonitor::new(QualitySettings::default()).with_assessor(assessor(reply));
            let metrics = monitor.evaluate(QUESTION, &opinions).await;
            assert_eq!(metrics, expected);
        }
    }

    #[test]
    fn test_argument_quality_prefers_argued_options() {
        let argued = opinion(
            "e1",
            "Migrate billing to Postgres",
            "Postgres gives the billing database stronger transactional guarantees and \
             better tooling for reporting, which reduces the operational burden over time \
             and keeps finance reconciliation simple for the whole team going forward.",
            0.9,
        );
        let mut terse = opinion("e2", "Stay", "Fine.", 0.9);
        terse.pros.clear();

        let quality = ArgumentQuality;
        let strong = quality.quality("Migrate billing to Postgres", &[&argued]);
        let weak = quality.quality("Stay", &[&terse]);
        assert!((strong - 1.0).abs() < 1e-9);
        assert!(weak < 0.3);
        assert_eq!(quality.quality("Nobody", &[]), 0.0);
    }
}
