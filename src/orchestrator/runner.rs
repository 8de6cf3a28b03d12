//! Multi-phase orchestration over a [`DebateRunner`].

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::pattern::{DebatePattern, PatternSelector, QuestionSignals};
use super::sequence::{DebateSequence, FinalConclusion, PhaseResult, SubDebateResult};
use super::OrchestratorError;
use crate::config::OrchestratorSettings;
use crate::debate::{DebateError, DebateRequest, DebateRunner};
use crate::utils::text::text_similarity;

/// Why a pattern stopped early.
enum Halt {
    NoOptions,
    /// Every sub-debate of `phase` failed. `cause` is set when the phase held
    /// one sub-debate that could not start.
    PhaseFailed {
        phase: PhaseResult,
        reason: String,
        cause: Option<DebateError>,
    },
}

struct SubDebateSpec {
    label: String,
    candidates: Vec<String>,
    request: DebateRequest,
}

/// Decomposes a question into phases of sub-debates.
///
/// Sub-debates inside a phase run concurrently, at most
/// `max_parallel_subdebates` at a time, and their results keep submission
/// order. Phases run one after another.
pub struct Orchestrator {
    runner: Arc<dyn DebateRunner>,
    settings: OrchestratorSettings,
    selector: PatternSelector,
    template: DebateRequest,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn DebateRunner>, settings: OrchestratorSettings) -> Self {
        Self {
            runner,
            settings,
            selector: PatternSelector::new(),
            template: DebateRequest::default(),
        }
    }

    pub fn with_selector(mut self, selector: PatternSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Panel size, threshold, provider pin and context applied to every
    /// sub-debate. The template's question is ignored.
    pub fn with_template(mut self, template: DebateRequest) -> Self {
        self.template = template;
        self
    }

    pub fn analyze(&self, question: &str) -> (QuestionSignals, DebatePattern) {
        self.selector.analyze(question)
    }

    pub async fn run(&self, question: &str) -> Result<DebateSequence, OrchestratorError> {
        let (signals, pattern) = self.analyze(question);
        let mut sequence = DebateSequence::new(question, pattern, signals);

        info!(
            sequence_id = %sequence.id,
            pattern = %pattern,
            options = sequence.signals.options.len(),
            "Orchestration started"
        );

        let outcome = match pattern {
            DebatePattern::Single => self.run_single(&mut sequence).await,
            DebatePattern::Tournament => self.run_tournament(&mut sequence).await,
            DebatePattern::Adversarial => self.run_adversarial(&mut sequence).await,
            DebatePattern::Ensemble => self.run_ensemble(&mut sequence).await,
        };
        let recommendation = match outcome {
            Ok(recommendation) => recommendation,
            Err(Halt::NoOptions) => return Err(OrchestratorError::NoOptions { pattern }),
            Err(Halt::PhaseFailed {
                phase,
                reason,
                cause,
            }) => {
                // Nothing has run yet; report the start error itself.
                if let Some(err) = cause.filter(|_| sequence.phases().is_empty()) {
                    return Err(OrchestratorError::Debate(err));
                }
                let name = phase.name.clone();
                sequence.push_phase(phase);
                sequence.finish(None);
                warn!(
                    sequence_id = %sequence.id,
                    phase = %name,
                    reason = %reason,
                    total_rounds = sequence.total_rounds(),
                    total_cost_usd = sequence.total_cost_usd(),
                    "Orchestration stopped"
                );
                return Err(OrchestratorError::PhaseFailed {
                    phase: name,
                    reason,
                    partial: Box::new(sequence),
                });
            }
        };

        let conclusion = sequence
            .phases()
            .last()
            .and_then(PhaseResult::best)
            .and_then(|best| FinalConclusion::from_sub_debate(best, recommendation));
        sequence.finish(conclusion);

        info!(
            sequence_id = %sequence.id,
            phases = sequence.phases().len(),
            sub_debates = sequence.sub_debate_count(),
            total_rounds = sequence.total_rounds(),
            total_cost_usd = sequence.total_cost_usd(),
            concluded = sequence.conclusion.is_some(),
            "Orchestration finished"
        );
        Ok(sequence)
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    async fn run_single(
        &self,
        sequence: &mut DebateSequence,
    ) -> Result<Option<String>, Halt> {
        let mut request = self.request(sequence, sequence.question.clone(), None);
        request.max_rounds = self.template.max_rounds;
        let spec = SubDebateSpec {
            label: "debate".to_string(),
            candidates: Vec::new(),
            request,
        };
        let phase = self.run_phase("debate", vec![spec]).await?;
        sequence.push_phase(phase);
        Ok(None)
    }

    async fn run_tournament(
        &self,
        sequence: &mut DebateSequence,
    ) -> Result<Option<String>, Halt> {
        let mut survivors = self.options(sequence)?;
        let mut stage = 1;

        while survivors.len() > 1 {
            let mut specs = Vec::new();
            let mut byes = Vec::new();
            for pair in survivors.chunks(2) {
                match pair {
                    [a, b] => {
                        let question = format!(
                            "{}\n\nDecide between exactly two options: \"{}\" or \"{}\". Name the option you back in your answer.",
                            sequence.question, a, b
                        );
                        specs.push(SubDebateSpec {
                            label: format!("{} vs {}", a, b),
                            candidates: vec![a.clone(), b.clone()],
                            request: self.request(sequence, question, None),
                        });
                    }
                    [a] => byes.push(a.clone()),
                    _ => {}
                }
            }

            let name = if specs.len() == 1 && byes.is_empty() {
                "final".to_string()
            } else {
                format!("stage {}", stage)
            };
            let mut phase = self.run_phase(&name, specs).await?;

            let mut next: Vec<String> = phase.sub_debates.iter().map(pick_candidate).collect();
            next.extend(byes);
            phase.advancing = next.clone();
            sequence.push_phase(phase);

            survivors = next;
            stage += 1;
        }

        Ok(survivors.into_iter().next())
    }

    async fn run_adversarial(
        &self,
        sequence: &mut DebateSequence,
    ) -> Result<Option<String>, Halt> {
        let options = self.options(sequence)?;
        let (first, second) = (&options[0], &options[1]);

        let specs = [first, second]
            .into_iter()
            .map(|option| {
                let question = format!(
                    "Make the strongest honest case for \"{}\" as the answer to: {}\nState the conditions under which it would be the wrong choice.",
                    option, sequence.question
                );
                SubDebateSpec {
                    label: format!("for {}", option),
                    candidates: vec![option.clone()],
                    request: self.request(sequence, question, None),
                }
            })
            .collect();
        let mut advocacy = self.run_phase("advocacy", specs).await?;
        advocacy.advancing = advocacy
            .sub_debates
            .iter()
            .map(summarize_case)
            .collect();
        let briefs = advocacy.advancing.join("\n");
        sequence.push_phase(advocacy);

        let question = format!(
            "{}\n\nDecide between \"{}\" and \"{}\", weighing the advocacy briefs in the context.",
            sequence.question, first, second
        );
        let verdict = SubDebateSpec {
            label: "verdict".to_string(),
            candidates: vec![first.clone(), second.clone()],
            request: self.request(sequence, question, Some(briefs)),
        };
        let phase = self.run_phase("verdict", vec![verdict]).await?;
        sequence.push_phase(phase);
        Ok(None)
    }

    async fn run_ensemble(
        &self,
        sequence: &mut DebateSequence,
    ) -> Result<Option<String>, Halt> {
        let size = self.settings.ensemble_size.max(2);
        let specs = (1..=size)
            .map(|i| SubDebateSpec {
                label: format!("ensemble {}", i),
                candidates: Vec::new(),
                request: self.request(sequence, sequence.question.clone(), None),
            })
            .collect();
        let mut ensemble = self.run_phase("ensemble", specs).await?;
        ensemble.advancing = ensemble
            .sub_debates
            .iter()
            .filter_map(|sub| {
                sub.winner().map(|w| {
                    format!(
                        "- {} (consensus {:.2}, confidence {:.2})",
                        w.text,
                        sub.consensus_score(),
                        w.confidence
                    )
                })
            })
            .collect();
        let answers = format!(
            "Independent panel answers:\n{}",
            ensemble.advancing.join("\n")
        );
        sequence.push_phase(ensemble);

        let question = format!(
            "{}\n\nSynthesize one recommendation from the independent panel answers in the context.",
            sequence.question
        );
        let synthesis = SubDebateSpec {
            label: "synthesis".to_string(),
            candidates: Vec::new(),
            request: self.request(sequence, question, Some(answers)),
        };
        let phase = self.run_phase("synthesis", vec![synthesis]).await?;
        sequence.push_phase(phase);
        Ok(None)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn run_phase(
        &self,
        name: &str,
        specs: Vec<SubDebateSpec>,
    ) -> Result<PhaseResult, Halt> {
        let total = specs.len();
        let parallel = self.settings.max_parallel_subdebates.max(1);
        info!(phase = name, sub_debates = total, parallel = parallel, "Phase started");

        let outcomes: Vec<(SubDebateResult, Option<DebateError>)> = stream::iter(specs)
            .map(|spec| {
                let runner = Arc::clone(&self.runner);
                async move {
                    match runner.run_debate(spec.request).await {
                        Ok(result) => (
                            SubDebateResult {
                                label: spec.label,
                                candidates: spec.candidates,
                                result: Some(result),
                                error: None,
                            },
                            None,
                        ),
                        Err(e) => {
                            warn!(sub_debate = %spec.label, error = %e, "Sub-debate could not run");
                            (
                                SubDebateResult {
                                    label: spec.label,
                                    candidates: spec.candidates,
                                    result: None,
                                    error: Some(e.to_string()),
                                },
                                Some(e),
                            )
                        }
                    }
                }
            })
            .buffered(parallel)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|(sub, _)| sub.is_success()).count();
        if succeeded == 0 {
            let reason = outcomes
                .iter()
                .find_map(|(sub, _)| {
                    sub.error.clone().or_else(|| {
                        sub.result.as_ref().and_then(|r| r.error_message.clone())
                    })
                })
                .unwrap_or_else(|| format!("all {} sub-debates failed", total));
            let mut sub_debates = Vec::with_capacity(total);
            let mut causes = Vec::new();
            for (sub, err) in outcomes {
                sub_debates.push(sub);
                causes.extend(err);
            }
            let cause = if total == 1 { causes.pop() } else { None };
            warn!(phase = name, reason = %reason, "Phase failed");
            return Err(Halt::PhaseFailed {
                phase: PhaseResult {
                    name: name.to_string(),
                    sub_debates,
                    advancing: Vec::new(),
                },
                reason,
                cause,
            });
        }

        info!(phase = name, succeeded = succeeded, failed = total - succeeded, "Phase finished");
        Ok(PhaseResult {
            name: name.to_string(),
            sub_debates: outcomes.into_iter().map(|(sub, _)| sub).collect(),
            advancing: Vec::new(),
        })
    }

    fn request(
        &self,
        sequence: &DebateSequence,
        question: String,
        extra_context: Option<String>,
    ) -> DebateRequest {
        let mut request = self.template.clone();
        request.question = question;
        request.debate_id = Some(sequence.id.clone());
        request.max_rounds = Some(self.settings.sub_debate_max_rounds.max(1));
        request.context = match (request.context.take(), extra_context) {
            (Some(base), Some(extra)) => Some(format!("{}\n\n{}", base, extra)),
            (base, extra) => base.or(extra),
        };
        request
    }

    fn options(&self, sequence: &DebateSequence) -> Result<Vec<String>, Halt> {
        if sequence.signals.options.len() < 2 {
            return Err(Halt::NoOptions);
        }
        Ok(sequence.signals.options.clone())
    }
}

/// The candidate a pairwise debate backed. Failed or inconclusive matches
/// advance the first candidate.
fn pick_candidate(sub: &SubDebateResult) -> String {
    let first = sub.candidates.first().cloned().unwrap_or_default();
    let Some(winner) = sub.winner().filter(|_| sub.is_success()) else {
        return first;
    };
    let text = winner.text.to_lowercase();

    let mut best = (first, 0.0);
    for candidate in &sub.candidates {
        let lower = candidate.to_lowercase();
        let score = if text.contains(&lower) {
            // Longer names win when one candidate contains another.
            2.0 + lower.len() as f64 / 1000.0
        } else {
            text_similarity(&winner.text, candidate)
        };
        if score > best.1 {
            best = (candidate.clone(), score);
        }
    }
    best.0
}

fn summarize_case(sub: &SubDebateResult) -> String {
    let option = sub.candidates.first().map(String::as_str).unwrap_or(&sub.label);
    match sub.winner().filter(|_| sub.is_success()) {
        Some(w) => format!(
            "Case for \"{}\": {} (consensus {:.2}). Pros: {}. Risks: {}.",
            option,
            w.text,
            sub.consensus_score(),
            if w.pros.is_empty() { "none stated".to_string() } else { w.pros.join("; ") },
            if w.cons.is_empty() { "none stated".to_string() } else { w.cons.join("; ") },
        ),
        None => format!("Case for \"{}\": no position was established.", option),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::debate::{DebateResult, DebateState, EngineResult, PanelError, RankedOption};

    /// Backs the first preferred option quoted in the question, otherwise
    /// answers with the question's ordinal.
    struct FakeRunner {
        preference: Vec<&'static str>,
        status: DebateState,
        error: bool,
        /// Requests after this many fail (or error, with `error`).
        fail_after: Option<usize>,
        requests: Mutex<Vec<DebateRequest>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRunner {
        fn new(preference: Vec<&'static str>) -> Self {
            Self {
                preference,
                status: DebateState::ConsensusReached,
                error: false,
                fail_after: None,
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                status: DebateState::Failed,
                ..Self::new(vec![])
            }
        }

        fn erroring() -> Self {
            Self {
                error: true,
                ..Self::new(vec![])
            }
        }

        fn failing_after(successes: usize) -> Self {
            Self {
                fail_after: Some(successes),
                ..Self::new(vec![])
            }
        }

        fn requests(&self) -> Vec<DebateRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl DebateRunner for FakeRunner {
        async fn run_debate(&self, request: DebateRequest) -> EngineResult<DebateResult> {
            let ordinal = {
                let mut requests = self.requests.lock();
                requests.push(request.clone());
                requests.len()
            };
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let past_limit = self.fail_after.map_or(true, |n| ordinal > n);
            if self.error && past_limit {
                return Err(PanelError::EmptyCatalog.into());
            }

            let text = self
                .preference
                .iter()
                .find(|p| request.question.contains(&format!("\"{}\"", p)))
                .map(|p| format!("Go with {}", p))
                .unwrap_or_else(|| format!("Answer {}", ordinal));
            let failed = self.status == DebateState::Failed
                || (self.fail_after.is_some() && past_limit);
            let status = if failed { DebateState::Failed } else { self.status };

            Ok(DebateResult {
                session_id: format!("s{}", ordinal),
                debate_id: request.debate_id.clone().unwrap_or_default(),
                question: request.question.clone(),
                status,
                panel: Vec::new(),
                rounds: Vec::new(),
                final_ranking: if failed {
                    Vec::new()
                } else {
                    vec![RankedOption {
                        text,
                        score: 0.8,
                        confidence: 0.7,
                        supporters: vec!["e1".into()],
                        pros: vec!["fast".into()],
                        cons: vec!["costly".into()],
                        reasoning: "It wins on balance".into(),
                    }]
                },
                total_cost_usd: 0.01,
                total_rounds: 2,
                consensus_score: if failed { 0.0 } else { 0.8 },
                error_message: failed.then(|| "every expert failed".to_string()),
                completed_at: Utc::now(),
            })
        }
    }

    fn orchestrator(runner: Arc<FakeRunner>, pattern: Option<DebatePattern>) -> Orchestrator {
        let settings = OrchestratorSettings {
            max_parallel_subdebates: 2,
            ensemble_size: 3,
            sub_debate_max_rounds: 3,
        };
        let mut selector = PatternSelector::new();
        if let Some(p) = pattern {
            selector = selector.with_override(p);
        }
        Orchestrator::new(runner, settings).with_selector(selector)
    }

    #[tokio::test]
    async fn test_tournament_eliminates_to_champion() {
        let runner = Arc::new(FakeRunner::new(vec!["MongoDB", "MySQL"]));
        let sequence = orchestrator(runner.clone(), None)
            .run("Should we use Postgres, MySQL, SQLite or MongoDB?")
            .await
            .unwrap();

        assert_eq!(sequence.pattern, DebatePattern::Tournament);
        assert_eq!(sequence.phases().len(), 2);
        assert_eq!(sequence.phases()[0].name, "stage 1");
        assert_eq!(sequence.phases()[0].advancing, vec!["MySQL", "MongoDB"]);
        assert_eq!(sequence.phases()[1].name, "final");
        assert_eq!(sequence.sub_debate_count(), 3);
        assert_eq!(sequence.total_rounds(), 6);
        assert!((sequence.total_cost_usd() - 0.03).abs() < 1e-9);

        let conclusion = sequence.conclusion.unwrap();
        assert_eq!(conclusion.recommendation, "MongoDB");

        for request in runner.requests() {
            assert_eq!(request.debate_id.as_deref(), Some(sequence.id.as_str()));
            assert_eq!(request.max_rounds, Some(3));
        }
    }

    #[tokio::test]
    async fn test_tournament_with_bye() {
        let runner = Arc::new(FakeRunner::new(vec!["Echo"]));
        let sequence = orchestrator(runner.clone(), None)
            .run("Pick between Alpha, Bravo, Charlie, Delta and Echo")
            .await
            .unwrap();

        assert_eq!(sequence.signals.options.len(), 5);
        // 5 -> 3 -> 2 -> 1
        assert_eq!(sequence.phases().len(), 3);
        assert_eq!(sequence.phases()[0].advancing, vec!["Alpha", "Charlie", "Echo"]);
        assert_eq!(sequence.phases()[2].name, "final");
        assert_eq!(sequence.conclusion.unwrap().recommendation, "Echo");
    }

    #[tokio::test]
    async fn test_adversarial_feeds_briefs_into_verdict() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        let sequence = orchestrator(runner.clone(), Some(DebatePattern::Adversarial))
            .run("Should we rewrite the billing service or refactor it?")
            .await
            .unwrap();

        assert_eq!(sequence.phases().len(), 2);
        assert_eq!(sequence.phases()[0].name, "advocacy");
        assert_eq!(sequence.phases()[0].sub_debates.len(), 2);
        assert_eq!(sequence.phases()[1].name, "verdict");

        let requests = runner.requests();
        let verdict = requests.last().unwrap();
        let context = verdict.context.as_deref().unwrap();
        assert!(context.contains("Case for \"rewrite the billing service\""));
        assert!(context.contains("Case for \"refactor it\""));
        assert_eq!(sequence.conclusion.unwrap().source_session_id, "s3");
    }

    #[tokio::test]
    async fn test_ensemble_then_synthesis() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        let sequence = orchestrator(runner.clone(), Some(DebatePattern::Ensemble))
            .run("How should we structure on-call?")
            .await
            .unwrap();

        assert_eq!(sequence.phases()[0].sub_debates.len(), 3);
        assert_eq!(sequence.phases()[1].name, "synthesis");
        assert_eq!(sequence.total_rounds(), 8);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);

        let synthesis = runner.requests().pop().unwrap();
        assert!(synthesis.context.unwrap().contains("Independent panel answers"));
    }

    #[tokio::test]
    async fn test_single_uses_engine_round_default() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        let sequence = orchestrator(runner.clone(), None)
            .run("Which logo colour works best?")
            .await
            .unwrap();

        assert_eq!(sequence.pattern, DebatePattern::Single);
        assert_eq!(sequence.phases().len(), 1);
        assert_eq!(runner.requests()[0].max_rounds, None);
        assert_eq!(sequence.conclusion.unwrap().recommendation, "Answer 1");
    }

    #[tokio::test]
    async fn test_template_context_is_kept() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        orchestrator(runner.clone(), Some(DebatePattern::Ensemble))
            .with_template(DebateRequest::new("ignored").with_context("Team of 6"))
            .run("How should we structure on-call?")
            .await
            .unwrap();

        let requests = runner.requests();
        assert_eq!(requests[0].context.as_deref(), Some("Team of 6"));
        assert!(requests[3].context.as_deref().unwrap().starts_with("Team of 6\n\n"));
    }

    #[tokio::test]
    async fn test_phase_fails_when_every_sub_debate_fails() {
        let runner = Arc::new(FakeRunner::failing());
        let err = orchestrator(runner, Some(DebatePattern::Ensemble))
            .run("How should we structure on-call?")
            .await
            .unwrap_err();

        match err {
            OrchestratorError::PhaseFailed {
                phase,
                reason,
                partial,
            } => {
                assert_eq!(phase, "ensemble");
                assert_eq!(reason, "every expert failed");
                assert_eq!(partial.phases().len(), 1);
                assert_eq!(partial.sub_debate_count(), 3);
                assert!((partial.total_cost_usd() - 0.03).abs() < 1e-9);
                assert!(partial.conclusion.is_none());
                assert!(partial.completed_at.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failed_synthesis_keeps_ensemble_cost() {
        let runner = Arc::new(FakeRunner::failing_after(3));
        let err = orchestrator(runner, Some(DebatePattern::Ensemble))
            .run("How should we structure on-call?")
            .await
            .unwrap_err();

        let OrchestratorError::PhaseFailed {
            phase,
            reason,
            partial,
        } = err
        else {
            panic!("expected a failed phase, got {err}");
        };
        assert_eq!(phase, "synthesis");
        assert_eq!(reason, "every expert failed");

        let names: Vec<&str> = partial.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ensemble", "synthesis"]);
        assert_eq!(partial.phases()[0].advancing.len(), 3);
        // Three ensemble debates plus the failed synthesis, two rounds each.
        assert_eq!(partial.total_rounds(), 8);
        assert!((partial.total_cost_usd() - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_later_start_error_keeps_earlier_phases() {
        let runner = Arc::new(FakeRunner {
            fail_after: Some(2),
            error: true,
            ..FakeRunner::new(vec![])
        });
        let sequence = orchestrator(runner, Some(DebatePattern::Adversarial))
            .run("Should we rewrite the billing service or refactor it?")
            .await;
        let Err(OrchestratorError::PhaseFailed { phase, partial, .. }) = sequence else {
            panic!("expected the verdict phase to fail");
        };
        assert_eq!(phase, "verdict");
        assert_eq!(partial.phases().len(), 2);
        assert_eq!(partial.phases()[0].sub_debates.len(), 2);
        assert!(partial.phases()[1].sub_debates[0].error.is_some());
        assert!((partial.total_cost_usd() - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_single_debate_error_is_propagated() {
        let runner = Arc::new(FakeRunner::erroring());
        let err = orchestrator(runner, None)
            .run("Which logo colour works best?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Debate(DebateError::Panel(PanelError::EmptyCatalog))
        ));
    }

    #[tokio::test]
    async fn test_tournament_needs_options() {
        let runner = Arc::new(FakeRunner::new(vec![]));
        let err = orchestrator(runner, Some(DebatePattern::Tournament))
            .run("How should we structure on-call?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NoOptions {
                pattern: DebatePattern::Tournament
            }
        ));
    }

    #[test]
    fn test_pick_candidate_without_result_advances_first() {
        let sub = SubDebateResult {
            label: "m".into(),
            candidates: vec!["Postgres".into(), "Postgres Pro".into()],
            result: None,
            error: None,
        };
        assert_eq!(pick_candidate(&sub), "Postgres");
    }
}
