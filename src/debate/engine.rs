//! The debate engine: panel resolution, the round loop and finalization.
//!
//! `start` resolves the panel synchronously; a resolution failure is returned
//! to the caller and nothing is persisted. Once the panel is bound the
//! session moves to `running` and the loop runs on its own task:
//!
//! ```text
//! pending -> running -> {paused <-> running}
//!         -> completed | consensus_reached | force_concluded | failed
//! ```
//!
//! Rounds are strictly sequential. Pause takes effect at the next round
//! boundary, force-consensus abandons the in-flight round, and every terminal
//! transition publishes exactly one `Done` event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::consensus::{ConsensusScorer, OptionClusterer, OptionQuality};
use super::error::{DebateError, EngineResult};
use super::events::{DebateEvent, EventBus};
use super::moderator::{MetaModerator, ModeratorDecision};
use super::notify::{spawn_notification, CompletionNotice, CompletionNotifier, LogNotifier};
use super::panel::{ExpertTemplate, PanelResolver};
use super::prompts::PromptContext;
use super::quality::{ArgumentQuality, LlmQualityAssessor, QualityAssessor, QualityMonitor};
use super::round::RoundExecutor;
use super::session::SessionControl;
use super::types::{
    DebateRequest, DebateResult, DebateRound, DebateSession, DebateState, ExpertProfile,
    LiveMetadata, Opinion,
};
use crate::config::EngineConfig;
use crate::llm::{CostTracker, InMemoryResponseCache, ProviderRegistry, ResponseCache};
use crate::metrics::MetricsCollector;
use crate::storage::{InMemorySessionStore, SessionStore};

/// Runs one debate to completion. The orchestrator composes debates through
/// this trait.
#[async_trait]
pub trait DebateRunner: Send + Sync {
    async fn run_debate(&self, request: DebateRequest) -> EngineResult<DebateResult>;
}

/// A started debate.
pub struct DebateHandle {
    control: SessionControl,
    task: JoinHandle<DebateResult>,
}

impl DebateHandle {
    pub fn session_id(&self) -> String {
        self.control.id()
    }

    /// Control handle for pause, resume, context and force commands.
    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> EngineResult<DebateResult> {
        self.task
            .await
            .map_err(|e| DebateError::Channel(e.to_string()))
    }
}

impl fmt::Debug for DebateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebateHandle")
            .field("session_id", &self.control.id())
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

/// Multi-expert debate engine.
#[derive(Clone)]
pub struct DebateEngine {
    config: EngineConfig,
    resolver: PanelResolver,
    executor: RoundExecutor,
    quality: QualityMonitor,
    moderator: MetaModerator,
    clusterer: Option<Arc<dyn OptionClusterer>>,
    option_quality: Option<Arc<dyn OptionQuality>>,
    store: Arc<dyn SessionStore>,
    events: EventBus,
    notifier: Arc<dyn CompletionNotifier>,
    cost_tracker: Arc<CostTracker>,
    sessions: Arc<RwLock<HashMap<String, SessionControl>>>,
    metrics: MetricsCollector,
}

impl DebateEngine {
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> Self {
        let cost_tracker = Arc::new(CostTracker::new(
            config.budget.daily_usd,
            config.budget.monthly_usd,
        ));
        let resolver = PanelResolver::new(config.models.clone(), config.panel.clone())
            .with_cost_tracker(cost_tracker.clone());

        let mut executor = RoundExecutor::new(registry.clone(), &config.debate, config.retry.clone())
            .with_cost_tracker(cost_tracker.clone());
        if config.cache.enabled {
            executor = executor.with_cache(
                Arc::new(InMemoryResponseCache::new(config.cache.max_entries)),
                config.cache.ttl(),
            );
        }

        let mut quality = QualityMonitor::new(config.quality.clone());
        if config.quality.use_llm_assessor {
            if let Some(assessor) = build_assessor(&config, &registry) {
                quality = quality.with_assessor(assessor);
            }
        }

        // The quality term only counts when it carries weight.
        let option_quality = (config.scoring.quality_weight > 0.0)
            .then(|| -> Arc<dyn OptionQuality> { Arc::new(ArgumentQuality) });

        Self {
            resolver,
            executor,
            quality,
            moderator: MetaModerator::new(config.moderator.clone()),
            clusterer: None,
            option_quality,
            store: Arc::new(InMemorySessionStore::new()),
            events: EventBus::new(),
            notifier: Arc::new(LogNotifier),
            cost_tracker,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the response cache (e.g. with Redis).
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.executor = self.executor.with_cache(cache, self.config.cache.ttl());
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<ExpertTemplate>) -> Self {
        self.resolver = self.resolver.with_catalog(catalog);
        self
    }

    pub fn with_quality_assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.quality = self.quality.with_assessor(assessor);
        self
    }

    pub fn with_clusterer(mut self, clusterer: Arc<dyn OptionClusterer>) -> Self {
        self.clusterer = Some(clusterer);
        self
    }

    /// Per-option quality signal weighted by `scoring.quality_weight`.
    pub fn with_option_quality(mut self, quality: Arc<dyn OptionQuality>) -> Self {
        self.option_quality = Some(quality);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.cost_tracker
    }

    pub fn resolver(&self) -> &PanelResolver {
        &self.resolver
    }

    /// Resolve the panel a request would debate with, without running it.
    pub fn resolve_panel(&self, request: &DebateRequest) -> EngineResult<Vec<ExpertProfile>> {
        if let Some(panel) = request.panel.as_ref().filter(|p| !p.is_empty()) {
            return Ok(panel.clone());
        }
        Ok(self.resolver.resolve(
            &request.question,
            request.context.as_deref(),
            request.panel_size,
            request.pinned_provider,
        )?)
    }

    /// Control handle of an active session.
    pub fn control(&self, session_id: &str) -> EngineResult<SessionControl> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| DebateError::UnknownSession(session_id.to_string()))
    }

    /// Latest persisted snapshot of any session, active or finished.
    pub async fn session(&self, session_id: &str) -> EngineResult<DebateSession> {
        if let Ok(control) = self.control(session_id) {
            return Ok(control.snapshot());
        }
        Ok(self.store.load_session(session_id).await?)
    }

    /// Resolve the panel and start the debate loop in the background.
    pub async fn start(&self, request: DebateRequest) -> EngineResult<DebateHandle> {
        let panel = self.resolve_panel(&request)?;

        let max_rounds = request
            .max_rounds
            .unwrap_or(self.config.debate.max_rounds)
            .max(1);
        let threshold = request
            .consensus_threshold
            .unwrap_or(self.config.debate.consensus_threshold)
            .clamp(0.0, 1.0);
        let debate_id = request
            .debate_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let session = DebateSession::new(debate_id, request.question.clone(), max_rounds);
        let control = SessionControl::new(session, self.store.clone(), self.events.clone());
        let panel_size = panel.len();
        let snapshot = control
            .update(|s| {
                s.state = DebateState::Running;
                s.started_at = Some(Utc::now());
                s.live_metadata.active_experts = panel_size;
            })
            .await;

        self.sessions
            .write()
            .insert(snapshot.id.clone(), control.clone());
        self.metrics.debate_started();

        info!(
            session_id = %snapshot.id,
            debate_id = %snapshot.debate_id,
            experts = panel_size,
            max_rounds = max_rounds,
            threshold = threshold,
            "Debate started"
        );

        let engine = self.clone();
        let loop_control = control.clone();
        let task = tokio::spawn(async move {
            engine
                .run_loop(loop_control, panel, request, threshold)
                .await
        });

        Ok(DebateHandle { control, task })
    }

    /// Start a debate and wait for its result.
    pub async fn run(&self, request: DebateRequest) -> EngineResult<DebateResult> {
        self.start(request).await?.wait().await
    }

    async fn run_loop(
        self,
        control: SessionControl,
        panel: Vec<ExpertProfile>,
        request: DebateRequest,
        threshold: f64,
    ) -> DebateResult {
        let started = Instant::now();
        let session_id = control.id();
        let max_rounds = control.snapshot().max_rounds;
        let mut scorer = ConsensusScorer::new(self.config.scoring.clone(), threshold);
        if let Some(clusterer) = &self.clusterer {
            scorer = scorer.with_clusterer(clusterer.clone());
        }
        if let Some(quality) = &self.option_quality {
            scorer = scorer.with_quality(quality.clone());
        }

        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut dissenters: Vec<String> = Vec::new();

        let (state, error_message) = loop {
            if control.is_force_requested() {
                break (DebateState::ForceConcluded, None);
            }
            if control.state() == DebateState::Paused {
                info!(session_id = %session_id, "Waiting at round boundary while paused");
            }
            control.wait_while_paused().await;
            if control.is_force_requested() {
                break (DebateState::ForceConcluded, None);
            }

            let round_number = rounds.len() as u32 + 1;
            control.begin_round(round_number);
            let context_entries = control.snapshot().context_for_round(round_number);
            let ctx = PromptContext {
                question: &request.question,
                domain_context: request.context.as_deref(),
                round_number,
                max_rounds,
                previous_round: rounds.last(),
                additional_context: &context_entries,
            };

            let round_started = Utc::now();
            let outcome = tokio::select! {
                biased;
                _ = control.force_requested() => None,
                outcome = self.executor.execute(&panel, &ctx, &dissenters, &session_id) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                info!(session_id = %session_id, round = round_number, "Force consensus abandoned in-flight round");
                break (DebateState::ForceConcluded, None);
            };
            dissenters.clear();

            for failure in &outcome.failures {
                self.events.publish(DebateEvent::ExpertFailed {
                    session_id: session_id.clone(),
                    round_number,
                    expert_id: failure.expert_id.clone(),
                    reason: failure.reason.clone(),
                });
            }

            if outcome.is_empty() {
                let reasons: Vec<String> = outcome
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.expert_id, f.reason))
                    .collect();
                let message = format!(
                    "Round {} failed: no expert responded ({})",
                    round_number,
                    reasons.join("; ")
                );
                error!(session_id = %session_id, round = round_number, "{}", message);
                break (DebateState::Failed, Some(message));
            }

            let consensus = {
                let mut history: Vec<&[Opinion]> =
                    rounds.iter().map(|r| r.opinions.as_slice()).collect();
                history.push(&outcome.opinions);
                scorer.evaluate(&history, max_rounds.saturating_sub(round_number))
            };
            let quality = self.quality.evaluate(&request.question, &outcome.opinions).await;

            rounds.push(DebateRound {
                round_number,
                opinions: outcome.opinions,
                failures: outcome.failures,
                consensus,
                quality: Some(quality),
                started_at: round_started,
                completed_at: Utc::now(),
            });
            self.metrics.record_round();

            let Some(round) = rounds.last() else {
                break (DebateState::Failed, Some("Round record missing".to_string()));
            };
            let argument_count: usize = rounds.iter().map(|r| r.opinions.len()).sum();
            let metadata = LiveMetadata {
                consensus_score: round.consensus.consensus_score,
                dominant_position: round.consensus.leading_option().map(|o| o.text.clone()),
                active_experts: round.opinions.len(),
                last_round_summary: Some(round.summarize()),
                argument_count,
            };
            control
                .update(|s| {
                    s.current_round = round_number;
                    s.live_metadata = metadata;
                })
                .await;
            self.events.publish(DebateEvent::RoundCompleted {
                session_id: session_id.clone(),
                round_number,
                opinions: round.opinions.len(),
                failures: round.failures.len(),
                consensus_score: round.consensus.consensus_score,
                has_consensus: round.consensus.has_consensus,
            });

            info!(
                session_id = %session_id,
                round = round_number,
                consensus_score = round.consensus.consensus_score,
                has_consensus = round.consensus.has_consensus,
                quality = quality.overall_quality,
                meets_quality = quality.meets_thresholds,
                "Round completed"
            );

            if round.consensus.has_consensus && quality.meets_thresholds {
                break (DebateState::ConsensusReached, None);
            }
            if round.consensus.has_consensus {
                info!(session_id = %session_id, round = round_number, "Consensus held back by quality thresholds");
            }
            if round_number >= max_rounds {
                break (DebateState::Completed, None);
            }

            let decision = self.moderator.review(&request.question, &rounds, threshold);
            if decision.is_intervention() {
                info!(
                    session_id = %session_id,
                    round = round_number,
                    action = decision.label(),
                    "Moderator intervened"
                );
                self.events.publish(DebateEvent::ModeratorIntervened {
                    session_id: session_id.clone(),
                    round_number,
                    decision: decision.clone(),
                });
            }
            match decision {
                ModeratorDecision::Continue => {}
                ModeratorDecision::InjectContext { text, .. } => {
                    if let Err(e) = control.add_context(text, "moderator").await {
                        warn!(session_id = %session_id, error = %e, "Moderator context not applied");
                    }
                }
                ModeratorDecision::RequestDissent { expert_id, .. } => dissenters.push(expert_id),
                ModeratorDecision::Terminate { reason } => {
                    if self.config.debate.honor_early_termination {
                        info!(session_id = %session_id, reason = %reason, "Early termination");
                        break (DebateState::Completed, None);
                    }
                    debug!(session_id = %session_id, reason = %reason, "Termination not honored");
                }
            }
        };

        self.finalize(control, panel, rounds, state, error_message, started)
            .await
    }

    async fn finalize(
        &self,
        control: SessionControl,
        panel: Vec<ExpertProfile>,
        rounds: Vec<DebateRound>,
        state: DebateState,
        error_message: Option<String>,
        started: Instant,
    ) -> DebateResult {
        let message = error_message.clone();
        let snapshot = control
            .update(|s| {
                s.state = state;
                s.completed_at = Some(Utc::now());
                s.error_message = message;
            })
            .await;

        let result = DebateResult::new(&snapshot, state, panel, rounds, error_message);
        if let Err(e) = control.store().save_result(&result).await {
            warn!(session_id = %snapshot.id, error = %e, "Failed to persist debate result");
        }

        control.events().publish(DebateEvent::Done {
            session_id: snapshot.id.clone(),
            state,
            error_message: result.error_message.clone(),
        });
        self.metrics
            .debate_finished(state.as_str(), started.elapsed(), result.consensus_score);
        self.sessions.write().remove(&snapshot.id);

        info!(
            session_id = %snapshot.id,
            state = %state,
            rounds = result.total_rounds,
            cost_usd = result.total_cost_usd,
            consensus_score = result.consensus_score,
            "Debate finished"
        );

        spawn_notification(self.notifier.clone(), CompletionNotice::from_result(&result));
        result
    }
}

#[async_trait]
impl DebateRunner for DebateEngine {
    async fn run_debate(&self, request: DebateRequest) -> EngineResult<DebateResult> {
        self.run(request).await
    }
}

/// Assessor bound to the configured model, or the cheapest catalog model.
fn build_assessor(
    config: &EngineConfig,
    registry: &ProviderRegistry,
) -> Option<Arc<dyn QualityAssessor>> {
    let chain = config.models.fallback_chain(None, false);
    let option = match &config.quality.assessor_model {
        Some(model_id) => chain
            .iter()
            .find(|m| &m.model_id == model_id)
            .or_else(|| chain.first())
            .map(|m| {
                let mut option = m.clone();
                option.model_id = model_id.clone();
                option
            }),
        None => chain.first().cloned(),
    }?;

    match registry.get(option.provider) {
        Ok(provider) => Some(Arc::new(
            LlmQualityAssessor::new(provider, option.to_config(0.0)).with_retry(config.retry.clone()),
        )),
        Err(e) => {
            warn!(error = %e, "LLM quality assessor disabled");
            None
        }
    }
}
