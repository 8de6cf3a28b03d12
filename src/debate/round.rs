//! Round execution: concurrent expert consultation.
//!
//! Every expert is consulted concurrently, bounded by a semaphore. Each call
//! runs through the retry controller under its own timeout, and the whole
//! round is bounded by an outer deadline. An expert that fails is recorded
//! on the round; only a round without any opinion is fatal to the debate.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::prompts::{expert_system_prompt, expert_user_prompt, PromptContext};
use super::types::{ExpertFailure, ExpertProfile, FailureReason, Opinion};
use crate::config::DebateSettings;
use crate::llm::{
    retry_with_backoff, AiConfig, CachedCompletion, ContentHash, CostTracker, GenerationRequest,
    Message, ProviderRegistry, ResponseCache, RetryConfig, RetryError, Usage,
};
use crate::metrics::{CacheLookup, MetricsCollector};
use crate::utils::extract_json_object;

/// Default confidence when a reply states none.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Longest recommendation kept from a free-text reply.
const MAX_RECOMMENDATION_CHARS: usize = 240;

/// Opinions and failures of one round, both in panel order.
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub opinions: Vec<Opinion>,
    pub failures: Vec<ExpertFailure>,
}

impl RoundOutcome {
    pub fn is_empty(&self) -> bool {
        self.opinions.is_empty()
    }
}

/// Runs one round against a panel.
#[derive(Clone)]
pub struct RoundExecutor {
    registry: ProviderRegistry,
    retry: RetryConfig,
    expert_timeout: Duration,
    round_timeout: Duration,
    max_concurrent: usize,
    max_tokens: u32,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_ttl: Duration,
    cost_tracker: Arc<CostTracker>,
    metrics: MetricsCollector,
}

impl RoundExecutor {
    pub fn new(registry: ProviderRegistry, settings: &DebateSettings, retry: RetryConfig) -> Self {
        Self {
            registry,
            retry,
            expert_timeout: settings.expert_timeout(),
            round_timeout: settings.round_timeout(),
            max_concurrent: settings.max_concurrent_experts.max(1),
            max_tokens: settings.max_tokens,
            cache: None,
            cache_ttl: Duration::from_secs(3600),
            cost_tracker: Arc::new(CostTracker::unlimited()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = tracker;
        self
    }

    pub fn expert_timeout(&self) -> Duration {
        self.expert_timeout
    }

    /// Consult every panel member once.
    ///
    /// Experts listed in `dissenters` are asked to argue against the leading
    /// option. Results that arrive after the round deadline are discarded.
    pub async fn execute(
        &self,
        panel: &[ExpertProfile],
        ctx: &PromptContext<'_>,
        dissenters: &[String],
        session_id: &str,
    ) -> RoundOutcome {
        let semaphore = Semaphore::new(self.max_concurrent);
        let semaphore = &semaphore;

        let mut pending: FuturesUnordered<_> = panel
            .iter()
            .enumerate()
            .map(|(index, expert)| {
                let dissent = dissenters.contains(&expert.id);
                async move {
                    let result = match semaphore.acquire().await {
                        Ok(_permit) => match tokio::time::timeout(
                            self.expert_timeout,
                            self.consult(expert, ctx, dissent, session_id),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(FailureReason::TimedOut),
                        },
                        Err(e) => Err(FailureReason::Fatal {
                            message: format!("Concurrency limiter closed: {}", e),
                        }),
                    };
                    (index, result)
                }
            })
            .collect();

        let mut slots: Vec<Option<Result<Opinion, FailureReason>>> = vec![None; panel.len()];
        let deadline = tokio::time::sleep(self.round_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((index, result)) => slots[index] = Some(result),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        session_id = session_id,
                        round = ctx.round_number,
                        timeout_ms = self.round_timeout.as_millis() as u64,
                        "Round deadline reached, abandoning outstanding experts"
                    );
                    break;
                }
            }
        }
        drop(pending);

        let mut outcome = RoundOutcome::default();
        for (expert, slot) in panel.iter().zip(slots) {
            match slot.unwrap_or(Err(FailureReason::TimedOut)) {
                Ok(opinion) => outcome.opinions.push(opinion),
                Err(reason) => {
                    warn!(
                        session_id = session_id,
                        round = ctx.round_number,
                        expert_id = %expert.id,
                        reason = %reason,
                        "Expert did not respond this round"
                    );
                    self.metrics.record_expert_failure(failure_label(&reason));
                    outcome.failures.push(ExpertFailure {
                        expert_id: expert.id.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            session_id = session_id,
            round = ctx.round_number,
            opinions = outcome.opinions.len(),
            failures = outcome.failures.len(),
            "Round executed"
        );
        outcome
    }

    /// Primary configuration first, then each fallback in order.
    async fn consult(
        &self,
        expert: &ExpertProfile,
        ctx: &PromptContext<'_>,
        dissent: bool,
        session_id: &str,
    ) -> Result<Opinion, FailureReason> {
        let system = expert_system_prompt(expert);
        let user = expert_user_prompt(ctx, dissent);

        let mut last_failure = FailureReason::Fatal {
            message: "No model configured".to_string(),
        };
        for (position, config) in std::iter::once(&expert.ai_config)
            .chain(expert.fallbacks.iter())
            .enumerate()
        {
            if position > 0 {
                info!(
                    session_id = session_id,
                    expert_id = %expert.id,
                    model = %config.model_id,
                    "Falling back to next model"
                );
            }
            match self.ask(expert, config, &system, &user, session_id).await {
                Ok(opinion) => return Ok(opinion),
                Err(reason) => {
                    debug!(
                        expert_id = %expert.id,
                        model = %config.model_id,
                        reason = %reason,
                        "Model attempt failed"
                    );
                    last_failure = reason;
                }
            }
        }
        Err(last_failure)
    }

    async fn ask(
        &self,
        expert: &ExpertProfile,
        config: &AiConfig,
        system: &str,
        user: &str,
        session_id: &str,
    ) -> Result<Opinion, FailureReason> {
        let key = ContentHash::for_request(config.provider, &config.model_id, system, user);

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(hit)) => {
                    self.metrics.record_cache_lookup(CacheLookup::Hit);
                    if let Some(parsed) = parse_opinion(&hit.text) {
                        debug!(expert_id = %expert.id, model = %config.model_id, "Response cache hit");
                        return Ok(parsed.into_opinion(expert, config, hit.usage, 0.0, true));
                    }
                }
                Ok(None) => self.metrics.record_cache_lookup(CacheLookup::Miss),
                Err(e) => {
                    self.metrics.record_cache_lookup(CacheLookup::Error);
                    warn!(error = %e, "Response cache lookup failed");
                }
            }
        }

        let provider = self
            .registry
            .get(config.provider)
            .map_err(|e| FailureReason::Fatal {
                message: e.to_string(),
            })?;

        let request = GenerationRequest::new(
            &config.model_id,
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(config.temperature)
        .with_max_tokens(self.max_tokens);

        let started = Instant::now();
        let outcome = retry_with_backoff(|| provider.generate(request.clone()), &self.retry).await;
        let provider_label = config.provider.as_str();

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_llm_request(
                    provider_label,
                    &config.model_id,
                    false,
                    started.elapsed(),
                    Usage::default(),
                    0.0,
                );
                return Err(match err {
                    RetryError::Exhausted { attempts, last } => FailureReason::RetriesExhausted {
                        attempts,
                        message: last.to_string(),
                    },
                    RetryError::Fatal(e) => FailureReason::Fatal {
                        message: e.to_string(),
                    },
                });
            }
        };

        let content = response.first_content().unwrap_or_default().to_string();
        let parsed = parse_opinion(&content).ok_or_else(|| FailureReason::Fatal {
            message: format!("Empty response from {}", config.model_id),
        })?;

        let cost_usd =
            self.cost_tracker
                .record(&config.model_id, &response.usage, &config.pricing, Some(session_id));
        self.metrics.record_llm_request(
            provider_label,
            &config.model_id,
            true,
            started.elapsed(),
            response.usage,
            cost_usd,
        );

        if let Some(cache) = &self.cache {
            let completion = CachedCompletion {
                text: content,
                model: config.model_id.clone(),
                usage: response.usage,
            };
            if let Err(e) = cache.set(&key, &completion, self.cache_ttl).await {
                warn!(error = %e, "Response cache write failed");
            }
        }

        Ok(parsed.into_opinion(expert, config, response.usage, cost_usd, false))
    }
}

fn failure_label(reason: &FailureReason) -> &'static str {
    match reason {
        FailureReason::TimedOut => "timed_out",
        FailureReason::RetriesExhausted { .. } => "retries_exhausted",
        FailureReason::Fatal { .. } => "fatal",
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

/// An expert reply before it is bound to an expert and a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOpinion {
    pub recommendation: String,
    pub reasoning: String,
    pub confidence: f64,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

impl ParsedOpinion {
    fn into_opinion(
        self,
        expert: &ExpertProfile,
        config: &AiConfig,
        usage: Usage,
        cost_usd: f64,
        cached: bool,
    ) -> Opinion {
        Opinion {
            expert_id: expert.id.clone(),
            recommendation: self.recommendation,
            reasoning: self.reasoning,
            confidence: self.confidence,
            pros: self.pros,
            cons: self.cons,
            provider: config.provider,
            model: config.model_id.clone(),
            usage,
            cost_usd,
            cached,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpinionReply {
    #[serde(alias = "opinion", alias = "answer", alias = "position")]
    recommendation: String,
    #[serde(default, alias = "rationale", alias = "explanation")]
    reasoning: String,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, alias = "advantages")]
    pros: Vec<String>,
    #[serde(default, alias = "disadvantages", alias = "risks")]
    cons: Vec<String>,
}

/// Parse an expert reply.
///
/// JSON replies are preferred; anything else is read as free text whose
/// first line is the recommendation. Confidence is always within [0, 1].
pub fn parse_opinion(content: &str) -> Option<ParsedOpinion> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(json) = extract_json_object(trimmed) {
        if let Ok(reply) = serde_json::from_str::<OpinionReply>(&json) {
            let recommendation = reply.recommendation.trim().to_string();
            if !recommendation.is_empty() {
                let confidence = reply
                    .confidence
                    .as_ref()
                    .and_then(confidence_from_value)
                    .unwrap_or(DEFAULT_CONFIDENCE);
                return Some(ParsedOpinion {
                    recommendation,
                    reasoning: reply.reasoning.trim().to_string(),
                    confidence,
                    pros: reply.pros,
                    cons: reply.cons,
                });
            }
        }
    }

    let recommendation = first_statement(trimmed)?;
    Some(ParsedOpinion {
        recommendation,
        reasoning: trimmed.to_string(),
        confidence: extract_confidence(trimmed),
        pros: Vec::new(),
        cons: Vec::new(),
    })
}

/// Numbers and numeric strings; percentages are scaled down.
fn confidence_from_value(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    scale_confidence(raw)
}

/// Values in (1, 100] are read as percentages.
fn scale_confidence(raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    Some(scaled.clamp(0.0, 1.0))
}

fn first_statement(text: &str) -> Option<String> {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let label = LABEL.get_or_init(|| {
        Regex::new(r"(?i)^(?:[#>*\-\s]+)?(?:\*\*)?(?:final\s+)?(?:recommendation|answer|position)(?:\*\*)?\s*:\s*")
            .expect("Invalid regex for recommendation label")
    });

    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let stripped = label.replace(line, "");
    let stripped = stripped.trim_start_matches(['#', '*', '-', '>', ' ']).trim();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.chars().take(MAX_RECOMMENDATION_CHARS).collect())
}

/// First number following the word "confidence", as a fraction or a
/// percentage.
fn extract_confidence(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let Some(pos) = lower.find("confidence") else {
        return DEFAULT_CONFIDENCE;
    };
    for word in lower[pos..].split_whitespace().skip(1) {
        let clean: String = word
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let clean = clean.trim_end_matches('.');
        if let Ok(value) = clean.parse::<f64>() {
            if (0.0..=100.0).contains(&value) {
                if let Some(confidence) = scale_confidence(value) {
                    return confidence;
                }
            }
        }
    }
    DEFAULT_CONFIDENCE
}
