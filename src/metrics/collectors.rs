//! High-level recording interface over the raw Prometheus metrics.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_DEBATES, CACHE_LOOKUPS_TOTAL, CONSENSUS_SCORE, DEBATES_TOTAL, DEBATE_DURATION,
    EXPERT_FAILURES_TOTAL, LLM_COST_MICROS, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL,
    ROUNDS_TOTAL,
};
use crate::llm::Usage;

/// Outcome label for a response cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    Error,
}

impl CacheLookup {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Error => "error",
        }
    }
}

/// Records debate and LLM metrics.
///
/// Every method is a no-op until `init_metrics()` has run, so library users
/// that never export metrics pay nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one LLM call, retries included in `latency`.
    pub fn record_llm_request(
        &self,
        provider: &str,
        model: &str,
        success: bool,
        latency: Duration,
        usage: Usage,
        cost_usd: f64,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = LLM_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[provider, model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[provider])
                .observe(latency.as_secs_f64());
        }

        if success {
            if let Some(tokens) = LLM_TOKENS_TOTAL.get() {
                tokens
                    .with_label_values(&[model, "input"])
                    .inc_by(usage.prompt_tokens as f64);
                tokens
                    .with_label_values(&[model, "output"])
                    .inc_by(usage.completion_tokens as f64);
            }

            if let Some(cost) = LLM_COST_MICROS.get() {
                cost.with_label_values(&[model])
                    .inc_by((cost_usd * 1_000_000.0).round().max(0.0));
            }
        }

        tracing::trace!(
            provider = provider,
            model = model,
            status = status,
            latency_ms = latency.as_millis() as u64,
            "Recorded LLM request metric"
        );
    }

    pub fn record_cache_lookup(&self, lookup: CacheLookup) {
        if let Some(lookups) = CACHE_LOOKUPS_TOTAL.get() {
            lookups.with_label_values(&[lookup.as_str()]).inc();
        }
    }

    pub fn record_expert_failure(&self, reason: &str) {
        if let Some(failures) = EXPERT_FAILURES_TOTAL.get() {
            failures.with_label_values(&[reason]).inc();
        }
    }

    pub fn record_round(&self) {
        if let Some(rounds) = ROUNDS_TOTAL.get() {
            rounds.inc();
        }
    }

    pub fn debate_started(&self) {
        if let Some(active) = ACTIVE_DEBATES.get() {
            active.inc();
        }
    }

    /// Record a terminal debate.
    pub fn debate_finished(&self, status: &str, duration: Duration, consensus_score: f64) {
        if let Some(active) = ACTIVE_DEBATES.get() {
            active.dec();
        }
        if let Some(debates) = DEBATES_TOTAL.get() {
            debates.with_label_values(&[status]).inc();
        }
        if let Some(histogram) = DEBATE_DURATION.get() {
            histogram.observe(duration.as_secs_f64());
        }
        if let Some(histogram) = CONSENSUS_SCORE.get() {
            histogram.observe(consensus_score);
        }

        tracing::trace!(status = status, consensus_score, "Recorded debate metric");
    }
}
