//! Prometheus metrics registration and export.
//!
//! All metrics live in a dedicated registry behind `OnceLock` statics.
//! Recording before [`init_metrics`] is a silent no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all consensus-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished debates, labeled by terminal state.
pub static DEBATES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock debate duration in seconds.
pub static DEBATE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Debates currently running or paused.
pub static ACTIVE_DEBATES: OnceLock<Gauge> = OnceLock::new();

/// Completed rounds across all debates.
pub static ROUNDS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Final consensus score distribution.
pub static CONSENSUS_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Non-responsive experts, labeled by failure kind.
pub static EXPERT_FAILURES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM calls, labeled by provider, model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM call latency in seconds (retries included), labeled by provider.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM spend in micro-dollars, labeled by model.
pub static LLM_COST_MICROS: OnceLock<CounterVec> = OnceLock::new();

/// Response cache lookups, labeled by result (hit/miss/error).
pub static CACHE_LOOKUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless; later calls return `Ok(())`
/// without touching the registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Debate metrics
    let debates_total = CounterVec::new(
        Opts::new("consensus_forge_debates_total", "Finished debates"),
        &["status"],
    )?;

    let debate_duration = Histogram::with_opts(
        HistogramOpts::new(
            "consensus_forge_debate_duration_seconds",
            "Debate duration in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
    )?;

    let active_debates = Gauge::new(
        "consensus_forge_active_debates",
        "Debates currently running or paused",
    )?;

    let rounds_total = Counter::new("consensus_forge_rounds_total", "Completed debate rounds")?;

    let consensus_score = Histogram::with_opts(
        HistogramOpts::new(
            "consensus_forge_consensus_score",
            "Final consensus score distribution",
        )
        .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    let expert_failures_total = CounterVec::new(
        Opts::new(
            "consensus_forge_expert_failures_total",
            "Experts that produced no opinion in a round",
        ),
        &["reason"],
    )?;

    // LLM metrics
    let llm_requests_total = CounterVec::new(
        Opts::new("consensus_forge_llm_requests_total", "Total LLM API requests"),
        &["provider", "model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "consensus_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["provider"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("consensus_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let llm_cost_micros = CounterVec::new(
        Opts::new(
            "consensus_forge_llm_cost_micros",
            "LLM API costs in micro-dollars",
        ),
        &["model"],
    )?;

    let cache_lookups_total = CounterVec::new(
        Opts::new("consensus_forge_cache_lookups_total", "Response cache lookups"),
        &["result"],
    )?;

    registry.register(Box::new(debates_total.clone()))?;
    registry.register(Box::new(debate_duration.clone()))?;
    registry.register(Box::new(active_debates.clone()))?;
    registry.register(Box::new(rounds_total.clone()))?;
    registry.register(Box::new(consensus_score.clone()))?;
    registry.register(Box::new(expert_failures_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(llm_cost_micros.clone()))?;
    registry.register(Box::new(cache_lookups_total.clone()))?;

    // A concurrent initializer may have won the race; its set stands.
    let _ = REGISTRY.set(registry);
    let _ = DEBATES_TOTAL.set(debates_total);
    let _ = DEBATE_DURATION.set(debate_duration);
    let _ = ACTIVE_DEBATES.set(active_debates);
    let _ = ROUNDS_TOTAL.set(rounds_total);
    let _ = CONSENSUS_SCORE.set(consensus_score);
    let _ = EXPERT_FAILURES_TOTAL.set(expert_failures_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = LLM_COST_MICROS.set(llm_cost_micros);
    let _ = CACHE_LOOKUPS_TOTAL.set(cache_lookups_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_gather_after_recording() {
        init_metrics().unwrap();
        if let Some(rounds) = ROUNDS_TOTAL.get() {
            rounds.inc();
        }
        let text = gather_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("consensus_forge_rounds_total"));
    }
}
