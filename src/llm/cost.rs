//! Cost tracking for LLM usage.
//!
//! Pricing is expressed per 1M tokens; spending is accumulated in
//! micro-dollars so that the cost of a single short opinion (often a fraction
//! of a cent) is not truncated to zero.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::litellm::Usage;

/// Micro-dollars per dollar.
const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

/// Price of a model per 1M tokens, in dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per 1 million prompt tokens.
    pub input_per_1m: f64,
    /// Cost per 1 million completion tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Create pricing from per-1M input and output prices.
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
        }
    }

    /// Zero pricing for free-tier models.
    pub const fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Whether both prices are zero.
    pub fn is_free(&self) -> bool {
        self.input_per_1m <= 0.0 && self.output_per_1m <= 0.0
    }

    /// Blended price used to order models (output weighted as it dominates).
    pub fn blended(&self) -> f64 {
        self.input_per_1m + 3.0 * self.output_per_1m
    }

    /// Cost in dollars for the given usage.
    pub fn cost_usd(&self, usage: &Usage) -> f64 {
        micros_to_dollars(self.cost_micros(usage.prompt_tokens, usage.completion_tokens))
    }

    /// Cost in micro-dollars for the given token counts.
    pub fn cost_micros(&self, input_tokens: u32, output_tokens: u32) -> u64 {
        // tokens / 1M * price * 1M micros == tokens * price
        let input = input_tokens as f64 * self.input_per_1m.max(0.0);
        let output = output_tokens as f64 * self.output_per_1m.max(0.0);
        (input + output).round() as u64
    }
}

/// A single usage record for an LLM call.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// Timestamp of the API call.
    pub timestamp: DateTime<Utc>,
    /// Model identifier used for the call.
    pub model: String,
    /// Number of input tokens consumed.
    pub input_tokens: u32,
    /// Number of output tokens generated.
    pub output_tokens: u32,
    /// Cost in micro-dollars.
    pub cost_micros: u64,
    /// Debate session the call belonged to, if any.
    pub session_id: Option<String>,
}

/// Summary report of cost tracking data.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub daily_spent: f64,
    pub daily_remaining: f64,
    pub monthly_spent: f64,
    pub monthly_remaining: f64,
    /// Cost breakdown by model in dollars.
    pub by_model: HashMap<String, f64>,
}

/// Cost tracker for monitoring LLM spend against budgets.
///
/// Thread-safe; shared across concurrent expert calls via `Arc`.
pub struct CostTracker {
    daily_budget_micros: u64,
    monthly_budget_micros: u64,
    spent_today_micros: AtomicU64,
    spent_month_micros: AtomicU64,
    cost_by_model: RwLock<HashMap<String, u64>>,
    usage_history: RwLock<Vec<UsageRecord>>,
    /// (ordinal day, month) the counters belong to.
    tracking_period: RwLock<(u32, u32)>,
}

impl CostTracker {
    /// Create a new cost tracker with daily and monthly budgets in dollars.
    pub fn new(daily_budget: f64, monthly_budget: f64) -> Self {
        let now = Utc::now();
        Self {
            daily_budget_micros: dollars_to_micros(daily_budget),
            monthly_budget_micros: dollars_to_micros(monthly_budget),
            spent_today_micros: AtomicU64::new(0),
            spent_month_micros: AtomicU64::new(0),
            cost_by_model: RwLock::new(HashMap::new()),
            usage_history: RwLock::new(Vec::new()),
            tracking_period: RwLock::new((now.ordinal(), now.month())),
        }
    }

    /// A tracker without effective limits.
    pub fn unlimited() -> Self {
        Self::new(f64::MAX / MICROS_PER_DOLLAR, f64::MAX / MICROS_PER_DOLLAR)
    }

    /// Record one call and return its cost in dollars.
    pub fn record(
        &self,
        model: &str,
        usage: &Usage,
        pricing: &ModelPricing,
        session_id: Option<&str>,
    ) -> f64 {
        self.maybe_reset_counters();

        let cost_micros = pricing.cost_micros(usage.prompt_tokens, usage.completion_tokens);

        self.spent_today_micros
            .fetch_add(cost_micros, Ordering::SeqCst);
        self.spent_month_micros
            .fetch_add(cost_micros, Ordering::SeqCst);
        *self
            .cost_by_model
            .write()
            .entry(model.to_string())
            .or_insert(0) += cost_micros;

        self.usage_history.write().push(UsageRecord {
            timestamp: Utc::now(),
            model: model.to_string(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_micros,
            session_id: session_id.map(str::to_string),
        });

        tracing::debug!(
            model = model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            cost_micros = cost_micros,
            "Recorded LLM usage"
        );

        micros_to_dollars(cost_micros)
    }

    /// Check if spending is over either the daily or the monthly budget.
    pub fn is_over_budget(&self) -> bool {
        self.maybe_reset_counters();
        self.spent_today_micros.load(Ordering::SeqCst) >= self.daily_budget_micros
            || self.spent_month_micros.load(Ordering::SeqCst) >= self.monthly_budget_micros
    }

    /// Amount spent today in dollars.
    pub fn daily_spent(&self) -> f64 {
        self.maybe_reset_counters();
        micros_to_dollars(self.spent_today_micros.load(Ordering::SeqCst))
    }

    /// Amount spent this month in dollars.
    pub fn monthly_spent(&self) -> f64 {
        self.maybe_reset_counters();
        micros_to_dollars(self.spent_month_micros.load(Ordering::SeqCst))
    }

    /// Get a cost report.
    pub fn get_cost_report(&self) -> CostReport {
        self.maybe_reset_counters();

        let daily = self.spent_today_micros.load(Ordering::SeqCst);
        let monthly = self.spent_month_micros.load(Ordering::SeqCst);
        let by_model = self
            .cost_by_model
            .read()
            .iter()
            .map(|(model, &micros)| (model.clone(), micros_to_dollars(micros)))
            .collect();

        CostReport {
            daily_spent: micros_to_dollars(daily),
            daily_remaining: micros_to_dollars(self.daily_budget_micros.saturating_sub(daily)),
            monthly_spent: micros_to_dollars(monthly),
            monthly_remaining: micros_to_dollars(
                self.monthly_budget_micros.saturating_sub(monthly),
            ),
            by_model,
        }
    }

    /// Usage records, oldest first.
    pub fn usage_history(&self) -> Vec<UsageRecord> {
        self.usage_history.read().clone()
    }

    /// Total tokens consumed (input + output).
    pub fn total_tokens(&self) -> u64 {
        self.usage_history
            .read()
            .iter()
            .map(|r| r.input_tokens as u64 + r.output_tokens as u64)
            .sum()
    }

    fn maybe_reset_counters(&self) {
        let now = Utc::now();
        let current = (now.ordinal(), now.month());

        let mut period = self.tracking_period.write();
        if period.0 != current.0 {
            self.spent_today_micros.store(0, Ordering::SeqCst);
            tracing::info!("Daily cost counter reset");
        }
        if period.1 != current.1 {
            self.spent_month_micros.store(0, Ordering::SeqCst);
            self.cost_by_model.write().clear();
            tracing::info!("Monthly cost counter reset");
        }
        *period = current;
    }
}

fn dollars_to_micros(dollars: f64) -> u64 {
    (dollars.max(0.0) * MICROS_PER_DOLLAR).round() as u64
}

fn micros_to_dollars(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_DOLLAR
}
