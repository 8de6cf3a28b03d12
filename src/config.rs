//! Engine configuration.
//!
//! `EngineConfig` is loaded from YAML (every field optional, defaults
//! applied per section), then overridden from `CONSENSUS_FORGE_*`
//! environment variables and validated once.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{ModelCatalog, RetryConfig};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CONSENSUS_FORGE_";

/// Debate loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub max_rounds: u32,
    pub consensus_threshold: f64,
    /// Per-expert call timeout; fractional seconds allowed.
    pub expert_timeout_secs: f64,
    /// Outer round deadline as a multiple of the expert timeout.
    pub round_timeout_multiplier: u32,
    pub max_concurrent_experts: usize,
    pub max_tokens: u32,
    /// Whether a moderator termination recommendation ends the debate before
    /// `max_rounds`. Off by default: a deadlock is only logged.
    pub honor_early_termination: bool,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            consensus_threshold: 0.7,
            expert_timeout_secs: 45.0,
            round_timeout_multiplier: 3,
            max_concurrent_experts: 8,
            max_tokens: 1200,
            honor_early_termination: false,
        }
    }
}

impl DebateSettings {
    pub fn expert_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.expert_timeout_secs.max(0.001))
    }

    pub fn round_timeout(&self) -> Duration {
        self.expert_timeout() * self.round_timeout_multiplier.max(1)
    }
}

/// Panel resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub default_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Fewer matched experts than this is an underfilled panel.
    pub min_viable: usize,
    /// Maximum tag Jaccard similarity between two panel members.
    pub max_tag_overlap: f64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            default_size: 4,
            min_size: 3,
            max_size: 7,
            min_viable: 2,
            max_tag_overlap: 0.5,
        }
    }
}

/// Consensus scoring weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Weight of one supporting vote.
    pub support_weight: f64,
    /// Weight of the supporter's confidence.
    pub confidence_weight: f64,
    /// Weight of the optional per-option quality signal.
    pub quality_weight: f64,
    /// Minimum similarity for two recommendations to share a cluster.
    pub similarity_threshold: f64,
    /// Per-round decay applied to older opinions (1.0 = none, 0.0 = latest
    /// round only).
    pub recency_decay: f64,
    pub top_n: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            support_weight: 0.6,
            confidence_weight: 0.4,
            quality_weight: 0.0,
            similarity_threshold: 0.5,
            recency_decay: 1.0,
            top_n: 5,
        }
    }
}

/// Quality monitor thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub min_confidence: f64,
    pub min_coherence: f64,
    pub min_relevance: f64,
    /// Diversity below this flags groupthink.
    pub groupthink_diversity: f64,
    pub use_llm_assessor: bool,
    pub assessor_model: Option<String>,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_coherence: 0.4,
            min_relevance: 0.3,
            groupthink_diversity: 0.15,
            use_llm_assessor: false,
            assessor_model: None,
        }
    }
}

/// Meta-moderator heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeratorSettings {
    /// Number of recent rounds inspected.
    pub window: usize,
    /// Spread below which consecutive consensus scores count as a deadlock.
    pub deadlock_tolerance: f64,
    /// Drop in consensus or quality that triggers a clarification.
    pub decline_tolerance: f64,
}

impl Default for ModeratorSettings {
    fn default() -> Self {
        Self {
            window: 3,
            deadlock_tolerance: 0.05,
            decline_tolerance: 0.1,
        }
    }
}

/// Multi-phase orchestration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_parallel_subdebates: usize,
    /// Number of independent debates in the ensemble phase.
    pub ensemble_size: usize,
    pub sub_debate_max_rounds: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel_subdebates: 3,
            ensemble_size: 3,
            sub_debate_max_rounds: 3,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// When set, a Redis cache is used instead of the in-memory one.
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 1000,
            redis_url: None,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Spending limits in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub daily_usd: f64,
    pub monthly_usd: f64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            daily_usd: 10.0,
            monthly_usd: 100.0,
        }
    }
}

/// Persistence and notification endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite URL; in-memory storage is used when unset.
    pub database_url: Option<String>,
    /// Completion webhook; completions are only logged when unset.
    pub webhook_url: Option<String>,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debate: DebateSettings,
    pub retry: RetryConfig,
    pub panel: PanelSettings,
    pub scoring: ScoringSettings,
    pub quality: QualitySettings,
    pub moderator: ModeratorSettings,
    pub orchestrator: OrchestratorSettings,
    pub cache: CacheSettings,
    pub budget: BudgetSettings,
    pub storage: StorageSettings,
    pub models: ModelCatalog,
}

impl EngineConfig {
    /// Parse configuration from a YAML string without validating it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML file, apply environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Apply `CONSENSUS_FORGE_*` overrides.
    ///
    /// # Environment Variables
    ///
    /// - `CONSENSUS_FORGE_MAX_ROUNDS`
    /// - `CONSENSUS_FORGE_CONSENSUS_THRESHOLD`
    /// - `CONSENSUS_FORGE_EXPERT_TIMEOUT_SECS`
    /// - `CONSENSUS_FORGE_PANEL_SIZE`
    /// - `CONSENSUS_FORGE_MAX_RETRIES`
    /// - `CONSENSUS_FORGE_USE_LLM_ASSESSOR`
    /// - `CONSENSUS_FORGE_MAX_PARALLEL_SUBDEBATES`
    /// - `CONSENSUS_FORGE_CACHE_ENABLED`, `CONSENSUS_FORGE_CACHE_TTL_SECS`, `CONSENSUS_FORGE_REDIS_URL`
    /// - `CONSENSUS_FORGE_DAILY_BUDGET`, `CONSENSUS_FORGE_MONTHLY_BUDGET`
    /// - `CONSENSUS_FORGE_DATABASE_URL`, `CONSENSUS_FORGE_WEBHOOK_URL`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse("MAX_ROUNDS")? {
            self.debate.max_rounds = v;
        }
        if let Some(v) = env_parse("CONSENSUS_THRESHOLD")? {
            self.debate.consensus_threshold = v;
        }
        if let Some(v) = env_parse("EXPERT_TIMEOUT_SECS")? {
            self.debate.expert_timeout_secs = v;
        }
        if let Some(v) = env_parse("PANEL_SIZE")? {
            self.panel.default_size = v;
        }
        if let Some(v) = env_parse("MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_bool("USE_LLM_ASSESSOR")? {
            self.quality.use_llm_assessor = v;
        }
        if let Some(v) = env_parse("MAX_PARALLEL_SUBDEBATES")? {
            self.orchestrator.max_parallel_subdebates = v;
        }
        if let Some(v) = env_bool("CACHE_ENABLED")? {
            self.cache.enabled = v;
        }
        if let Some(v) = env_parse("CACHE_TTL_SECS")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_string("REDIS_URL") {
            self.cache.redis_url = Some(v);
        }
        if let Some(v) = env_parse("DAILY_BUDGET")? {
            self.budget.daily_usd = v;
        }
        if let Some(v) = env_parse("MONTHLY_BUDGET")? {
            self.budget.monthly_usd = v;
        }
        if let Some(v) = env_string("DATABASE_URL") {
            self.storage.database_url = Some(v);
        }
        if let Some(v) = env_string("WEBHOOK_URL") {
            self.storage.webhook_url = Some(v);
        }
        Ok(())
    }

    /// Validate value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debate.max_rounds == 0 {
            return Err(invalid("debate.max_rounds", "must be greater than 0"));
        }
        unit_interval("debate.consensus_threshold", self.debate.consensus_threshold)?;
        if !(self.debate.expert_timeout_secs > 0.0 && self.debate.expert_timeout_secs.is_finite()) {
            return Err(invalid("debate.expert_timeout_secs", "must be greater than 0"));
        }
        if self.debate.max_concurrent_experts == 0 {
            return Err(invalid("debate.max_concurrent_experts", "must be greater than 0"));
        }

        let panel = &self.panel;
        if panel.min_size == 0 || panel.min_size > panel.max_size {
            return Err(invalid("panel.min_size", "must be in 1..=panel.max_size"));
        }
        if !(panel.min_size..=panel.max_size).contains(&panel.default_size) {
            return Err(invalid(
                "panel.default_size",
                "must lie within panel.min_size..=panel.max_size",
            ));
        }
        if panel.min_viable == 0 || panel.min_viable > panel.min_size {
            return Err(invalid("panel.min_viable", "must be in 1..=panel.min_size"));
        }
        unit_interval("panel.max_tag_overlap", panel.max_tag_overlap)?;

        let scoring = &self.scoring;
        for (field, value) in [
            ("scoring.support_weight", scoring.support_weight),
            ("scoring.confidence_weight", scoring.confidence_weight),
            ("scoring.quality_weight", scoring.quality_weight),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if scoring.support_weight + scoring.confidence_weight + scoring.quality_weight <= 0.0 {
            return Err(invalid("scoring", "weights must not all be zero"));
        }
        unit_interval("scoring.similarity_threshold", scoring.similarity_threshold)?;
        unit_interval("scoring.recency_decay", scoring.recency_decay)?;

        unit_interval("quality.min_confidence", self.quality.min_confidence)?;
        unit_interval("quality.min_coherence", self.quality.min_coherence)?;
        unit_interval("quality.min_relevance", self.quality.min_relevance)?;
        unit_interval("quality.groupthink_diversity", self.quality.groupthink_diversity)?;

        if self.moderator.window < 2 {
            return Err(invalid("moderator.window", "must be at least 2"));
        }

        if self.orchestrator.max_parallel_subdebates == 0 {
            return Err(invalid("orchestrator.max_parallel_subdebates", "must be greater than 0"));
        }
        if self.orchestrator.ensemble_size == 0 {
            return Err(invalid("orchestrator.ensemble_size", "must be greater than 0"));
        }
        if self.orchestrator.sub_debate_max_rounds == 0 {
            return Err(invalid("orchestrator.sub_debate_max_rounds", "must be greater than 0"));
        }

        if self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(invalid("retry.jitter", "must be between 0.0 and 1.0"));
        }

        if self.budget.daily_usd < 0.0 || self.budget.monthly_usd < 0.0 {
            return Err(invalid("budget", "cannot be negative"));
        }
        if self.budget.daily_usd > self.budget.monthly_usd {
            return Err(invalid("budget.daily_usd", "cannot exceed budget.monthly_usd"));
        }

        if self.models.models.is_empty() {
            return Err(invalid("models", "catalog cannot be empty"));
        }

        Ok(())
    }

    /// Builder method to set the round budget.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.debate.max_rounds = max_rounds.max(1);
        self
    }

    /// Builder method to set the consensus threshold, clamped to [0, 1].
    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.debate.consensus_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Builder method to set the per-expert timeout.
    pub fn with_expert_timeout(mut self, timeout: Duration) -> Self {
        self.debate.expert_timeout_secs = timeout.as_secs_f64().max(0.001);
        self
    }

    /// Builder method to replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must be between 0.0 and 1.0"))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: format!("{}{}", ENV_PREFIX, key),
                value,
            }),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv {
                name: format!("{}{}", ENV_PREFIX, key),
                value,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.debate.max_rounds, 5);
        assert_eq!(config.debate.round_timeout(), Duration::from_secs(135));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.panel.default_size, 4);
        assert!(!config.debate.honor_early_termination);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "debate:\n  max_rounds: 3\nscoring:\n  similarity_threshold: 0.6\n";
        let config = EngineConfig::from_yaml(yaml).expect("valid yaml");
        assert_eq!(config.debate.max_rounds, 3);
        assert_eq!(config.debate.consensus_threshold, 0.7);
        assert_eq!(config.scoring.similarity_threshold, 0.6);
        assert_eq!(config.scoring.support_weight, 0.6);
        assert!(!config.models.models.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "panel:\n  default_size: 5\nbudget:\n  daily_usd: 1.0\n  monthly_usd: 5.0")
            .expect("write");

        let config = EngineConfig::from_file(file.path()).expect("config should load");
        assert_eq!(config.panel.default_size, 5);
        assert_eq!(config.budget.monthly_usd, 5.0);
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/consensus.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validation_failures() {
        let config = EngineConfig::default().with_consensus_threshold(0.7);
        let mut bad = config.clone();
        bad.debate.max_rounds = 0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.panel.default_size = 9;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.scoring.support_weight = 0.0;
        bad.scoring.confidence_weight = 0.0;
        assert!(bad.validate().is_err());

        let mut latest_only = config.clone();
        latest_only.scoring.recency_decay = 0.0;
        assert!(latest_only.validate().is_ok());
        let mut bad = config.clone();
        bad.scoring.recency_decay = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.budget.daily_usd = 500.0;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "budget.daily_usd"
        ));
    }

    #[test]
    fn test_builders_clamp() {
        let config = EngineConfig::default()
            .with_max_rounds(0)
            .with_consensus_threshold(1.5)
            .with_expert_timeout(Duration::ZERO);
        assert_eq!(config.debate.max_rounds, 1);
        assert_eq!(config.debate.consensus_threshold, 1.0);
        assert_eq!(config.debate.expert_timeout_secs, 0.001);
    }
}
