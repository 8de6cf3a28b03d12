//! Question analysis and debate pattern selection.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::text::normalize;

/// How a question is decomposed into debates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePattern {
    /// One debate over the question.
    Single,
    /// Pairwise elimination over many candidate options.
    Tournament,
    /// One advocacy debate per option, then a verdict debate.
    Adversarial,
    /// Independent debates, then a synthesis debate.
    Ensemble,
}

impl DebatePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Tournament => "tournament",
            Self::Adversarial => "adversarial",
            Self::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for DebatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebatePattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "tournament" => Ok(Self::Tournament),
            "adversarial" => Ok(Self::Adversarial),
            "ensemble" => Ok(Self::Ensemble),
            other => Err(format!(
                "Unknown pattern '{}': expected single, tournament, adversarial or ensemble",
                other
            )),
        }
    }
}

/// Coarse signal strength from keyword hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalLevel {
    Low,
    Medium,
    High,
}

impl SignalLevel {
    fn from_hits(hits: usize) -> Self {
        match hits {
            0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }
}

const SCALE_TERMS: &[&str] = &[
    "company wide",
    "organization",
    "enterprise",
    "platform",
    "global",
    "million",
    "millions",
    "architecture",
    "infrastructure",
    "strategy",
    "multi year",
    "rewrite",
    "all teams",
    "every team",
    "long term",
];

const RISK_TERMS: &[&str] = &[
    "risk",
    "risky",
    "security",
    "compliance",
    "legal",
    "regulatory",
    "safety",
    "outage",
    "breach",
    "lawsuit",
    "critical",
    "production",
    "privacy",
    "liability",
];

const IRREVERSIBLE_TERMS: &[&str] = &[
    "irreversible",
    "permanent",
    "permanently",
    "cannot undo",
    "can t undo",
    "one way",
    "shut down",
    "decommission",
    "sunset",
    "acquire",
    "acquisition",
    "layoff",
    "layoffs",
    "sell the",
    "exit the",
];

/// Features of a question that drive pattern selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSignals {
    pub scale: SignalLevel,
    pub risk: SignalLevel,
    pub irreversible: bool,
    /// Candidate options named in the question, in order of appearance.
    pub options: Vec<String>,
}

impl QuestionSignals {
    pub fn analyze(question: &str) -> Self {
        // Padded so phrase matches respect word boundaries.
        let padded = format!(" {} ", normalize(question));
        let hits = |terms: &[&str]| {
            terms
                .iter()
                .filter(|t| padded.contains(&format!(" {} ", t)))
                .count()
        };

        Self {
            scale: SignalLevel::from_hits(hits(SCALE_TERMS)),
            risk: SignalLevel::from_hits(hits(RISK_TERMS)),
            irreversible: hits(IRREVERSIBLE_TERMS) > 0,
            options: extract_options(question),
        }
    }
}

fn between_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bbetween\s+([^?.!;]+)").expect("Invalid regex for 'between' clause")
    })
}

fn versus_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(?:vs\.?|versus)\s+").expect("Invalid regex for 'vs'"))
}

fn lead_in_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:(?:should|do|can|would)\s+(?:we|i|you|the\s+\w+)\s+(?:use|adopt|choose|pick|go\s+with|migrate\s+to|move\s+to|switch\s+to|build|buy|prefer|invest\s+in)?|which\s+(?:is\s+better|one|option|should\s+we\s+(?:use|choose|pick))|what\s+(?:is\s+better|should\s+we\s+(?:use|choose|pick)))\s*[:,]?\s*",
        )
        .expect("Invalid regex for question lead-in")
    })
}

fn list_separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*,\s*(?:or\s+|and\s+)?|\s+or\s+").expect("Invalid regex for list separator")
    })
}

/// Options named by "between A, B and C", "A vs B" or "A or B".
pub fn extract_options(question: &str) -> Vec<String> {
    let clause = question
        .split(['?', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let raw: Vec<String> = if let Some(caps) = between_regex().captures(clause) {
        let list = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let list = list.replace(" and ", ", ");
        list_separator_regex()
            .split(&list)
            .map(str::to_string)
            .collect()
    } else if versus_regex().is_match(clause) {
        let stripped = lead_in_regex().replace(clause, "");
        versus_regex()
            .split(&stripped)
            .map(str::to_string)
            .collect()
    } else if clause.to_lowercase().contains(" or ") {
        let stripped = lead_in_regex().replace(clause, "");
        list_separator_regex()
            .split(&stripped)
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let mut options: Vec<String> = Vec::new();
    for option in raw {
        let cleaned = clean_option(&option);
        if cleaned.is_empty() || cleaned.split_whitespace().count() > 8 {
            continue;
        }
        if !options.iter().any(|o| o.eq_ignore_ascii_case(&cleaned)) {
            options.push(cleaned);
        }
    }
    if options.len() < 2 {
        return Vec::new();
    }
    options
}

fn clean_option(option: &str) -> String {
    let trimmed = option
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == ',' || c == '.' || c == ':');
    let lower = trimmed.to_lowercase();
    for article in ["the ", "a ", "an "] {
        if lower.starts_with(article) {
            return trimmed[article.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Picks a pattern from question signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternSelector {
    forced: Option<DebatePattern>,
}

impl PatternSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always use `pattern`.
    pub fn with_override(mut self, pattern: DebatePattern) -> Self {
        self.forced = Some(pattern);
        self
    }

    /// Rules, first match wins:
    /// four or more options run a tournament; two options with high risk or
    /// an irreversible outcome run adversarially; high scale or high risk
    /// runs an ensemble; everything else is a single debate.
    pub fn select(&self, signals: &QuestionSignals) -> DebatePattern {
        if let Some(pattern) = self.forced {
            return pattern;
        }
        let options = signals.options.len();
        if options >= 4 {
            DebatePattern::Tournament
        } else if options == 2 && (signals.risk == SignalLevel::High || signals.irreversible) {
            DebatePattern::Adversarial
        } else if signals.scale == SignalLevel::High || signals.risk == SignalLevel::High {
            DebatePattern::Ensemble
        } else {
            DebatePattern::Single
        }
    }

    pub fn analyze(&self, question: &str) -> (QuestionSignals, DebatePattern) {
        let signals = QuestionSignals::analyze(question);
        let pattern = self.select(&signals);
        (signals, pattern)
    }
}
