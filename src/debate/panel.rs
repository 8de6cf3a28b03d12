//! Expert panel resolution.
//!
//! Experts are ranked by how well their expertise tags match the question,
//! admitted greedily while their tags stay distinct from the experts already
//! chosen, then bound to models from the cost-ascending fallback chain.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::PanelError;
use super::types::ExpertProfile;
use crate::config::PanelSettings;
use crate::llm::{CostTracker, ModelCatalog, ModelOption, ProviderKind};
use crate::utils::text::{jaccard, keywords, tokenize};

/// Weight of a description keyword hit relative to a tag hit.
const DESCRIPTION_WEIGHT: f64 = 0.25;

/// Default sampling temperature for panel experts.
const EXPERT_TEMPERATURE: f64 = 0.7;

/// A catalog entry from which panel experts are instantiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertTemplate {
    pub id: String,
    pub name: String,
    pub expertise: Vec<String>,
    pub description: String,
}

impl ExpertTemplate {
    pub fn new(id: &str, name: &str, expertise: &[&str], description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            expertise: expertise.iter().map(|t| t.to_string()).collect(),
            description: description.to_string(),
        }
    }

    fn tag_set(&self) -> BTreeSet<String> {
        self.expertise.iter().map(|t| t.to_lowercase()).collect()
    }
}

/// The built-in expert catalog.
pub fn default_catalog() -> Vec<ExpertTemplate> {
    vec![
        ExpertTemplate::new(
            "finance",
            "Financial Analyst",
            &["finance", "cost", "budget", "investment", "pricing", "revenue"],
            "Weighs total cost of ownership, cash flow and return on investment.",
        ),
        ExpertTemplate::new(
            "engineering",
            "Principal Engineer",
            &["engineering", "architecture", "software", "infrastructure", "scalability", "database"],
            "Evaluates technical feasibility, maintainability and system design.",
        ),
        ExpertTemplate::new(
            "security",
            "Security Architect",
            &["security", "risk", "threat", "privacy", "compliance"],
            "Assesses attack surface, data protection and security posture.",
        ),
        ExpertTemplate::new(
            "product",
            "Product Strategist",
            &["product", "user", "customer", "roadmap", "feature"],
            "Focuses on customer value, adoption and product-market fit.",
        ),
        ExpertTemplate::new(
            "legal",
            "Legal Counsel",
            &["legal", "regulation", "contract", "liability", "licensing"],
            "Reviews regulatory exposure, contractual obligations and liability.",
        ),
        ExpertTemplate::new(
            "operations",
            "Operations Lead",
            &["operations", "process", "migration", "vendor", "reliability"],
            "Plans rollout, operational load, vendor management and reliability.",
        ),
        ExpertTemplate::new(
            "data",
            "Data Scientist",
            &["data", "analytics", "metrics", "experiment", "machine learning"],
            "Grounds decisions in measurable evidence and data quality.",
        ),
        ExpertTemplate::new(
            "marketing",
            "Growth Marketer",
            &["marketing", "brand", "growth", "market", "sales"],
            "Considers positioning, acquisition channels and competitive dynamics.",
        ),
        ExpertTemplate::new(
            "people",
            "People & Organization Lead",
            &["hiring", "team", "culture", "talent", "organization"],
            "Considers staffing, skills, team structure and change management.",
        ),
    ]
}

/// Resolves a question into a bound expert panel.
#[derive(Clone)]
pub struct PanelResolver {
    catalog: Vec<ExpertTemplate>,
    models: ModelCatalog,
    settings: PanelSettings,
    cost_tracker: Option<Arc<CostTracker>>,
}

impl PanelResolver {
    pub fn new(models: ModelCatalog, settings: PanelSettings) -> Self {
        Self {
            catalog: default_catalog(),
            models,
            settings,
            cost_tracker: None,
        }
    }

    /// Replace the expert catalog.
    pub fn with_catalog(mut self, catalog: Vec<ExpertTemplate>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Restrict binding to free models whenever the tracker is over budget.
    pub fn with_cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn catalog(&self) -> &[ExpertTemplate] {
        &self.catalog
    }

    /// Relevance of a template to the question tokens.
    pub fn relevance(template: &ExpertTemplate, question_tokens: &BTreeSet<String>) -> f64 {
        let tag_hits = template
            .expertise
            .iter()
            .filter(|tag| {
                tokenize(tag)
                    .iter()
                    .any(|t| question_tokens.iter().any(|q| tokens_match(t, q)))
            })
            .count();
        let description_hits = keywords(&template.description)
            .iter()
            .filter(|t| question_tokens.iter().any(|q| tokens_match(t, q)))
            .count();
        tag_hits as f64 + DESCRIPTION_WEIGHT * description_hits as f64
    }

    /// Resolve an ordered panel for `question`.
    ///
    /// Returns [`PanelError::Underfilled`] with the partial panel when fewer
    /// than `min_viable` experts match.
    pub fn resolve(
        &self,
        question: &str,
        domain_context: Option<&str>,
        panel_size: Option<usize>,
        pinned: Option<ProviderKind>,
    ) -> Result<Vec<ExpertProfile>, PanelError> {
        let size = panel_size.unwrap_or(self.settings.default_size);
        if size < self.settings.min_size || size > self.settings.max_size {
            return Err(PanelError::InvalidPanelSize {
                requested: size,
                min: self.settings.min_size,
                max: self.settings.max_size,
            });
        }
        if self.catalog.is_empty() {
            return Err(PanelError::EmptyCatalog);
        }

        let over_budget = self
            .cost_tracker
            .as_ref()
            .is_some_and(|tracker| tracker.is_over_budget());
        let chain = self.models.fallback_chain(pinned, over_budget);
        if chain.is_empty() {
            return Err(PanelError::NoModelsAvailable);
        }

        let mut text = question.to_string();
        if let Some(context) = domain_context {
            text.push(' ');
            text.push_str(context);
        }
        let question_tokens = keywords(&text);

        let mut scored: Vec<(f64, &ExpertTemplate)> = self
            .catalog
            .iter()
            .map(|t| (Self::relevance(t, &question_tokens), t))
            .collect();
        // Stable: equal scores keep catalog order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut selected: Vec<&ExpertTemplate> = Vec::new();
        for (_, template) in scored.iter().filter(|(score, _)| *score > 0.0) {
            if selected.len() == size {
                break;
            }
            if self.is_distinct(template, &selected) {
                selected.push(template);
            }
        }
        let matched = selected.len();

        if matched < self.settings.min_viable {
            tracing::warn!(
                matched = matched,
                minimum = self.settings.min_viable,
                "Expert panel underfilled"
            );
            return Err(PanelError::Underfilled {
                matched,
                minimum: self.settings.min_viable,
                partial: self.bind(&selected, &chain),
            });
        }

        // Top up with generalists in catalog order.
        for template in &self.catalog {
            if selected.len() == size {
                break;
            }
            if !selected.iter().any(|s| s.id == template.id) && self.is_distinct(template, &selected)
            {
                selected.push(template);
            }
        }

        tracing::debug!(
            matched = matched,
            panel = ?selected.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            "Resolved expert panel"
        );
        Ok(self.bind(&selected, &chain))
    }

    fn is_distinct(&self, candidate: &ExpertTemplate, selected: &[&ExpertTemplate]) -> bool {
        let tags = candidate.tag_set();
        selected
            .iter()
            .all(|s| jaccard(&tags, &s.tag_set()) <= self.settings.max_tag_overlap)
    }

    /// Bind templates to models.
    ///
    /// Primaries rotate through the cheapest tier present in the chain;
    /// every expert falls back through the rest of the chain in cost order.
    fn bind(&self, templates: &[&ExpertTemplate], chain: &[ModelOption]) -> Vec<ExpertProfile> {
        let cheapest_tier = chain[0].tier;
        let primaries: Vec<&ModelOption> =
            chain.iter().filter(|m| m.tier == cheapest_tier).collect();

        templates
            .iter()
            .enumerate()
            .map(|(i, template)| {
                let primary = primaries[i % primaries.len()];
                let fallbacks = chain
                    .iter()
                    .filter(|m| *m != primary)
                    .map(|m| m.to_config(EXPERT_TEMPERATURE))
                    .collect();
                ExpertProfile::new(
                    template.id.clone(),
                    template.name.clone(),
                    template.expertise.clone(),
                    template.description.clone(),
                    primary.to_config(EXPERT_TEMPERATURE),
                )
                .with_fallbacks(fallbacks)
            })
            .collect()
    }
}

/// Equal tokens, or a shared five-character stem ("finance" / "financial").
fn tokens_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let stem = |s: &str| s.chars().take(5).collect::<String>();
    a.chars().count() >= 5 && b.chars().count() >= 5 && stem(a) == stem(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelPricing, ModelTier, Usage};

    fn resolver() -> PanelResolver {
        PanelResolver::new(ModelCatalog::default(), PanelSettings::default())
    }

    #[test]
    fn test_tokens_match_stems() {
        assert!(tokens_match("finance", "financial"));
        assert!(tokens_match("migration", "migrate"));
        assert!(!tokens_match("data", "database"));
        assert!(tokens_match("data", "data"));
    }

    #[test]
    fn test_resolves_relevant_experts_first() {
        let panel = resolver()
            .resolve(
                "Should we migrate our billing database to Postgres to cut infrastructure cost?",
                None,
                Some(4),
                None,
            )
            .expect("panel should resolve");

        assert_eq!(panel.len(), 4);
        let ids: Vec<_> = panel.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids[0], "engineering");
        assert!(ids.contains(&"finance"));
        assert!(ids.contains(&"operations"));
    }

    #[test]
    fn test_binding_is_cost_ascending() {
        let panel = resolver()
            .resolve("Which security vendor should we pick for compliance?", None, Some(3), None)
            .expect("panel should resolve");

        for expert in &panel {
            assert!(expert.ai_config.pricing.is_free());
            let prices: Vec<_> = expert.fallbacks.iter().map(|f| f.pricing.blended()).collect();
            assert!(!expert.fallbacks.iter().any(|f| *f == expert.ai_config));
            assert!(prices.windows(2).all(|w| w[0] <= w[1]) || prices.len() < 2);
        }
        assert_ne!(panel[0].ai_config.model_id, panel[1].ai_config.model_id);
    }

    #[test]
    fn test_pinned_provider() {
        let panel = resolver()
            .resolve(
                "Should we rewrite the software architecture for scalability?",
                Some("The migration cost must stay under one quarter of budget"),
                Some(3),
                Some(ProviderKind::LiteLlm),
            )
            .expect("panel should resolve");
        assert!(panel
            .iter()
            .all(|e| e.ai_config.provider == ProviderKind::LiteLlm && e.fallbacks.is_empty()));
    }

    #[test]
    fn test_underfilled_panel_returns_partial() {
        let err = resolver()
            .resolve("What color should the office couch be?", None, None, None)
            .unwrap_err();
        match err {
            PanelError::Underfilled {
                matched, minimum, ..
            } => {
                assert!(matched < minimum);
                assert_eq!(minimum, 2);
            }
            other => panic!("expected underfilled panel, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_size_and_empty_catalog() {
        assert!(matches!(
            resolver().resolve("q", None, Some(9), None),
            Err(PanelError::InvalidPanelSize { requested: 9, .. })
        ));
        assert!(matches!(
            resolver().with_catalog(vec![]).resolve("q", None, None, None),
            Err(PanelError::EmptyCatalog)
        ));
    }

    #[test]
    fn test_overlapping_experts_are_skipped() {
        let catalog = vec![
            ExpertTemplate::new("a", "A", &["cloud", "cost"], ""),
            ExpertTemplate::new("b", "B", &["cloud", "cost"], ""),
            ExpertTemplate::new("c", "C", &["cloud", "security"], ""),
            ExpertTemplate::new("d", "D", &["team"], ""),
        ];
        let panel = resolver()
            .with_catalog(catalog)
            .resolve("cloud cost and security", None, Some(3), None)
            .expect("panel should resolve");
        let ids: Vec<_> = panel.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_over_budget_uses_free_models_only() {
        let tracker = Arc::new(CostTracker::new(0.0, 0.0));
        tracker.record("m", &Usage::new(1, 1), &ModelPricing::new(1.0, 1.0), None);
        let models = ModelCatalog::new(vec![
            ModelOption::new(
                ProviderKind::OpenRouter,
                "paid",
                ModelTier::Budget,
                ModelPricing::new(1.0, 1.0),
            ),
            ModelOption::new(
                ProviderKind::OpenRouter,
                "free",
                ModelTier::Free,
                ModelPricing::free(),
            ),
        ]);
        let panel = PanelResolver::new(models, PanelSettings::default())
            .with_cost_tracker(tracker)
            .resolve("security risk for the product roadmap", None, Some(3), None)
            .expect("panel should resolve");
        assert!(panel.iter().all(|e| e.ai_config.model_id == "free" && e.fallbacks.is_empty()));
    }
}
