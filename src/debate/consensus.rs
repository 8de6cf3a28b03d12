//! Consensus scoring.
//!
//! Scoring is cumulative: every opinion from every completed round is
//! clustered into options, so a position that only wins the latest round
//! must still outweigh earlier disagreement. An optional per-round decay
//! lets later rounds count more.

use std::sync::Arc;

use super::types::{ConsensusCheck, Opinion, RankedOption};
use crate::config::ScoringSettings;
use crate::utils::text::{has_negation, jaccard, token_set};

/// Similarity between two recommendation texts, in [0, 1].
pub trait OptionClusterer: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Token-set Jaccard similarity that never merges a statement with its
/// negation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalClusterer;

impl OptionClusterer for LexicalClusterer {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if has_negation(a) != has_negation(b) {
            return 0.0;
        }
        jaccard(&token_set(a), &token_set(b))
    }
}

/// Optional per-option quality signal in [0, 1].
pub trait OptionQuality: Send + Sync {
    fn quality(&self, option: &str, backing: &[&Opinion]) -> f64;
}

/// Accumulates one cluster while scanning opinions.
struct Cluster<'a> {
    representative: String,
    weight: f64,
    decayed_votes: f64,
    opinions: Vec<&'a Opinion>,
    supporters: Vec<String>,
}

/// Clusters opinions into ranked options and decides consensus.
#[derive(Clone)]
pub struct ConsensusScorer {
    settings: ScoringSettings,
    threshold: f64,
    clusterer: Arc<dyn OptionClusterer>,
    quality: Option<Arc<dyn OptionQuality>>,
}

impl ConsensusScorer {
    pub fn new(settings: ScoringSettings, threshold: f64) -> Self {
        Self {
            settings,
            threshold: threshold.clamp(0.0, 1.0),
            clusterer: Arc::new(LexicalClusterer),
            quality: None,
        }
    }

    pub fn with_clusterer(mut self, clusterer: Arc<dyn OptionClusterer>) -> Self {
        self.clusterer = clusterer;
        self
    }

    pub fn with_quality(mut self, quality: Arc<dyn OptionQuality>) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate all opinions so far.
    ///
    /// `rounds` holds the opinions of each completed round, oldest first.
    pub fn evaluate(&self, rounds: &[&[Opinion]], rounds_remaining: u32) -> ConsensusCheck {
        let latest = rounds.len().saturating_sub(1);
        let mut clusters: Vec<Cluster<'_>> = Vec::new();

        for (idx, opinions) in rounds.iter().enumerate() {
            let decay = self.settings.recency_decay.powi((latest - idx) as i32);
            for opinion in opinions.iter() {
                let confidence = opinion.confidence.clamp(0.0, 1.0);
                let weight = decay
                    * (self.settings.support_weight + self.settings.confidence_weight * confidence);

                let slot = self.find_cluster(&clusters, &opinion.recommendation);
                let cluster = match slot {
                    Some(i) => &mut clusters[i],
                    None => {
                        clusters.push(Cluster {
                            representative: opinion.recommendation.trim().to_string(),
                            weight: 0.0,
                            decayed_votes: 0.0,
                            opinions: Vec::new(),
                            supporters: Vec::new(),
                        });
                        let last = clusters.len() - 1;
                        &mut clusters[last]
                    }
                };
                cluster.weight += weight;
                cluster.decayed_votes += decay;
                cluster.opinions.push(opinion);
                if !cluster.supporters.contains(&opinion.expert_id) {
                    cluster.supporters.push(opinion.expert_id.clone());
                }
            }
        }

        if clusters.is_empty() {
            return ConsensusCheck::empty(rounds_remaining);
        }

        if let (Some(quality), true) = (&self.quality, self.settings.quality_weight > 0.0) {
            for cluster in &mut clusters {
                let q = quality
                    .quality(&cluster.representative, &cluster.opinions)
                    .clamp(0.0, 1.0);
                cluster.weight += self.settings.quality_weight * q * cluster.decayed_votes;
            }
        }

        let total: f64 = clusters.iter().map(|c| c.weight).sum();
        let mut options: Vec<RankedOption> = clusters
            .iter()
            .map(|cluster| to_ranked_option(cluster, total))
            .collect();

        options.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| b.supporters.len().cmp(&a.supporters.len()))
                .then_with(|| a.text.cmp(&b.text))
        });

        let distinct = options.len();
        options.truncate(self.settings.top_n.max(1));

        let consensus_score = options[0].score;
        let has_consensus = consensus_score >= self.threshold;
        let opinion_count: usize = rounds.iter().map(|r| r.len()).sum();
        let reasoning = format!(
            "\"{}\" holds {:.0}% of weighted support across {} opinions in {} rounds ({} distinct options); threshold {:.0}%",
            options[0].text,
            consensus_score * 100.0,
            opinion_count,
            rounds.len(),
            distinct,
            self.threshold * 100.0
        );

        ConsensusCheck {
            has_consensus,
            consensus_score,
            top_options: options,
            should_continue: !has_consensus && rounds_remaining > 0,
            reasoning,
        }
    }

    /// Best matching cluster at or above the similarity threshold; ties go
    /// to the earlier cluster.
    fn find_cluster(&self, clusters: &[Cluster<'_>], text: &str) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, cluster) in clusters.iter().enumerate() {
            let similarity = self.clusterer.similarity(&cluster.representative, text);
            if similarity >= self.settings.similarity_threshold
                && best.is_none_or(|(_, s)| similarity > s)
            {
                best = Some((i, similarity));
            }
        }
        best.map(|(i, _)| i)
    }
}

fn to_ranked_option(cluster: &Cluster<'_>, total: f64) -> RankedOption {
    let score = if total > 0.0 {
        (cluster.weight / total).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let confidence = cluster
        .opinions
        .iter()
        .map(|o| o.confidence.clamp(0.0, 1.0))
        .sum::<f64>()
        / cluster.opinions.len() as f64;

    let mut pros: Vec<String> = Vec::new();
    let mut cons: Vec<String> = Vec::new();
    for opinion in &cluster.opinions {
        for pro in &opinion.pros {
            if !pros.contains(pro) {
                pros.push(pro.clone());
            }
        }
        for con in &opinion.cons {
            if !cons.contains(con) {
                cons.push(con.clone());
            }
        }
    }

    // Latest opinion wins confidence ties.
    let reasoning = cluster
        .opinions
        .iter()
        .rev()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|o| o.reasoning.clone())
        .unwrap_or_default();

    RankedOption {
        text: cluster.representative.clone(),
        score,
        confidence,
        supporters: cluster.supporters.clone(),
        pros,
        cons,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderKind, Usage};
    use chrono::Utc;

    fn opinion(expert: &str, recommendation: &str, confidence: f64) -> Opinion {
        Opinion {
            expert_id: expert.to_string(),
            recommendation: recommendation.to_string(),
            reasoning: format!("{} because of evidence", recommendation),
            confidence,
            pros: vec![format!("pro of {}", recommendation)],
            cons: vec![],
            provider: ProviderKind::OpenRouter,
            model: "m".to_string(),
            usage: Usage::default(),
            cost_usd: 0.0,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    fn scorer() -> ConsensusScorer {
        ConsensusScorer::new(ScoringSettings::default(), 0.7)
    }

    #[test]
    fn test_split_then_agreement() {
        let round1 = vec![
            opinion("e1", "Option A", 0.9),
            opinion("e2", "Option B", 0.5),
            opinion("e3", "Option B", 0.5),
        ];
        let check = scorer().evaluate(&[&round1], 2);
        assert!(!check.has_consensus);
        assert!(check.should_continue);
        assert_eq!(check.top_options[0].text, "Option B");
        assert!((check.consensus_score - 0.625).abs() < 1e-9);

        let round2 = vec![
            opinion("e1", "Option B", 0.8),
            opinion("e2", "Option B", 0.8),
            opinion("e3", "Option B", 0.8),
        ];
        let check = scorer().evaluate(&[&round1, &round2], 1);
        assert!(check.has_consensus);
        assert!(!check.should_continue);
        assert!((check.consensus_score - 4.36 / 5.32).abs() < 1e-9);

        let texts: Vec<_> = check.top_options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["Option B", "Option A"]);
        assert_eq!(check.top_options[0].supporters, vec!["e2", "e3", "e1"]);
    }

    #[test]
    fn test_similar_wording_clusters_together() {
        let round = vec![
            opinion("e1", "Migrate to Postgres", 0.7),
            opinion("e2", "We should migrate to Postgres", 0.7),
            opinion("e3", "Do not migrate to Postgres", 0.7),
        ];
        let check = scorer().evaluate(&[&round], 0);
        assert_eq!(check.top_options.len(), 2);
        assert_eq!(check.top_options[0].supporters.len(), 2);
        assert!(!check.should_continue);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let round = vec![opinion("e1", "Option A", 7.5), opinion("e2", "Option B", -1.0)];
        let check = scorer().evaluate(&[&round], 1);
        assert_eq!(check.top_options[0].text, "Option A");
        assert_eq!(check.top_options[0].confidence, 1.0);
        assert_eq!(check.top_options[1].confidence, 0.0);
        assert!(check.top_options.iter().all(|o| (0.0..=1.0).contains(&o.score)));
    }

    #[test]
    fn test_ties_break_on_confidence_then_supporters_then_text() {
        let settings = ScoringSettings {
            confidence_weight: 0.0,
            ..ScoringSettings::default()
        };
        let round = vec![opinion("e1", "Option A", 0.4), opinion("e2", "Option B", 0.9)];
        let check = ConsensusScorer::new(settings.clone(), 0.7).evaluate(&[&round], 1);
        assert_eq!(check.top_options[0].text, "Option B");

        let round = vec![opinion("e1", "Zeta", 0.5), opinion("e2", "Alpha", 0.5)];
        let check = ConsensusScorer::new(settings, 0.7).evaluate(&[&round], 1);
        assert_eq!(check.top_options[0].text, "Alpha");
    }

    #[test]
    fn test_recency_decay_favours_latest_round() {
        let settings = ScoringSettings {
            recency_decay: 0.5,
            ..ScoringSettings::default()
        };
        let round1 = vec![opinion("e1", "Option A", 0.5), opinion("e2", "Option A", 0.5)];
        let round2 = vec![opinion("e1", "Option B", 0.5), opinion("e2", "Option B", 0.5)];
        let check = ConsensusScorer::new(settings, 0.7).evaluate(&[&round1, &round2], 1);
        assert_eq!(check.top_options[0].text, "Option B");
        assert!((check.consensus_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_decay_scores_latest_round_only() {
        let settings = ScoringSettings {
            recency_decay: 0.0,
            ..ScoringSettings::default()
        };
        let round1 = vec![opinion("e1", "Option A", 0.9), opinion("e2", "Option A", 0.9)];
        let round2 = vec![opinion("e1", "Option B", 0.5), opinion("e2", "Option B", 0.5)];
        let check = ConsensusScorer::new(settings, 0.7).evaluate(&[&round1, &round2], 1);
        assert_eq!(check.top_options[0].text, "Option B");
        assert!((check.consensus_score - 1.0).abs() < 1e-9);
        assert!(check.has_consensus);
    }

    #[test]
    fn test_quality_signal_shifts_weight() {
        struct PreferA;
        impl OptionQuality for PreferA {
            fn quality(&self, option: &str, _backing: &[&Opinion]) -> f64 {
                if option == "Option A" {
                    1.0
                } else {
                    0.0
                }
            }
        }

        let settings = ScoringSettings {
            quality_weight: 1.0,
            ..ScoringSettings::default()
        };
        let round = vec![opinion("e1", "Option A", 0.5), opinion("e2", "Option B", 0.5)];
        let check = ConsensusScorer::new(settings, 0.7)
            .with_quality(Arc::new(PreferA))
            .evaluate(&[&round], 1);
        assert_eq!(check.top_options[0].text, "Option A");
    }

    #[test]
    fn test_empty_rounds() {
        let check = scorer().evaluate(&[], 3);
        assert!(!check.has_consensus);
        assert_eq!(check.consensus_score, 0.0);
        assert!(check.should_continue);
    }
}
