//! Lexical text helpers.
//!
//! Token-set similarity is the default notion of "same recommendation" and
//! also drives the relevance and diversity heuristics.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "being", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
    "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "may", "me", "might",
    "more", "most", "my", "no", "not", "of", "on", "or", "our", "over", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "to", "us", "very", "was", "we", "were", "what", "when", "which", "while", "who",
    "why", "will", "with", "would", "you", "your",
];

/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content words of `text`, in order, without stopwords or one-letter tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Distinct content words of `text`.
pub fn keywords(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// All normalized tokens of `text`, stopwords included.
pub fn token_set(text: &str) -> BTreeSet<String> {
    normalize(text).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect()
}

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "don", "dont", "avoid", "against", "reject", "without",
];

/// Whether `text` contains a negation word.
pub fn has_negation(text: &str) -> bool {
    normalize(text).split(' ').any(|w| NEGATIONS.contains(&w))
}

/// Jaccard similarity of two sets; two empty sets are identical.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity of the keyword sets of two texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&keywords(a), &keywords(b))
}
