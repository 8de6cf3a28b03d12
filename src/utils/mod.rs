//! Shared utility functions.
//!
//! JSON extraction from LLM responses and the lexical text-similarity
//! helpers used by clustering, quality heuristics and panel matching.

pub mod json_extraction;
pub mod text;

pub use json_extraction::{extract_json_object, find_matching_brace};
pub use text::{has_negation, jaccard, keywords, normalize, text_similarity, token_set, tokenize};
