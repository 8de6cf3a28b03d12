//! JSON extraction from LLM responses.
//!
//! Expert replies are requested as a single JSON object but frequently arrive
//! wrapped in markdown fences or surrounded by prose. Strategies, in order:
//! 1. Direct JSON (content starts with '{')
//! 2. JSON in a ```json code block
//! 3. JSON in a generic code block
//! 4. First balanced object anywhere in the content
//!
//! # Example
//!
//! ```
//! use consensus_forge::utils::json_extraction::extract_json_object;
//!
//! let response = "Sure! {\"recommendation\": \"Option B\", \"confidence\": 0.8} Hope that helps.";
//! let json = extract_json_object(response).unwrap();
//! assert!(json.starts_with('{') && json.ends_with('}'));
//! ```

use regex::Regex;
use std::sync::OnceLock;

fn json_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").expect("Invalid regex for json fence")
    })
}

fn generic_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").expect("Invalid regex for code fence")
    })
}

/// Find the index of the brace closing the object that starts at `s[0]`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn balanced_object(s: &str) -> Option<String> {
    let start = s.find('{')?;
    let end = find_matching_brace(&s[start..])?;
    Some(s[start..=start + end].to_string())
}

/// Extract the first complete JSON object from an LLM response.
///
/// Returns `None` when no balanced object exists (including truncated
/// output). The result is not validated as JSON; callers deserialize it.
pub fn extract_json_object(content: &str) -> Option<String> {
    let trimmed = content.trim();

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            return Some(trimmed[..=end].to_string());
        }
    }

    for re in [json_fence(), generic_fence()] {
        if let Some(block) = re.captures(trimmed).and_then(|c| c.get(1)) {
            if let Some(json) = balanced_object(block.as_str()) {
                return Some(json);
            }
        }
    }

    balanced_object(trimmed)
}
