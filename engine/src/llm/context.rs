//! Context compaction
//!
//! Reduces a free-form context object to the fields that matter for a task
//! category, renders them as labeled sections and truncates the result to the
//! configured token budget (4 characters per token). Results are cached for the
//! life of the process keyed by category and a hash of the canonical context.

use super::TaskCategory;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

const CHARS_PER_TOKEN: usize = 4;
const TRUNCATION_MARKER: &str = "...";

/// Context keys consulted per category, with their section labels
pub fn context_fields(category: TaskCategory) -> &'static [(&'static str, &'static str)] {
    match category {
        TaskCategory::Orchestration => &[
            ("architecture", "Architecture"),
            ("dependencies", "Dependencies"),
            ("project_state", "Project State"),
        ],
        TaskCategory::Code => &[
            ("code_snippets", "Code Examples"),
            ("api_specs", "API Specs"),
            ("database_schema", "Database"),
        ],
        TaskCategory::Critique => &[
            ("requirements", "Requirements"),
            ("security_rules", "Security Rules"),
            ("performance_constraints", "Performance"),
        ],
        TaskCategory::Memory => &[
            ("past_experiences", "Past Experiences"),
            ("lessons_learned", "Lessons"),
            ("error_patterns", "Error Patterns"),
        ],
    }
}

/// Category-aware context compactor with a process-lifetime cache
pub struct ContextCompactor {
    max_tokens: usize,
    cache: RwLock<HashMap<String, String>>,
}

impl ContextCompactor {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_tokens.saturating_mul(CHARS_PER_TOKEN)
    }

    /// Compact `context` for `category`, reusing a cached result when the same
    /// pair was seen before.
    pub fn compact(&self, category: TaskCategory, context: &Map<String, Value>) -> String {
        let key = cache_key(category, context);

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&key) {
                tracing::debug!("Context cache hit for {}", category);
                return hit.clone();
            }
        }

        let rendered = truncate_chars(&render_sections(category, context), self.max_chars());

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key).or_insert(rendered).clone()
    }

    pub fn cache_size(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn cache_key(category: TaskCategory, context: &Map<String, Value>) -> String {
    // serde_json maps are key-ordered, so serialization is canonical
    let canonical = serde_json::to_string(context).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    format!("{}_{}", category, hex::encode(hasher.finalize()))
}

fn render_sections(category: TaskCategory, context: &Map<String, Value>) -> String {
    context_fields(category)
        .iter()
        .filter_map(|(key, label)| {
            context
                .get(*key)
                .map(|value| format!("{}: {}", label, render_value(value)))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_selects_category_fields_only() {
        let compactor = ContextCompactor::new(8000);
        let context = ctx(json!({
            "architecture": "hexagonal",
            "code_snippets": "fn main() {}",
            "project_state": {"phase": "beta"}
        }));

        let text = compactor.compact(TaskCategory::Orchestration, &context);
        assert_eq!(
            text,
            "Architecture: hexagonal\nProject State: {\"phase\":\"beta\"}"
        );
    }

    #[test]
    fn test_no_matching_fields_yields_empty() {
        let compactor = ContextCompactor::new(8000);
        let context = ctx(json!({"unrelated": 1}));
        assert_eq!(compactor.compact(TaskCategory::Critique, &context), "");
    }

    #[test]
    fn test_truncation_marker() {
        let compactor = ContextCompactor::new(2);
        let context = ctx(json!({"requirements": "abcdefghijklmnop"}));
        let text = compactor.compact(TaskCategory::Critique, &context);
        assert_eq!(text, "Requirem...");
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("ééééé", 3), "ééé...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn test_cache_is_deterministic_and_key_order_independent() {
        let compactor = ContextCompactor::new(8000);
        let a = ctx(json!({"past_experiences": "x", "error_patterns": ["y"]}));
        let b = ctx(json!({"error_patterns": ["y"], "past_experiences": "x"}));

        let first = compactor.compact(TaskCategory::Memory, &a);
        let second = compactor.compact(TaskCategory::Memory, &b);
        assert_eq!(first, second);
        assert_eq!(compactor.cache_size(), 1);

        compactor.compact(TaskCategory::Code, &a);
        assert_eq!(compactor.cache_size(), 2);
    }
}
