use std::collections::HashSet;

/// Containment only counts when the shorter summary has at least this many words
const MIN_CONTAINED_TOKENS: usize = 3;
/// Minimum share of the longer summary's words the shorter one must cover
const MIN_CONTAINED_COVERAGE: f64 = 0.6;

/// Lower-cased, whitespace-split word set
pub fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of two word sets, in `[0, 1]`
///
/// Two empty sets are identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&token_set(a), &token_set(b))
}

/// Whether two summaries describe the same incident
///
/// True when their Jaccard similarity exceeds `threshold`, or when every word
/// of the shorter summary appears in the longer one and the shorter one is
/// substantial (at least three words, at least 60% of the longer one's words).
pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    let (a, b) = (token_set(a), token_set(b));
    if jaccard(&a, &b) > threshold {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= MIN_CONTAINED_TOKENS
        && short.len() as f64 >= MIN_CONTAINED_COVERAGE * long.len() as f64
        && short.is_subset(long)
}
