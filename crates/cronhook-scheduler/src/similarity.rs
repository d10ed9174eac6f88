//! Edit-distance matching for fuzzy job search.

pub use levenshtein::levenshtein;

/// Similarity threshold used when none is configured.
pub const DEFAULT_THRESHOLD: usize = 6;

/// Whether `candidate` is within `threshold` edits of `query`.
#[must_use]
pub fn is_similar(query: &str, candidate: &str, threshold: usize) -> bool {
    levenshtein(query, candidate) <= threshold
}
