//! Lexical relevance scoring.
//!
//! Scores a chunk against a query by normalized term overlap across the
//! chunk body, its document title, and its category. Title and category
//! hits are worth more than body hits: titles are precise signals.

use std::collections::HashSet;

use crate::models::ChunkRecord;

/// Words stripped from queries before scoring.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "how", "do", "i",
    "what", "where", "when", "why", "can", "you", "me", "my", "your", "we", "our", "us", "please",
    "tell", "about",
];

/// Per-term credit when the term appears in the given field. A term takes
/// the best credit across fields, so the score stays in [0, 1].
const TITLE_CREDIT: f64 = 1.0;
const CATEGORY_CREDIT: f64 = 0.8;
const BODY_CREDIT: f64 = 0.5;

/// Lowercase, strip punctuation, drop stop words.
///
/// Falls back to the unfiltered terms when every word is a stop word, so a
/// query like "what is it" still has something to match on.
pub fn extract_terms(query: &str) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if "?.,!;:\"'()".contains(c) { ' ' } else { c })
        .collect();

    let all: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
    let filtered: Vec<String> = all
        .iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .cloned()
        .collect();

    if filtered.is_empty() {
        all
    } else {
        filtered
    }
}

/// Score a chunk against pre-extracted query terms. Returns a value in
/// [0, 1]; 0 when there is no overlap at all.
pub fn score_terms(terms: &[String], record: &ChunkRecord) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let title_words: HashSet<String> = word_set(&record.title);
    let category_words: HashSet<String> = word_set(&record.category);
    let body_lower = record.text.to_lowercase();

    let mut total = 0.0;
    for term in terms {
        let mut credit: f64 = 0.0;
        if title_words.contains(term) {
            credit = TITLE_CREDIT;
        } else if category_words.contains(term) {
            credit = CATEGORY_CREDIT;
        }
        if credit < BODY_CREDIT && body_lower.contains(term.as_str()) {
            credit = BODY_CREDIT;
        }
        total += credit;
    }

    total / (terms.len() as f64 * TITLE_CREDIT)
}

/// Convenience wrapper: extract terms and score in one call.
pub fn score(query: &str, record: &ChunkRecord) -> f64 {
    score_terms(&extract_terms(query), record)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}
