//! Score fusion, thresholding, and per-URL deduplication.
//!
//! Raw cosine similarity and raw keyword scores are not on comparable
//! scales, so each distribution is min-max normalized across the current
//! candidate set before fusing. Per-URL dedup keeps the single best chunk
//! per source document so one document cannot flood the result list.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::SearchResult;

/// Display excerpt length, in characters.
const SNIPPET_CHARS: usize = 240;

/// A candidate chunk entering the ranker, with raw channel scores.
///
/// `semantic` is `None` when the candidate was found only by the keyword
/// channel (or the query ran in degraded keyword-only mode).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub url: String,
    pub title: String,
    pub category: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
    pub semantic: Option<f64>,
    pub keyword: f64,
}

/// Fusion weights. [`crate::config::validate`] guarantees they sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub semantic: f64,
    pub keyword: f64,
}

impl Weights {
    /// Keyword-only weights for the degraded path.
    pub fn keyword_only() -> Self {
        Self {
            semantic: 0.0,
            keyword: 1.0,
        }
    }
}

#[derive(Debug)]
struct Scored {
    candidate: Candidate,
    semantic_score: f64,
    keyword_score: f64,
    hybrid_score: f64,
}

/// Fuse, threshold, deduplicate, and cut to the top `k`.
///
/// Ties on hybrid score break by keyword score, then by document recency,
/// then by URL for determinism.
pub fn rank(
    candidates: Vec<Candidate>,
    weights: Weights,
    similarity_threshold: f64,
    k: usize,
) -> Vec<SearchResult> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let semantic_norm = normalize(candidates.iter().filter_map(|c| c.semantic));
    let keyword_norm = normalize(candidates.iter().map(|c| c.keyword).filter(|&s| s > 0.0));

    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| {
            let semantic_score = c.semantic.map(&semantic_norm).unwrap_or(0.0);
            let keyword_score = if c.keyword > 0.0 {
                keyword_norm(c.keyword)
            } else {
                0.0
            };
            let hybrid_score =
                weights.semantic * semantic_score + weights.keyword * keyword_score;
            Scored {
                candidate: c,
                semantic_score,
                keyword_score,
                hybrid_score,
            }
        })
        .filter(|s| s.hybrid_score >= similarity_threshold)
        .collect();

    scored.sort_by(|a, b| compare(b, a));

    // One result per URL: the list is already best-first, so the first
    // chunk seen for a URL is the document's best.
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut kept: Vec<Scored> = Vec::new();
    for s in scored {
        if seen_urls.insert(s.candidate.url.clone()) {
            kept.push(s);
        }
        if kept.len() == k {
            break;
        }
    }

    kept.into_iter()
        .map(|s| SearchResult {
            chunk_id: s.candidate.chunk_id,
            url: s.candidate.url,
            title: s.candidate.title,
            category: s.candidate.category,
            snippet: snippet(&s.candidate.text),
            semantic_score: s.semantic_score,
            keyword_score: s.keyword_score,
            hybrid_score: s.hybrid_score,
        })
        .collect()
}

fn compare(a: &Scored, b: &Scored) -> Ordering {
    a.hybrid_score
        .partial_cmp(&b.hybrid_score)
        .unwrap_or(Ordering::Equal)
        .then(
            a.keyword_score
                .partial_cmp(&b.keyword_score)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.candidate.updated_at.cmp(&b.candidate.updated_at))
        .then(b.candidate.url.cmp(&a.candidate.url))
}

/// Min-max normalization over one score distribution.
///
/// Returns a closure mapping raw scores into [0, 1]. An all-equal or
/// single-value distribution maps to 1.0: the only candidate is the best
/// candidate.
fn normalize(values: impl Iterator<Item = f64>) -> Box<dyn Fn(f64) -> f64> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    Box::new(move |v: f64| {
        if !min.is_finite() || !max.is_finite() {
            0.0
        } else if (max - min).abs() < f64::EPSILON {
            1.0
        } else {
            (v - min) / (max - min)
        }
    })
}

fn snippet(text: &str) -> String {
    let s: String = text.chars().take(SNIPPET_CHARS).collect();
    s.replace('\n', " ").trim().to_string()
}
