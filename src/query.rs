//! Query pipeline.
//!
//! Turns a natural-language question into a ranked, deduplicated result
//! list: embed the query under a time budget, gather semantic candidates
//! from the snapshot and keyword candidates over all indexed chunks, then
//! fuse both channels in the ranker. The semantic channel is best-effort:
//! an embedding failure or timeout degrades the query to keyword-only
//! scoring instead of failing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::embedding::Provider;
use crate::index::VectorIndex;
use crate::keyword;
use crate::models::SearchResult;
use crate::ranker::{self, Candidate, Weights};

/// Per-query options from the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Override the configured `max_results`.
    pub limit: Option<usize>,
    /// Restrict results to one category (case-insensitive).
    pub category: Option<String>,
}

/// A ranked result list plus how it was produced.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub results: Vec<SearchResult>,
    /// True when an embedding provider is configured but the semantic
    /// channel could not be used for this query.
    pub degraded: bool,
}

pub struct QueryPipeline {
    index: Arc<VectorIndex>,
    provider: Option<Arc<Provider>>,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        provider: Option<Arc<Provider>>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            provider,
            retrieval,
        }
    }

    /// Run one query against the current snapshot.
    ///
    /// Never fails: a blank query returns no results, and semantic-channel
    /// trouble falls back to keyword-only scoring.
    pub async fn hybrid_search(&self, query: &str, opts: &QueryOptions) -> QueryOutcome {
        let query = query.trim();
        if query.is_empty() {
            return QueryOutcome::default();
        }

        let snapshot = self.index.snapshot();
        let terms = keyword::extract_terms(query);
        let k = opts.limit.unwrap_or(self.retrieval.max_results);
        let candidate_k = self.retrieval.candidate_k.max(k);
        let category = opts.category.as_deref();
        let in_category = |record: &crate::models::ChunkRecord| {
            category.map_or(true, |c| record.category.eq_ignore_ascii_case(c))
        };

        // Semantic channel, bounded by the query time budget.
        let mut semantic: HashMap<&str, f64> = HashMap::new();
        let mut degraded = false;
        if let Some(provider) = &self.provider {
            let budget = Duration::from_millis(self.retrieval.query_timeout_ms);
            match tokio::time::timeout(budget, provider.embed_query(query)).await {
                Ok(Ok(vector)) => {
                    for (record, similarity) in snapshot.query(&vector, candidate_k) {
                        if in_category(record) {
                            semantic.insert(record.chunk_id.as_str(), similarity);
                        }
                    }
                }
                Ok(Err(_)) | Err(_) => degraded = true,
            }
        }

        // Keyword channel over every indexed chunk; candidates are chunks
        // either channel found.
        let mut candidates = Vec::new();
        for record in snapshot.records() {
            if !in_category(record) {
                continue;
            }
            let kw = keyword::score_terms(&terms, record);
            let sem = semantic.get(record.chunk_id.as_str()).copied();
            if kw <= 0.0 && sem.is_none() {
                continue;
            }
            candidates.push(Candidate {
                chunk_id: record.chunk_id.clone(),
                url: record.url.clone(),
                title: record.title.clone(),
                category: record.category.clone(),
                text: record.text.clone(),
                updated_at: record.updated_at,
                semantic: sem,
                keyword: kw,
            });
        }

        // Without semantic candidates the hybrid weighting would cap every
        // score below the threshold, so score on the keyword channel alone.
        let weights = if semantic.is_empty() {
            Weights::keyword_only()
        } else {
            Weights {
                semantic: self.retrieval.weight_semantic,
                keyword: self.retrieval.weight_keyword,
            }
        };

        let results = ranker::rank(candidates, weights, self.retrieval.similarity_threshold, k);
        QueryOutcome { results, degraded }
    }
}
