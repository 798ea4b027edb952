//! Core data models for the retrieval engine.
//!
//! These types flow between the document source, the sync orchestrator,
//! the vector index, and the query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document as reported by a [`DocumentSource`](crate::source::DocumentSource).
///
/// Identity is the source `id`; `url` is the stable citation key used for
/// result deduplication. `content_hash` is a SHA-256 digest of the document
/// body, used to skip unchanged documents on sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub category: String,
    pub updated_at: DateTime<Utc>,
    pub content_hash: String,
}

/// A bounded, overlapping slice of a document's text.
///
/// `chunk_id` is deterministic (`"{document_id}_chunk_{sequence_index}"`),
/// so re-chunking an unchanged document reproduces identical ids.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: i64,
    pub text: String,
    pub token_count: usize,
    pub content_hash: String,
}

/// A committed chunk plus the document metadata and embedding it was
/// indexed with. The unit stored by the [`VectorIndex`](crate::index::VectorIndex)
/// and persisted to SQLite.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub url: String,
    pub title: String,
    pub category: String,
    pub sequence_index: i64,
    pub text: String,
    /// Empty when the embedding provider is disabled.
    pub embedding: Vec<f32>,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

/// A ranked search result. Transient, produced per query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub url: String,
    pub title: String,
    pub category: String,
    pub snippet: String,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub hybrid_score: f64,
}

/// Durable sync bookkeeping, updated atomically on successful commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub document_count: u64,
    pub chunk_count: u64,
    pub failed_document_ids: Vec<String>,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub documents_processed: u64,
    pub documents_skipped: u64,
    pub chunks_created: u64,
    pub chunks_deleted: u64,
    pub failed_document_ids: Vec<String>,
    pub duration: std::time::Duration,
}

/// Snapshot-level statistics for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub document_count: u64,
    pub chunk_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
}
