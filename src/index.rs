//! Snapshot-isolated vector index.
//!
//! The index is the one resource shared between the sync path (writer)
//! and the query path (readers). Readers clone an `Arc` to the current
//! [`IndexSnapshot`] and keep reading it for the whole query; writers
//! build a new snapshot off to the side and publish it with a single
//! pointer swap. A query never observes a document with old chunks
//! alongside part of its new chunks, and no lock is held across a
//! resync, so query latency is independent of sync duration.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::embedding::cosine_similarity;
use crate::error::{Result, RetrievalError};
use crate::models::{ChunkRecord, Document, IndexStats};

/// An immutable, point-in-time view of all committed chunks.
#[derive(Debug, Default, Clone)]
pub struct IndexSnapshot {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, ChunkRecord>,
    by_document: HashMap<String, Vec<String>>,
    version: u64,
}

impl IndexSnapshot {
    /// Nearest neighbors by cosine similarity, highest first. Ties break
    /// by most recent `indexed_at`, then chunk id for determinism.
    /// Chunks without embeddings (disabled provider) are not candidates.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<(&ChunkRecord, f64)> {
        let mut hits: Vec<(&ChunkRecord, f64)> = self
            .chunks
            .values()
            .filter(|r| !r.embedding.is_empty())
            .map(|r| (r, cosine_similarity(vector, &r.embedding) as f64))
            .collect();

        hits.sort_by(|(ra, sa), (rb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(rb.indexed_at.cmp(&ra.indexed_at))
                .then(ra.chunk_id.cmp(&rb.chunk_id))
        });
        hits.truncate(k);
        hits
    }

    /// All committed chunk records, for keyword scoring.
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }

    /// Document metadata as of this snapshot, keyed by source id.
    pub fn documents(&self) -> &HashMap<String, Document> {
        &self.documents
    }

    pub fn document_count(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consistency check over the committed state.
    ///
    /// Verifies that every chunk belongs to a known document, that each
    /// document's chunks are numbered `0..N-1` contiguously, and that all
    /// embeddings share one dimensionality. Inconsistency is reported,
    /// never silently repaired.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |msg: String| Err(RetrievalError::IndexCorruption(msg));

        if self.chunks.len() != self.by_document.values().map(Vec::len).sum::<usize>() {
            return corrupt("chunk count does not match per-document totals".into());
        }

        let mut dims: Option<usize> = None;
        for record in self.chunks.values() {
            if !self.documents.contains_key(&record.document_id) {
                return corrupt(format!(
                    "chunk '{}' references unknown document '{}'",
                    record.chunk_id, record.document_id
                ));
            }
            if !record.embedding.is_empty() {
                match dims {
                    None => dims = Some(record.embedding.len()),
                    Some(d) if d != record.embedding.len() => {
                        return corrupt(format!(
                            "chunk '{}' has {} dims, index has {}",
                            record.chunk_id,
                            record.embedding.len(),
                            d
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        for (doc_id, chunk_ids) in &self.by_document {
            let mut indices: Vec<i64> = chunk_ids
                .iter()
                .filter_map(|id| self.chunks.get(id))
                .map(|r| r.sequence_index)
                .collect();
            indices.sort_unstable();
            for (expected, actual) in indices.iter().enumerate() {
                if *actual != expected as i64 {
                    return corrupt(format!(
                        "document '{doc_id}' has non-contiguous chunk indices"
                    ));
                }
            }
            if indices.len() != chunk_ids.len() {
                return corrupt(format!("document '{doc_id}' lists missing chunks"));
            }
        }

        Ok(())
    }
}

/// The queryable index with an explicit lifecycle: created empty, loaded
/// from persisted records, updated by the sync orchestrator, read by the
/// query pipeline.
pub struct VectorIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    /// Build the initial snapshot from persisted records.
    pub fn load(documents: Vec<Document>, records: Vec<ChunkRecord>) -> Self {
        let mut snapshot = IndexSnapshot::default();
        for doc in documents {
            snapshot.documents.insert(doc.id.clone(), doc);
        }
        for record in records {
            snapshot
                .by_document
                .entry(record.document_id.clone())
                .or_default()
                .push(record.chunk_id.clone());
            snapshot.chunks.insert(record.chunk_id.clone(), record);
        }
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The currently published snapshot. Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Atomically replace one document's chunk set.
    ///
    /// The new snapshot is built entirely before the pointer advances, so
    /// readers see either the old chunk set or the complete new one.
    /// Returns `(chunks_created, chunks_deleted)`.
    pub fn replace_document(&self, document: Document, records: Vec<ChunkRecord>) -> (u64, u64) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (**guard).clone();

        let deleted = retire_document(&mut next, &document.id);
        let created = records.len() as u64;

        let mut chunk_ids = Vec::with_capacity(records.len());
        for record in records {
            chunk_ids.push(record.chunk_id.clone());
            next.chunks.insert(record.chunk_id.clone(), record);
        }
        next.by_document.insert(document.id.clone(), chunk_ids);
        next.documents.insert(document.id.clone(), document);
        next.version += 1;

        *guard = Arc::new(next);
        (created, deleted)
    }

    /// Purge a document and all its chunks. Returns the number of chunks
    /// deleted.
    pub fn remove_document(&self, document_id: &str) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (**guard).clone();
        let deleted = retire_document(&mut next, document_id);
        next.documents.remove(document_id);
        next.version += 1;
        *guard = Arc::new(next);
        deleted
    }

    pub fn stats(&self, last_sync: Option<DateTime<Utc>>) -> IndexStats {
        let snapshot = self.snapshot();
        IndexStats {
            document_count: snapshot.document_count(),
            chunk_count: snapshot.chunk_count(),
            last_sync,
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn retire_document(snapshot: &mut IndexSnapshot, document_id: &str) -> u64 {
    let old_ids = snapshot.by_document.remove(document_id).unwrap_or_default();
    let mut deleted = 0u64;
    for id in old_ids {
        if snapshot.chunks.remove(&id).is_some() {
            deleted += 1;
        }
    }
    deleted
}
