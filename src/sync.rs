//! Sync orchestration.
//!
//! Reconciles the vector index against the current state of the document
//! source: `Fetching → Diffing → Embedding → Committing`, with any phase
//! moving to `Error` on unrecoverable failure. Content hashes from the
//! source listing are compared against the committed snapshot so unchanged
//! documents cost nothing. Changed documents are fetched, chunked, and
//! embedded under bounded concurrency, then committed one document at a
//! time: the SQLite transaction first, the snapshot pointer after. A
//! document-level failure is recorded and the pass continues; cancellation
//! stops between documents and leaves every committed document fully
//! consistent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::Provider;
use crate::error::{Result, RetrievalError};
use crate::index::VectorIndex;
use crate::models::{ChunkRecord, Document, SyncReport, SyncState};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::source::DocumentSource;
use crate::store::{build_records, IndexStore};

/// Phase of the sync state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Diffing,
    Embedding,
    Committing,
    Error,
}

/// Cooperative cancellation handle. Cloneable; `cancel()` from any thread
/// stops the pass at the next document boundary.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Classification of one listed document against the committed state.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub changed: Vec<Document>,
    pub unchanged: u64,
    pub removed: Vec<String>,
}

pub struct SyncOrchestrator {
    config: Arc<Config>,
    source: Arc<dyn DocumentSource>,
    provider: Option<Arc<Provider>>,
    index: Arc<VectorIndex>,
    store: Arc<IndexStore>,
    phase: std::sync::Mutex<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn DocumentSource>,
        provider: Option<Arc<Provider>>,
        index: Arc<VectorIndex>,
        store: Arc<IndexStore>,
    ) -> Self {
        Self {
            config,
            source,
            provider,
            index,
            store,
            phase: std::sync::Mutex::new(SyncPhase::Idle),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Diff the source listing against the committed snapshot without
    /// writing anything. Used by `sync --dry-run` and internally by
    /// [`sync`](SyncOrchestrator::sync).
    pub async fn plan(&self) -> Result<SyncPlan> {
        let listed = self.source.list_documents().await?;
        let snapshot = self.index.snapshot();

        let mut plan = SyncPlan::default();
        for doc in &listed {
            match snapshot.documents().get(&doc.id) {
                Some(prev) if prev.content_hash == doc.content_hash => plan.unchanged += 1,
                _ => plan.changed.push(doc.clone()),
            }
        }

        let listed_ids: std::collections::HashSet<&str> =
            listed.iter().map(|d| d.id.as_str()).collect();
        plan.removed = snapshot
            .documents()
            .keys()
            .filter(|id| !listed_ids.contains(id.as_str()))
            .cloned()
            .collect();
        plan.removed.sort();

        Ok(plan)
    }

    /// Run one sync pass. `limit` caps how many changed documents are
    /// processed; the rest stay changed for the next pass.
    ///
    /// Document-level failures are isolated into the report; this returns
    /// `Err` only for pass-level conditions (source listing failure,
    /// index corruption).
    pub async fn sync(
        &self,
        progress: &dyn SyncProgressReporter,
        cancel: &CancelFlag,
        limit: Option<usize>,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let result = self.sync_inner(progress, cancel, limit, started).await;
        match &result {
            Ok(_) => self.set_phase(SyncPhase::Idle),
            Err(_) => {
                self.set_phase(SyncPhase::Error);
                // Error is reported to the caller; the machine returns to
                // Idle so the next pass can run.
                self.set_phase(SyncPhase::Idle);
            }
        }
        result
    }

    async fn sync_inner(
        &self,
        progress: &dyn SyncProgressReporter,
        cancel: &CancelFlag,
        limit: Option<usize>,
        started: Instant,
    ) -> Result<SyncReport> {
        self.set_phase(SyncPhase::Fetching);
        progress.report(SyncProgressEvent::Fetching {
            source: self.source.name().to_string(),
        });

        // Corrupt committed state aborts before any writes.
        self.index.snapshot().verify()?;

        self.set_phase(SyncPhase::Diffing);
        let mut plan = self.plan().await?;
        if let Some(limit) = limit {
            plan.changed.truncate(limit);
        }
        progress.report(SyncProgressEvent::Diffing {
            total: plan.changed.len() as u64 + plan.unchanged,
        });

        let mut report = SyncReport {
            documents_skipped: plan.unchanged,
            ..SyncReport::default()
        };

        // Purge documents the source no longer reports.
        for doc_id in &plan.removed {
            if cancel.is_cancelled() {
                report.duration = started.elapsed();
                return Ok(report);
            }
            self.store.delete_document(doc_id).await?;
            report.chunks_deleted += self.index.remove_document(doc_id);
        }

        self.set_phase(SyncPhase::Embedding);
        let total_changed = plan.changed.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.config.embedding.concurrency.max(1)));
        let mut tasks: JoinSet<std::result::Result<(Document, Vec<ChunkRecord>), String>> =
            JoinSet::new();

        for doc in plan.changed {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            let provider = self.provider.clone();
            let chunk_size = self.config.chunking.chunk_size;
            let overlap = self.config.chunking.chunk_overlap;

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.map_err(|_| doc.id.clone())?;
                match prepare_document(&*source, provider.as_deref(), doc, chunk_size, overlap)
                    .await
                {
                    Ok(prepared) => Ok(prepared),
                    Err((id, _err)) => Err(id),
                }
            });
        }

        let mut done = 0u64;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            progress.report(SyncProgressEvent::Embedding {
                n: done,
                total: total_changed,
            });

            let prepared = match joined {
                Ok(Ok(prepared)) => prepared,
                Ok(Err(failed_id)) => {
                    report.failed_document_ids.push(failed_id);
                    continue;
                }
                Err(join_err) => {
                    report
                        .failed_document_ids
                        .push(format!("task: {join_err}"));
                    continue;
                }
            };

            if cancel.is_cancelled() {
                tasks.abort_all();
                report.duration = started.elapsed();
                return Ok(report);
            }

            let (doc, records) = prepared;
            self.store.replace_document(&doc, &records).await?;
            let (created, deleted) = self.index.replace_document(doc, records);
            report.chunks_created += created;
            report.chunks_deleted += deleted;
            report.documents_processed += 1;
        }

        if cancel.is_cancelled() {
            report.duration = started.elapsed();
            return Ok(report);
        }

        self.set_phase(SyncPhase::Committing);
        progress.report(SyncProgressEvent::Committing);

        report.failed_document_ids.sort();
        let snapshot = self.index.snapshot();
        let state = SyncState {
            last_sync_timestamp: Some(Utc::now()),
            document_count: snapshot.document_count(),
            chunk_count: snapshot.chunk_count(),
            failed_document_ids: report.failed_document_ids.clone(),
        };
        self.store.save_sync_state(&state).await?;

        report.duration = started.elapsed();
        Ok(report)
    }
}

/// Fetch, chunk, and embed one document. Runs inside the bounded worker
/// pool; any failure here is isolated to this document.
async fn prepare_document(
    source: &dyn DocumentSource,
    provider: Option<&Provider>,
    doc: Document,
    chunk_size: usize,
    overlap: usize,
) -> std::result::Result<(Document, Vec<ChunkRecord>), (String, RetrievalError)> {
    let body = source
        .fetch_content(&doc.id)
        .await
        .map_err(|e| (doc.id.clone(), e))?;

    let chunks = chunk_document(&doc.id, &body, chunk_size, overlap);

    let embeddings = match provider {
        Some(provider) => {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            provider
                .embed_texts(&texts)
                .await
                .map_err(|e| (doc.id.clone(), e))?
        }
        None => Vec::new(),
    };

    let records = build_records(&doc, &chunks, &embeddings, Utc::now());
    Ok((doc, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EmbeddingConfig, IndexConfig};
    use crate::embedding::testing::{FailingEmbedder, MockEmbedder};
    use crate::progress::NoProgress;
    use crate::source::testing::StaticSource;

    struct Fixture {
        _tmp: tempfile::TempDir,
        source: Arc<StaticSource>,
        orchestrator: SyncOrchestrator,
        index: Arc<VectorIndex>,
        store: Arc<IndexStore>,
    }

    fn embedding_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("mock".to_string()),
            embedding_dimensions: Some(8),
            batch_size: 16,
            max_retries: 0,
            timeout_secs: 5,
            concurrency: 2,
        }
    }

    async fn fixture_with(service: Box<dyn crate::embedding::EmbeddingService>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            index: IndexConfig {
                path: tmp.path().join("index.sqlite"),
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: embedding_config(),
            source: Default::default(),
        });

        let pool = crate::db::connect(&config).await.unwrap();
        let store = Arc::new(IndexStore::new(pool));
        store.migrate().await.unwrap();

        let source = Arc::new(StaticSource::new());
        let index = Arc::new(VectorIndex::new());
        let provider = Some(Arc::new(Provider::new(service, &config.embedding)));

        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&config),
            Arc::clone(&source) as Arc<dyn DocumentSource>,
            provider,
            Arc::clone(&index),
            Arc::clone(&store),
        );

        Fixture {
            _tmp: tmp,
            source,
            orchestrator,
            index,
            store,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Box::new(MockEmbedder::new(8))).await
    }

    fn long_body(words: usize) -> String {
        (0..words).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[tokio::test]
    async fn first_sync_indexes_everything() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body text", 100);
        f.source.put("b", "Beta", "Standards", &long_body(600), 100);

        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.documents_skipped, 0);
        assert_eq!(report.chunks_created, 3); // 1 + 2 (600 tokens at 500/100)
        assert_eq!(report.chunks_deleted, 0);
        assert!(report.failed_document_ids.is_empty());

        let snapshot = f.index.snapshot();
        assert_eq!(snapshot.document_count(), 2);
        assert_eq!(snapshot.chunk_count(), 3);
        assert!(snapshot.verify().is_ok());
    }

    #[tokio::test]
    async fn unchanged_resync_is_a_no_op() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body text", 100);
        f.source.put("b", "Beta", "Standards", "beta body text", 100);

        f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();
        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.chunks_created, 0);
        assert_eq!(report.chunks_deleted, 0);
        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.documents_skipped, 2);
    }

    #[tokio::test]
    async fn changed_document_is_replaced_atomically() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", &long_body(600), 100);
        f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();

        f.source.put("a", "Alpha", "Standards", "short new body", 200);
        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.chunks_deleted, 2);
        assert_eq!(report.chunks_created, 1);

        let snapshot = f.index.snapshot();
        assert_eq!(snapshot.chunk_count(), 1);
        let record = snapshot.records().next().unwrap();
        assert_eq!(record.text, "short new body");
        // Same deterministic id as before the change.
        assert_eq!(record.chunk_id, "a_chunk_0");
    }

    #[tokio::test]
    async fn removed_document_is_purged() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body", 100);
        f.source.put("b", "Beta", "Standards", "beta body", 100);
        f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();

        f.source.remove("a");
        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.chunks_deleted, 1);
        let snapshot = f.index.snapshot();
        assert!(snapshot.documents().get("a").is_none());
        assert!(snapshot.records().all(|r| r.document_id == "b"));

        // The durable store agrees.
        let (docs, records) = f.store.load().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(records.iter().all(|r| r.document_id == "b"));
    }

    #[tokio::test]
    async fn fetch_failure_is_isolated_to_the_document() {
        let f = fixture().await;
        f.source.put("good", "Good", "Standards", "good body", 100);
        f.source.put("bad", "Bad", "Standards", "bad body", 100);
        f.source.fail_fetch("bad");

        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.failed_document_ids, vec!["bad".to_string()]);
        assert!(f.index.snapshot().documents().get("good").is_some());

        let state = f.store.load_sync_state().await.unwrap();
        assert_eq!(state.failed_document_ids, vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn embedding_unavailable_marks_documents_failed() {
        let f = fixture_with(Box::new(FailingEmbedder { transient: false })).await;
        f.source.put("a", "Alpha", "Standards", "alpha body", 100);
        f.source.put("b", "Beta", "Standards", "beta body", 100);

        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), None)
            .await
            .unwrap();

        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.failed_document_ids.len(), 2);
        assert_eq!(f.index.snapshot().chunk_count(), 0);
    }

    #[tokio::test]
    async fn failed_document_retries_on_next_sync() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body", 100);
        f.source.fail_fetch("a");
        let report = f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();
        assert_eq!(report.failed_document_ids, vec!["a".to_string()]);

        // Same content, but never committed, so it is still "changed".
        let plan = f.orchestrator.plan().await.unwrap();
        assert_eq!(plan.changed.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_pass_leaves_committed_state_and_skips_state_update() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body", 100);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = f.orchestrator.sync(&NoProgress, &cancel, None).await.unwrap();

        assert_eq!(report.documents_processed, 0);
        assert_eq!(f.index.snapshot().chunk_count(), 0);
        // SyncState advances only when a pass commits.
        let state = f.store.load_sync_state().await.unwrap();
        assert!(state.last_sync_timestamp.is_none());
    }

    #[tokio::test]
    async fn sync_state_reflects_committed_counts() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", &long_body(600), 100);
        f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();

        let state = f.store.load_sync_state().await.unwrap();
        assert_eq!(state.document_count, 1);
        assert_eq!(state.chunk_count, 2);
        assert!(state.last_sync_timestamp.is_some());
    }

    #[tokio::test]
    async fn disabled_provider_indexes_without_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            index: IndexConfig {
                path: tmp.path().join("index.sqlite"),
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(), // disabled
            source: Default::default(),
        });
        let pool = crate::db::connect(&config).await.unwrap();
        let store = Arc::new(IndexStore::new(pool));
        store.migrate().await.unwrap();
        let source = Arc::new(StaticSource::new());
        source.put("a", "Alpha", "Standards", "alpha body", 100);
        let index = Arc::new(VectorIndex::new());

        let orchestrator = SyncOrchestrator::new(
            config,
            Arc::clone(&source) as Arc<dyn DocumentSource>,
            None,
            Arc::clone(&index),
            store,
        );
        let report = orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();

        assert_eq!(report.documents_processed, 1);
        let snapshot = index.snapshot();
        assert_eq!(snapshot.chunk_count(), 1);
        assert!(snapshot.records().all(|r| r.embedding.is_empty()));
    }

    #[tokio::test]
    async fn limit_caps_documents_per_pass() {
        let f = fixture().await;
        f.source.put("a", "Alpha", "Standards", "alpha body", 100);
        f.source.put("b", "Beta", "Standards", "beta body", 100);
        f.source.put("c", "Gamma", "Standards", "gamma body", 100);

        let report = f
            .orchestrator
            .sync(&NoProgress, &CancelFlag::new(), Some(2))
            .await
            .unwrap();
        assert_eq!(report.documents_processed, 2);

        // The remainder is still changed on the next pass.
        let plan = f.orchestrator.plan().await.unwrap();
        assert_eq!(plan.changed.len(), 1);
        assert_eq!(plan.unchanged, 2);
    }

    #[tokio::test]
    async fn plan_classifies_documents() {
        let f = fixture().await;
        f.source.put("keep", "Keep", "Standards", "keep body", 100);
        f.source.put("change", "Change", "Standards", "old body", 100);
        f.orchestrator.sync(&NoProgress, &CancelFlag::new(), None).await.unwrap();

        f.source.put("change", "Change", "Standards", "new body", 200);
        f.source.put("fresh", "Fresh", "Standards", "fresh body", 200);
        f.source.remove("keep");

        let plan = f.orchestrator.plan().await.unwrap();
        let changed: Vec<&str> = plan.changed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(changed, vec!["change", "fresh"]);
        assert_eq!(plan.unchanged, 0);
        assert_eq!(plan.removed, vec!["keep".to_string()]);
    }
}
