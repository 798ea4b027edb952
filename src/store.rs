//! SQLite persistence for the index.
//!
//! The durable layout mirrors the in-memory snapshot: one row per chunk
//! record (embedding stored as a little-endian f32 BLOB), one row per
//! document, and a single `sync_state` row updated only when a sync pass
//! commits. A document's chunk set is replaced inside one transaction, so
//! a crash mid-sync leaves every document either fully old or fully new;
//! the in-memory snapshot pointer advances only after the transaction
//! commits.

use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;
use crate::models::{Chunk, ChunkRecord, Document, SyncState};

pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                content_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_records (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                content_hash TEXT NOT NULL,
                indexed_at INTEGER NOT NULL,
                UNIQUE(document_id, sequence_index),
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_sync_timestamp INTEGER,
                document_count INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                failed_document_ids TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_records_document_id \
             ON chunk_records(document_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace one document's chunk set in a single transaction.
    pub async fn replace_document(&self, doc: &Document, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_records WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, url, title, category, updated_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                category = excluded.category,
                updated_at = excluded.updated_at,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.url)
        .bind(&doc.title)
        .bind(&doc.category)
        .bind(doc.updated_at.timestamp())
        .bind(&doc.content_hash)
        .execute(&mut *tx)
        .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO chunk_records
                    (chunk_id, document_id, url, title, category, sequence_index,
                     text, embedding, content_hash, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.chunk_id)
            .bind(&record.document_id)
            .bind(&record.url)
            .bind(&record.title)
            .bind(&record.category)
            .bind(record.sequence_index)
            .bind(&record.text)
            .bind(vec_to_blob(&record.embedding))
            .bind(&record.content_hash)
            .bind(record.indexed_at.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Purge a document and its chunks.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_records WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load everything for the initial in-memory snapshot.
    pub async fn load(&self) -> Result<(Vec<Document>, Vec<ChunkRecord>)> {
        let doc_rows = sqlx::query(
            "SELECT id, url, title, category, updated_at, content_hash FROM documents",
        )
        .fetch_all(&self.pool)
        .await?;

        let documents: Vec<Document> = doc_rows
            .iter()
            .map(|row| Document {
                id: row.get("id"),
                url: row.get("url"),
                title: row.get("title"),
                category: row.get("category"),
                updated_at: ts(row.get("updated_at")),
                content_hash: row.get("content_hash"),
            })
            .collect();

        let chunk_rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.document_id, c.url, c.title, c.category,
                   c.sequence_index, c.text, c.embedding, c.content_hash,
                   c.indexed_at, d.updated_at
            FROM chunk_records c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let records: Vec<ChunkRecord> = chunk_rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkRecord {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    url: row.get("url"),
                    title: row.get("title"),
                    category: row.get("category"),
                    sequence_index: row.get("sequence_index"),
                    text: row.get("text"),
                    embedding: blob_to_vec(&blob),
                    content_hash: row.get("content_hash"),
                    updated_at: ts(row.get("updated_at")),
                    indexed_at: ts(row.get("indexed_at")),
                }
            })
            .collect();

        Ok((documents, records))
    }

    pub async fn load_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            "SELECT last_sync_timestamp, document_count, chunk_count, failed_document_ids \
             FROM sync_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => {
                let failed: Vec<String> =
                    serde_json::from_str(row.get::<String, _>("failed_document_ids").as_str())
                        .unwrap_or_default();
                SyncState {
                    last_sync_timestamp: row
                        .get::<Option<i64>, _>("last_sync_timestamp")
                        .map(ts),
                    document_count: row.get::<i64, _>("document_count") as u64,
                    chunk_count: row.get::<i64, _>("chunk_count") as u64,
                    failed_document_ids: failed,
                }
            }
            None => SyncState::default(),
        })
    }

    /// Overwrite the single sync-state row. Called once per committed
    /// sync pass.
    pub async fn save_sync_state(&self, state: &SyncState) -> Result<()> {
        let failed = serde_json::to_string(&state.failed_document_ids).unwrap_or_else(|_| "[]".into());
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, last_sync_timestamp, document_count, chunk_count, failed_document_ids)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_sync_timestamp = excluded.last_sync_timestamp,
                document_count = excluded.document_count,
                chunk_count = excluded.chunk_count,
                failed_document_ids = excluded.failed_document_ids
            "#,
        )
        .bind(state.last_sync_timestamp.map(|t| t.timestamp()))
        .bind(state.document_count as i64)
        .bind(state.chunk_count as i64)
        .bind(failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Build committed records from freshly chunked and embedded content.
///
/// `embeddings` is empty when the provider is disabled; otherwise it must
/// be one vector per chunk.
pub fn build_records(
    doc: &Document,
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    indexed_at: chrono::DateTime<Utc>,
) -> Vec<ChunkRecord> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| ChunkRecord {
            chunk_id: chunk.chunk_id.clone(),
            document_id: doc.id.clone(),
            url: doc.url.clone(),
            title: doc.title.clone(),
            category: doc.category.clone(),
            sequence_index: chunk.sequence_index,
            text: chunk.text.clone(),
            embedding: embeddings.get(i).cloned().unwrap_or_default(),
            content_hash: chunk.content_hash.clone(),
            updated_at: doc.updated_at,
            indexed_at,
        })
        .collect()
}

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
