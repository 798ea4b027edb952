//! Document source boundary.
//!
//! [`DocumentSource`] is the capability interface the sync orchestrator
//! consumes: a listing call that reports metadata plus content hashes, and
//! a per-document content fetch. Backends are selected by configuration
//! rather than type checks scattered through the retrieval logic.
//!
//! One built-in backend is provided: a filesystem adapter, which makes the
//! CLI usable end-to-end and serves as the reference implementation for
//! remote backends kept outside this crate.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::{Config, FilesystemSourceConfig};
use crate::error::{Result, RetrievalError};
use crate::models::Document;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Source label for progress output.
    fn name(&self) -> &str;

    /// Current documents with metadata and content hashes. The sync
    /// orchestrator diffs this listing against its committed state.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Full text of one document.
    async fn fetch_content(&self, id: &str) -> Result<String>;
}

/// Build the configured source.
pub fn create_source(config: &Config) -> Result<Box<dyn DocumentSource>> {
    match &config.source.filesystem {
        Some(fs) => Ok(Box::new(FilesystemSource::new(fs.clone())?)),
        None => Err(RetrievalError::InvalidConfiguration(
            "no document source configured (expected [source.filesystem])".into(),
        )),
    }
}

/// SHA-256 digest of document text, the change-detection key for sync.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Filesystem backend ============

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    fn document_for(&self, path: &Path, relative: &str) -> Result<Document> {
        let body = self.read_file(path, relative)?;

        let metadata = std::fs::metadata(path).map_err(|e| RetrievalError::SourceFetch {
            id: relative.to_string(),
            reason: e.to_string(),
        })?;
        let modified_secs = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let title = path
            .file_stem()
            .map(|n| n.to_string_lossy().replace(['-', '_'], " "))
            .unwrap_or_else(|| relative.to_string());

        // Category from the top-level directory, "General" at the root.
        let category = match relative.split(['/', '\\']).collect::<Vec<_>>().as_slice() {
            [_file] => "General".to_string(),
            [dir, ..] => dir.to_string(),
            [] => "General".to_string(),
        };

        Ok(Document {
            id: relative.to_string(),
            url: format!("file://{}", path.display()),
            title,
            category,
            updated_at: Utc.timestamp_opt(modified_secs, 0).single().unwrap_or_else(Utc::now),
            content_hash: content_hash(&body),
        })
    }

    fn read_file(&self, path: &Path, id: &str) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| RetrievalError::SourceFetch {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let root = &self.config.root;
        if !root.exists() {
            return Err(RetrievalError::SourceFetch {
                id: root.display().to_string(),
                reason: "source root does not exist".to_string(),
            });
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| RetrievalError::SourceFetch {
                id: root.display().to_string(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            documents.push(self.document_for(path, &rel_str)?);
        }

        // Deterministic ordering
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn fetch_content(&self, id: &str) -> Result<String> {
        let path = self.config.root.join(id);
        self.read_file(&path, id)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RetrievalError::InvalidConfiguration(format!("bad glob '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        RetrievalError::InvalidConfiguration(format!("cannot build glob set: {e}"))
    })
}

// ============ Test double ============
