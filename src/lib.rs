//! # Kodama Retrieval
//!
//! A hybrid retrieval engine for standards-document QA assistants.
//!
//! Kodama keeps a local SQLite copy of a document corpus (company
//! standards, BIM guides, policy pages), chunked and embedded, and answers
//! natural-language queries with a fused semantic + keyword ranking.
//! Sync is incremental: the source listing's content hashes are diffed
//! against the committed index so unchanged documents are never refetched
//! or re-embedded, and each document is replaced atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Source    │──▶│    Sync      │──▶│   SQLite +    │
//! │ filesystem │   │ Chunk+Embed  │   │ in-mem index  │
//! └────────────┘   └──────────────┘   └──────┬────────┘
//!                                            │ snapshot
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │    Query     │
//!                                     │ hybrid rank  │
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kodama init                        # create database
//! kodama sync                        # ingest + embed changed documents
//! kodama search "workset naming"     # hybrid search
//! kodama stats                       # index statistics
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`source`] | Document source abstraction (filesystem) |
//! | [`chunk`] | Token-window chunking with overlap |
//! | [`embedding`] | Embedding provider abstraction, caching, retry |
//! | [`index`] | In-memory vector index with snapshot isolation |
//! | [`keyword`] | Field-weighted keyword scoring |
//! | [`ranker`] | Score normalization, fusion, and deduplication |
//! | [`sync`] | Incremental sync orchestration |
//! | [`query`] | Query pipeline with degraded keyword-only fallback |
//! | [`store`] | SQLite persistence |
//! | [`progress`] | Sync progress reporting |
//! | [`db`] | Database connection |
//! | [`error`] | Error taxonomy |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod keyword;
pub mod models;
pub mod progress;
pub mod query;
pub mod ranker;
pub mod source;
pub mod store;
pub mod sync;
