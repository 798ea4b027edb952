//! # Kodama CLI (`kodama`)
//!
//! The `kodama` binary manages a local hybrid-retrieval index over a
//! standards-document corpus: initialization, incremental sync, search,
//! and index statistics.
//!
//! ## Usage
//!
//! ```bash
//! kodama --config ./config/kodama.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kodama init` | Create the SQLite database and run schema migrations |
//! | `kodama sync` | Diff the source against the index and ingest changes |
//! | `kodama search "<query>"` | Hybrid search over the indexed corpus |
//! | `kodama stats` | Show document/chunk counts and last sync time |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};

use kodama_retrieval::config::{self, Config};
use kodama_retrieval::db;
use kodama_retrieval::embedding::{create_provider, Provider};
use kodama_retrieval::index::VectorIndex;
use kodama_retrieval::progress::ProgressMode;
use kodama_retrieval::query::{QueryOptions, QueryPipeline};
use kodama_retrieval::source::create_source;
use kodama_retrieval::store::IndexStore;
use kodama_retrieval::sync::{CancelFlag, SyncOrchestrator};

/// Kodama — a hybrid retrieval engine for standards-document QA.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kodama.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kodama",
    about = "Kodama — hybrid retrieval over a standards-document corpus",
    version,
    long_about = "Kodama keeps a local SQLite index of a document corpus, chunked and embedded, \
    and answers natural-language queries with a fused semantic + keyword ranking. Sync is \
    incremental and content-hash driven; queries degrade to keyword-only scoring when the \
    embedding provider is unavailable."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kodama.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables.
    /// This command is idempotent.
    Init,

    /// Sync the document source into the index.
    ///
    /// Lists the source, diffs content hashes against the committed index,
    /// then chunks, embeds, and commits changed documents one at a time.
    /// Unchanged documents are skipped without refetching.
    Sync {
        /// Show the diff (changed / unchanged / removed) without writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `auto`, `off`, `human`, or `json`.
        #[arg(long, default_value = "auto")]
        progress: String,

        /// Process at most this many changed documents this pass.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search the indexed corpus.
    ///
    /// Runs the hybrid query pipeline and prints ranked results with
    /// scores and snippets, one result per source document.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to one category (case-insensitive).
        #[arg(long)]
        category: Option<String>,

        /// Emit results as a JSON array on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            let store = IndexStore::new(pool);
            store.migrate().await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            dry_run,
            progress,
            limit,
        } => {
            run_sync(cfg, dry_run, &progress, limit).await?;
        }
        Commands::Search {
            query,
            limit,
            category,
            json,
        } => {
            run_search(cfg, &query, limit, category, json).await?;
        }
        Commands::Stats => {
            run_stats(cfg).await?;
        }
    }

    Ok(())
}

/// Load the durable index into memory and build the provider.
async fn open_index(
    cfg: &Config,
) -> anyhow::Result<(Arc<IndexStore>, Arc<VectorIndex>, Option<Arc<Provider>>)> {
    let pool = db::connect(cfg).await?;
    let store = Arc::new(IndexStore::new(pool));
    let (documents, records) = store.load().await?;
    let index = Arc::new(VectorIndex::load(documents, records));
    let provider = create_provider(&cfg.embedding)?.map(Arc::new);
    Ok((store, index, provider))
}

async fn run_sync(
    cfg: Config,
    dry_run: bool,
    progress: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let mode = match progress {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => bail!("Unknown progress mode: {}. Use auto, off, human, or json.", other),
    };

    let source = create_source(&cfg)?;
    let (store, index, provider) = open_index(&cfg).await?;
    let orchestrator = SyncOrchestrator::new(
        Arc::new(cfg),
        Arc::from(source),
        provider,
        index,
        Arc::clone(&store),
    );

    if dry_run {
        let plan = orchestrator.plan().await?;
        println!("sync (dry-run)");
        println!("  changed documents: {}", plan.changed.len());
        println!("  unchanged documents: {}", plan.unchanged);
        println!("  removed documents: {}", plan.removed.len());
        store.close().await;
        return Ok(());
    }

    let reporter = mode.reporter();
    let report = orchestrator
        .sync(reporter.as_ref(), &CancelFlag::new(), limit)
        .await?;

    println!("sync");
    println!("  processed documents: {}", report.documents_processed);
    println!("  skipped documents: {}", report.documents_skipped);
    println!("  chunks created: {}", report.chunks_created);
    println!("  chunks deleted: {}", report.chunks_deleted);
    if !report.failed_document_ids.is_empty() {
        println!("  failed documents: {}", report.failed_document_ids.len());
        for id in &report.failed_document_ids {
            println!("    {}", id);
        }
    }
    println!("  took: {:.1}s", report.duration.as_secs_f64());

    store.close().await;
    Ok(())
}

async fn run_search(
    cfg: Config,
    query: &str,
    limit: Option<usize>,
    category: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let (store, index, provider) = open_index(&cfg).await?;
    let pipeline = QueryPipeline::new(index, provider, cfg.retrieval.clone());

    let opts = QueryOptions { limit, category };
    let outcome = pipeline.hybrid_search(query, &opts).await;

    if outcome.degraded {
        eprintln!("note: embedding provider unavailable, keyword-only results");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
        store.close().await;
        return Ok(());
    }

    if outcome.results.is_empty() {
        println!("No results.");
        store.close().await;
        return Ok(());
    }

    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.hybrid_score,
            result.category,
            result.title
        );
        println!("    url: {}", result.url);
        println!(
            "    scores: semantic {:.2}  keyword {:.2}",
            result.semantic_score, result.keyword_score
        );
        println!("    excerpt: \"{}\"", result.snippet);
    }

    store.close().await;
    Ok(())
}

async fn run_stats(cfg: Config) -> anyhow::Result<()> {
    let (store, index, provider) = open_index(&cfg).await?;
    let state = store.load_sync_state().await?;
    let stats = index.stats(state.last_sync_timestamp);

    println!("documents: {}", stats.document_count);
    println!("chunks: {}", stats.chunk_count);
    match stats.last_sync {
        Some(ts) => println!("last sync: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("last sync: never"),
    }
    match provider {
        Some(p) => println!("embedding: {} ({} dims)", p.model_name(), p.dims()),
        None => println!("embedding: disabled"),
    }
    if !state.failed_document_ids.is_empty() {
        println!("failed documents: {}", state.failed_document_ids.len());
    }

    store.close().await;
    Ok(())
}
