//! findex — a local hybrid document search engine.
//!
//! Thin CLI over the library: wires the configured stores into the indexer
//! and search engine and exposes `init`, `index`, `search`, `get`,
//! `delete`, and `stats`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use findex::cache::EmbeddingCache;
use findex::config::{load_config, Config};
use findex::embedding::{create_embedder, CachedEmbedder};
use findex::indexer::Indexer;
use findex::keyword_index::{KeywordIndex, TantivyKeywordIndex};
use findex::models::Query;
use findex::search::SearchEngine;
use findex::store::MetadataStore;
use findex::vector_index::{BruteForceVectorIndex, VectorIndex};

#[derive(Parser)]
#[command(
    name = "findex",
    about = "findex — a local hybrid document search engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/findex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the metadata store and index directories
    Init,

    /// Index every supported file under a directory
    Index {
        /// Directory to walk
        path: PathBuf,

        /// Extensions to admit (with leading dot); defaults to the config list
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },

    /// Search indexed documents
    Search {
        /// Search query
        query: String,

        /// Search mode: keyword, semantic, or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a document by id
    Get {
        /// Document id
        id: String,
    },

    /// Remove a document and its chunks from all stores
    Delete {
        /// Document id
        id: String,
    },

    /// Print corpus statistics
    Stats,
}

struct App {
    config: Config,
    store: Arc<MetadataStore>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<BruteForceVectorIndex>,
    embedder: Arc<CachedEmbedder>,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let store = Arc::new(
            MetadataStore::open(&config.storage.metadata_path)
                .await
                .context("opening metadata store")?,
        );
        let keyword: Arc<dyn KeywordIndex> = Arc::new(
            TantivyKeywordIndex::open(&config.storage.keyword_index_dir)
                .context("opening keyword index")?,
        );

        let dims = config.embedding.dims.unwrap_or(0);
        let vector = Arc::new(match &config.storage.vector_index_dir {
            Some(dir) => BruteForceVectorIndex::open(dir, dims).context("opening vector index")?,
            None => BruteForceVectorIndex::in_memory(dims),
        });

        let embedder = Arc::new(CachedEmbedder::new(
            create_embedder(&config.embedding)?,
            Arc::new(EmbeddingCache::new(config.embedding.cache_capacity)),
        ));

        Ok(Self {
            config,
            store,
            keyword,
            vector,
            embedder,
        })
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.keyword),
            Arc::clone(&self.vector) as Arc<dyn VectorIndex>,
            Arc::clone(&self.embedder),
            self.config.chunking.clone(),
            self.config.indexing.clone(),
        )
    }

    fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.keyword),
            Arc::clone(&self.vector) as Arc<dyn VectorIndex>,
            Arc::clone(&self.embedder),
            self.config.retrieval.clone(),
        )
    }

    async fn close(&self) -> Result<()> {
        self.vector.close().map_err(anyhow::Error::from)?;
        self.keyword.close().map_err(anyhow::Error::from)?;
        self.embedder.close();
        self.store.close().await;
        Ok(())
    }
}

/// A token that trips on Ctrl-C so long-running commands can unwind.
fn cancellation_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("findex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let app = App::open(config).await?;
            app.close().await?;
            println!("initialized");
        }
        Commands::Index { path, extensions } => {
            let app = App::open(config).await?;
            if !app.config.embedding.is_enabled() {
                anyhow::bail!(
                    "indexing requires an embedding provider; set [embedding] provider in config"
                );
            }
            let cancel = cancellation_token();
            let report = app
                .indexer()
                .index_directory(&path, &extensions, &cancel)
                .await?;
            println!("indexed documents: {}", report.indexed);
            if !report.failures.is_empty() {
                println!("skipped files: {}", report.failures.len());
                for (file, err) in &report.failures {
                    println!("  {}: {}", file.display(), err);
                }
            }
            app.close().await?;
            println!("ok");
        }
        Commands::Search { query, mode, limit } => {
            let app = App::open(config).await?;
            let mut q = Query::new(query).with_limit(limit.unwrap_or(app.config.retrieval.default_limit));
            match mode.as_str() {
                "keyword" => q = q.keyword_only(),
                "semantic" => q = q.semantic_only(),
                "hybrid" => {}
                other => anyhow::bail!(
                    "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                    other
                ),
            }

            let cancel = cancellation_token();
            let response = app.search_engine().search(&q, &cancel).await?;

            for warning in &response.warnings {
                eprintln!("warning: {}", warning);
            }

            let results = match mode.as_str() {
                "keyword" => &response.keyword_results,
                "semantic" => &response.semantic_results,
                _ => &response.fused_results,
            };

            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    let excerpt: String = result.document.content.chars().take(160).collect();
                    println!(
                        "{}. [{:.3}] {}",
                        i + 1,
                        result.score,
                        result.document.title
                    );
                    println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
                    println!("    id: {}", result.document.id);
                    println!();
                }
            }
            app.close().await?;
        }
        Commands::Get { id } => {
            let app = App::open(config).await?;
            match app.store.get(&id).await? {
                Some(doc) => {
                    println!("id: {}", doc.id);
                    println!("title: {}", doc.title);
                    println!("updated: {}", doc.updated_at.format("%Y-%m-%dT%H:%M:%SZ"));
                    println!();
                    println!("{}", doc.content);
                }
                None => anyhow::bail!("document not found: {}", id),
            }
            app.close().await?;
        }
        Commands::Delete { id } => {
            let app = App::open(config).await?;
            app.indexer().delete_document(&id).await?;
            app.close().await?;
            println!("deleted {}", id);
        }
        Commands::Stats => {
            let app = App::open(config).await?;
            println!("documents: {}", app.store.count_documents().await?);
            println!("chunks: {}", app.store.count_chunks().await?);
            println!("keyword index entries: {}", app.keyword.count()?);
            println!("vectors: {}", app.vector.len());
            app.close().await?;
        }
    }

    Ok(())
}
