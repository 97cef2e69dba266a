//! # findex
//!
//! **A local hybrid document search engine.**
//!
//! findex ingests documents from the filesystem, maintains a lexical
//! (keyword) index and a dense-vector (semantic) index in parallel, and
//! answers queries by fusing ranked results from both. It runs on a single
//! node against a personal corpus of tens of thousands of documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │ Extractor │──▶│       Indexer        │──▶│ SQLite (meta)  │
//! │ pdf/ooxml │   │ chunk → embed → write│   │ tantivy (bm25) │
//! └───────────┘   └──────────┬───────────┘   │ vectors (cos)  │
//!                            │               └───────┬───────┘
//!                     ┌──────▼──────┐                │
//!                     │  Embedding  │        ┌───────▼───────┐
//!                     │    Cache    │◀───────│ Search Engine │
//!                     └─────────────┘        │  fuse + rank  │
//!                                            └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A document (inline content or a path routed through [`extract`])
//!    enters the [`indexer`], which splits it into overlapping token
//!    windows ([`chunk`]).
//! 2. Each chunk is embedded through the shared [`cache`] ([`embedding`])
//!    and written to all three stores in order: metadata ([`store`]),
//!    keyword ([`keyword_index`]), vector ([`vector_index`]).
//! 3. The [`search`] engine embeds the query once, retrieves both sides
//!    concurrently, reduces chunk scores to document scores, and fuses the
//!    sides with min-max normalized convex blending.
//!
//! Searches hydrate documents through the metadata store, so an index row
//! without a metadata parent is never surfaced; dual-index consistency is
//! maintained by write ordering plus best-effort rollback rather than a
//! distributed transaction.
//!
//! ## Quick Start
//!
//! ```bash
//! findex init                      # create the stores
//! findex index ~/Documents         # ingest a directory
//! findex search "deployment runbook" --limit 10
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error kinds distinguishable to callers |
//! | [`models`] | Core data types: `Document`, `Chunk`, `Query`, `SearchResponse` |
//! | [`cache`] | Bounded LRU text → vector cache shared by both paths |
//! | [`chunk`] | Sliding-window token chunker with deterministic chunk ids |
//! | [`extract`] | Multi-format text extraction (plain, PDF, OOXML, ODF) |
//! | [`embedding`] | Embedder trait, remote provider, cache-through wrapper |
//! | [`vector_index`] | Cosine top-k over unit vectors, brute-force reference |
//! | [`keyword_index`] | BM25 ranked retrieval backed by tantivy |
//! | [`store`] | SQLite metadata store with transactional chunk membership |
//! | [`indexer`] | Ingest orchestration and three-store write ordering |
//! | [`search`] | Parallel dual retrieval, fusion, hydration |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod keyword_index;
pub mod models;
pub mod search;
pub mod store;
pub mod vector_index;

pub use error::{Error, Result};
