//! Core data models used throughout findex.
//!
//! These types represent the documents, chunks, queries, and search results
//! that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A document stored in the metadata store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Stable caller-supplied identifier (or a path digest for files).
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous window of a document's text, the atomic unit of retrieval.
///
/// The id is derived deterministically from the parent document id and the
/// ordinal, so re-indexing a document reproduces the same chunk ids.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
}

/// Input to [`crate::indexer::Indexer::index_document`].
///
/// Carries either inline content or a filesystem path routed through the
/// extractor. Exactly one of `content` / `path` must be set.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub id: String,
    pub title: String,
    pub content: Option<String>,
    pub path: Option<PathBuf>,
}

impl DocumentInput {
    /// Build an input from inline content.
    pub fn inline(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: Some(content.into()),
            path: None,
        }
    }

    /// Build an input that resolves content through the extractor.
    pub fn from_path(id: impl Into<String>, title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: None,
            path: Some(path.into()),
        }
    }
}

/// A search request: query text, result limit, and independent enable flags
/// for the keyword and semantic sides.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub limit: usize,
    pub keyword: bool,
    pub semantic: bool,
}

impl Query {
    /// A query with both sides enabled and a limit of 10.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: 10,
            keyword: true,
            semantic: true,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn keyword_only(mut self) -> Self {
        self.keyword = true;
        self.semantic = false;
        self
    }

    pub fn semantic_only(mut self) -> Self {
        self.keyword = false;
        self.semantic = true;
        self
    }
}

/// Which retrieval side produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    Keyword,
    Semantic,
    Hybrid,
}

/// One ranked document in a search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
    pub match_kind: MatchKind,
}

/// The response to a search: the two per-side ranked lists plus the fused
/// ordering, and warnings for any retrieval side that failed and was
/// recovered locally.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchResponse {
    pub keyword_results: Vec<SearchResult>,
    pub semantic_results: Vec<SearchResult>,
    pub fused_results: Vec<SearchResult>,
    pub warnings: Vec<String>,
}
