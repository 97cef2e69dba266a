//! Crate-wide error type.
//!
//! Each variant corresponds to one failure class callers can match on:
//! bad input, missing data, a failed external collaborator (extractor or
//! embedder), a failed index backend, a failed metadata transaction, or
//! cancellation. Search-side degradation (one retrieval side failing) is
//! reported through response warnings, not through this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad query or document input: empty text, limit < 1, dimension mismatch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Document or chunk absent from the metadata store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The extractor failed on a document's bytes.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The embedder failed or returned vectors of the wrong dimension.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A keyword or vector backend failed on add/remove/search.
    #[error("index backend failed: {0}")]
    Index(String),

    /// A metadata store transaction failed.
    #[error("storage failed: {0}")]
    Storage(#[from] sqlx::Error),

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<tantivy::TantivyError> for Error {
    fn from(e: tantivy::TantivyError) -> Self {
        Error::Index(e.to_string())
    }
}
