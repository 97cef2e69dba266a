//! Indexing pipeline: resolve content, chunk, embed, and write all three
//! stores in order.
//!
//! The indexer is the sole mutator of the metadata store, the keyword
//! index, and the vector index. The three-store write is ordered (metadata
//! first, keyword next, vector last) so a concurrent search never observes
//! a chunk in an index without its document row; on a failure after the
//! metadata write the indexer compensates with best-effort deletes and
//! surfaces the original error.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::chunk::build_chunks;
use crate::config::{ChunkingConfig, IndexingConfig};
use crate::embedding::CachedEmbedder;
use crate::error::{Error, Result};
use crate::extract;
use crate::keyword_index::KeywordIndex;
use crate::models::{Document, DocumentInput};
use crate::store::MetadataStore;
use crate::vector_index::VectorIndex;

/// Outcome of a directory walk: documents indexed, plus the files that were
/// reported and skipped.
#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub indexed: usize,
    pub failures: Vec<(PathBuf, Error)>,
}

#[derive(Clone)]
pub struct Indexer {
    store: Arc<MetadataStore>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<CachedEmbedder>,
    chunking: ChunkingConfig,
    indexing: IndexingConfig,
}

impl Indexer {
    pub fn new(
        store: Arc<MetadataStore>,
        keyword: Arc<dyn KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<CachedEmbedder>,
        chunking: ChunkingConfig,
        indexing: IndexingConfig,
    ) -> Self {
        Self {
            store,
            keyword,
            vector,
            embedder,
            chunking,
            indexing,
        }
    }

    /// Index one document. On success it is searchable by any subsequent
    /// query; on failure no partial state is visible to searches.
    pub async fn index_document(
        &self,
        input: DocumentInput,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if input.id.trim().is_empty() {
            return Err(Error::Validation("document id must not be empty".to_string()));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // 1. Resolve content.
        let content = match (&input.content, &input.path) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => self.extract_file(path).await?,
            (None, None) => {
                return Err(Error::Validation(
                    "document input needs inline content or a path".to_string(),
                ))
            }
        };

        // A document with no text at all would embed to a zero vector,
        // which the vector index must never store.
        if input.title.trim().is_empty() && content.trim().is_empty() {
            return Err(Error::Validation(format!(
                "document {} has no text to index",
                input.id
            )));
        }

        // 2-3. Chunk and assign deterministic ids.
        let chunks = build_chunks(
            &input.id,
            &input.title,
            &content,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        // 4. Remove prior state before any new insert.
        let prior = self.store.get(&input.id).await?;
        if prior.is_some() {
            let old_chunk_ids = self.store.chunk_ids(&input.id).await?;
            self.remove_chunks_from_indexes(&old_chunk_ids).await?;
            self.store.delete(&input.id).await?;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // 5. Embed through the shared cache.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // 6. Ordered three-store write: metadata, keyword, vector.
        let now = chrono::Utc::now();
        let document = Document {
            id: input.id.clone(),
            title: input.title.clone(),
            content,
            created_at: prior.as_ref().map(|d| d.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.put(&document, &chunk_ids).await?;

        let write_result = self
            .write_indexes(&chunks, vectors, cancel)
            .await;
        if let Err(err) = write_result {
            self.rollback(&input.id, &chunk_ids).await;
            return Err(err);
        }

        tracing::debug!(document_id = %input.id, chunks = chunk_ids.len(), "indexed document");
        Ok(())
    }

    /// Keyword and vector writes for one document's chunks. The keyword
    /// commit publishes the buffered removes and adds together, so a
    /// re-index replaces the chunk set without an observable overlap.
    async fn write_indexes(
        &self,
        chunks: &[crate::models::Chunk],
        vectors: Vec<Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let keyword = Arc::clone(&self.keyword);
        let pairs: Vec<(String, String)> = chunks
            .iter()
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();
        run_blocking(move || {
            for (id, text) in &pairs {
                keyword.add(id, text)?;
            }
            keyword.commit()
        })
        .await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let vector = Arc::clone(&self.vector);
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        run_blocking(move || vector.add(&ids, &vectors)).await
    }

    /// Best-effort compensation after a failed write: delete the partially
    /// written document and its chunks from all three stores.
    async fn rollback(&self, document_id: &str, chunk_ids: &[String]) {
        if let Err(e) = self.remove_chunks_from_indexes(chunk_ids).await {
            tracing::warn!(document_id, error = %e, "rollback: index cleanup failed");
        }
        if let Err(e) = self.store.delete(document_id).await {
            tracing::warn!(document_id, error = %e, "rollback: metadata cleanup failed");
        }
    }

    async fn remove_chunks_from_indexes(&self, chunk_ids: &[String]) -> Result<()> {
        let keyword = Arc::clone(&self.keyword);
        let vector = Arc::clone(&self.vector);
        let ids = chunk_ids.to_vec();
        run_blocking(move || {
            for id in &ids {
                keyword.remove(id)?;
            }
            keyword.commit()?;
            for id in &ids {
                vector.remove(id)?;
            }
            Ok(())
        })
        .await
    }

    /// Explicitly remove a document and all of its chunks.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        if self.store.get(id).await?.is_none() {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        let chunk_ids = self.store.chunk_ids(id).await?;
        self.remove_chunks_from_indexes(&chunk_ids).await?;
        self.store.delete(id).await?;
        tracing::info!(document_id = %id, chunks = chunk_ids.len(), "deleted document");
        Ok(())
    }

    /// Walk a directory, indexing every file whose extension is allowed.
    ///
    /// Per-file errors are reported and skipped; the overall call succeeds
    /// with the count of documents indexed unless it is cancelled.
    pub async fn index_directory(
        &self,
        path: &Path,
        allowed_extensions: &[String],
        cancel: &CancellationToken,
    ) -> Result<DirectoryReport> {
        let allowed: Vec<String> = if allowed_extensions.is_empty() {
            self.indexing.allowed_extensions.clone()
        } else {
            allowed_extensions.to_vec()
        };

        let root = path.to_path_buf();
        let files = run_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(|e| Error::Extraction(format!("walk: {}", e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = extension_of(entry.path());
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok(files)
        })
        .await?;

        let semaphore = Arc::new(Semaphore::new(self.indexing.max_concurrency));
        let mut tasks: JoinSet<(PathBuf, Result<()>)> = JoinSet::new();
        let mut report = DirectoryReport::default();

        for file in files {
            if cancel.is_cancelled() {
                break;
            }
            let indexer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let input = DocumentInput::from_path(
                    document_id_for_path(&file),
                    file.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    file.clone(),
                );
                let result = indexer.index_document(input, &token).await;
                (file, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (file, result) = joined.map_err(|e| Error::Index(format!("task join: {}", e)))?;
            match result {
                Ok(()) => report.indexed += 1,
                Err(Error::Cancelled) => {}
                Err(err) => {
                    tracing::warn!(file = %file.display(), error = %err, "skipping file");
                    report.failures.push((file, err));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::info!(
            indexed = report.indexed,
            failed = report.failures.len(),
            "directory indexing complete"
        );
        Ok(report)
    }

    async fn extract_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Extraction(format!("read {}: {}", path.display(), e)))?;
        let ext = extension_of(path);
        run_blocking(move || extract::extract(&bytes, &ext)).await
    }
}

/// Stable document id for a file: the SHA-256 digest of its absolute path.
pub fn document_id_for_path(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The file extension with its leading dot, lowercased; empty when absent.
fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Index(format!("blocking task: {}", e)))?
}
