//! Keyword index: chunk text keyed by chunk id, BM25 ranked retrieval.
//!
//! The tantivy backend owns its index directory. Writes are buffered in the
//! index writer and published atomically by `commit`, which also reloads the
//! reader; the indexer commits once per document so a re-index replaces the
//! document's chunks without a window where old and new chunks coexist.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, Value as TantivyValue, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::{Error, Result};

/// Abstract keyword store: add/remove/search/close, plus an explicit
/// `commit` publishing buffered writes.
///
/// Concurrency contract: concurrent `search` calls are permitted;
/// `add`/`remove` serialize against searches through the backend's own
/// writer lock.
pub trait KeywordIndex: Send + Sync {
    /// Buffer a chunk for indexing. Visible to `search` after `commit`.
    fn add(&self, id: &str, text: &str) -> Result<()>;

    /// Buffer a deletion. Idempotent; removing an absent id is a no-op.
    fn remove(&self, id: &str) -> Result<()>;

    /// Publish buffered adds and removals atomically.
    fn commit(&self) -> Result<()>;

    /// Up to `k` chunk ids by descending BM25 score.
    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>>;

    /// Number of indexed chunks.
    fn count(&self) -> Result<usize>;

    /// Release backing resources.
    fn close(&self) -> Result<()>;
}

pub struct TantivyKeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    text_field: schema::Field,
}

impl TantivyKeywordIndex {
    /// `id` must be STRING (indexed, not tokenized) so that `delete_term`
    /// and duplicate replacement work correctly.
    fn build_schema() -> (Schema, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        (sb.build(), id_field, text_field)
    }

    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Index(format!("create {}: {}", dir.display(), e)))?;

        let (schema, id_field, text_field) = Self::build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| Error::Index(e.to_string()))?;
        let index = if Index::exists(&mmap_dir).map_err(|e| Error::Index(e.to_string()))? {
            Index::open_in_dir(dir)?
        } else {
            Index::create_in_dir(dir, schema)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        let writer = index.writer(50_000_000)?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            id_field,
            text_field,
        })
    }
}

impl KeywordIndex for TantivyKeywordIndex {
    fn add(&self, id: &str, text: &str) -> Result<()> {
        let writer = self.writer.lock();
        // Replace semantics: a buffered delete for the same id precedes the add.
        writer.delete_term(tantivy::Term::from_field_text(self.id_field, id));
        writer.add_document(doc!(
            self.id_field => id,
            self.text_field => text,
        ))?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let writer = self.writer.lock();
        writer.delete_term(tantivy::Term::from_field_text(self.id_field, id));
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let parsed_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                // Queries with reserved syntax fall back to a quoted phrase.
                let escaped = query.replace('"', "");
                query_parser
                    .parse_query(&format!("\"{}\"", escaped))
                    .map_err(|e| Error::Index(format!("query parse: {}", e)))?
            }
        };

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(k.max(1)))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(doc_address)?;
            if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                results.push((id.to_string(), score));
            }
        }
        Ok(results)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    fn close(&self) -> Result<()> {
        self.commit()
    }
}
