//! Metadata store: durable documents and chunk membership in SQLite.
//!
//! All writes are transactional at document granularity: `put` writes the
//! document row and its chunk-membership rows atomically, `delete` removes
//! both in one transaction. Search hydrates documents through this store,
//! which is what makes index rows without a metadata parent invisible.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;
use crate::models::Document;

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) the SQLite file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_refs (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_refs_document_id ON chunk_refs(document_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write the document row and its chunk-membership rows atomically,
    /// replacing any prior membership for the same id.
    pub async fn put(&self, document: &Document, chunk_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.created_at.timestamp())
        .bind(document.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunk_refs WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        for (ordinal, chunk_id) in chunk_ids.iter().enumerate() {
            sqlx::query("INSERT INTO chunk_refs (chunk_id, document_id, ordinal) VALUES (?, ?, ?)")
                .bind(chunk_id)
                .bind(&document.id)
                .bind(ordinal as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, content, created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row_to_document(&row)))
    }

    /// Fetch documents preserving the input order; absent ids are skipped.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(id).await? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    /// Remove the document row and its chunk-membership rows in one
    /// transaction. Deleting an absent id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_refs WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_document_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// The chunk ids belonging to a document, in ordinal order.
    pub async fn chunk_ids(&self, document_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT chunk_id FROM chunk_refs WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Resolve chunk ids to their parent document ids. Chunks without a
    /// metadata parent are simply absent from the result.
    pub async fn documents_for_chunks(
        &self,
        chunk_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!(
            "SELECT chunk_id, document_id FROM chunk_refs WHERE chunk_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("chunk_id"), row.get("document_id")))
            .collect())
    }

    pub async fn count_documents(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn count_chunks(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_refs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    Document {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: ts_to_datetime(created_at),
        updated_at: ts_to_datetime(updated_at),
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, title: &str, content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn open_store(dir: &TempDir) -> MetadataStore {
        MetadataStore::open(&dir.path().join("meta.sqlite")).await.unwrap()
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let d = doc("d1", "Title", "Body text");
        store.put(&d, &["c1".to_string(), "c2".to_string()]).await.unwrap();

        let fetched = store.get("d1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Title");
        assert_eq!(fetched.content, "Body text");
        assert_eq!(store.chunk_ids("d1").await.unwrap(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_chunk_membership() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.put(&doc("d1", "t", "v1"), &["old1".to_string(), "old2".to_string()]).await.unwrap();
        store.put(&doc("d1", "t", "v2"), &["new1".to_string()]).await.unwrap();

        assert_eq!(store.chunk_ids("d1").await.unwrap(), vec!["new1"]);
        assert_eq!(store.count_documents().await.unwrap(), 1);
        assert_eq!(store.count_chunks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_removes_document_and_membership() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.put(&doc("d1", "t", "c"), &["c1".to_string()]).await.unwrap();
        store.delete("d1").await.unwrap();

        assert!(store.get("d1").await.unwrap().is_none());
        assert!(store.chunk_ids("d1").await.unwrap().is_empty());
        // Idempotent.
        store.delete("d1").await.unwrap();
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.put(&doc("a", "t", "c"), &[]).await.unwrap();
        store.put(&doc("b", "t", "c"), &[]).await.unwrap();

        let docs = store
            .get_many(&["b".to_string(), "missing".to_string(), "a".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn documents_for_chunks_maps_parents() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.put(&doc("d1", "t", "c"), &["c1".to_string(), "c2".to_string()]).await.unwrap();
        store.put(&doc("d2", "t", "c"), &["c3".to_string()]).await.unwrap();

        let parents = store
            .documents_for_chunks(&["c2".to_string(), "c3".to_string(), "orphan".to_string()])
            .await
            .unwrap();
        assert_eq!(parents.get("c2").map(String::as_str), Some("d1"));
        assert_eq!(parents.get("c3").map(String::as_str), Some("d2"));
        assert!(!parents.contains_key("orphan"));
    }

    #[tokio::test]
    async fn list_document_ids_is_sorted() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.put(&doc("b", "t", "c"), &[]).await.unwrap();
        store.put(&doc("a", "t", "c"), &[]).await.unwrap();
        assert_eq!(store.list_document_ids().await.unwrap(), vec!["a", "b"]);
    }
}
