//! Vector index: unit-normalized vectors keyed by chunk id, cosine top-k.
//!
//! [`BruteForceVectorIndex`] is the reference backend: a full scan over all
//! stored vectors behind a single-writer/multi-reader lock. An ANN backend
//! can implement the same trait provided it preserves the `search` contract
//! in expectation.
//!
//! The index is ephemeral by default. When opened with a directory it
//! snapshots its contents to `vectors.bin` on `persist`/`close` and reloads
//! them on open: a header (dims, count) followed by per-record id and
//! little-endian f32 values.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

/// Abstract vector store: add/remove/search/close.
///
/// Concurrency contract: concurrent `search` calls are permitted;
/// `add`/`remove` serialize against searches.
pub trait VectorIndex: Send + Sync {
    /// Insert a batch. `ids` and `vectors` must be the same length and every
    /// vector must match the index dimensionality; any mismatch fails the
    /// whole batch with a validation error and leaves the index unchanged.
    /// Duplicate ids replace prior vectors.
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;

    /// Remove one id. Removing an absent id is a no-op.
    fn remove(&self, id: &str) -> Result<()>;

    /// Up to `k` results by descending cosine similarity, ties broken by
    /// insertion order. An empty index returns an empty list.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release backing resources, flushing to disk where applicable.
    fn close(&self) -> Result<()>;
}

#[derive(Default)]
#[derive(Debug)]
struct Inner {
    /// Insertion-ordered `(id, vector)` entries.
    entries: Vec<(String, Vec<f32>)>,
    /// id -> position in `entries`.
    by_id: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct BruteForceVectorIndex {
    dims: usize,
    inner: RwLock<Inner>,
    snapshot_dir: Option<PathBuf>,
}

const SNAPSHOT_FILE: &str = "vectors.bin";

impl BruteForceVectorIndex {
    /// An ephemeral index of dimensionality `dims`.
    pub fn in_memory(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Inner::default()),
            snapshot_dir: None,
        }
    }

    /// A directory-backed index: reloads an existing snapshot if present and
    /// writes one back on `persist`/`close`.
    pub fn open(dir: &Path, dims: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Index(format!("create {}: {}", dir.display(), e)))?;

        let index = Self {
            dims,
            inner: RwLock::new(Inner::default()),
            snapshot_dir: Some(dir.to_path_buf()),
        };

        let snapshot = dir.join(SNAPSHOT_FILE);
        if snapshot.exists() {
            index.load_snapshot(&snapshot)?;
        }
        Ok(index)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Write the snapshot file if this index is directory-backed.
    pub fn persist(&self) -> Result<()> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(());
        };
        let path = dir.join(SNAPSHOT_FILE);
        let inner = self.inner.read();

        let mut out = Vec::new();
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(inner.entries.len() as u32).to_le_bytes());
        for (id, vector) in &inner.entries {
            out.extend_from_slice(&(id.len() as u32).to_le_bytes());
            out.extend_from_slice(id.as_bytes());
            for &v in vector {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }

        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| Error::Index(format!("write snapshot: {}", e)))?;
        file.write_all(&out)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::Index(format!("write snapshot: {}", e)))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::Index(format!("write snapshot: {}", e)))?;
        Ok(())
    }

    fn load_snapshot(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| Error::Index(format!("read snapshot: {}", e)))?;

        let mut cursor = 0usize;
        let read_u32 = |bytes: &[u8], cursor: &mut usize| -> Result<u32> {
            let end = *cursor + 4;
            let slice = bytes
                .get(*cursor..end)
                .ok_or_else(|| Error::Index("truncated snapshot".to_string()))?;
            *cursor = end;
            Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
        };

        let dims = read_u32(&bytes, &mut cursor)? as usize;
        if dims != self.dims {
            return Err(Error::Index(format!(
                "snapshot dimensionality {} does not match configured {}",
                dims, self.dims
            )));
        }
        let count = read_u32(&bytes, &mut cursor)? as usize;

        let mut inner = self.inner.write();
        for _ in 0..count {
            let id_len = read_u32(&bytes, &mut cursor)? as usize;
            let id_end = cursor + id_len;
            let id = std::str::from_utf8(
                bytes
                    .get(cursor..id_end)
                    .ok_or_else(|| Error::Index("truncated snapshot".to_string()))?,
            )
            .map_err(|e| Error::Index(format!("snapshot id: {}", e)))?
            .to_string();
            cursor = id_end;

            let vec_end = cursor + dims * 4;
            let vec_bytes = bytes
                .get(cursor..vec_end)
                .ok_or_else(|| Error::Index("truncated snapshot".to_string()))?;
            cursor = vec_end;
            let vector: Vec<f32> = vec_bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            let pos = inner.entries.len();
            inner.by_id.insert(id.clone(), pos);
            inner.entries.push((id, vector));
        }
        Ok(())
    }
}

impl VectorIndex for BruteForceVectorIndex {
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Validation(format!(
                "{} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        // Validate the whole batch before touching the index.
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            if vector.len() != self.dims {
                return Err(Error::Validation(format!(
                    "vector for {} has dimension {}, index expects {}",
                    id,
                    vector.len(),
                    self.dims
                )));
            }
        }

        let mut inner = self.inner.write();
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            let existing = inner.by_id.get(id).copied();
            match existing {
                Some(idx) => inner.entries[idx].1 = vector.clone(),
                None => {
                    let idx = inner.entries.len();
                    inner.entries.push((id.clone(), vector.clone()));
                    inner.by_id.insert(id.clone(), idx);
                }
            }
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(idx) = inner.by_id.remove(id) {
            inner.entries.remove(idx);
            for pos in inner.by_id.values_mut() {
                if *pos > idx {
                    *pos -= 1;
                }
            }
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dims {
            return Err(Error::Validation(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dims
            )));
        }

        let inner = self.inner.read();
        let mut scored: Vec<(String, f32)> = inner
            .entries
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();

        // Stable sort keeps insertion order for tied scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    fn close(&self) -> Result<()> {
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let index = BruteForceVectorIndex::in_memory(2);
        index
            .add(
                &["a".to_string(), "b".to_string(), "c".to_string()],
                &[
                    unit(vec![1.0, 0.0]),
                    unit(vec![0.0, 1.0]),
                    unit(vec![1.0, 1.0]),
                ],
            )
            .unwrap();

        let results = index.search(&unit(vec![1.0, 0.0]), 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "c");
        assert_eq!(results[2].0, "b");
        assert!(results[0].1 >= results[1].1 && results[1].1 >= results[2].1);
    }

    #[test]
    fn large_index_returns_exactly_k() {
        let index = BruteForceVectorIndex::in_memory(8);
        let ids: Vec<String> = (0..1000).map(|i| format!("c{}", i)).collect();
        let vectors: Vec<Vec<f32>> = (0..1000)
            .map(|i| {
                let mut v = vec![0.0f32; 8];
                v[i % 8] = 1.0;
                v[(i + 3) % 8] = (i % 7) as f32 / 7.0;
                unit(v)
            })
            .collect();
        index.add(&ids, &vectors).unwrap();
        assert_eq!(index.len(), 1000);

        let results = index.search(&unit(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), 10).unwrap();
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn dimension_mismatch_fails_whole_batch() {
        let index = BruteForceVectorIndex::in_memory(2);
        let err = index
            .add(
                &["ok".to_string(), "bad".to_string()],
                &[unit(vec![1.0, 0.0]), vec![1.0, 0.0, 0.0]],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn length_mismatch_is_a_validation_error() {
        let index = BruteForceVectorIndex::in_memory(2);
        let err = index.add(&["a".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn duplicate_id_replaces_prior_vector() {
        let index = BruteForceVectorIndex::in_memory(2);
        index.add(&["a".to_string()], &[unit(vec![1.0, 0.0])]).unwrap();
        index.add(&["a".to_string()], &[unit(vec![0.0, 1.0])]).unwrap();
        assert_eq!(index.len(), 1);

        let results = index.search(&unit(vec![0.0, 1.0]), 1).unwrap();
        assert_eq!(results[0].0, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn remove_is_idempotent() {
        let index = BruteForceVectorIndex::in_memory(2);
        index.add(&["a".to_string()], &[unit(vec![1.0, 0.0])]).unwrap();
        index.remove("a").unwrap();
        index.remove("a").unwrap();
        index.remove("never-existed").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn empty_index_returns_empty_results() {
        let index = BruteForceVectorIndex::in_memory(4);
        let results = index.search(&unit(vec![1.0, 0.0, 0.0, 0.0]), 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let index = BruteForceVectorIndex::in_memory(2);
        let same = unit(vec![1.0, 0.0]);
        index
            .add(
                &["second".to_string(), "first".to_string()],
                &[same.clone(), same.clone()],
            )
            .unwrap();
        let results = index.search(&same, 2).unwrap();
        assert_eq!(results[0].0, "second");
        assert_eq!(results[1].0, "first");
    }

    #[test]
    fn query_dimension_mismatch_rejected() {
        let index = BruteForceVectorIndex::in_memory(4);
        let err = index.search(&[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let index = BruteForceVectorIndex::open(dir.path(), 2).unwrap();
            index
                .add(
                    &["a".to_string(), "b".to_string()],
                    &[unit(vec![1.0, 0.0]), unit(vec![0.0, 1.0])],
                )
                .unwrap();
            index.close().unwrap();
        }

        let reopened = BruteForceVectorIndex::open(dir.path(), 2).unwrap();
        assert_eq!(reopened.len(), 2);
        let results = reopened.search(&unit(vec![1.0, 0.0]), 1).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn snapshot_dimension_mismatch_rejected_on_open() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let index = BruteForceVectorIndex::open(dir.path(), 2).unwrap();
            index.add(&["a".to_string()], &[unit(vec![1.0, 0.0])]).unwrap();
            index.close().unwrap();
        }
        let err = BruteForceVectorIndex::open(dir.path(), 3).unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }
}
