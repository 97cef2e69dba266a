//! Search engine: parallel keyword and semantic retrieval with score fusion.
//!
//! A query is embedded once (through the shared cache), both enabled sides
//! are retrieved concurrently, chunk scores are reduced to per-document
//! scores (MAX aggregation), and the two sides are fused by min-max
//! normalizing each candidate set to `[0, 1]` and blending with
//! `(1 - alpha) * keyword + alpha * semantic`. The top documents of every
//! list are hydrated from the metadata store, which silently drops any
//! chunk whose document row is gone — index entries without a metadata
//! parent are invisible by construction.
//!
//! One failed retrieval side degrades the response with a warning; only
//! total failure (every enabled side failed, or hydration failed) is an
//! error to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::embedding::CachedEmbedder;
use crate::error::{Error, Result};
use crate::keyword_index::KeywordIndex;
use crate::models::{Document, MatchKind, Query, SearchResponse, SearchResult};
use crate::store::MetadataStore;
use crate::vector_index::VectorIndex;

pub struct SearchEngine {
    store: Arc<MetadataStore>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<CachedEmbedder>,
    retrieval: RetrievalConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        keyword: Arc<dyn KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<CachedEmbedder>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            keyword,
            vector,
            embedder,
            retrieval,
        }
    }

    pub async fn search(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        if query.text.trim().is_empty() {
            return Err(Error::Validation("query text must not be empty".to_string()));
        }
        if query.limit < 1 {
            return Err(Error::Validation("query limit must be >= 1".to_string()));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let top_k = self.retrieval.top_k_candidates;

        let keyword_side = async {
            if !query.keyword {
                return Ok(Vec::new());
            }
            let index = Arc::clone(&self.keyword);
            let text = query.text.clone();
            tokio::task::spawn_blocking(move || index.search(&text, top_k))
                .await
                .map_err(|e| Error::Index(format!("keyword task: {}", e)))?
        };

        let semantic_side = async {
            if !query.semantic {
                return Ok(Vec::new());
            }
            let query_vec = self.embedder.embed(&query.text).await?;
            let index = Arc::clone(&self.vector);
            tokio::task::spawn_blocking(move || index.search(&query_vec, top_k))
                .await
                .map_err(|e| Error::Index(format!("vector task: {}", e)))?
        };

        // In-flight retrieval work is abandoned on cancellation.
        let (keyword_res, semantic_res) = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = async { tokio::join!(keyword_side, semantic_side) } => res,
        };

        let mut warnings = Vec::new();
        let mut side_errors = Vec::new();
        let enabled = query.keyword as usize + query.semantic as usize;

        let keyword_chunks = match keyword_res {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "keyword side failed, search degraded");
                warnings.push(format!("keyword retrieval failed: {}", e));
                side_errors.push(e);
                Vec::new()
            }
        };
        let semantic_chunks = match semantic_res {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "semantic side failed, search degraded");
                warnings.push(format!("semantic retrieval failed: {}", e));
                side_errors.push(e);
                Vec::new()
            }
        };

        // One failed side degrades the response; every enabled side failing
        // is a real error.
        if enabled > 0 && side_errors.len() == enabled {
            return Err(side_errors.remove(0));
        }

        // Reduce chunk candidates to per-document scores. Chunks whose
        // parent row is gone are dropped here.
        let union: Vec<String> = keyword_chunks
            .iter()
            .chain(semantic_chunks.iter())
            .map(|(id, _)| id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let parents = self.store.documents_for_chunks(&union).await?;

        let keyword_docs = reduce_to_documents(&keyword_chunks, &parents);
        let semantic_docs = reduce_to_documents(&semantic_chunks, &parents);
        let fused = fuse(&keyword_docs, &semantic_docs, self.retrieval.hybrid_alpha);

        let keyword_ranked = ranked(&keyword_docs, query.limit);
        let semantic_ranked = ranked(&semantic_docs, query.limit);
        let fused_ranked: Vec<(String, f32)> =
            fused.into_iter().take(query.limit).collect();

        // Hydrate every document any list needs, once.
        let mut needed: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for (id, _) in keyword_ranked
            .iter()
            .chain(semantic_ranked.iter())
            .chain(fused_ranked.iter())
        {
            if seen.insert(id.clone()) {
                needed.push(id.clone());
            }
        }
        let documents: HashMap<String, Document> = self
            .store
            .get_many(&needed)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        Ok(SearchResponse {
            keyword_results: hydrate(&keyword_ranked, &documents, MatchKind::Keyword),
            semantic_results: hydrate(&semantic_ranked, &documents, MatchKind::Semantic),
            fused_results: hydrate(&fused_ranked, &documents, MatchKind::Hybrid),
            warnings,
        })
    }
}

/// MAX-aggregate chunk scores into document scores, dropping chunks with no
/// metadata parent.
fn reduce_to_documents(
    chunks: &[(String, f32)],
    parents: &HashMap<String, String>,
) -> HashMap<String, f32> {
    let mut docs: HashMap<String, f32> = HashMap::new();
    for (chunk_id, score) in chunks {
        let Some(document_id) = parents.get(chunk_id) else {
            continue;
        };
        docs.entry(document_id.clone())
            .and_modify(|s| *s = s.max(*score))
            .or_insert(*score);
    }
    docs
}

/// Sort a per-side document score map: score descending, document id
/// ascending on ties. Truncates to `limit`.
fn ranked(docs: &HashMap<String, f32>, limit: usize) -> Vec<(String, f32)> {
    let mut out: Vec<(String, f32)> = docs.iter().map(|(id, s)| (id.clone(), *s)).collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out.truncate(limit);
    out
}

/// Min-max normalize a candidate set to `[0, 1]`. All-equal scores
/// normalize to `1.0`.
fn normalize(docs: &HashMap<String, f32>) -> HashMap<String, f32> {
    if docs.is_empty() {
        return HashMap::new();
    }
    let min = docs.values().copied().fold(f32::INFINITY, f32::min);
    let max = docs.values().copied().fold(f32::NEG_INFINITY, f32::max);

    docs.iter()
        .map(|(id, s)| {
            let norm = if (max - min).abs() < f32::EPSILON {
                1.0
            } else {
                (s - min) / (max - min)
            };
            (id.clone(), norm)
        })
        .collect()
}

/// Fuse per-side document scores into one ranking.
///
/// Each side is min-max normalized over its own candidate set; a document
/// absent from a side contributes `0` there. The fused score is the convex
/// combination `(1 - alpha) * keyword + alpha * semantic`, sorted
/// descending with document-id ties ascending.
pub fn fuse(
    keyword: &HashMap<String, f32>,
    semantic: &HashMap<String, f32>,
    alpha: f32,
) -> Vec<(String, f32)> {
    let norm_keyword = normalize(keyword);
    let norm_semantic = normalize(semantic);

    let ids: HashSet<&String> = norm_keyword.keys().chain(norm_semantic.keys()).collect();
    let mut fused: Vec<(String, f32)> = ids
        .into_iter()
        .map(|id| {
            let k = norm_keyword.get(id).copied().unwrap_or(0.0);
            let s = norm_semantic.get(id).copied().unwrap_or(0.0);
            (id.clone(), (1.0 - alpha) * k + alpha * s)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

fn hydrate(
    ranked: &[(String, f32)],
    documents: &HashMap<String, Document>,
    match_kind: MatchKind,
) -> Vec<SearchResult> {
    ranked
        .iter()
        .filter_map(|(id, score)| {
            documents.get(id).map(|doc| SearchResult {
                document: doc.clone(),
                score: *score,
                match_kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f32)]) -> HashMap<String, f32> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    fn score_of(fused: &[(String, f32)], id: &str) -> f32 {
        fused.iter().find(|(i, _)| i == id).map(|(_, s)| *s).unwrap()
    }

    #[test]
    fn normalize_maps_range_to_unit_interval() {
        let norm = normalize(&scores(&[("a", 10.0), ("b", 5.0), ("c", 0.0)]));
        assert!((norm["a"] - 1.0).abs() < 1e-6);
        assert!((norm["b"] - 0.5).abs() < 1e-6);
        assert!(norm["c"].abs() < 1e-6);
    }

    #[test]
    fn normalize_all_equal_gives_one() {
        let norm = normalize(&scores(&[("a", 3.0), ("b", 3.0)]));
        assert!((norm["a"] - 1.0).abs() < 1e-6);
        assert!((norm["b"] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fuse_balanced_weights_ranks_semantic_winner_at_least_as_high() {
        // keyword {a: 1.0, b: 0.5}, semantic {a: 0.0, b: 1.0}, alpha 0.5:
        // normalized keyword {a: 1, b: 0}, semantic {a: 0, b: 1} -> both 0.5.
        let fused = fuse(
            &scores(&[("a", 1.0), ("b", 0.5)]),
            &scores(&[("a", 0.0), ("b", 1.0)]),
            0.5,
        );
        assert!(score_of(&fused, "b") >= score_of(&fused, "a"));
    }

    #[test]
    fn fuse_is_monotone_in_both_sides() {
        // a dominates b on both sides with a strict keyword edge.
        let fused = fuse(
            &scores(&[("a", 0.9), ("b", 0.4), ("c", 0.1)]),
            &scores(&[("a", 0.8), ("b", 0.8)]),
            0.5,
        );
        assert!(score_of(&fused, "a") >= score_of(&fused, "b"));
        let pos = |id: &str| fused.iter().position(|(i, _)| i == id).unwrap();
        assert!(pos("a") <= pos("b"));
    }

    #[test]
    fn fuse_alpha_zero_is_keyword_order() {
        let fused = fuse(
            &scores(&[("a", 10.0), ("b", 5.0), ("c", 1.0)]),
            &scores(&[("a", 0.1), ("b", 0.9)]),
            0.0,
        );
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order[0], "a");
        assert_eq!(order[1], "b");
    }

    #[test]
    fn fuse_alpha_one_is_semantic_order() {
        let fused = fuse(
            &scores(&[("a", 10.0), ("b", 5.0)]),
            &scores(&[("a", 0.1), ("b", 0.9), ("c", 0.5)]),
            1.0,
        );
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order[0], "b");
        assert_eq!(order[1], "c");
    }

    #[test]
    fn fuse_absent_side_contributes_zero() {
        let fused = fuse(&scores(&[("a", 1.0)]), &HashMap::new(), 0.5);
        assert!((score_of(&fused, "a") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fused_ties_break_by_document_id() {
        let fused = fuse(
            &scores(&[("z", 1.0), ("m", 1.0)]),
            &HashMap::new(),
            0.0,
        );
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["m", "z"]);
    }

    #[test]
    fn reduce_takes_max_chunk_score_and_drops_orphans() {
        let parents: HashMap<String, String> = [
            ("c1".to_string(), "d1".to_string()),
            ("c2".to_string(), "d1".to_string()),
        ]
        .into_iter()
        .collect();
        let chunks = vec![
            ("c1".to_string(), 0.3),
            ("c2".to_string(), 0.9),
            ("orphan".to_string(), 1.0),
        ];
        let docs = reduce_to_documents(&chunks, &parents);
        assert_eq!(docs.len(), 1);
        assert!((docs["d1"] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn ranked_sorts_by_score_then_id() {
        let ranked = ranked(&scores(&[("b", 0.5), ("a", 0.5), ("c", 0.9)]), 10);
        let order: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
