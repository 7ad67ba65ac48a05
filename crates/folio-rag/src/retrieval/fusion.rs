//! Reciprocal rank fusion of vector and keyword result lists

use std::collections::HashMap;
use uuid::Uuid;

use crate::providers::{LexicalHit, VectorHit};
use crate::types::DocumentChunk;

/// A fused candidate produced by one retrieval call
///
/// Transient: lives only for the duration of the call, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    /// The retrieved chunk
    pub chunk: DocumentChunk,
    /// Best cosine similarity seen for this chunk, 0 if vector-only missed it
    pub vector_score: f32,
    /// Best full-text rank seen for this chunk, 0 if keyword search missed it
    pub lexical_score: f32,
    /// Weighted reciprocal-rank-fusion score
    pub fused_score: f32,
    /// Score assigned by the rescoring pass, when it ran
    pub rerank_score: Option<f32>,
    /// Model's stated reason for the rescore
    pub rerank_reason: Option<String>,
}

impl RetrievalCandidate {
    fn seed(chunk: &DocumentChunk) -> Self {
        Self {
            chunk: chunk.clone(),
            vector_score: 0.0,
            lexical_score: 0.0,
            fused_score: 0.0,
            rerank_score: None,
            rerank_reason: None,
        }
    }
}

/// Fuse two ranked lists by weighted reciprocal rank
///
/// Each candidate scores `weight / (rrf_k + rank)` per list it appears in,
/// with 1-based ranks; a list that missed the candidate contributes nothing,
/// so vector-only and keyword-only hits both stay rankable. Duplicates are
/// merged by chunk id. Output is sorted by fused score descending, with
/// chunk-index order breaking exact ties deterministically.
pub fn rrf_fuse(
    vector_hits: &[VectorHit],
    lexical_hits: &[LexicalHit],
    vector_weight: f32,
    bm25_weight: f32,
    rrf_k: f32,
) -> Vec<RetrievalCandidate> {
    let mut by_id: HashMap<Uuid, RetrievalCandidate> = HashMap::new();

    for (rank, hit) in vector_hits.iter().enumerate() {
        let rrf = vector_weight / (rrf_k + rank as f32 + 1.0);
        let entry = by_id
            .entry(hit.chunk.id)
            .or_insert_with(|| RetrievalCandidate::seed(&hit.chunk));
        entry.vector_score = entry.vector_score.max(hit.similarity);
        entry.fused_score += rrf;
    }

    for (rank, hit) in lexical_hits.iter().enumerate() {
        let rrf = bm25_weight / (rrf_k + rank as f32 + 1.0);
        let entry = by_id
            .entry(hit.chunk.id)
            .or_insert_with(|| RetrievalCandidate::seed(&hit.chunk));
        entry.lexical_score = entry.lexical_score.max(hit.rank);
        entry.fused_score += rrf;
    }

    let mut fused: Vec<RetrievalCandidate> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    fused
}
