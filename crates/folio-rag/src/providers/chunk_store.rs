//! Chunk store provider trait
//!
//! The store itself lives behind a hosted RPC surface; this trait is the
//! crate's view of it. All operations are scoped to a single document, and
//! tenant isolation is the store's job, not this client's.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentChunk, ImageCaptionRecord};

/// A vector-search match
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The matched chunk
    pub chunk: DocumentChunk,
    /// Cosine-derived similarity (1 - cosine distance), higher is better
    pub similarity: f32,
}

/// A keyword-search match
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// The matched chunk
    pub chunk: DocumentChunk,
    /// Full-text rank from the store, higher is better
    pub rank: f32,
}

/// A store-side hybrid-search match
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub chunk: DocumentChunk,
    pub vector_score: f32,
    pub bm25_score: f32,
    pub combined_score: f32,
}

/// An image-caption match
#[derive(Debug, Clone)]
pub struct CaptionHit {
    pub record: ImageCaptionRecord,
    pub similarity: f32,
}

/// Trait for querying and maintaining the persisted chunk collection
///
/// Implementations:
/// - `PostgrestChunkStore`: hosted Postgres + pgvector behind PostgREST RPC
#[async_trait]
pub trait ChunkStoreProvider: Send + Sync {
    /// Rank chunks of one document by cosine similarity to `embedding`
    ///
    /// Rows with similarity below `threshold` are excluded. Chunks that have
    /// no embedding yet are simply absent from the results.
    async fn vector_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>>;

    /// Rank chunks of one document by full-text relevance to `query`
    ///
    /// Only chunks whose lexical index matches the query are returned.
    async fn lexical_search(&self, file_id: &str, query: &str, k: usize)
        -> Result<Vec<LexicalHit>>;

    /// Store-side fused search combining vector and keyword ranks
    async fn hybrid_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        query: &str,
        k: usize,
        vector_weight: f32,
        bm25_weight: f32,
        threshold: f32,
    ) -> Result<Vec<HybridHit>>;

    /// Rank analyzed image captions of one document by similarity
    async fn image_caption_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<CaptionHit>>;

    /// Caption records that have not been analyzed yet
    async fn pending_captions(&self, file_id: &str, limit: usize)
        -> Result<Vec<ImageCaptionRecord>>;

    /// Idempotent caption upsert; only non-null values overwrite
    async fn upsert_caption(&self, record: &ImageCaptionRecord) -> Result<()>;

    /// Bulk-delete all chunks of a document (document removal or reindex)
    async fn delete_chunks(&self, file_id: &str) -> Result<u64>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
