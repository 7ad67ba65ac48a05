//! Hybrid retrieval over the chunk store
//!
//! Runs vector and keyword search side by side, fuses the lists by
//! reciprocal rank, and optionally rescores the fused set with the model.

mod fusion;
mod rerank;

pub use fusion::{rrf_fuse, RetrievalCandidate};

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::executor::RetryExecutor;
use crate::providers::{CaptionHit, ChunkStoreProvider, EmbeddingProvider, GenerativeProvider};
use crate::query::ExpandedQuery;

/// Per-call retrieval knobs, defaulted from configuration
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Number of candidates to return
    pub k: usize,
    /// Vector list weight in fusion
    pub vector_weight: f32,
    /// Keyword list weight in fusion
    pub bm25_weight: f32,
    /// Minimum cosine similarity for vector hits
    pub similarity_threshold: f32,
    /// Whether to run the model rescoring pass
    pub rerank: bool,
}

impl RetrievalOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            k: config.match_count,
            vector_weight: config.vector_weight,
            bm25_weight: config.bm25_weight,
            similarity_threshold: config.similarity_threshold,
            rerank: config.rerank,
        }
    }
}

/// Orchestrates vector + keyword retrieval with rank fusion
pub struct HybridRetriever {
    store: Arc<dyn ChunkStoreProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn GenerativeProvider>,
    executor: Arc<RetryExecutor>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn ChunkStoreProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn GenerativeProvider>,
        executor: Arc<RetryExecutor>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            executor,
            config,
        }
    }

    /// Options derived from this retriever's configuration
    pub fn default_options(&self) -> RetrievalOptions {
        RetrievalOptions::from_config(&self.config)
    }

    /// Retrieve with configuration defaults
    pub async fn retrieve(&self, query: &str, file_id: &str) -> Result<Vec<RetrievalCandidate>> {
        self.retrieve_with(query, file_id, &RetrievalOptions::from_config(&self.config))
            .await
    }

    /// Retrieve with explicit options, embedding the raw query text
    pub async fn retrieve_with(
        &self,
        query: &str,
        file_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalCandidate>> {
        self.fetch(query, query, query, file_id, options).await
    }

    /// Retrieve using a preprocessed query
    ///
    /// The hypothetical answer, when present, is the embedding target: a
    /// model-written answer passage tends to land closer to the real answer
    /// chunk than the question does. Keyword search gets the original query
    /// plus the expansion keywords.
    pub async fn retrieve_expanded(
        &self,
        expanded: &ExpandedQuery,
        file_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalCandidate>> {
        let embed_target = if !expanded.hypothetical_answer.trim().is_empty() {
            expanded.hypothetical_answer.as_str()
        } else if !expanded.expanded.trim().is_empty() {
            expanded.expanded.as_str()
        } else {
            expanded.original.as_str()
        };

        let lexical_query = if expanded.keywords.is_empty() {
            expanded.original.clone()
        } else {
            format!("{} {}", expanded.original, expanded.keywords.join(" "))
        };

        self.fetch(embed_target, &lexical_query, &expanded.original, file_id, options)
            .await
    }

    /// Rank analyzed image captions of one document against a query
    pub async fn retrieve_images(
        &self,
        query: &str,
        file_id: &str,
        k: usize,
    ) -> Result<Vec<CaptionHit>> {
        let embedding = self
            .executor
            .execute("embed-query", || self.embedder.embed(query))
            .await?;

        self.store
            .image_caption_search(file_id, &embedding, k, self.config.similarity_threshold)
            .await
    }

    async fn fetch(
        &self,
        embed_text: &str,
        lexical_query: &str,
        rerank_query: &str,
        file_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalCandidate>> {
        // One embedding per retrieval, whatever the embedding target is
        let embedding = self
            .executor
            .execute("embed-query", || self.embedder.embed(embed_text))
            .await?;

        // Over-fetch both lists so fusion has something to work with, then
        // join: fusion never runs on a partial result.
        let fetch_k = options.k.saturating_mul(2);
        let (vector, lexical) = tokio::join!(
            self.store
                .vector_search(file_id, &embedding, fetch_k, options.similarity_threshold),
            self.store.lexical_search(file_id, lexical_query, fetch_k),
        );
        let (vector, lexical) = (vector?, lexical?);

        tracing::debug!(
            file_id,
            vector_hits = vector.len(),
            lexical_hits = lexical.len(),
            "fetched candidate lists"
        );

        let mut candidates = rrf_fuse(
            &vector,
            &lexical,
            options.vector_weight,
            options.bm25_weight,
            self.config.rrf_k,
        );
        candidates.truncate(options.k);

        if options.rerank && candidates.len() > 1 {
            match rerank::rerank_candidates(
                self.llm.as_ref(),
                &self.executor,
                rerank_query,
                &mut candidates,
            )
            .await
            {
                Ok(()) => {}
                // Rescoring is an enhancement; a garbled response must not
                // cost the caller the candidates it already has.
                Err(Error::ParseFailed(msg)) => {
                    tracing::warn!(error = %msg, "rerank response unusable, keeping fused order");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(candidates)
    }
}
