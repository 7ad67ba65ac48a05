//! Batch image captioning
//!
//! Walks the caption records a document extraction left behind, captions
//! each image with the vision model, embeds the caption, and writes both
//! back. The batch is strictly sequential with a fixed pause between items
//! so a large document never trips the backend's rate limits; one bad image
//! is logged and skipped, never fatal for the batch.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ImageAnalysisConfig;
use crate::error::Result;
use crate::executor::RetryExecutor;
use crate::providers::{ChunkStoreProvider, EmbeddingProvider, GenerativeProvider};
use crate::types::ImageCaptionRecord;

const CAPTION_PROMPT: &str = "Describe this image from a document in one or two sentences. \
Mention any chart type, axis labels, table headers, or figure text that would \
help someone search for it later.";

/// Supplies the raw bytes for an extracted image region
///
/// Rendering pages and cropping regions is the document layer's job; the
/// analyzer only needs a way back to the pixels.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Image bytes and MIME type for a caption record
    async fn image_bytes(&self, record: &ImageCaptionRecord) -> Result<(Vec<u8>, String)>;
}

/// Totals for one captioning batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records captioned, embedded, and written back
    pub analyzed: usize,
    /// Records that failed and were left pending
    pub skipped: usize,
}

/// Captions pending images one at a time
pub struct ImageAnalyzer {
    store: Arc<dyn ChunkStoreProvider>,
    llm: Arc<dyn GenerativeProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    executor: Arc<RetryExecutor>,
    config: ImageAnalysisConfig,
}

impl ImageAnalyzer {
    pub fn new(
        store: Arc<dyn ChunkStoreProvider>,
        llm: Arc<dyn GenerativeProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        executor: Arc<RetryExecutor>,
        config: ImageAnalysisConfig,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            executor,
            config,
        }
    }

    /// Analyze every pending caption record of a document
    pub async fn analyze_pending(
        &self,
        file_id: &str,
        source: &dyn ImageSource,
    ) -> Result<BatchOutcome> {
        let pending = self
            .store
            .pending_captions(file_id, self.config.batch_limit)
            .await?;

        tracing::info!(file_id, pending = pending.len(), "starting caption batch");

        let mut analyzed = 0;
        let mut skipped = 0;

        for (i, record) in pending.iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }

            match self.analyze_one(record, source).await {
                Ok(()) => analyzed += 1,
                Err(err) => {
                    tracing::warn!(
                        file_id,
                        page = record.page_number,
                        image = record.image_index,
                        error = %err,
                        "image caption skipped"
                    );
                    skipped += 1;
                }
            }
        }

        tracing::info!(file_id, analyzed, skipped, "caption batch finished");
        Ok(BatchOutcome { analyzed, skipped })
    }

    async fn analyze_one(
        &self,
        record: &ImageCaptionRecord,
        source: &dyn ImageSource,
    ) -> Result<()> {
        let (bytes, mime_type) = source.image_bytes(record).await?;

        let caption = self
            .executor
            .execute("caption-image", || {
                self.llm.generate_vision(&bytes, &mime_type, CAPTION_PROMPT)
            })
            .await?;

        let embedding = self
            .executor
            .execute("embed-caption", || self.embedder.embed(&caption))
            .await?;

        let analyzed = ImageCaptionRecord {
            caption: Some(caption),
            caption_embedding: Some(embedding),
            ..record.clone()
        };
        self.store.upsert_caption(&analyzed).await
    }
}
