//! Document chunk and image caption records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One retrievable unit of a source document
///
/// `(file_id, chunk_index)` is unique. Chunks are written once at ingestion
/// and deleted in bulk when the owning document is removed or reindexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique row id
    pub id: Uuid,
    /// Owning document
    pub file_id: String,
    /// Position within the document
    pub chunk_index: u32,
    /// Raw chunk text
    pub content: String,
    /// Source page, when the document format has pages
    pub page_number: Option<u32>,
    /// 768-dim embedding; `None` until the embedding pass has run.
    /// Unembedded chunks are excluded from vector search, never an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl DocumentChunk {
    /// Short preview of the content for logs
    pub fn preview(&self) -> String {
        self.content.chars().take(80).collect()
    }
}

/// A generated caption for an image region extracted from a document page
///
/// Created at extraction time with `caption = None`; the analysis pass fills
/// caption and embedding exactly once. The upsert overwrites only non-null
/// values, so re-running analysis on an already-captioned record is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCaptionRecord {
    /// Unique row id
    pub id: Uuid,
    /// Owning document
    pub file_id: String,
    /// Page the image was extracted from
    pub page_number: u32,
    /// Disambiguates multiple images on one page
    pub image_index: u32,
    /// Generated caption; `None` until analyzed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// 768-dim embedding of the caption; `None` until analyzed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_embedding: Option<Vec<f32>>,
}

impl ImageCaptionRecord {
    /// Whether the analysis pass has filled this record
    pub fn is_analyzed(&self) -> bool {
        self.caption.is_some() && self.caption_embedding.is_some()
    }
}
