//! PostgREST chunk store client
//!
//! Talks to the hosted Postgres + pgvector instance through its RPC surface.
//! Search functions live as SQL functions exposed under `/rest/v1/rpc`; the
//! caption table is written through the table endpoint with a merge upsert.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::providers::chunk_store::{
    CaptionHit, ChunkStoreProvider, HybridHit, LexicalHit, VectorHit,
};
use crate::types::{DocumentChunk, ImageCaptionRecord};

/// Chunk store backed by PostgREST RPC
pub struct PostgrestChunkStore {
    client: Client,
    base_url: String,
    api_key: String,
    dimensions: usize,
}

impl PostgrestChunkStore {
    /// Create a new store client
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dimensions: config.embedding_dimensions,
        })
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::storage(format!(
                "expected {}-dim query embedding, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }

    /// POST an RPC function call and decode the row set
    async fn rpc<B: Serialize, R: DeserializeOwned>(&self, function: &str, body: &B) -> Result<R> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::storage(format!("{function} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!("{function} returned {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::storage(format!("{function} returned malformed rows: {e}")))
    }
}

#[derive(Serialize)]
struct MatchChunksParams<'a> {
    query_embedding: &'a [f32],
    target_file_id: &'a str,
    match_count: usize,
    similarity_threshold: f32,
}

#[derive(Deserialize)]
struct MatchChunkRow {
    id: Uuid,
    file_id: String,
    chunk_index: u32,
    content: String,
    page_number: Option<u32>,
    similarity: f32,
}

impl MatchChunkRow {
    fn into_hit(self) -> VectorHit {
        VectorHit {
            similarity: self.similarity,
            chunk: DocumentChunk {
                id: self.id,
                file_id: self.file_id,
                chunk_index: self.chunk_index,
                content: self.content,
                page_number: self.page_number,
                embedding: None,
            },
        }
    }
}

#[derive(Serialize)]
struct TextSearchParams<'a> {
    query_text: &'a str,
    target_file_id: &'a str,
    match_count: usize,
}

#[derive(Deserialize)]
struct TextChunkRow {
    id: Uuid,
    file_id: String,
    chunk_index: u32,
    content: String,
    page_number: Option<u32>,
    rank: f32,
}

#[derive(Serialize)]
struct HybridSearchParams<'a> {
    query_embedding: &'a [f32],
    query_text: &'a str,
    target_file_id: &'a str,
    match_count: usize,
    vector_weight: f32,
    bm25_weight: f32,
    similarity_threshold: f32,
}

#[derive(Deserialize)]
struct HybridChunkRow {
    id: Uuid,
    file_id: String,
    chunk_index: u32,
    content: String,
    page_number: Option<u32>,
    vector_score: f32,
    bm25_score: f32,
    combined_score: f32,
}

#[derive(Serialize)]
struct MatchCaptionsParams<'a> {
    query_embedding: &'a [f32],
    target_file_id: &'a str,
    match_count: usize,
    similarity_threshold: f32,
}

#[derive(Deserialize)]
struct CaptionRow {
    id: Uuid,
    file_id: String,
    page_number: u32,
    image_index: u32,
    caption: Option<String>,
    similarity: f32,
}

#[derive(Deserialize)]
struct DeletedRow {
    #[allow(dead_code)]
    id: Uuid,
}

#[async_trait]
impl ChunkStoreProvider for PostgrestChunkStore {
    async fn vector_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>> {
        self.check_dimensions(embedding)?;

        let rows: Vec<MatchChunkRow> = self
            .rpc(
                "match_chunks",
                &MatchChunksParams {
                    query_embedding: embedding,
                    target_file_id: file_id,
                    match_count: k,
                    similarity_threshold: threshold,
                },
            )
            .await?;

        // The SQL function already filters, but a row below the threshold
        // must never reach callers even if the function drifts.
        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(MatchChunkRow::into_hit)
            .filter(|h| h.similarity >= threshold)
            .collect();
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        file_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<LexicalHit>> {
        let rows: Vec<TextChunkRow> = self
            .rpc(
                "search_chunks_text",
                &TextSearchParams {
                    query_text: query,
                    target_file_id: file_id,
                    match_count: k,
                },
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| LexicalHit {
                rank: row.rank,
                chunk: DocumentChunk {
                    id: row.id,
                    file_id: row.file_id,
                    chunk_index: row.chunk_index,
                    content: row.content,
                    page_number: row.page_number,
                    embedding: None,
                },
            })
            .collect())
    }

    async fn hybrid_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        query: &str,
        k: usize,
        vector_weight: f32,
        bm25_weight: f32,
        threshold: f32,
    ) -> Result<Vec<HybridHit>> {
        self.check_dimensions(embedding)?;

        let rows: Vec<HybridChunkRow> = self
            .rpc(
                "hybrid_search_chunks",
                &HybridSearchParams {
                    query_embedding: embedding,
                    query_text: query,
                    target_file_id: file_id,
                    match_count: k,
                    vector_weight,
                    bm25_weight,
                    similarity_threshold: threshold,
                },
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| HybridHit {
                vector_score: row.vector_score,
                bm25_score: row.bm25_score,
                combined_score: row.combined_score,
                chunk: DocumentChunk {
                    id: row.id,
                    file_id: row.file_id,
                    chunk_index: row.chunk_index,
                    content: row.content,
                    page_number: row.page_number,
                    embedding: None,
                },
            })
            .collect())
    }

    async fn image_caption_search(
        &self,
        file_id: &str,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<CaptionHit>> {
        self.check_dimensions(embedding)?;

        let rows: Vec<CaptionRow> = self
            .rpc(
                "match_image_captions",
                &MatchCaptionsParams {
                    query_embedding: embedding,
                    target_file_id: file_id,
                    match_count: k,
                    similarity_threshold: threshold,
                },
            )
            .await?;

        Ok(rows
            .into_iter()
            // The function requires a caption, but guard against null rows
            .filter(|row| row.caption.is_some() && row.similarity >= threshold)
            .map(|row| CaptionHit {
                similarity: row.similarity,
                record: ImageCaptionRecord {
                    id: row.id,
                    file_id: row.file_id,
                    page_number: row.page_number,
                    image_index: row.image_index,
                    caption: row.caption,
                    caption_embedding: None,
                },
            })
            .collect())
    }

    async fn pending_captions(
        &self,
        file_id: &str,
        limit: usize,
    ) -> Result<Vec<ImageCaptionRecord>> {
        let url = format!("{}/rest/v1/image_captions", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[
                ("file_id", format!("eq.{file_id}")),
                ("caption", "is.null".to_string()),
                ("order", "page_number.asc,image_index.asc".to_string()),
                ("limit", limit.to_string()),
                ("select", "id,file_id,page_number,image_index,caption".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::storage(format!("pending captions request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!(
                "pending captions returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::storage(format!("pending captions returned malformed rows: {e}")))
    }

    async fn upsert_caption(&self, record: &ImageCaptionRecord) -> Result<()> {
        let url = format!("{}/rest/v1/image_captions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            // Merge keeps existing values for columns we do not send, which
            // is what makes re-analysis a no-op for filled records.
            .header("Prefer", "resolution=merge-duplicates")
            .query(&[("on_conflict", "file_id,page_number,image_index")])
            .json(record)
            .send()
            .await
            .map_err(|e| Error::storage(format!("caption upsert failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!("caption upsert returned {status}: {body}")));
        }

        Ok(())
    }

    async fn delete_chunks(&self, file_id: &str) -> Result<u64> {
        let url = format!("{}/rest/v1/document_chunks", self.base_url);

        let response = self
            .client
            .delete(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .query(&[
                ("file_id", format!("eq.{file_id}")),
                ("select", "id".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::storage(format!("chunk delete failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!("chunk delete returned {status}: {body}")));
        }

        let deleted: Vec<DeletedRow> = response
            .json()
            .await
            .map_err(|e| Error::storage(format!("chunk delete returned malformed rows: {e}")))?;

        Ok(deleted.len() as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/rest/v1/", self.base_url);
        match self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "postgrest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_store(base_url: String) -> PostgrestChunkStore {
        PostgrestChunkStore::new(&StoreConfig {
            base_url,
            api_key: "service-key".to_string(),
            embedding_dimensions: 3,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    fn chunk_row(id: &str, index: u32, similarity: f32) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "file_id": "doc-1",
            "chunk_index": index,
            "content": format!("chunk {index}"),
            "page_number": 4,
            "similarity": similarity
        })
    }

    #[tokio::test]
    async fn test_vector_search_decodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/match_chunks"))
            .and(body_partial_json(serde_json::json!({
                "target_file_id": "doc-1",
                "match_count": 5,
                "similarity_threshold": 0.6
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                chunk_row("11111111-1111-1111-1111-111111111111", 0, 0.81),
                chunk_row("22222222-2222-2222-2222-222222222222", 1, 0.66),
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let hits = store
            .vector_search("doc-1", &[0.1, 0.2, 0.3], 5, 0.6)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].similarity, 0.81);
        assert_eq!(hits[0].chunk.page_number, Some(4));
    }

    #[tokio::test]
    async fn test_vector_search_filters_below_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/match_chunks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                chunk_row("11111111-1111-1111-1111-111111111111", 0, 0.81),
                chunk_row("22222222-2222-2222-2222-222222222222", 1, 0.41),
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let hits = store
            .vector_search("doc-1", &[0.1, 0.2, 0.3], 5, 0.6)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.similarity >= 0.6));
    }

    #[tokio::test]
    async fn test_vector_search_rejects_wrong_width() {
        let server = MockServer::start().await;
        let store = make_store(server.uri());

        let result = store.vector_search("doc-1", &[0.1, 0.2], 5, 0.6).await;
        assert!(matches!(result, Err(Error::StorageReadFailed(_))));
    }

    #[tokio::test]
    async fn test_lexical_search_decodes_rank() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/search_chunks_text"))
            .and(body_partial_json(serde_json::json!({
                "query_text": "refund policy"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "11111111-1111-1111-1111-111111111111",
                    "file_id": "doc-1",
                    "chunk_index": 2,
                    "content": "refunds are issued within 14 days",
                    "page_number": 4,
                    "rank": 0.42
                }
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let hits = store.lexical_search("doc-1", "refund policy", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rank, 0.42);
    }

    #[tokio::test]
    async fn test_storage_error_on_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let result = store.vector_search("doc-1", &[0.1, 0.2, 0.3], 5, 0.6).await;
        assert!(matches!(result, Err(Error::StorageReadFailed(_))));
    }

    #[tokio::test]
    async fn test_storage_error_on_malformed_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let result = store.lexical_search("doc-1", "q", 5).await;
        assert!(matches!(result, Err(Error::StorageReadFailed(_))));
    }

    #[tokio::test]
    async fn test_caption_search_requires_caption() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/match_image_captions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "11111111-1111-1111-1111-111111111111",
                    "file_id": "doc-1",
                    "page_number": 2,
                    "image_index": 0,
                    "caption": "a bar chart",
                    "similarity": 0.72
                },
                {
                    "id": "22222222-2222-2222-2222-222222222222",
                    "file_id": "doc-1",
                    "page_number": 3,
                    "image_index": 0,
                    "caption": null,
                    "similarity": 0.70
                }
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let hits = store
            .image_caption_search("doc-1", &[0.1, 0.2, 0.3], 5, 0.6)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.caption.as_deref(), Some("a bar chart"));
    }

    #[tokio::test]
    async fn test_pending_captions_filters_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/image_captions"))
            .and(query_param("file_id", "eq.doc-1"))
            .and(query_param("caption", "is.null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "11111111-1111-1111-1111-111111111111",
                    "file_id": "doc-1",
                    "page_number": 2,
                    "image_index": 0
                }
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let pending = store.pending_captions("doc-1", 50).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].caption.is_none());
    }

    #[tokio::test]
    async fn test_upsert_caption_merges() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/image_captions"))
            .and(query_param("on_conflict", "file_id,page_number,image_index"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let record = ImageCaptionRecord {
            id: Uuid::new_v4(),
            file_id: "doc-1".to_string(),
            page_number: 2,
            image_index: 0,
            caption: Some("a bar chart".to_string()),
            caption_embedding: Some(vec![0.1, 0.2, 0.3]),
        };
        store.upsert_caption(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_chunks_counts_rows() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/document_chunks"))
            .and(query_param("file_id", "eq.doc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "11111111-1111-1111-1111-111111111111" },
                { "id": "22222222-2222-2222-2222-222222222222" }
            ])))
            .mount(&server)
            .await;

        let store = make_store(server.uri());
        let deleted = store.delete_chunks("doc-1").await.unwrap();
        assert_eq!(deleted, 2);
    }
}
