//! End-to-end pipeline tests against mocked backends
//!
//! Both hosted services are stood in by wiremock: the generative API serves
//! expansion JSON and a streamed answer, the chunk store serves RPC rows.
//! The assertions walk the full path a reader question takes through the
//! crate.

use futures_util::StreamExt;
use std::sync::Arc;

use folio_rag::config::{ChatConfig, LlmConfig, QueryConfig, RetrievalConfig, StoreConfig};
use folio_rag::providers::{GeminiClient, GenerativeProvider, PostgrestChunkStore};
use folio_rag::{
    ChatEngine, Connectivity, HybridRetriever, QueryPreprocessor, RetryExecutor, Session,
};

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMS: usize = 8;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn llm_config(base_url: String) -> LlmConfig {
    LlmConfig {
        api_key: "test-key".to_string(),
        base_url,
        embedding_dimensions: DIMS,
        retry_delay_base_secs: 0.0,
        retry_delay_cap_secs: 0.0,
        ..LlmConfig::default()
    }
}

fn store_config(base_url: String) -> StoreConfig {
    StoreConfig {
        base_url,
        api_key: "service-key".to_string(),
        embedding_dimensions: DIMS,
        ..StoreConfig::default()
    }
}

async fn mount_embedding(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/models/text-embedding-004:embedContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embedding": { "values": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8] }
        })))
        .mount(server)
        .await;
}

async fn mount_expansion(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(body_string_contains("rewrite search queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text":
                    "{\"expanded\": \"refund return reimbursement policy\", \
                      \"keywords\": [\"refund\", \"return\"], \
                      \"hypothetical_answer\": \"Refunds are issued within 14 days.\"}"
                }] }
            }]
        })))
        .mount(server)
        .await;
}

async fn mount_rerank(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(body_string_contains("judge how well document passages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": body }] } }]
        })))
        .mount(server)
        .await;
}

async fn mount_chunk_rows(server: &MockServer, rows: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_chunks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/search_chunks_text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

async fn mount_answer_stream(server: &MockServer) {
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Refunds are issued \"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"within 14 days. [Page 4]\"}]}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

struct Pipeline {
    engine: ChatEngine,
    retriever: Arc<HybridRetriever>,
}

fn build_pipeline(llm_base: String, store_base: String, rerank: bool) -> Pipeline {
    let llm_config = llm_config(llm_base);
    let executor = Arc::new(RetryExecutor::new(&llm_config, Connectivity::new()));
    let gemini = Arc::new(GeminiClient::new(&llm_config).unwrap());
    let store = Arc::new(PostgrestChunkStore::new(&store_config(store_base)).unwrap());

    let llm: Arc<dyn GenerativeProvider> = gemini.clone();
    let retriever = Arc::new(HybridRetriever::new(
        store,
        gemini.clone(),
        llm.clone(),
        executor.clone(),
        RetrievalConfig {
            rerank,
            ..RetrievalConfig::default()
        },
    ));
    let preprocessor = Arc::new(QueryPreprocessor::new(
        llm.clone(),
        executor.clone(),
        QueryConfig::default(),
    ));

    Pipeline {
        engine: ChatEngine::new(
            preprocessor,
            retriever.clone(),
            llm,
            executor,
            ChatConfig::default(),
        ),
        retriever,
    }
}

#[tokio::test]
async fn question_flows_from_retrieval_to_streamed_answer() {
    init_tracing();

    let llm_server = MockServer::start().await;
    let store_server = MockServer::start().await;

    mount_embedding(&llm_server).await;
    mount_expansion(&llm_server).await;
    mount_answer_stream(&llm_server).await;
    mount_chunk_rows(
        &store_server,
        serde_json::json!([{
            "id": "11111111-1111-1111-1111-111111111111",
            "file_id": "doc-1",
            "chunk_index": 7,
            "content": "Refunds are issued within 14 days of purchase.",
            "page_number": 4,
            "similarity": 0.81
        }]),
    )
    .await;

    let pipeline = build_pipeline(llm_server.uri(), store_server.uri(), false);
    let mut session = Session::new("doc-1");

    pipeline
        .engine
        .prepare_session(&mut session, "what is the refund policy")
        .await
        .unwrap();
    assert!(session.is_ready());

    let mut stream = pipeline
        .engine
        .answer_stream(&session, "what is the refund policy")
        .await
        .unwrap();

    let mut answer = String::new();
    while let Some(delta) = stream.next().await {
        answer.push_str(&delta.unwrap());
    }
    assert_eq!(answer, "Refunds are issued within 14 days. [Page 4]");
}

#[tokio::test]
async fn exact_match_scenario_keeps_similarity_and_page() {
    init_tracing();

    let llm_server = MockServer::start().await;
    let store_server = MockServer::start().await;

    mount_embedding(&llm_server).await;
    mount_chunk_rows(
        &store_server,
        serde_json::json!([{
            "id": "11111111-1111-1111-1111-111111111111",
            "file_id": "doc-1",
            "chunk_index": 7,
            "content": "Refunds are issued within 14 days of purchase.",
            "page_number": 4,
            "similarity": 0.81
        }]),
    )
    .await;

    let pipeline = build_pipeline(llm_server.uri(), store_server.uri(), false);
    let candidates = pipeline
        .retriever
        .retrieve("what is the refund policy", "doc-1")
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].vector_score, 0.81);
    assert_eq!(candidates[0].chunk.page_number, Some(4));
}

#[tokio::test]
async fn unknown_document_yields_empty_list_not_error() {
    init_tracing();

    let llm_server = MockServer::start().await;
    let store_server = MockServer::start().await;

    mount_embedding(&llm_server).await;
    mount_chunk_rows(&store_server, serde_json::json!([])).await;

    let pipeline = build_pipeline(llm_server.uri(), store_server.uri(), false);
    let candidates = pipeline
        .retriever
        .retrieve("anything at all", "no-such-doc")
        .await
        .unwrap();

    assert!(candidates.is_empty());
}

#[tokio::test]
async fn garbled_rerank_degrades_to_fused_order() {
    init_tracing();

    let llm_server = MockServer::start().await;
    let store_server = MockServer::start().await;

    mount_embedding(&llm_server).await;
    mount_rerank(&llm_server, "sorry, I cannot judge these passages").await;
    mount_chunk_rows(
        &store_server,
        serde_json::json!([
            {
                "id": "11111111-1111-1111-1111-111111111111",
                "file_id": "doc-1",
                "chunk_index": 0,
                "content": "first passage",
                "page_number": 1,
                "similarity": 0.9
            },
            {
                "id": "22222222-2222-2222-2222-222222222222",
                "file_id": "doc-1",
                "chunk_index": 1,
                "content": "second passage",
                "page_number": 2,
                "similarity": 0.8
            }
        ]),
    )
    .await;

    let pipeline = build_pipeline(llm_server.uri(), store_server.uri(), true);
    let candidates = pipeline.retriever.retrieve("q", "doc-1").await.unwrap();

    assert_eq!(candidates.len(), 2);
    // Fused order survives the unusable rerank response
    assert_eq!(candidates[0].chunk.chunk_index, 0);
    assert!(candidates[0].rerank_score.is_none());
}

#[tokio::test]
async fn rerank_scores_reorder_candidates() {
    init_tracing();

    let llm_server = MockServer::start().await;
    let store_server = MockServer::start().await;

    mount_embedding(&llm_server).await;
    mount_rerank(
        &llm_server,
        r#"[{"index": 0, "score": 2.0}, {"index": 1, "score": 9.0, "reason": "verbatim answer"}]"#,
    )
    .await;
    mount_chunk_rows(
        &store_server,
        serde_json::json!([
            {
                "id": "11111111-1111-1111-1111-111111111111",
                "file_id": "doc-1",
                "chunk_index": 0,
                "content": "first passage",
                "page_number": 1,
                "similarity": 0.9
            },
            {
                "id": "22222222-2222-2222-2222-222222222222",
                "file_id": "doc-1",
                "chunk_index": 1,
                "content": "second passage",
                "page_number": 2,
                "similarity": 0.8
            }
        ]),
    )
    .await;

    let pipeline = build_pipeline(llm_server.uri(), store_server.uri(), true);
    let candidates = pipeline.retriever.retrieve("q", "doc-1").await.unwrap();

    assert_eq!(candidates[0].chunk.chunk_index, 1);
    assert_eq!(candidates[0].rerank_score, Some(9.0));
    assert_eq!(candidates[0].rerank_reason.as_deref(), Some("verbatim answer"));
}
