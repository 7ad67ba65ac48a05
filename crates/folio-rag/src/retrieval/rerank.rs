//! LLM rescoring of fused candidates
//!
//! A single model call scores each candidate 0-10 for relevance to the
//! query. Candidates the model skips keep their fused rank and follow the
//! scored ones, so a lossy model response never loses recall.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::executor::RetryExecutor;
use crate::providers::GenerativeProvider;
use crate::retrieval::fusion::RetrievalCandidate;
use crate::util::strip_code_fences;

const RERANK_SYSTEM: &str = "You judge how well document passages answer a search query. \
     Respond with ONLY a JSON array, no prose and no code fences.";

/// Characters of candidate text shown to the model per passage
const SNIPPET_BUDGET: usize = 500;

/// Rescore `candidates` in place with one model call
pub(crate) async fn rerank_candidates(
    llm: &dyn GenerativeProvider,
    executor: &RetryExecutor,
    query: &str,
    candidates: &mut Vec<RetrievalCandidate>,
) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }

    let prompt = build_rerank_prompt(query, candidates);

    let raw = executor
        .execute("rerank", || llm.generate_text(Some(RERANK_SYSTEM), &prompt))
        .await?;

    let entries = parse_rerank_response(&raw, candidates.len())?;
    apply_rerank(candidates, entries);
    Ok(())
}

fn build_rerank_prompt(query: &str, candidates: &[RetrievalCandidate]) -> String {
    let mut prompt = format!(
        "Score each passage below from 0 (irrelevant) to 10 (directly answers) \
         for the query.\n\
         Return a JSON array of objects: \
         [{{\"index\": 0, \"score\": 7.5, \"reason\": \"...\"}}, ...]. \
         The \"reason\" field is optional.\n\n\
         Query: {query}\n\n"
    );

    for (i, candidate) in candidates.iter().enumerate() {
        let snippet: String = candidate.chunk.content.chars().take(SNIPPET_BUDGET).collect();
        prompt.push_str(&format!("[{i}] {snippet}\n\n"));
    }

    prompt
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
    #[serde(default)]
    reason: Option<String>,
}

/// Decode the model's score array, dropping out-of-range indices
fn parse_rerank_response(raw: &str, candidate_count: usize) -> Result<Vec<RerankEntry>> {
    let json = strip_code_fences(raw);
    let entries: Vec<RerankEntry> = serde_json::from_str(json).map_err(|e| {
        Error::parse_failed(format!("rerank response did not match expected shape: {e}"))
    })?;

    Ok(entries
        .into_iter()
        .filter(|e| e.index < candidate_count)
        .collect())
}

/// Reorder candidates: scored ones first by score descending, then the
/// unscored remainder in its pre-rerank order
fn apply_rerank(candidates: &mut Vec<RetrievalCandidate>, entries: Vec<RerankEntry>) {
    for entry in entries {
        let candidate = &mut candidates[entry.index];
        candidate.rerank_score = Some(entry.score);
        candidate.rerank_reason = entry.reason;
    }

    let all = std::mem::take(candidates);
    let (mut scored, unscored): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|c| c.rerank_score.is_some());

    // Stable sort keeps the fused order among equal rerank scores
    scored.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    *candidates = scored;
    candidates.extend(unscored);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::types::DocumentChunk;

    fn make_candidate(index: u32, fused_score: f32) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk: DocumentChunk {
                id: Uuid::new_v4(),
                file_id: "doc-1".to_string(),
                chunk_index: index,
                content: format!("chunk {index}"),
                page_number: Some(1),
                embedding: None,
            },
            vector_score: 0.0,
            lexical_score: 0.0,
            fused_score,
            rerank_score: None,
            rerank_reason: None,
        }
    }

    #[test]
    fn test_parse_clean_array() {
        let raw = r#"[{"index": 0, "score": 8.0}, {"index": 1, "score": 3.5, "reason": "off topic"}]"#;
        let entries = parse_rerank_response(raw, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].reason.as_deref(), Some("off topic"));
    }

    #[test]
    fn test_parse_fenced_array() {
        let raw = "```json\n[{\"index\": 0, \"score\": 5.0}]\n```";
        let entries = parse_rerank_response(raw, 1).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_parse_drops_out_of_range_indices() {
        let raw = r#"[{"index": 0, "score": 5.0}, {"index": 9, "score": 9.0}]"#;
        let entries = parse_rerank_response(raw, 3).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 0);
    }

    #[test]
    fn test_parse_prose_is_parse_failed() {
        let result = parse_rerank_response("These all look relevant to me.", 3);
        assert!(matches!(result, Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_partial_scores_keep_unscored_in_fused_order() {
        // Five fused candidates; the model scores only indices 0, 2, 4
        let mut candidates: Vec<RetrievalCandidate> =
            (0..5).map(|i| make_candidate(i, 1.0 - i as f32 * 0.1)).collect();
        let id_of = |i: usize| candidates[i].chunk.id;
        let (id1, id3) = (id_of(1), id_of(3));

        let entries = vec![
            RerankEntry { index: 0, score: 2.0, reason: None },
            RerankEntry { index: 2, score: 9.0, reason: None },
            RerankEntry { index: 4, score: 5.0, reason: None },
        ];
        apply_rerank(&mut candidates, entries);

        // Scored candidates first, by score descending
        assert_eq!(candidates[0].rerank_score, Some(9.0));
        assert_eq!(candidates[1].rerank_score, Some(5.0));
        assert_eq!(candidates[2].rerank_score, Some(2.0));
        // Then the unscored ones, still in fused order
        assert_eq!(candidates[3].chunk.id, id1);
        assert_eq!(candidates[4].chunk.id, id3);
        assert!(candidates[3].rerank_score.is_none());
    }

    #[test]
    fn test_full_scores_reorder_everything() {
        let mut candidates: Vec<RetrievalCandidate> =
            (0..3).map(|i| make_candidate(i, 1.0)).collect();

        let entries = vec![
            RerankEntry { index: 0, score: 1.0, reason: None },
            RerankEntry { index: 1, score: 10.0, reason: None },
            RerankEntry { index: 2, score: 5.0, reason: None },
        ];
        apply_rerank(&mut candidates, entries);

        let scores: Vec<f32> = candidates.iter().filter_map(|c| c.rerank_score).collect();
        assert_eq!(scores, vec![10.0, 5.0, 1.0]);
    }

    #[test]
    fn test_prompt_lists_all_candidates() {
        let candidates: Vec<RetrievalCandidate> =
            (0..3).map(|i| make_candidate(i, 1.0)).collect();
        let prompt = build_rerank_prompt("refund policy", &candidates);

        assert!(prompt.contains("Query: refund policy"));
        assert!(prompt.contains("[0] chunk 0"));
        assert!(prompt.contains("[2] chunk 2"));
    }
}
