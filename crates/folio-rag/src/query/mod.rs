//! Query preprocessing: translation and expansion
//!
//! Turns a raw user query into a richer retrieval query before any search
//! runs. Both operations are pure transformations over one query string and
//! have no retrieval side effects.

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::executor::RetryExecutor;
use crate::providers::GenerativeProvider;
use crate::util::{strip_code_fences, truncate_chars};

/// A user query enriched for retrieval
#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    /// The query as the user typed it
    pub original: String,
    /// Query broadened with synonyms and related terms
    pub expanded: String,
    /// Standalone search keywords
    pub keywords: Vec<String>,
    /// A short model-written passage that would answer the query,
    /// used as an alternative embedding target
    pub hypothetical_answer: String,
}

/// Translates and expands user queries ahead of retrieval
pub struct QueryPreprocessor {
    llm: Arc<dyn GenerativeProvider>,
    executor: Arc<RetryExecutor>,
    config: QueryConfig,
    /// Exact-string translation memo, kept for the process lifetime.
    /// A lost concurrent insert only costs one redundant call.
    translation_cache: DashMap<String, String>,
}

impl QueryPreprocessor {
    pub fn new(
        llm: Arc<dyn GenerativeProvider>,
        executor: Arc<RetryExecutor>,
        config: QueryConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            config,
            translation_cache: DashMap::new(),
        }
    }

    /// Translate a query into the corpus language for search
    ///
    /// Queries that already look like corpus-language text skip the network
    /// call entirely; everything else goes through the model once and is
    /// memoized by the exact input string.
    pub async fn translate_for_search(&self, query: &str) -> Result<String> {
        if !self.needs_translation(query) {
            return Ok(query.to_string());
        }

        if let Some(cached) = self.translation_cache.get(query) {
            tracing::debug!("translation cache hit");
            return Ok(cached.clone());
        }

        let prompt = format!(
            "Translate the following search query into {}. \
             Reply with the translation only, no quotes and no commentary.\n\n{}",
            self.config.target_language, query
        );

        let raw = self
            .executor
            .execute("translate-query", || self.llm.generate_text(None, &prompt))
            .await?;

        let translated = self.clean_translation(&raw);
        self.translation_cache
            .insert(query.to_string(), translated.clone());
        Ok(translated)
    }

    /// Whether a query needs the translation call
    ///
    /// The gate errs toward skipping: a corpus-language query with no
    /// diacritics and no source-language words costs nothing.
    fn needs_translation(&self, query: &str) -> bool {
        if query.chars().any(|c| c.is_alphabetic() && !c.is_ascii()) {
            return true;
        }

        query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .any(|word| {
                let lower = word.to_lowercase();
                self.config.source_stopwords.iter().any(|s| *s == lower)
            })
    }

    /// Post-process a raw translation: first line, no quotes, bounded length
    fn clean_translation(&self, raw: &str) -> String {
        let first_line = raw.lines().next().unwrap_or("");
        let unquoted: String = first_line
            .chars()
            .filter(|c| !matches!(c, '"' | '\'' | '\u{201C}' | '\u{201D}'))
            .collect();
        truncate_chars(unquoted.trim(), self.config.max_translated_len).to_string()
    }

    /// Expand a query with synonyms, keywords, and a hypothetical answer
    ///
    /// One model call; the response must decode into exactly the expected
    /// object or the whole expansion fails with `ParseFailed`. Partial
    /// output is never accepted.
    pub async fn expand_query(
        &self,
        query: &str,
        doc_summary: Option<&str>,
    ) -> Result<ExpandedQuery> {
        let prompt = build_expansion_prompt(query, doc_summary);

        let raw = self
            .executor
            .execute("expand-query", || {
                self.llm.generate_text(Some(EXPANSION_SYSTEM), &prompt)
            })
            .await?;

        parse_expansion(query, &raw)
    }
}

const EXPANSION_SYSTEM: &str = "You rewrite search queries for document retrieval. \
     Respond with ONLY a JSON object, no prose and no code fences.";

fn build_expansion_prompt(query: &str, doc_summary: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Rewrite the search query below for better recall.\n\
         Return a JSON object with exactly these fields:\n\
         - \"expanded\": the query broadened with synonyms and related terms\n\
         - \"keywords\": an array of 3-8 standalone search keywords\n\
         - \"hypothetical_answer\": a short passage (2-3 sentences) that a \
         document answering this query would plausibly contain\n\n",
    );
    if let Some(summary) = doc_summary {
        prompt.push_str("The document being searched is about: ");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Query: ");
    prompt.push_str(query);
    prompt
}

#[derive(Deserialize)]
struct ExpansionWire {
    expanded: String,
    keywords: Vec<String>,
    hypothetical_answer: String,
}

fn parse_expansion(original: &str, raw: &str) -> Result<ExpandedQuery> {
    let json = strip_code_fences(raw);
    let wire: ExpansionWire = serde_json::from_str(json).map_err(|e| {
        Error::parse_failed(format!("expansion response did not match expected shape: {e}"))
    })?;

    Ok(ExpandedQuery {
        original: original.to_string(),
        expanded: wire.expanded,
        keywords: wire.keywords,
        hypothetical_answer: wire.hypothetical_answer,
    })
}
