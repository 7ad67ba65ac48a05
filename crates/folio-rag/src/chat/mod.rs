//! Conversational answering over a single document
//!
//! Assembles the outbound prompt from retrieved passages, the caller's
//! conversation history, and a fixed rules block, then drives a streaming
//! generation call. Sessions are plain values owned by the caller: the core
//! holds no hidden conversation state, so concurrent sessions per document
//! need nothing special.

use std::sync::Arc;

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::executor::RetryExecutor;
use crate::providers::{GenerativeProvider, TextStream};
use crate::query::QueryPreprocessor;
use crate::retrieval::{HybridRetriever, RetrievalCandidate};
use crate::types::ConversationTurn;

/// A caller-owned chat session for one document
///
/// Created empty and unprepared; `ChatEngine::prepare_session` must run
/// before the first `answer_stream` call. The history belongs to the caller,
/// who appends turns as the conversation proceeds.
#[derive(Debug, Clone)]
pub struct Session {
    file_id: String,
    history: Vec<ConversationTurn>,
    context: Option<String>,
}

impl Session {
    /// Create an unprepared session for a document
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            history: Vec::new(),
            context: None,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Whether `prepare_session` has run
    pub fn is_ready(&self) -> bool {
        self.context.is_some()
    }

    /// Record a user turn after it has been sent
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.history.push(ConversationTurn::user(text));
    }

    /// Record a model turn after the stream finished
    pub fn push_model(&mut self, text: impl Into<String>) {
        self.history.push(ConversationTurn::model(text));
    }
}

/// Builds prompts and drives chat calls for one document at a time
pub struct ChatEngine {
    preprocessor: Arc<QueryPreprocessor>,
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn GenerativeProvider>,
    executor: Arc<RetryExecutor>,
    config: ChatConfig,
}

impl ChatEngine {
    pub fn new(
        preprocessor: Arc<QueryPreprocessor>,
        retriever: Arc<HybridRetriever>,
        llm: Arc<dyn GenerativeProvider>,
        executor: Arc<RetryExecutor>,
        config: ChatConfig,
    ) -> Self {
        Self {
            preprocessor,
            retriever,
            llm,
            executor,
            config,
        }
    }

    /// Run retrieval for a question and stage the result in the session
    ///
    /// This is the explicit initialization step: `answer_stream` refuses to
    /// run before it. Callers re-run it per question to refresh the staged
    /// passages, or skip it to reuse the previous ones.
    pub async fn prepare_session(&self, session: &mut Session, query: &str) -> Result<()> {
        let translated = self.preprocessor.translate_for_search(query).await?;
        let expanded = self.preprocessor.expand_query(&translated, None).await?;

        let options = self.retriever.default_options();
        let candidates = self
            .retriever
            .retrieve_expanded(&expanded, session.file_id(), &options)
            .await?;

        tracing::info!(
            file_id = session.file_id(),
            passages = candidates.len(),
            "session context staged"
        );

        session.context = Some(build_context(&candidates, self.config.context_char_budget));
        Ok(())
    }

    /// Stream an answer to `user_text` for a prepared session
    ///
    /// The returned sequence is finite and not restartable; dropping it
    /// closes the underlying connection, so abandoning consumption cancels
    /// the remote call. Fails with `SessionNotInitialized` when
    /// `prepare_session` has never run for this session.
    pub async fn answer_stream(&self, session: &Session, user_text: &str) -> Result<TextStream> {
        let context = session
            .context
            .as_deref()
            .ok_or(Error::SessionNotInitialized)?;

        let system = build_system_instruction(context);
        let turns = build_turns(session.history(), user_text);

        self.executor
            .execute("chat-stream", || self.llm.stream_chat(&system, &turns))
            .await
    }

    /// Answer a question about a single image, non-streaming
    pub async fn answer_about_image(
        &self,
        image: &[u8],
        mime_type: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<String> {
        let prompt = match context {
            Some(context) => format!(
                "Surrounding document text:\n{context}\n\nQuestion about the image: {question}"
            ),
            None => question.to_string(),
        };

        self.executor
            .execute("vision", || {
                self.llm.generate_vision(image, mime_type, &prompt)
            })
            .await
    }
}

const SYSTEM_PERSONA: &str = "You are a reading assistant for a single document. \
You answer questions strictly from the passages provided below, in the language \
the user asks in. Cite the page for every claim using the form [Page N].";

const ANSWER_RULES: &str = "Rules:\n\
- Use only the passages above; never use outside knowledge.\n\
- If the passages do not contain the answer, reply exactly: \
\"I could not find this in the document.\"\n\
- Cite every claim with its page reference in the form [Page N].";

/// Assemble the system instruction: persona plus the staged passages
fn build_system_instruction(context: &str) -> String {
    let passages = if context.trim().is_empty() {
        "(no passages matched this question)"
    } else {
        context
    };
    format!("{SYSTEM_PERSONA}\n\n## Document passages\n\n{passages}")
}

/// History verbatim, then the rules block and the new question as one turn
fn build_turns(history: &[ConversationTurn], user_text: &str) -> Vec<ConversationTurn> {
    let mut turns: Vec<ConversationTurn> = history.to_vec();
    turns.push(ConversationTurn::user(format!(
        "{ANSWER_RULES}\n\nQuestion: {user_text}"
    )));
    turns
}

/// Concatenate page-tagged passages under a character budget
///
/// Candidates are taken in rank order; the first passage that would blow the
/// budget ends the context. A missing page number is tagged as unknown
/// rather than dropped, so the citation format stays uniform.
pub(crate) fn build_context(candidates: &[RetrievalCandidate], char_budget: usize) -> String {
    let mut context = String::new();

    for candidate in candidates {
        let tag = match candidate.chunk.page_number {
            Some(page) => format!("[Page {page}]"),
            None => "[Page ?]".to_string(),
        };
        let block = format!("{tag}\n{}\n\n", candidate.chunk.content);
        if context.len() + block.len() > char_budget {
            break;
        }
        context.push_str(&block);
    }

    context
}
