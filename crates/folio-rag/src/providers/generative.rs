//! Generative backend trait

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::types::ConversationTurn;

/// Lazy sequence of text deltas from a streaming generation call
///
/// Finite and not restartable. Dropping the stream closes the underlying
/// connection, so abandoning consumption cancels the remote call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for the generative backend
///
/// Implementations:
/// - `GeminiClient`: hosted generative API with SSE streaming
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// One-shot text generation
    async fn generate_text(&self, system: Option<&str>, prompt: &str) -> Result<String>;

    /// Streaming multi-turn generation
    ///
    /// `turns` is the full conversation including the latest user message.
    async fn stream_chat(&self, system: &str, turns: &[ConversationTurn]) -> Result<TextStream>;

    /// One-shot generation over a single image plus a text prompt
    async fn generate_vision(&self, image: &[u8], mime_type: &str, prompt: &str)
        -> Result<String>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
