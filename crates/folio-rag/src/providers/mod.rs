//! Provider abstractions for embeddings, generation, and chunk storage
//!
//! Trait seams let the shells swap the hosted backends for fakes in tests.

pub mod chunk_store;
pub mod embedding;
pub mod generative;
pub mod gemini;
pub mod postgrest;

pub use chunk_store::{CaptionHit, ChunkStoreProvider, HybridHit, LexicalHit, VectorHit};
pub use embedding::EmbeddingProvider;
pub use gemini::GeminiClient;
pub use generative::{GenerativeProvider, TextStream};
pub use postgrest::PostgrestChunkStore;
