//! folio-rag: retrieval core for the Folio document reader
//!
//! Everything the mobile and web shells need to answer questions about an
//! uploaded document: query translation and expansion, hybrid vector +
//! keyword retrieval with rank fusion and model rescoring, grounded chat
//! with page citations, and image caption search. Storage and generation
//! are hosted services consumed over HTTP; this crate owns the orchestration
//! and the failure semantics, not the data.

pub mod chat;
pub mod config;
pub mod error;
pub mod executor;
pub mod images;
pub mod providers;
pub mod query;
pub mod retrieval;
pub mod types;

mod util;

pub use chat::{ChatEngine, Session};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use executor::{Connectivity, RetryExecutor};
pub use images::{BatchOutcome, ImageAnalyzer, ImageSource};
pub use query::{ExpandedQuery, QueryPreprocessor};
pub use retrieval::{HybridRetriever, RetrievalCandidate, RetrievalOptions};
pub use types::{ConversationTurn, DocumentChunk, ImageCaptionRecord, Role};
