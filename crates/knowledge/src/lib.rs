//! Knowledge base query handler.
//!
//! Answers a question through a hosted retrieve-and-generate knowledge base,
//! then post-processes the citations into ranked, signed references.

pub mod citations;
pub mod handler;
pub mod rerank;
pub mod retrieve;
pub mod signing;
pub mod types;

// Re-export commonly used types
pub use handler::QueryHandler;
pub use rerank::{BedrockReranker, RankedDocument, Reranker};
pub use retrieve::{BedrockKnowledgeBase, KnowledgeBase};
pub use signing::{S3Uri, S3UrlSigner, UrlSigner};
pub use types::{HandlerConfig, QueryRequest, QueryResponse, Reference, ERROR_ANSWER};
