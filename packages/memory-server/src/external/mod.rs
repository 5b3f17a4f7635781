//! Remote collaborators the engine consumes through a uniform
//! invocation contract: embeddings, reranking, and LLM arbitration/gisting.
//!
//! None of these are authored here; each adapter wraps
//! a `reqwest` call behind a local, dependency-free fallback so a stage can
//! degrade instead of failing the caller.

pub mod embedding;
pub mod llm;
pub mod rerank;

pub use embedding::EmbeddingAdapter;
pub use llm::LlmAdapter;
pub use rerank::RerankAdapter;
