//! Provider clients: embeddings, cross-encoder reranking, and answer
//! generation. Every provider call has a deterministic local fallback so the
//! service degrades instead of failing.

pub mod embeddings;
pub mod generate;
pub mod rerank;
