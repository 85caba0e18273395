//! # doc-search
//!
//! A documentation retrieval service for release-partitioned Markdown
//! corpora: ranked section search, grounded answers with citations, and
//! agentic corpus updates gated by fact-level conflict detection.
//!
//! ## Architecture
//!
//! Two retrieval tiers share one parsed, fingerprinted corpus index:
//!
//! ```text
//!                       ┌──────────────┐
//!                       │  User Query   │
//!                       └───────┬──────┘
//!               ┌───────────────┴───────────────┐
//!               ▼                               ▼
//!      ┌────────────────┐              ┌────────────────┐
//!      │ Lexical search  │              │  Vector search  │
//!      │ query cache +   │              │ embed → cosine  │
//!      │ singleflight    │              │ filtered top-k  │
//!      └───────┬────────┘              └────────┬───────┘
//!              │                                │
//!              ▼                                ▼
//!      ┌────────────────┐              ┌────────────────┐
//!      │ Ranked sections │              │   Reranker      │
//!      └────────────────┘              │ cross-encoder / │
//!                                      │   heuristic     │
//!                                      └────────┬───────┘
//!                                               ▼
//!                                      ┌────────────────┐
//!                                      │  Synthesis +    │
//!                                      │  grounding      │
//!                                      │  assessment     │
//!                                      └────────────────┘
//! ```
//!
//! Writes go through the update agent: extract facts from the proposed
//! diff, check the fact index for duplicates and conflicts, apply
//! atomically, invalidate caches, emit events. The file watcher feeds the
//! same invalidation path for external edits.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the corpus root, caches, and providers
//! - [`models`] - Shared data types: `Section`, `Chunk`, hits, citations, facts, request/response types
//! - [`docs`] - Corpus discovery and parsing, the fingerprinted index cache, and the chunker
//! - [`search`] - Lexical scorer, singleflight query cache, vector store adapter
//! - [`llm`] - Embedding, reranking, and generation providers with local fallbacks
//! - [`rag`] - Retrieve → rerank → synthesize pipeline with grounding assessment
//! - [`facts`] - Triple extraction and the duplicate/conflict index
//! - [`update`] - Doc update agent: suggest, preflight, atomic apply
//! - [`watch`] - Debounced file watcher driving cache invalidation
//! - [`api`] - Axum HTTP handlers for every operation
//! - [`state`] - Shared application state threaded through handlers
//! - [`events`] - Typed lifecycle event bus
//! - [`metrics`] - Request metrics as a fixed record

pub mod api;
pub mod config;
pub mod docs;
pub mod error;
pub mod events;
pub mod facts;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod rag;
pub mod search;
pub mod state;
pub mod update;
pub mod watch;
