//! # caseforge-search
//!
//! Chunk storage and nearest-neighbour retrieval for caseforge.
//!
//! This crate provides:
//! - Cosine similarity/distance and the deterministic retrieval order
//! - An append-only in-memory [`VectorStore`](caseforge_core::VectorStore)
//! - The [`Retriever`], which enforces scope, limit and ordering on any store
//!
//! The PostgreSQL store lives in `caseforge-db`.

pub mod distance;
pub mod memory_store;
pub mod retriever;

// Re-export core types
pub use caseforge_core::*;

pub use distance::{cosine_distance, cosine_similarity, retrieval_order};
pub use memory_store::InMemoryVectorStore;
pub use retriever::Retriever;
