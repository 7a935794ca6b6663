//! Message persistence and retrieval.
//!
//! This module implements the durable, chat-partitioned store behind the
//! `MessageStore` trait:
//!
//! - `embeddings`: fastembed wrapper behind the `Embedder` seam
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: messages.csv record log and vectors.bin persistence
//! - `fuzzy`: OCR-tolerant fallback pattern construction
//! - `vector`: the `VectorStore` composing the above

pub mod embeddings;
mod fuzzy;
mod index;
mod storage;
mod vector;

pub use embeddings::{Embedder, EmbeddingError, FastembedEmbedder};
pub use vector::VectorStore;

/// Default embedding model. Chats here are mixed Ukrainian/Russian/English,
/// so a multilingual model is the baseline.
pub const DEFAULT_MODEL: &str = "multilingual-e5-small";

/// Default similarity threshold for semantic search
pub const DEFAULT_THRESHOLD: f32 = 0.35;
