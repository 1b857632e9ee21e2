//! Embedding infrastructure for cross-source matching.
//!
//! - `preprocess`: embedding text and content hash
//! - `storage`: binary codec for stored vectors
//! - `similarity`: cosine similarity and ranking
//! - `cache`: content-addressed vector cache over an [`EmbeddingStore`](crate::store::EmbeddingStore)
//! - `embeddings`: the provider port and the caching, retrying [`Embedder`]
//! - `voyage`: Voyage AI provider over HTTP

pub mod cache;
pub mod embeddings;
pub mod preprocess;
pub mod similarity;
pub mod storage;
pub mod voyage;

pub use cache::EmbeddingCache;
pub use embeddings::{Embedder, EmbeddingError, EmbeddingProvider};
pub use preprocess::{content_hash, text_for_embedding};
pub use similarity::{cosine, rank};
pub use voyage::VoyageProvider;

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "voyage-3.5";
