//! incidentqa-vector
//!
//! Dense vector artifact, the embedding cache used while building it, and the
//! semantic retriever.
pub mod cache;
pub mod index;
pub mod search;

pub use cache::EmbeddingCache;
pub use index::{DenseIndex, DenseRow};
pub use search::SemanticRetriever;
