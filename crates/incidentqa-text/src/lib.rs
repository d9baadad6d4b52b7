//! incidentqa-text
//!
//! Keyword channel: a tantivy-based analyzer, the sparse TF-IDF index artifact
//! and the retriever that ranks incidents against it.
pub mod analyzer;
pub mod index;
pub mod search;

pub use analyzer::Analyzer;
pub use index::{SparseDoc, SparseIndex, SparseIndexBuilder};
pub use search::KeywordRetriever;
