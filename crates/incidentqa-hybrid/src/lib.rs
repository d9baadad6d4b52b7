//! incidentqa-hybrid
//!
//! Index snapshot store, scoring policies, the fusion engine and the engine
//! that runs both retrieval channels against a pinned snapshot.
pub mod engine;
pub mod fusion;
pub mod scoring;
pub mod store;

pub use engine::{ChannelSearch, HybridSearchEngine};
pub use fusion::FusionEngine;
pub use scoring::{FilterMatchBoost, FusionWeights, HalfLifeRecency, OverlapFilterBoost, RecencyBoost};
pub use store::{IndexSnapshot, IndexStore};
