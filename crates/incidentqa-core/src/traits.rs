use std::collections::HashMap;

use crate::types::{Candidate, Channel, Incident, SearchFilters};

/// Turns query text into a dense vector comparable with the index artifact.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Read-only lookup of incidents by id.
pub trait IncidentSource: Send + Sync {
    fn incident(&self, incident_id: &str) -> Option<&Incident>;
}

impl IncidentSource for HashMap<String, Incident> {
    fn incident(&self, incident_id: &str) -> Option<&Incident> {
        self.get(incident_id)
    }
}

/// A single retrieval channel. Implementations are side-effect free and never
/// retry; retry policy belongs to the caller.
pub trait Retriever: Send + Sync {
    fn channel(&self) -> Channel;

    /// At most `top_k` candidates in descending channel-local score. Filters
    /// restrict the search space before ranking.
    fn retrieve(&self, query: &str, top_k: usize, filters: &SearchFilters) -> crate::Result<Vec<Candidate>>;
}
