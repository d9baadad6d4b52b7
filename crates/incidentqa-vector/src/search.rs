use std::cmp::Ordering;

use tracing::debug;

use incidentqa_core::snippet::clip;
use incidentqa_core::traits::{Embedder, IncidentSource, Retriever};
use incidentqa_core::types::{Candidate, Channel, Field, SearchFilters};
use incidentqa_core::{Error, Result};

use crate::index::{normalize, DenseIndex};

const SNIPPET_CHARS: usize = 600;

/// Semantic channel: cosine similarity between the encoded query and every
/// eligible incident row.
pub struct SemanticRetriever<'a, S: IncidentSource + ?Sized> {
	index: &'a DenseIndex,
	incidents: &'a S,
	embedder: &'a dyn Embedder,
}

impl<'a, S: IncidentSource + ?Sized> SemanticRetriever<'a, S> {
	pub fn new(index: &'a DenseIndex, incidents: &'a S, embedder: &'a dyn Embedder) -> Self { Self { index, incidents, embedder } }

	/// Ranks rows against an already encoded query vector.
	pub fn retrieve_vector(&self, query_vec: &[f32], top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>> {
		if query_vec.len() != self.index.dim() { return Err(Error::DimensionMismatch { expected: self.index.dim(), actual: query_vec.len() }); }
		if top_k == 0 { return Ok(vec![]); }
		let mut q = query_vec.to_vec(); normalize(&mut q);
		let mut scored: Vec<(usize, f32)> = Vec::new();
		for row in 0..self.index.len() {
			let Some(inc) = self.incidents.incident(self.index.incident_id(row)) else { continue };
			if !filters.admits(inc) { continue; }
			let score: f32 = self.index.row(row).iter().zip(&q).map(|(a, b)| a * b).sum();
			if score.is_finite() { scored.push((row, score)); }
		}
		scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| self.index.incident_id(a.0).cmp(self.index.incident_id(b.0))));
		scored.truncate(top_k);
		let out: Vec<Candidate> = scored.into_iter().filter_map(|(row, score)| {
			let inc = self.incidents.incident(self.index.incident_id(row))?;
			Some(Candidate { incident_id: inc.incident_id.clone(), desc_snippet: clip(&inc.desc, SNIPPET_CHARS), resolution_snippet: clip(&inc.resolution, SNIPPET_CHARS), score, channel: Channel::Semantic, field: Field::Desc })
		}).collect();
		debug!(hits = out.len(), "semantic retrieval done");
		Ok(out)
	}
}

impl<'a, S: IncidentSource + ?Sized> Retriever for SemanticRetriever<'a, S> {
	fn channel(&self) -> Channel { Channel::Semantic }

	fn retrieve(&self, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>> {
		if query.trim().is_empty() { return Ok(vec![]); }
		let qv = self.embedder.embed_one(query).map_err(|e| Error::ChannelFailed { channel: Channel::Semantic, reason: e.to_string() })?;
		self.retrieve_vector(&qv, top_k, filters)
	}
}
