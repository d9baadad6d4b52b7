use std::cmp::Ordering;

use tracing::debug;

use incidentqa_core::snippet::{clip, excerpt};
use incidentqa_core::traits::{IncidentSource, Retriever};
use incidentqa_core::types::{Candidate, Channel, Field, SearchFilters};
use incidentqa_core::Result;

use crate::index::SparseIndex;

pub const DEFAULT_SNIPPET_CHARS: usize = 600;

/// Keyword channel over a loaded [`SparseIndex`]. Each incident yields at most
/// one candidate per field.
pub struct KeywordRetriever<'a, S: IncidentSource + ?Sized> {
	index: &'a SparseIndex,
	incidents: &'a S,
	snippet_chars: usize,
}

impl<'a, S: IncidentSource + ?Sized> KeywordRetriever<'a, S> {
	pub fn new(index: &'a SparseIndex, incidents: &'a S) -> Self { Self { index, incidents, snippet_chars: DEFAULT_SNIPPET_CHARS } }

	pub fn with_snippet_chars(mut self, snippet_chars: usize) -> Self { self.snippet_chars = snippet_chars.max(1); self }
}

impl<'a, S: IncidentSource + ?Sized> Retriever for KeywordRetriever<'a, S> {
	fn channel(&self) -> Channel { Channel::Keyword }

	fn retrieve(&self, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>> {
		if top_k == 0 || query.trim().is_empty() { return Ok(vec![]); }
		let qv = self.index.query_vector(query);
		if qv.is_empty() { debug!("keyword query has no indexed terms"); return Ok(vec![]); }

		let hits = self.index.score(&qv, |doc| {
			self.incidents.incident(&doc.incident_id).map(|inc| filters.admits(inc)).unwrap_or(false)
		});
		let mut ranked: Vec<(usize, f32)> = hits;
		ranked.sort_by(|a, b| {
			let (da, db) = (&self.index.docs[a.0], &self.index.docs[b.0]);
			b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal)
				.then_with(|| da.incident_id.cmp(&db.incident_id))
				.then_with(|| da.field.cmp(&db.field))
		});
		ranked.truncate(top_k);

		let terms = self.index.analyzer().tokens(query);
		let mut out = Vec::with_capacity(ranked.len());
		for (doc_idx, score) in ranked {
			let doc = &self.index.docs[doc_idx];
			let Some(inc) = self.incidents.incident(&doc.incident_id) else { continue };
			let (desc_snippet, resolution_snippet) = match doc.field {
				Field::Desc => (excerpt(&inc.desc, &terms, self.snippet_chars), clip(&inc.resolution, self.snippet_chars)),
				Field::Resolution => (clip(&inc.desc, self.snippet_chars), excerpt(&inc.resolution, &terms, self.snippet_chars)),
			};
			out.push(Candidate { incident_id: doc.incident_id.clone(), desc_snippet, resolution_snippet, score, channel: Channel::Keyword, field: doc.field });
		}
		debug!(hits = out.len(), "keyword retrieval done");
		Ok(out)
	}
}
