//! Sparse TF-IDF index over incident descriptions and resolutions.
//!
//! The artifact is produced offline by the indexer and consumed read-only.
//! Document vectors are L2-normalized so a dot product with a normalized
//! query vector is the cosine similarity.
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use incidentqa_core::types::{Field, Incident};
use incidentqa_core::Result;

use crate::analyzer::Analyzer;

pub type TermId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseDoc {
	pub incident_id: String,
	pub field: Field,
	/// `(term_id, weight)` sorted by term id.
	pub terms: Vec<(TermId, f32)>,
}

#[derive(Serialize, Deserialize)]
pub struct SparseIndex {
	pub version: String,
	pub ngram_max: usize,
	pub vocabulary: HashMap<String, TermId>,
	pub idf: Vec<f32>,
	pub docs: Vec<SparseDoc>,
	#[serde(skip)]
	postings: Vec<Vec<(u32, f32)>>,
	#[serde(skip)]
	analyzer: Option<Analyzer>,
}

impl SparseIndex {
	pub fn load(path: &Path) -> Result<Self> {
		let reader = BufReader::new(fs::File::open(path)?);
		let index: SparseIndex = serde_json::from_reader(reader)?;
		let index = index.finish()?;
		info!(path = %path.display(), docs = index.docs.len(), terms = index.vocabulary.len(), version = %index.version, "loaded sparse index");
		Ok(index)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		let writer = BufWriter::new(fs::File::create(path)?);
		serde_json::to_writer(writer, self)?;
		Ok(())
	}

	/// Validates term ids and builds the in-memory postings lists.
	fn finish(mut self) -> Result<Self> {
		let vocab = self.idf.len();
		if self.vocabulary.len() != vocab {
			return Err(incidentqa_core::Error::Operation(format!(
				"sparse index vocabulary has {} terms but idf has {}", self.vocabulary.len(), vocab
			)));
		}
		if let Some((term, id)) = self.vocabulary.iter().find(|(_, id)| **id as usize >= vocab) {
			return Err(incidentqa_core::Error::Operation(format!("vocabulary term {term:?} has id {id} but idf has {vocab} entries")));
		}
		let mut postings: Vec<Vec<(u32, f32)>> = vec![Vec::new(); vocab];
		for (doc_idx, doc) in self.docs.iter().enumerate() {
			for &(term, weight) in &doc.terms {
				let slot = postings.get_mut(term as usize).ok_or_else(|| {
					incidentqa_core::Error::Operation(format!("term id {term} out of range in {}", doc.incident_id))
				})?;
				slot.push((doc_idx as u32, weight));
			}
		}
		self.postings = postings;
		self.analyzer = Some(Analyzer::new(self.ngram_max));
		Ok(self)
	}

	pub fn analyzer(&self) -> Analyzer {
		self.analyzer.clone().unwrap_or_else(|| Analyzer::new(self.ngram_max))
	}

	/// L2-normalized TF-IDF vector of `text`; unknown terms are ignored.
	pub fn query_vector(&self, text: &str) -> Vec<(TermId, f32)> {
		let mut tf: BTreeMap<TermId, f32> = BTreeMap::new();
		for term in self.analyzer().terms(text) {
			if let Some(&id) = self.vocabulary.get(&term) { *tf.entry(id).or_insert(0.0) += 1.0; }
		}
		let mut v: Vec<(TermId, f32)> = tf.into_iter().map(|(id, c)| (id, c * self.idf[id as usize])).collect();
		l2_normalize(&mut v);
		v
	}

	/// Cosine scores for documents accepted by `eligible`. Only documents
	/// sharing at least one term are returned.
	pub fn score<F>(&self, query: &[(TermId, f32)], mut eligible: F) -> Vec<(usize, f32)>
	where
		F: FnMut(&SparseDoc) -> bool,
	{
		let mut acc: HashMap<u32, f32> = HashMap::new();
		let mut admitted: HashMap<u32, bool> = HashMap::new();
		for &(term, qw) in query {
			let Some(list) = self.postings.get(term as usize) else { continue };
			for &(doc, dw) in list {
				let ok = *admitted.entry(doc).or_insert_with(|| eligible(&self.docs[doc as usize]));
				if ok { *acc.entry(doc).or_insert(0.0) += qw * dw; }
			}
		}
		acc.into_iter().filter(|(_, s)| *s > 0.0).map(|(d, s)| (d as usize, s)).collect()
	}

	pub fn approx_bytes(&self) -> usize {
		let terms: usize = self.vocabulary.keys().map(|k| k.len() + 8).sum();
		let nnz: usize = self.docs.iter().map(|d| d.terms.len()).sum();
		terms + self.idf.len() * 4 + nnz * 16 + self.docs.len() * 48
	}
}

fn l2_normalize(v: &mut [(TermId, f32)]) {
	let norm = v.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
	if norm > 0.0 { for (_, w) in v.iter_mut() { *w /= norm; } }
}

/// Compiles a [`SparseIndex`] from incidents.
pub struct SparseIndexBuilder {
	pub ngram_max: usize,
	pub min_df: usize,
	/// Terms occurring in a larger fraction of documents are dropped.
	pub max_df: f32,
}

impl Default for SparseIndexBuilder {
	fn default() -> Self { Self { ngram_max: 2, min_df: 1, max_df: 0.9 } }
}

impl SparseIndexBuilder {
	pub fn build(&self, incidents: &[Incident]) -> Result<SparseIndex> {
		let analyzer = Analyzer::new(self.ngram_max);
		let mut raw_docs: Vec<(String, Field, HashMap<String, u32>)> = Vec::with_capacity(incidents.len() * 2);
		for inc in incidents {
			for (field, text) in [(Field::Desc, &inc.desc), (Field::Resolution, &inc.resolution)] {
				let mut tf: HashMap<String, u32> = HashMap::new();
				for term in analyzer.terms(text) { *tf.entry(term).or_insert(0) += 1; }
				if !tf.is_empty() { raw_docs.push((inc.incident_id.clone(), field, tf)); }
			}
		}

		let n_docs = raw_docs.len();
		let mut df: BTreeMap<&str, usize> = BTreeMap::new();
		for (_, _, tf) in &raw_docs {
			for term in tf.keys() { *df.entry(term.as_str()).or_insert(0) += 1; }
		}
		let max_count = if n_docs < 3 { usize::MAX } else { (self.max_df * n_docs as f32).floor() as usize };
		let mut vocabulary: HashMap<String, TermId> = HashMap::new();
		let mut idf: Vec<f32> = Vec::new();
		for (term, &count) in &df {
			if count < self.min_df || count > max_count { continue; }
			vocabulary.insert((*term).to_string(), idf.len() as TermId);
			idf.push(((1.0 + n_docs as f32) / (1.0 + count as f32)).ln() + 1.0);
		}

		let mut docs = Vec::with_capacity(n_docs);
		for (incident_id, field, tf) in &raw_docs {
			let mut terms: Vec<(TermId, f32)> = tf
				.iter()
				.filter_map(|(t, &c)| vocabulary.get(t).map(|&id| (id, c as f32 * idf[id as usize])))
				.collect();
			if terms.is_empty() { continue; }
			terms.sort_by_key(|(id, _)| *id);
			l2_normalize(&mut terms);
			docs.push(SparseDoc { incident_id: incident_id.clone(), field: *field, terms });
		}

		let version = fingerprint(&df, n_docs);
		info!(docs = docs.len(), terms = vocabulary.len(), %version, "built sparse index");
		SparseIndex { version, ngram_max: self.ngram_max, vocabulary, idf, docs, postings: Vec::new(), analyzer: None }.finish()
	}
}

fn fingerprint(df: &BTreeMap<&str, usize>, n_docs: usize) -> String {
	let mut hasher = blake3::Hasher::new();
	hasher.update(&(n_docs as u64).to_le_bytes());
	for (term, count) in df {
		hasher.update(term.as_bytes());
		hasher.update(&(*count as u64).to_le_bytes());
	}
	format!("tfidf-v1-{}", &hasher.finalize().to_hex()[..12])
}
