use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use incidentqa_core::traits::Embedder;
use incidentqa_core::types::Incident;
use incidentqa_core::{Error, Result};

use crate::cache::EmbeddingCache;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseRow {
    pub incident_id: String,
    pub vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct DenseFile {
    model: String,
    dim: usize,
    rows: Vec<DenseRow>,
}

/// Row-major matrix of unit-length incident vectors.
pub struct DenseIndex {
    model: String,
    dim: usize,
    ids: Vec<String>,
    matrix: Vec<f32>,
}

impl DenseIndex {
    /// Normalizes every row and rejects ragged or duplicated rows.
    pub fn from_rows(model: impl Into<String>, dim: usize, rows: Vec<DenseRow>) -> Result<Self> {
        if dim == 0 { return Err(Error::Operation("dense index dimension must be positive".into())); }
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(rows.len());
        let mut matrix = Vec::with_capacity(rows.len() * dim);
        for mut row in rows {
            if row.vector.len() != dim { return Err(Error::DimensionMismatch { expected: dim, actual: row.vector.len() }); }
            if !seen.insert(row.incident_id.clone()) {
                return Err(Error::Operation(format!("duplicate dense row for {}", row.incident_id)));
            }
            normalize(&mut row.vector);
            ids.push(row.incident_id);
            matrix.extend_from_slice(&row.vector);
        }
        Ok(Self { model: model.into(), dim, ids, matrix })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file: DenseFile = serde_json::from_reader(BufReader::new(fs::File::open(path)?))?;
        let index = Self::from_rows(file.model, file.dim, file.rows)?;
        info!(path = %path.display(), rows = index.len(), dim = index.dim, model = %index.model, "loaded dense index");
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rows = self.ids.iter().enumerate().map(|(i, id)| DenseRow { incident_id: id.clone(), vector: self.row(i).to_vec() }).collect();
        let file = DenseFile { model: self.model.clone(), dim: self.dim, rows };
        serde_json::to_writer(BufWriter::new(fs::File::create(path)?), &file)?;
        Ok(())
    }

    /// Embeds every incident description, reusing cached vectors when the
    /// description and encoder are unchanged.
    pub fn build(embedder: &dyn Embedder, incidents: &[Incident], cache: &mut EmbeddingCache, batch_size: usize) -> anyhow::Result<Self> {
        let model = embedder.model_id().to_string();
        let mut vectors: Vec<Option<Vec<f32>>> = incidents.iter().map(|i| cache.get(&model, &i.desc)).collect();
        let missing: Vec<usize> = vectors.iter().enumerate().filter(|(_, v)| v.is_none()).map(|(i, _)| i).collect();
        info!(total = incidents.len(), cached = incidents.len() - missing.len(), "embedding incident descriptions");
        for chunk in missing.chunks(batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|&i| incidents[i].desc.clone()).collect();
            let embedded = embedder.embed_batch(&texts)?;
            anyhow::ensure!(embedded.len() == texts.len(), "encoder returned {} vectors for {} texts", embedded.len(), texts.len());
            for (&i, v) in chunk.iter().zip(embedded) {
                cache.put(&model, &incidents[i].desc, v.clone());
                vectors[i] = Some(v);
            }
        }
        let rows = incidents.iter().zip(vectors).filter_map(|(inc, v)| v.map(|vector| DenseRow { incident_id: inc.incident_id.clone(), vector })).collect();
        Ok(Self::from_rows(model, embedder.dim(), rows)?)
    }

    pub fn model(&self) -> &str { &self.model }
    pub fn dim(&self) -> usize { self.dim }
    pub fn len(&self) -> usize { self.ids.len() }
    pub fn is_empty(&self) -> bool { self.ids.is_empty() }
    pub fn ids(&self) -> &[String] { &self.ids }
    pub fn incident_id(&self, row: usize) -> &str { &self.ids[row] }
    pub fn row(&self, i: usize) -> &[f32] { &self.matrix[i * self.dim..(i + 1) * self.dim] }
    pub fn approx_bytes(&self) -> usize { self.matrix.len() * 4 + self.ids.iter().map(|s| s.len() + 24).sum::<usize>() }
}

pub(crate) fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 { for x in v.iter_mut() { *x /= norm; } }
}
