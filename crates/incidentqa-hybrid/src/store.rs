use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use incidentqa_core::data_processor::{read_jsonl, write_jsonl};
use incidentqa_core::traits::{Embedder, IncidentSource};
use incidentqa_core::types::{Incident, IndexMeta};
use incidentqa_core::{Error, Result};
use incidentqa_text::{SparseIndex, SparseIndexBuilder};
use incidentqa_vector::{DenseIndex, EmbeddingCache};

pub const INCIDENTS_FILE: &str = "incidents.jsonl";
pub const DENSE_FILE: &str = "dense.json";
pub const SPARSE_FILE: &str = "sparse.json";
pub const EMBED_CACHE_FILE: &str = "embed_cache.json";

/// One immutable, self-consistent version of the three aligned datasets.
pub struct IndexSnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    incidents: HashMap<String, Incident>,
    dense: DenseIndex,
    sparse: SparseIndex,
}

impl IndexSnapshot {
    /// Rejects dense rows or sparse documents that point at unknown incidents.
    pub fn from_parts(incidents: Vec<Incident>, dense: DenseIndex, sparse: SparseIndex) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(incidents.len());
        for inc in incidents {
            if by_id.contains_key(&inc.incident_id) {
                return Err(Error::Operation(format!("duplicate incident id {}", inc.incident_id)));
            }
            by_id.insert(inc.incident_id.clone(), inc);
        }
        if let Some(id) = dense.ids().iter().find(|id| !by_id.contains_key(id.as_str())) {
            return Err(Error::Operation(format!("dense row {id} has no incident")));
        }
        if let Some(doc) = sparse.docs.iter().find(|d| !by_id.contains_key(&d.incident_id)) {
            return Err(Error::Operation(format!("sparse document {} has no incident", doc.incident_id)));
        }
        Ok(Self { version: 0, loaded_at: Utc::now(), incidents: by_id, dense, sparse })
    }

    pub fn load_dir(dir: &Path) -> Result<Self> {
        let incidents = read_jsonl(&dir.join(INCIDENTS_FILE))?;
        let dense = DenseIndex::load(&dir.join(DENSE_FILE))?;
        let sparse = SparseIndex::load(&dir.join(SPARSE_FILE))?;
        Self::from_parts(incidents, dense, sparse)
    }

    pub fn version(&self) -> u64 { self.version }
    pub fn loaded_at(&self) -> DateTime<Utc> { self.loaded_at }
    pub fn dense(&self) -> &DenseIndex { &self.dense }
    pub fn sparse(&self) -> &SparseIndex { &self.sparse }
    pub fn incidents(&self) -> &HashMap<String, Incident> { &self.incidents }
    pub fn len(&self) -> usize { self.incidents.len() }
    pub fn is_empty(&self) -> bool { self.incidents.is_empty() }

    pub fn approx_bytes(&self) -> usize {
        let table: usize = self.incidents.values().map(|i| i.incident_id.len() * 2 + i.desc.len() + i.resolution.len() + i.meta.len() * 48).sum();
        table + self.dense.approx_bytes() + self.sparse.approx_bytes()
    }

    pub fn index_meta(&self) -> IndexMeta {
        IndexMeta { embed_model: self.dense.model().to_string(), tfidf_version: self.sparse.version.clone(), index_version: self.version, scoring_policy: String::new() }
    }
}

impl IncidentSource for IndexSnapshot {
    fn incident(&self, incident_id: &str) -> Option<&Incident> { self.incidents.get(incident_id) }
}

/// Holder of the current snapshot. Readers pin an `Arc` for the duration of a
/// request; a reload swaps the pointer and older snapshots live until their
/// last reader drops them.
#[derive(Default)]
pub struct IndexStore {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    next_version: AtomicU64,
}

impl IndexStore {
    pub fn new() -> Self { Self::default() }

    pub fn pin(&self) -> Result<Arc<IndexSnapshot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone().ok_or(Error::IndexUnavailable)
    }

    pub fn is_loaded(&self) -> bool { self.current.read().unwrap_or_else(PoisonError::into_inner).is_some() }

    /// Publishes `snapshot` under the next version number. The number is taken
    /// under the write lock so the current version never goes backwards.
    pub fn install(&self, mut snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(snapshot);
        *current = Some(snapshot.clone());
        drop(current);
        info!(version = snapshot.version, incidents = snapshot.len(), approx_bytes = snapshot.approx_bytes(), "index snapshot installed");
        snapshot
    }

    /// Loads `dir` completely before swapping. On failure the previous
    /// snapshot stays current.
    pub fn reload(&self, dir: &Path) -> Result<Arc<IndexSnapshot>> {
        match IndexSnapshot::load_dir(dir) {
            Ok(snapshot) => Ok(self.install(snapshot)),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "index reload failed; keeping current snapshot");
                Err(e)
            }
        }
    }
}

/// Compiles and writes the three artifacts for `incidents` into `dir`,
/// reusing cached description vectors from an earlier build.
pub fn write_artifacts(dir: &Path, incidents: &[Incident], embedder: &dyn Embedder, batch_size: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let cache_path = dir.join(EMBED_CACHE_FILE);
    let mut cache = EmbeddingCache::open(&cache_path);
    let dense = DenseIndex::build(embedder, incidents, &mut cache, batch_size)?;
    let sparse = SparseIndexBuilder::default().build(incidents)?;
    write_jsonl(&dir.join(INCIDENTS_FILE), incidents)?;
    dense.save(&dir.join(DENSE_FILE))?;
    sparse.save(&dir.join(SPARSE_FILE))?;
    cache.save(&cache_path)?;
    info!(dir = %dir.display(), incidents = incidents.len(), "index artifacts written");
    Ok(())
}
