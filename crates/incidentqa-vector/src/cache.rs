use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use incidentqa_core::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub embedder_id: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Vectors keyed by `(embedder_id, blake3(text))`, persisted between index
/// builds so unchanged incidents are not re-encoded.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: HashMap<(String, String), CacheEntry>,
    dirty: bool,
}

pub fn content_hash(text: &str) -> String { blake3::hash(text.as_bytes()).to_hex().to_string() }

impl EmbeddingCache {
    /// A missing or unreadable cache file yields an empty cache.
    pub fn open(path: &Path) -> Self {
        let file = match fs::File::open(path) { Ok(f) => f, Err(_) => return Self::default() };
        match serde_json::from_reader::<_, Vec<CacheEntry>>(BufReader::new(file)) {
            Ok(list) => {
                debug!(entries = list.len(), "opened embedding cache");
                let entries = list.into_iter().map(|e| ((e.embedder_id.clone(), e.content_hash.clone()), e)).collect();
                Self { entries, dirty: false }
            }
            Err(e) => { warn!(path = %path.display(), error = %e, "ignoring unreadable embedding cache"); Self::default() }
        }
    }

    pub fn get(&self, embedder_id: &str, text: &str) -> Option<Vec<f32>> {
        self.entries.get(&(embedder_id.to_string(), content_hash(text))).map(|e| e.vector.clone())
    }

    pub fn put(&mut self, embedder_id: &str, text: &str, vector: Vec<f32>) {
        let content_hash = content_hash(text);
        let entry = CacheEntry { content_hash: content_hash.clone(), embedder_id: embedder_id.to_string(), vector, created_at: Utc::now() };
        self.entries.insert((embedder_id.to_string(), content_hash), entry);
        self.dirty = true;
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty { return Ok(()); }
        let mut list: Vec<&CacheEntry> = self.entries.values().collect();
        list.sort_by(|a, b| (&a.embedder_id, &a.content_hash).cmp(&(&b.embedder_id, &b.content_hash)));
        serde_json::to_writer(BufWriter::new(fs::File::create(path)?), &list)?;
        self.dirty = false;
        Ok(())
    }
}
