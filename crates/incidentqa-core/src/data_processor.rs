//! Incident ingestion: reads raw incident records, normalizes their text and
//! drops rows that cannot support an answer.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{Incident, Meta};

/// Raw record shape accepted on input. Spreadsheet-style column names are
/// accepted as aliases.
#[derive(Debug, Deserialize)]
struct RawIncident {
    #[serde(default, alias = "id")]
    incident_id: Option<String>,
    #[serde(default, alias = "description", alias = "Description")]
    desc: String,
    #[serde(default, alias = "Resolution__c", alias = "Resolution")]
    resolution: String,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub min_text_chars: usize,
    pub min_ascii_ratio: f32,
    pub drop_duplicates: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { min_text_chars: 10, min_ascii_ratio: 0.6, drop_duplicates: true }
    }
}

#[derive(Default)]
pub struct DataProcessor {
    config: IngestConfig,
}

impl DataProcessor {
    pub fn new() -> Self { Self::default() }

    pub fn with_config(config: IngestConfig) -> Self { Self { config } }

    /// Every `*.jsonl` file under `data_dir`, in path order.
    pub fn process_directory(&self, data_dir: &Path) -> Result<Vec<Incident>> {
        let files = list_jsonl_files(data_dir);
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no .jsonl incident files found");
            return Ok(vec![]);
        }
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for (file_index, path) in files.iter().enumerate() {
            debug!(file = %path.display(), "processing file {}/{}", file_index + 1, files.len());
            let incidents = self.process_file(path)?;
            for incident in incidents {
                if self.keep_unique(&mut seen, &incident) {
                    all.push(incident);
                }
            }
        }
        info!(files = files.len(), incidents = all.len(), "ingested incidents");
        Ok(all)
    }

    pub fn process_file(&self, path: &Path) -> Result<Vec<Incident>> {
        let source = path.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let reader = BufReader::new(fs::File::open(path)?);
        self.process_lines(&source, reader)
    }

    /// Parses JSON lines from `reader`. Malformed lines and invalid rows are
    /// skipped with a warning rather than failing the batch.
    pub fn process_lines<R: BufRead>(&self, source: &str, reader: R) -> Result<Vec<Incident>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for (row_index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawIncident = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(source, row_index, error = %e, "skipping malformed incident line");
                    continue;
                }
            };
            let desc = clean_text(&raw.desc);
            let resolution = clean_text(&raw.resolution);
            if !self.is_valid_text(&desc) || !self.is_valid_text(&resolution) {
                debug!(source, row_index, "dropping incident with invalid text");
                continue;
            }
            let incident_id = raw
                .incident_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| make_incident_id(source, row_index));
            let incident = Incident { incident_id, desc, resolution, meta: raw.meta };
            if self.keep_unique(&mut seen, &incident) {
                out.push(incident);
            }
        }
        Ok(out)
    }

    /// Drops empty, too short, mostly non-ASCII or symbol-only text.
    pub fn is_valid_text(&self, text: &str) -> bool {
        let t = text.replace("_x000D_", "");
        let t = t.trim();
        let len = t.chars().count();
        if len < self.config.min_text_chars {
            return false;
        }
        let ascii = t.chars().filter(char::is_ascii).count();
        if (ascii as f32) / (len.max(1) as f32) < self.config.min_ascii_ratio {
            return false;
        }
        t.chars().any(char::is_alphanumeric)
    }

    fn keep_unique(&self, seen: &mut HashSet<(String, String)>, incident: &Incident) -> bool {
        !self.config.drop_duplicates || seen.insert((incident.desc.clone(), incident.resolution.clone()))
    }
}

/// Removes BOMs and spreadsheet newline artifacts, trims every line and drops
/// blank lines.
pub fn clean_text(raw: &str) -> String {
    let s = raw.replace('\u{feff}', "").replace("_x000D_", "\n").replace('\r', "\n");
    s.split('\n').map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n")
}

/// Stable id for records that arrive without one.
pub fn make_incident_id(source: &str, row_index: usize) -> String {
    blake3::hash(format!("{source}::{row_index}").as_bytes()).to_hex()[..32].to_string()
}

pub fn read_jsonl(path: &Path) -> Result<Vec<Incident>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

pub fn write_jsonl(path: &Path, incidents: &[Incident]) -> Result<()> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    for incident in incidents {
        serde_json::to_writer(&mut w, incident)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

fn list_jsonl_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("jsonl"))
        .collect();
    files.sort();
    files
}
