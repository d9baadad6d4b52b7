//! Merges per-channel candidate lists into one ranked, bounded result set.
//!
//! Output is a pure function of the candidate multiset, the incident table,
//! the filters and `as_of`: grouping is keyed by incident id and every sort has
//! a total order, so arrival order of candidates never matters.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use incidentqa_core::config::FusionSettings;
use incidentqa_core::traits::IncidentSource;
use incidentqa_core::types::{Candidate, Channel, FusedResult, SearchFilters, Snippet, Sources};

use crate::scoring::{FilterMatchBoost, FusionWeights, HalfLifeRecency, OverlapFilterBoost, RecencyBoost};

pub const MAX_SNIPPETS_PER_INCIDENT: usize = 2;

#[derive(Clone)]
pub struct FusionEngine {
    weights: FusionWeights,
    recency: Arc<dyn RecencyBoost>,
    filter_boost: Arc<dyn FilterMatchBoost>,
    max_snippets: usize,
    dedupe_same_resolution: bool,
    min_desc_len: usize,
}

#[derive(Default)]
struct Group<'a> {
    score_sem: Option<f32>,
    score_kw: Option<f32>,
    source: Sources,
    candidates: Vec<&'a Candidate>,
}

impl Default for FusionEngine {
    fn default() -> Self { Self::new(FusionWeights::default()) }
}

impl FusionEngine {
    pub fn new(weights: FusionWeights) -> Self {
        Self {
            weights,
            recency: Arc::new(HalfLifeRecency::default()),
            filter_boost: Arc::new(OverlapFilterBoost),
            max_snippets: MAX_SNIPPETS_PER_INCIDENT,
            dedupe_same_resolution: false,
            min_desc_len: 0,
        }
    }

    pub fn from_settings(s: &FusionSettings) -> Self {
        Self {
            weights: FusionWeights::from(s),
            recency: Arc::new(HalfLifeRecency { half_life_days: s.recency_half_life_days }),
            filter_boost: Arc::new(OverlapFilterBoost),
            max_snippets: s.max_snippets_per_incident,
            dedupe_same_resolution: s.dedupe_same_resolution,
            min_desc_len: s.min_desc_len,
        }
    }

    pub fn with_recency(mut self, recency: Arc<dyn RecencyBoost>) -> Self { self.recency = recency; self }
    pub fn with_filter_boost(mut self, boost: Arc<dyn FilterMatchBoost>) -> Self { self.filter_boost = boost; self }
    pub fn with_dedupe_same_resolution(mut self, on: bool) -> Self { self.dedupe_same_resolution = on; self }
    pub fn with_min_desc_len(mut self, min: usize) -> Self { self.min_desc_len = min; self }

    pub fn weights(&self) -> FusionWeights { self.weights }

    pub fn policy_version(&self) -> String { format!("{}+{}", self.recency.version(), self.filter_boost.version()) }

    /// Weighted sum; a missing channel contributes 0.
    pub fn fused_score(&self, score_sem: Option<f32>, score_kw: Option<f32>, recency: f32, filter: f32) -> f32 {
        let w = &self.weights;
        w.semantic * score_sem.unwrap_or(0.0) + w.keyword * score_kw.unwrap_or(0.0) + w.recency * recency + w.filter * filter
    }

    pub fn fuse<S: IncidentSource + ?Sized>(
        &self,
        semantic: &[Candidate],
        keyword: &[Candidate],
        incidents: &S,
        filters: &SearchFilters,
        top_k: usize,
        as_of: DateTime<Utc>,
    ) -> Vec<FusedResult> {
        if top_k == 0 { return vec![]; }

        let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
        for c in semantic.iter().chain(keyword) {
            if !c.score.is_finite() { continue; }
            let g = groups.entry(c.incident_id.as_str()).or_default();
            let slot = match c.channel { Channel::Semantic => &mut g.score_sem, Channel::Keyword => &mut g.score_kw };
            *slot = Some(slot.map_or(c.score, |s| s.max(c.score)));
            g.source.insert(c.channel);
            g.candidates.push(c);
        }

        let mut fused: Vec<FusedResult> = Vec::with_capacity(groups.len());
        for (id, g) in groups {
            let Some(inc) = incidents.incident(id) else { debug!(incident_id = id, "dropping candidate for unknown incident"); continue };
            let recency = self.recency.boost(inc.date(), as_of).clamp(0.0, 1.0);
            let filter = self.filter_boost.boost(inc, filters).clamp(0.0, 1.0);
            fused.push(FusedResult {
                incident_id: inc.incident_id.clone(),
                desc: inc.desc.clone(),
                resolution: inc.resolution.clone(),
                score_sem: g.score_sem,
                score_kw: g.score_kw,
                fused_score: self.fused_score(g.score_sem, g.score_kw, recency, filter),
                source: g.source,
                snippets: self.pick_snippets(&g.candidates),
                meta: inc.meta.clone(),
            });
        }

        fused.sort_by(rank_order);

        let mut seen_resolutions = HashSet::new();
        let mut out = Vec::with_capacity(top_k.min(fused.len()));
        for r in fused {
            if out.len() >= top_k { break; }
            if r.desc.chars().count() < self.min_desc_len { continue; }
            if self.dedupe_same_resolution && !seen_resolutions.insert(normalize_resolution(&r.resolution)) { continue; }
            out.push(r);
        }
        out
    }

    /// Distinct matched snippets ranked by score, then channel, then text.
    fn pick_snippets(&self, candidates: &[&Candidate]) -> Vec<Snippet> {
        let mut snippets: Vec<Snippet> = candidates
            .iter()
            .filter(|c| !c.matched_snippet().trim().is_empty())
            .map(|c| Snippet { channel: c.channel, field: c.field, text: c.matched_snippet().to_string(), score: c.score })
            .collect();
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.channel.cmp(&b.channel)).then_with(|| a.text.cmp(&b.text)));
        let mut seen = HashSet::new();
        snippets.retain(|s| seen.insert(s.text.clone()));
        snippets.truncate(self.max_snippets);
        snippets
    }
}

/// Fused score descending, then results seen by both channels, then id.
fn rank_order(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.source.both().cmp(&a.source.both()))
        .then_with(|| a.incident_id.cmp(&b.incident_id))
}

fn normalize_resolution(s: &str) -> String { s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase() }
