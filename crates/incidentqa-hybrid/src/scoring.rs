//! Fusion weights and the pluggable boost policies.
//!
//! Both boosts return values in `[0, 1]` and carry a version string that is
//! reported alongside results, so a change of curve is visible in replays.

use chrono::{DateTime, NaiveDate, Utc};

use incidentqa_core::config::FusionSettings;
use incidentqa_core::types::{Incident, SearchFilters};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub recency: f32,
    pub filter: f32,
}

impl Default for FusionWeights {
    fn default() -> Self { Self { semantic: 0.6, keyword: 0.4, recency: 0.05, filter: 0.05 } }
}

impl From<&FusionSettings> for FusionWeights {
    fn from(s: &FusionSettings) -> Self { Self { semantic: s.w_sem, keyword: s.w_kw, recency: s.w_recency, filter: s.w_filter } }
}

pub trait RecencyBoost: Send + Sync {
    fn version(&self) -> &str;
    /// Non-increasing in the age of `date` relative to `as_of`.
    fn boost(&self, date: Option<NaiveDate>, as_of: DateTime<Utc>) -> f32;
}

pub trait FilterMatchBoost: Send + Sync {
    fn version(&self) -> &str;
    /// Non-decreasing in the number of satisfied filter keys.
    fn boost(&self, incident: &Incident, filters: &SearchFilters) -> f32;
}

/// `0.5^(age_days / half_life_days)`; dates on or after `as_of` score 1 and
/// missing dates score 0.
#[derive(Debug, Clone)]
pub struct HalfLifeRecency {
    pub half_life_days: f32,
}

impl Default for HalfLifeRecency {
    fn default() -> Self { Self { half_life_days: 365.0 } }
}

impl RecencyBoost for HalfLifeRecency {
    fn version(&self) -> &str { "half-life/v1" }

    fn boost(&self, date: Option<NaiveDate>, as_of: DateTime<Utc>) -> f32 {
        let Some(date) = date else { return 0.0 };
        let age_days = (as_of.date_naive() - date).num_days();
        if age_days <= 0 { return 1.0; }
        if self.half_life_days <= 0.0 { return 0.0; }
        0.5f32.powf(age_days as f32 / self.half_life_days).clamp(0.0, 1.0)
    }
}

/// Fraction of filter keys the incident satisfies.
#[derive(Debug, Clone, Default)]
pub struct OverlapFilterBoost;

impl FilterMatchBoost for OverlapFilterBoost {
    fn version(&self) -> &str { "overlap/v1" }

    fn boost(&self, incident: &Incident, filters: &SearchFilters) -> f32 {
        let (matched, total) = filters.overlap(incident);
        if total == 0 { 0.0 } else { matched as f32 / total as f32 }
    }
}
