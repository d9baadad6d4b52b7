//! Filter evaluation over incident metadata.
//!
//! Hard keys (`product`, `since`) restrict the candidate space before any
//! ranking happens. Soft keys never exclude an incident; they are only counted
//! by [`SearchFilters::overlap`] for the filter-match boost.

use serde_json::Value;

use crate::types::{Incident, SearchFilters};

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.product.is_none() && self.since.is_none() && self.extra.is_empty()
    }

    /// Number of filter keys, hard and soft.
    pub fn len(&self) -> usize {
        usize::from(self.product.is_some()) + usize::from(self.since.is_some()) + self.extra.len()
    }

    /// Pre-restriction applied by every retriever before ranking.
    pub fn admits(&self, incident: &Incident) -> bool {
        self.product_matches(incident).unwrap_or(true) && self.since_matches(incident).unwrap_or(true)
    }

    /// `(matched, total)` over all filter keys.
    pub fn overlap(&self, incident: &Incident) -> (usize, usize) {
        let mut matched = 0;
        if self.product_matches(incident) == Some(true) {
            matched += 1;
        }
        if self.since_matches(incident) == Some(true) {
            matched += 1;
        }
        for (key, wanted) in &self.extra {
            if incident.meta.get(key).is_some_and(|have| scalar_eq(have, wanted)) {
                matched += 1;
            }
        }
        (matched, self.len())
    }

    /// Stable textual form used for cache keys. Keys are already ordered.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn product_matches(&self, incident: &Incident) -> Option<bool> {
        let wanted = self.product.as_deref()?;
        Some(incident.meta_str("product").is_some_and(|p| p.trim().eq_ignore_ascii_case(wanted.trim())))
    }

    fn since_matches(&self, incident: &Incident) -> Option<bool> {
        let since = self.since?;
        Some(incident.date().is_some_and(|d| d >= since))
    }
}

fn scalar_eq(have: &Value, wanted: &Value) -> bool {
    match (have, wanted) {
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => have == wanted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Meta;
    use chrono::NaiveDate;

    fn incident(product: &str, date: Option<&str>) -> Incident {
        let mut meta = Meta::new();
        meta.insert("product".into(), Value::from(product));
        if let Some(d) = date {
            meta.insert("date".into(), Value::from(d));
        }
        meta.insert("version".into(), Value::from("V14"));
        Incident { incident_id: "INC".into(), desc: String::new(), resolution: String::new(), meta }
    }

    #[test]
    fn empty_filters_admit_everything() {
        let f = SearchFilters::default();
        assert!(f.is_empty());
        assert!(f.admits(&incident("HYSYS", None)));
        assert_eq!(f.overlap(&incident("HYSYS", None)), (0, 0));
    }

    #[test]
    fn product_and_since_are_hard() {
        let f = SearchFilters {
            product: Some("hysys".into()),
            since: NaiveDate::from_ymd_opt(2023, 6, 1),
            ..Default::default()
        };
        assert!(f.admits(&incident("HYSYS", Some("2023-06-01"))));
        assert!(!f.admits(&incident("HYSYS", Some("2023-05-31"))));
        assert!(!f.admits(&incident("Aspen Plus", Some("2024-01-01"))));
        // Without a date an incident cannot satisfy `since`.
        assert!(!f.admits(&incident("HYSYS", None)));
    }

    #[test]
    fn soft_keys_only_count_toward_overlap() {
        let mut f = SearchFilters::default();
        f.extra.insert("version".into(), Value::from("v14"));
        f.extra.insert("site".into(), Value::from("houston"));
        let inc = incident("HYSYS", None);
        assert!(f.admits(&inc));
        assert_eq!(f.overlap(&inc), (1, 2));
    }
}
