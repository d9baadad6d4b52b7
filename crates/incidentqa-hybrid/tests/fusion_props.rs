use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use incidentqa_core::types::{Candidate, Channel, Field, Incident, Meta, SearchFilters};
use incidentqa_hybrid::{FusionEngine, FusionWeights};

fn store() -> HashMap<String, Incident> {
    (0..12)
        .map(|i| {
            let id = format!("INC{i}");
            let mut meta = Meta::new();
            meta.insert("date".into(), serde_json::json!(format!("2023-{:02}-01", i % 12 + 1)));
            (id.clone(), Incident { incident_id: id, desc: format!("desc {i}"), resolution: format!("resolution {i}"), meta })
        })
        .collect()
}

fn candidates(channel: Channel) -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec((0..14usize, 0.0f32..1.0, any::<bool>()), 0..20).prop_map(move |raw| {
        raw.into_iter()
            .map(|(i, score, res)| Candidate {
                incident_id: format!("INC{i}"),
                desc_snippet: format!("d{i}"),
                resolution_snippet: format!("r{i}"),
                score,
                channel,
                field: if res { Field::Resolution } else { Field::Desc },
            })
            .collect()
    })
}

fn weights() -> impl Strategy<Value = FusionWeights> {
    (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0).prop_map(|(semantic, keyword, recency, filter)| FusionWeights { semantic, keyword, recency, filter })
}

proptest! {
    #[test]
    fn output_is_bounded_unique_and_known(sem in candidates(Channel::Semantic), kw in candidates(Channel::Keyword), top_k in 1usize..10, w in weights()) {
        let store = store();
        let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let out = FusionEngine::new(w).fuse(&sem, &kw, &store, &SearchFilters::default(), top_k, as_of);
        prop_assert!(out.len() <= top_k);
        let ids: HashSet<&str> = out.iter().map(|r| r.incident_id.as_str()).collect();
        prop_assert_eq!(ids.len(), out.len());
        prop_assert!(out.iter().all(|r| store.contains_key(&r.incident_id)));
        prop_assert!(out.iter().all(|r| r.snippets.len() <= 2));
    }

    #[test]
    fn fusion_is_deterministic_and_order_independent(sem in candidates(Channel::Semantic), kw in candidates(Channel::Keyword), top_k in 1usize..10) {
        let store = store();
        let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let engine = FusionEngine::default();
        let a = engine.fuse(&sem, &kw, &store, &SearchFilters::default(), top_k, as_of);
        let b = engine.fuse(&sem, &kw, &store, &SearchFilters::default(), top_k, as_of);
        prop_assert_eq!(&a, &b);
        let mut sem_rev = sem.clone(); sem_rev.reverse();
        let mut kw_rev = kw.clone(); kw_rev.reverse();
        let c = engine.fuse(&sem_rev, &kw_rev, &store, &SearchFilters::default(), top_k, as_of);
        let ids_a: Vec<&str> = a.iter().map(|r| r.incident_id.as_str()).collect();
        let ids_c: Vec<&str> = c.iter().map(|r| r.incident_id.as_str()).collect();
        prop_assert_eq!(ids_a, ids_c);
    }

    #[test]
    fn fused_score_is_monotonic(w in weights(), s in 0.0f32..1.0, k in 0.0f32..1.0, bump in 0.0f32..1.0, rec in 0.0f32..1.0, fil in 0.0f32..1.0) {
        let engine = FusionEngine::new(w);
        let base = engine.fused_score(Some(s), Some(k), rec, fil);
        prop_assert!(engine.fused_score(Some(s + bump), Some(k), rec, fil) >= base);
        prop_assert!(engine.fused_score(Some(s), Some(k + bump), rec, fil) >= base);
        prop_assert!(engine.fused_score(Some(s), None, rec, fil) <= engine.fused_score(Some(s), Some(k), rec, fil));
    }
}
