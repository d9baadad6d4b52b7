use incidentqa_core::config::OrchestratorSettings;
use incidentqa_core::snippet::clip;
use incidentqa_core::types::FusedResult;

use crate::reasoning::Evidence;

#[derive(Debug, Clone)]
pub struct ContextBudget {
    pub max_results: usize,
    pub truncated_results: usize,
    pub max_desc_chars: usize,
    pub max_resolution_chars: usize,
    pub max_snippet_chars: usize,
    pub truncated_snippet_chars: usize,
}

impl From<&OrchestratorSettings> for ContextBudget {
    fn from(s: &OrchestratorSettings) -> Self {
        Self {
            max_results: s.context_max_results,
            truncated_results: s.truncated_results,
            max_desc_chars: s.max_desc_chars,
            max_resolution_chars: s.max_resolution_chars,
            max_snippet_chars: s.max_snippet_chars,
            truncated_snippet_chars: s.truncated_snippet_chars,
        }
    }
}

/// Clipped evidence for synthesis. `truncated` keeps only the top
/// `truncated_results` and shortens snippets for the single oversized-context
/// retry.
pub fn build_evidence(results: &[FusedResult], budget: &ContextBudget, truncated: bool) -> Vec<Evidence> {
    let (limit, snippet_chars) = if truncated {
        (budget.truncated_results, budget.truncated_snippet_chars)
    } else {
        (budget.max_results, budget.max_snippet_chars)
    };
    results
        .iter()
        .take(limit)
        .map(|r| Evidence {
            incident_id: r.incident_id.clone(),
            desc: clip(&r.desc, budget.max_desc_chars),
            resolution: clip(&r.resolution, budget.max_resolution_chars),
            snippets: r.snippets.iter().map(|s| clip(&s.text, snippet_chars)).collect(),
            score: r.fused_score,
            source: r.source.label().to_string(),
            meta: r.meta.clone(),
        })
        .collect()
}
