use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info_span, warn};

use incidentqa_core::config::RetrievalSettings;
use incidentqa_core::snippet::clip;
use incidentqa_core::traits::{Embedder, Retriever};
use incidentqa_core::types::{Candidate, Channel, IndexMeta, Notice, SearchFilters, SearchRequest, SearchResponse};
use incidentqa_core::{Error, Result};
use incidentqa_text::KeywordRetriever;
use incidentqa_vector::SemanticRetriever;

use crate::fusion::FusionEngine;
use crate::store::IndexSnapshot;

/// Runs one retrieval channel against a pinned snapshot. The orchestrator
/// drives channels through this seam so they can be timed out and mocked
/// independently.
pub trait ChannelSearch: Send + Sync {
    fn search(&self, snapshot: &IndexSnapshot, channel: Channel, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>>;
}

pub struct HybridSearchEngine {
    embedder: Arc<dyn Embedder>,
    fusion: FusionEngine,
    retrieval: RetrievalSettings,
    snippet_chars: usize,
}

impl HybridSearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, fusion: FusionEngine, retrieval: RetrievalSettings) -> Self {
        Self { embedder, fusion, retrieval, snippet_chars: incidentqa_text::search::DEFAULT_SNIPPET_CHARS }
    }

    pub fn with_snippet_chars(mut self, chars: usize) -> Self { self.snippet_chars = chars.max(1); self }

    pub fn fusion(&self) -> &FusionEngine { &self.fusion }
    pub fn retrieval(&self) -> &RetrievalSettings { &self.retrieval }
    pub fn embedder(&self) -> &Arc<dyn Embedder> { &self.embedder }

    pub fn index_meta(&self, snapshot: &IndexSnapshot) -> IndexMeta {
        IndexMeta { scoring_policy: self.fusion.policy_version(), ..snapshot.index_meta() }
    }

    /// Both channels in sequence, then fusion, on the calling thread. The
    /// orchestrator runs channels concurrently instead.
    pub fn execute(&self, snapshot: &IndexSnapshot, request: &SearchRequest) -> Result<SearchResponse> {
        validate_request(request)?;
        let _span = info_span!("search", request_id = %request.request_id).entered();
        let top_k = self.retrieval.clamp_top_k(request.top_k);
        let pool = self.retrieval.candidate_pool(top_k);
        let sem = self.search(snapshot, Channel::Semantic, &request.query, pool, &request.filters);
        let kw = self.search(snapshot, Channel::Keyword, &request.query, pool, &request.filters);
        let retry = || self.search(snapshot, Channel::Keyword, &request.query, pool, &request.filters);
        let merged = merge_channel_results(sem, kw, self.retrieval.keyword_only_fallback, retry)?;
        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let results = self.fusion.fuse(&merged.semantic, &merged.keyword, snapshot, &request.filters, top_k, as_of);
        debug!(results = results.len(), degraded = merged.degraded(), "search complete");
        Ok(SearchResponse {
            request_id: request.request_id,
            results,
            index_meta: self.index_meta(snapshot),
            degraded: merged.degraded(),
            notices: merged.notices,
        })
    }
}

impl ChannelSearch for HybridSearchEngine {
    fn search(&self, snapshot: &IndexSnapshot, channel: Channel, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>> {
        match channel {
            Channel::Semantic => SemanticRetriever::new(snapshot.dense(), snapshot, self.embedder.as_ref()).retrieve(query, top_k, filters),
            Channel::Keyword => KeywordRetriever::new(snapshot.sparse(), snapshot).with_snippet_chars(self.snippet_chars).retrieve(query, top_k, filters),
        }
    }
}

pub fn validate_request(request: &SearchRequest) -> Result<()> {
    if request.query.trim().is_empty() { return Err(Error::InvalidRequest("query must not be empty".into())); }
    if request.top_k == 0 { return Err(Error::InvalidRequest("top_k must be > 0".into())); }
    Ok(())
}

/// Channel outcomes after degradation handling.
#[derive(Debug, Default)]
pub struct ChannelResults {
    pub semantic: Vec<Candidate>,
    pub keyword: Vec<Candidate>,
    pub notices: Vec<Notice>,
    /// Both channels answered on the first attempt.
    pub complete: bool,
}

impl ChannelResults {
    pub fn degraded(&self) -> bool { self.notices.iter().any(Notice::degrades) }
}

/// One failed channel becomes a notice. Both failing is fatal unless
/// `keyword_only_fallback` is set, in which case `retry_keyword` runs once.
/// An unloaded index is always fatal.
pub fn merge_channel_results<F>(semantic: Result<Vec<Candidate>>, keyword: Result<Vec<Candidate>>, keyword_only_fallback: bool, retry_keyword: F) -> Result<ChannelResults>
where
    F: FnOnce() -> Result<Vec<Candidate>>,
{
    let mut out = ChannelResults::default();
    match (semantic, keyword) {
        (Err(Error::IndexUnavailable), _) | (_, Err(Error::IndexUnavailable)) => return Err(Error::IndexUnavailable),
        (Ok(s), Ok(k)) => { out.semantic = s; out.keyword = k; out.complete = true; }
        (Ok(s), Err(e)) => {
            warn!(channel = "keyword", error = %e, "retrieval channel failed");
            out.notices.push(Notice::ChannelUnavailable { channel: Channel::Keyword, reason: clip(&e.to_string(), 200) });
            out.semantic = s;
        }
        (Err(e), Ok(k)) => {
            warn!(channel = "semantic", error = %e, "retrieval channel failed");
            out.notices.push(Notice::ChannelUnavailable { channel: Channel::Semantic, reason: clip(&e.to_string(), 200) });
            out.keyword = k;
        }
        (Err(se), Err(ke)) => {
            warn!(semantic = %se, keyword = %ke, "both retrieval channels failed");
            if !keyword_only_fallback {
                return Err(Error::RetrievalUnavailable(format!("semantic: {se}; keyword: {ke}")));
            }
            let k = retry_keyword().map_err(|e| Error::RetrievalUnavailable(format!("keyword-only retry failed: {e}")))?;
            out.notices.push(Notice::ChannelUnavailable { channel: Channel::Semantic, reason: clip(&se.to_string(), 200) });
            out.notices.push(Notice::KeywordOnlyRetry);
            out.keyword = k;
        }
    }
    Ok(out)
}
