//! Two-phase controller: routing, retrieval, synthesis.
//!
//! A turn walks `Idle -> Routing -> (Searching | SkipSearch) -> Synthesizing -> Done`.
//! Only an unloaded index and an exhausted retrieval end a turn in `Failed`;
//! every other failure is absorbed into a degraded answer with a notice.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use incidentqa_core::config::{OrchestratorSettings, RetrievalSettings, Settings};
use incidentqa_core::snippet::clip;
use incidentqa_core::types::{
    AppliedIncident, Candidate, Channel, ConversationTurn, FusedResult, IndexMeta, Notice, RoutingPlan, SearchFilters, SearchRequest,
    SearchResponse, SynthesisResult,
};
use incidentqa_core::{Error, Result};
use incidentqa_hybrid::engine::{merge_channel_results, validate_request};
use incidentqa_hybrid::{ChannelSearch, FusionEngine, IndexSnapshot, IndexStore};

use crate::backoff::Backoff;
use crate::cache::{CacheKey, ResultCache};
use crate::context::{build_evidence, ContextBudget};
use crate::conversation::{tail, Conversations};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::reasoning::{Evidence, Router, SynthesisInput, Synthesizer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Routing,
    Searching,
    SkipSearch,
    Synthesizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { request_id: Uuid::new_v4(), conversation_id: None, query: query.into(), top_k: None, filters: SearchFilters::default(), as_of: None }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub answer: String,
    pub applied_incidents: Vec<AppliedIncident>,
    pub followups: Vec<String>,
    pub results: Vec<FusedResult>,
    pub plan: RoutingPlan,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
    pub trace: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_meta: Option<IndexMeta>,
    pub cache_hit: bool,
    /// Rate-limit delays slept before synthesis succeeded or gave up.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    pub index_loaded: bool,
    pub index_version: Option<u64>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub incidents: usize,
    pub approx_bytes: usize,
    pub embed_model: Option<String>,
    pub tfidf_version: Option<String>,
    pub scoring_policy: String,
    pub cache_entries: u64,
    pub metrics: MetricsSnapshot,
}

/// Fused results of one retrieval plus what it cost in coverage.
struct Retrieved {
    results: Vec<FusedResult>,
    notices: Vec<Notice>,
    index_meta: IndexMeta,
    /// Set on cache hits of routed turns.
    plan: Option<RoutingPlan>,
    /// Both channels answered, so the results may be cached.
    complete: bool,
}

struct Synthesized {
    result: Result<SynthesisResult>,
    backoff: Vec<Duration>,
}

pub struct Orchestrator {
    store: Arc<IndexStore>,
    channels: Arc<dyn ChannelSearch>,
    fusion: FusionEngine,
    router: Arc<dyn Router>,
    synthesizer: Arc<dyn Synthesizer>,
    cache: ResultCache,
    conversations: Conversations,
    metrics: Metrics,
    retrieval: RetrievalSettings,
    settings: OrchestratorSettings,
    backoff: Backoff,
    budget: ContextBudget,
}

impl Orchestrator {
    pub fn new(
        store: Arc<IndexStore>,
        channels: Arc<dyn ChannelSearch>,
        fusion: FusionEngine,
        router: Arc<dyn Router>,
        synthesizer: Arc<dyn Synthesizer>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            channels,
            fusion,
            router,
            synthesizer,
            cache: ResultCache::new(&settings.cache),
            conversations: Conversations::new(),
            metrics: Metrics::new(),
            retrieval: settings.retrieval.clone(),
            settings: settings.orchestrator.clone(),
            backoff: Backoff::from_settings(&settings.orchestrator),
            budget: ContextBudget::from(&settings.orchestrator),
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self { self.cache = cache; self }
    pub fn with_backoff(mut self, backoff: Backoff) -> Self { self.backoff = backoff; self }

    pub fn store(&self) -> &Arc<IndexStore> { &self.store }
    pub fn conversations(&self) -> &Conversations { &self.conversations }
    pub fn metrics(&self) -> MetricsSnapshot { self.metrics.snapshot() }

    /// Runs one conversational turn. Turns of the same conversation are
    /// serialized; the turn is appended to history only once it completes.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();
        let span = info_span!("ask", request_id = %request.request_id);
        let outcome = self.run_turn(request).instrument(span).await;
        match &outcome {
            Ok(resp) => {
                info!(request_id = %resp.request_id, results = resp.results.len(), degraded = resp.degraded, cache_hit = resp.cache_hit, "ask complete");
                self.metrics.record(started.elapsed(), false, resp.degraded);
            }
            Err(e) => {
                warn!(error = %e, "ask failed");
                self.metrics.record(started.elapsed(), true, false);
            }
        }
        outcome
    }

    async fn run_turn(&self, request: AskRequest) -> Result<AskResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }
        if request.top_k == Some(0) {
            return Err(Error::InvalidRequest("top_k must be > 0".into()));
        }

        let log = request.conversation_id.as_deref().map(|id| self.conversations.log(id));
        let mut turns = match &log {
            Some(log) => Some(log.lock().await),
            None => None,
        };
        let history = turns.as_deref().map(|t| tail(t, self.settings.history_turns)).unwrap_or_default();

        let mut trace = vec![Phase::Idle];
        let mut notices = Vec::new();
        let snapshot = self.store.pin().ok();
        let requested_top_k = self.retrieval.clamp_top_k(request.top_k.unwrap_or(self.retrieval.default_top_k));

        // Keyed on the request as asked; the router's rewrite only steers the channels.
        let cache_key = CacheKey::routed(&request.query, requested_top_k, &request.filters);
        let cached = snapshot.as_ref().and_then(|snap| self.cache_lookup(snap, &cache_key));
        let (plan, retrieved, cache_hit) = match cached {
            Some(mut hit) => {
                debug!("serving fused results from cache");
                let plan = hit.plan.take().unwrap_or_else(|| RoutingPlan {
                    filters: request.filters.clone(),
                    degraded: false,
                    ..RoutingPlan::fallback(requested_top_k)
                });
                (plan, Some(hit), true)
            }
            None => {
                trace.push(Phase::Routing);
                let mut plan = self.route(&request.query, &history, requested_top_k, &mut notices).await;
                plan.top_k = self.retrieval.clamp_top_k(request.top_k.unwrap_or(plan.top_k));
                plan.filters = overlay_filters(&plan.filters, &request.filters);
                if plan.need_search {
                    trace.push(Phase::Searching);
                    let snapshot = match snapshot.as_ref() {
                        Some(s) => s,
                        None => {
                            trace.push(Phase::Failed);
                            debug!(?trace, "turn failed");
                            return Err(Error::IndexUnavailable);
                        }
                    };
                    let query = plan.effective_query(&request.query).to_string();
                    match self.retrieve(snapshot, &query, plan.top_k, &plan.filters, request.as_of).await {
                        Ok(r) => {
                            // A fail-open plan is not cached so the next ask gets routed again.
                            if r.complete && !plan.degraded {
                                self.cache.put(cache_key, r.results.clone(), r.index_meta.clone(), Some(plan.clone()));
                            }
                            (plan, Some(r), false)
                        }
                        Err(e) => {
                            trace.push(Phase::Failed);
                            debug!(?trace, "turn failed");
                            return Err(e);
                        }
                    }
                } else {
                    trace.push(Phase::SkipSearch);
                    (plan, None, false)
                }
            }
        };

        let (results, index_meta) = match retrieved {
            Some(r) => {
                notices.extend(r.notices);
                (r.results, Some(r.index_meta))
            }
            None => (Vec::new(), snapshot.as_ref().map(|s| self.index_meta(s))),
        };

        trace.push(Phase::Synthesizing);
        let synthesized = self.synthesize(&request.query, &history, &plan, &results, &mut notices).await;
        let searched = cache_hit || plan.need_search;
        let outcome = match synthesized.result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "synthesis unavailable; answering with raw results");
                notices.push(Notice::SynthesisUnavailable { reason: clip(&e.to_string(), 200) });
                unavailable_answer(&e, &results, searched)
            }
        };
        trace.push(Phase::Done);

        let degraded = plan.degraded || notices.iter().any(Notice::degrades);
        if let Some(turns) = turns.as_mut() {
            turns.push(ConversationTurn { query: request.query.clone(), results: results.clone(), answer: outcome.answer.clone() });
        }

        Ok(AskResponse {
            request_id: request.request_id,
            conversation_id: request.conversation_id,
            answer: outcome.answer,
            applied_incidents: outcome.applied_incidents,
            followups: outcome.followups,
            results,
            plan,
            degraded,
            notices,
            trace,
            index_meta,
            cache_hit,
            backoff_ms: synthesized.backoff.iter().map(|d| d.as_millis() as u64).collect(),
        })
    }

    /// Routing with its own timeout. Any failure yields the fail-open plan.
    async fn route(&self, query: &str, history: &[ConversationTurn], default_top_k: usize, notices: &mut Vec<Notice>) -> RoutingPlan {
        let limit = self.settings.routing_timeout();
        let outcome = match tokio::time::timeout(limit, self.router.classify(query, history)).await {
            Ok(r) => r,
            Err(_) => Err(Error::RoutingTimeout),
        };
        match outcome {
            Ok(plan) => {
                debug!(intent = ?plan.intent, need_search = plan.need_search, top_k = plan.top_k, "routing plan");
                plan
            }
            Err(e) => {
                warn!(error = %e, "routing failed; searching with the default plan");
                notices.push(Notice::RoutingFallback { reason: clip(&e.to_string(), 200) });
                RoutingPlan::fallback(default_top_k)
            }
        }
    }

    fn cache_lookup(&self, snapshot: &IndexSnapshot, key: &CacheKey) -> Option<Retrieved> {
        if !self.cache.enabled() { return None; }
        let entry = self.cache.get(key, snapshot.version());
        self.metrics.record_cache(entry.is_some());
        let entry = entry?;
        Some(Retrieved {
            results: entry.results.clone(),
            notices: vec![Notice::ServedFromCache { index_version: entry.index_meta.index_version }],
            index_meta: entry.index_meta.clone(),
            plan: entry.plan.clone(),
            complete: true,
        })
    }

    /// Both channels concurrently, each under its own timeout, then fusion.
    /// Callers cache the results only when `complete` is set.
    async fn retrieve(
        &self,
        snapshot: &Arc<IndexSnapshot>,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Retrieved> {
        let pool = self.retrieval.candidate_pool(top_k);
        let (semantic, keyword) = tokio::join!(
            self.run_channel(snapshot, Channel::Semantic, query, pool, filters, self.retrieval.semantic_timeout()),
            self.run_channel(snapshot, Channel::Keyword, query, pool, filters, self.retrieval.keyword_timeout()),
        );

        let both_failed = semantic.is_err() && keyword.is_err();
        let retry = if both_failed && self.retrieval.keyword_only_fallback {
            warn!("both channels failed; retrying keyword only");
            Some(self.run_channel(snapshot, Channel::Keyword, query, pool, filters, self.retrieval.keyword_timeout()).await)
        } else {
            None
        };
        let merged = merge_channel_results(semantic, keyword, self.retrieval.keyword_only_fallback, || {
            retry.unwrap_or_else(|| Err(Error::Operation("keyword retry was not scheduled".into())))
        })?;

        let as_of = as_of.unwrap_or_else(Utc::now);
        let results = self.fusion.fuse(&merged.semantic, &merged.keyword, &**snapshot, filters, top_k, as_of);
        let index_meta = self.index_meta(snapshot);
        debug!(semantic = merged.semantic.len(), keyword = merged.keyword.len(), fused = results.len(), "retrieval complete");
        Ok(Retrieved { results, notices: merged.notices, index_meta, plan: None, complete: merged.complete })
    }

    async fn run_channel(
        &self,
        snapshot: &Arc<IndexSnapshot>,
        channel: Channel,
        query: &str,
        pool: usize,
        filters: &SearchFilters,
        limit: Duration,
    ) -> Result<Vec<Candidate>> {
        let channels = self.channels.clone();
        let snapshot = snapshot.clone();
        let query = query.to_string();
        let filters = filters.clone();
        let task = tokio::task::spawn_blocking(move || channels.search(&snapshot, channel, &query, pool, &filters));
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::ChannelFailed { channel, reason: join.to_string() }),
            Err(_) => Err(Error::ChannelFailed { channel, reason: format!("timed out after {} ms", limit.as_millis()) }),
        }
    }

    /// Rate limits back off and retry up to the configured count; an oversized
    /// context is retried once with the truncated budget.
    async fn synthesize(
        &self,
        query: &str,
        history: &[ConversationTurn],
        plan: &RoutingPlan,
        results: &[FusedResult],
        notices: &mut Vec<Notice>,
    ) -> Synthesized {
        let mut truncated = false;
        let mut attempt = 0u32;
        let mut backoff = Vec::new();
        loop {
            let input = SynthesisInput {
                query: query.to_string(),
                history: history.to_vec(),
                intent: plan.intent,
                clarification: plan.clarification.clone(),
                evidence: build_evidence(results, &self.budget, truncated),
            };
            let outcome = match tokio::time::timeout(self.settings.synthesis_timeout(), self.synthesizer.summarize(&input)).await {
                Ok(r) => r,
                Err(_) => Err(Error::SynthesisUnavailable("synthesis timed out".into())),
            };
            match outcome {
                Ok(r) => return Synthesized { result: Ok(keep_supplied(r, &input.evidence)), backoff },
                Err(Error::SynthesisRateLimited { retry_after }) if attempt < self.backoff.max_retries => {
                    let delay = self.backoff.delay(attempt, retry_after);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "synthesis rate limited; backing off");
                    backoff.push(delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Error::ContextTooLarge) if !truncated => {
                    let kept = input.evidence.len().min(self.budget.truncated_results);
                    warn!(kept, "synthesis context too large; retrying truncated");
                    notices.push(Notice::ContextTruncated { kept });
                    truncated = true;
                }
                Err(e) => return Synthesized { result: Err(e), backoff },
            }
        }
    }

    /// One independent search. Channels run concurrently as in `ask`.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let span = info_span!("search", request_id = %request.request_id);
        let outcome = self.run_search(&request).instrument(span).await;
        let degraded = outcome.as_ref().map(|r| r.degraded).unwrap_or(false);
        self.metrics.record(started.elapsed(), outcome.is_err(), degraded);
        outcome
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        validate_request(request)?;
        let snapshot = self.store.pin()?;
        let top_k = self.retrieval.clamp_top_k(request.top_k);
        let key = CacheKey::new(&request.query, top_k, &request.filters);
        let retrieved = match self.cache_lookup(&snapshot, &key) {
            Some(hit) => hit,
            None => {
                let r = self.retrieve(&snapshot, &request.query, top_k, &request.filters, request.as_of).await?;
                if r.complete {
                    self.cache.put(key, r.results.clone(), r.index_meta.clone(), None);
                }
                r
            }
        };
        Ok(SearchResponse {
            request_id: request.request_id,
            results: retrieved.results,
            index_meta: retrieved.index_meta,
            degraded: retrieved.notices.iter().any(Notice::degrades),
            notices: retrieved.notices,
        })
    }

    /// Each request runs as its own task; responses come back in input order.
    pub async fn search_batch(self: &Arc<Self>, requests: Vec<SearchRequest>) -> Vec<Result<SearchResponse>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.search(request).await })
            })
            .collect();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(Error::Operation(format!("search task failed: {e}")))))
            .collect()
    }

    pub fn health(&self) -> HealthReport {
        let snapshot = self.store.pin().ok();
        let meta = snapshot.as_ref().map(|s| self.index_meta(s));
        HealthReport {
            status: if snapshot.is_some() { "ok".into() } else { "index_unavailable".into() },
            index_loaded: snapshot.is_some(),
            index_version: snapshot.as_ref().map(|s| s.version()),
            loaded_at: snapshot.as_ref().map(|s| s.loaded_at()),
            incidents: snapshot.as_ref().map_or(0, |s| s.len()),
            approx_bytes: snapshot.as_ref().map_or(0, |s| s.approx_bytes()),
            embed_model: meta.as_ref().map(|m| m.embed_model.clone()),
            tfidf_version: meta.as_ref().map(|m| m.tfidf_version.clone()),
            scoring_policy: self.fusion.policy_version(),
            cache_entries: self.cache.len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Swaps in the index at `dir`. Cached results are dropped; in-flight
    /// requests keep the snapshot they pinned.
    pub fn reload(&self, dir: &Path) -> Result<IndexMeta> {
        let snapshot = self.store.reload(dir)?;
        self.cache.invalidate_all();
        Ok(self.index_meta(&snapshot))
    }

    fn index_meta(&self, snapshot: &IndexSnapshot) -> IndexMeta {
        IndexMeta { scoring_policy: self.fusion.policy_version(), ..snapshot.index_meta() }
    }
}

/// Request filters win over the ones the router inferred.
fn overlay_filters(inferred: &SearchFilters, requested: &SearchFilters) -> SearchFilters {
    let mut out = inferred.clone();
    if requested.product.is_some() { out.product = requested.product.clone(); }
    if requested.since.is_some() { out.since = requested.since; }
    out.extra.extend(requested.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// Drops applied incidents that were not part of the supplied evidence.
fn keep_supplied(mut result: SynthesisResult, evidence: &[Evidence]) -> SynthesisResult {
    let before = result.applied_incidents.len();
    result.applied_incidents.retain(|a| evidence.iter().any(|e| e.incident_id == a.incident_id));
    if result.applied_incidents.len() < before {
        debug!(dropped = before - result.applied_incidents.len(), "synthesis cited incidents it was not given");
    }
    result
}

fn unavailable_answer(error: &Error, results: &[FusedResult], searched: bool) -> SynthesisResult {
    if !searched || results.is_empty() {
        let answer = if searched {
            format!("An answer could not be generated ({error}) and no matching incidents were found.")
        } else {
            format!("An answer could not be generated ({error}). Please try again shortly.")
        };
        return SynthesisResult { answer, ..Default::default() };
    }
    let applied_incidents = results
        .iter()
        .map(|r| AppliedIncident { incident_id: r.incident_id.clone(), why: format!("retrieval score {:.3} ({})", r.fused_score, r.source) })
        .collect();
    SynthesisResult {
        answer: format!("An answer could not be generated ({error}). The most relevant past incidents are listed below for review."),
        applied_incidents,
        followups: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incidentqa_core::types::{Meta, Sources};

    fn fused(id: &str, score: f32) -> FusedResult {
        FusedResult {
            incident_id: id.into(),
            desc: "desc".into(),
            resolution: "res".into(),
            score_sem: Some(score),
            score_kw: None,
            fused_score: score,
            source: [Channel::Semantic].into_iter().collect::<Sources>(),
            snippets: vec![],
            meta: Meta::new(),
        }
    }

    #[test]
    fn request_filters_override_inferred_ones() {
        let inferred: SearchFilters = serde_json::from_str(r#"{"product":"HYSYS","version":"V12"}"#).unwrap();
        let requested: SearchFilters = serde_json::from_str(r#"{"product":"Aspen Plus","since":"2024-01-01"}"#).unwrap();
        let f = overlay_filters(&inferred, &requested);
        assert_eq!(f.product.as_deref(), Some("Aspen Plus"));
        assert!(f.since.is_some());
        assert_eq!(f.extra.get("version").and_then(|v| v.as_str()), Some("V12"));
    }

    #[test]
    fn unavailable_answer_lists_raw_results() {
        let r = unavailable_answer(&Error::SynthesisUnavailable("down".into()), &[fused("INC1", 0.8)], true);
        assert_eq!(r.applied_incidents.len(), 1);
        assert_eq!(r.applied_incidents[0].why, "retrieval score 0.800 (embedding)");
        assert!(r.answer.contains("could not be generated"));

        let r = unavailable_answer(&Error::SynthesisUnavailable("down".into()), &[], false);
        assert!(r.applied_incidents.is_empty());
    }

    #[test]
    fn uncited_incidents_are_dropped() {
        let evidence = build_evidence(&[fused("INC1", 0.5)], &ContextBudget::from(&OrchestratorSettings::default()), false);
        let r = SynthesisResult {
            answer: "a".into(),
            applied_incidents: vec![
                AppliedIncident { incident_id: "INC1".into(), why: "match".into() },
                AppliedIncident { incident_id: "INC9".into(), why: "invented".into() },
            ],
            followups: vec![],
        };
        let kept = keep_supplied(r, &evidence);
        assert_eq!(kept.applied_incidents.len(), 1);
        assert_eq!(kept.applied_incidents[0].incident_id, "INC1");
    }
}
