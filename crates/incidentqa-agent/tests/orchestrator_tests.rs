use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture};
use serde_json::json;
use tempfile::TempDir;

use incidentqa_agent::reasoning::{Router, SynthesisInput, Synthesizer};
use incidentqa_agent::{AskRequest, Orchestrator, Phase};
use incidentqa_core::config::{FusionSettings, RetrievalSettings, Settings};
use incidentqa_core::types::{
    AppliedIncident, Candidate, Channel, ConversationTurn, Incident, Intent, Meta, Notice, RoutingPlan, SearchFilters, SearchRequest,
    SynthesisResult,
};
use incidentqa_core::{Error, Result};
use incidentqa_embed::HashingEncoder;
use incidentqa_hybrid::store::write_artifacts;
use incidentqa_hybrid::{ChannelSearch, FusionEngine, HybridSearchEngine, IndexSnapshot, IndexStore};

fn corpus() -> Vec<Incident> {
    [
        ("INC1", "Ejector missing from palette after upgrade", "Reset the palette filter in preferences", "HYSYS", "2024-03-01"),
        ("INC2", "License server unreachable from client machines", "Open port 27000 on the firewall", "HYSYS", "2023-01-15"),
        ("INC3", "Palette icons render blank on high DPI displays", "Set display scaling to 100 percent", "Aspen Plus", "2024-05-20"),
        ("INC4", "Recycle solver fails to converge", "Loosen the recycle tolerance", "HYSYS", "2022-11-02"),
    ]
    .into_iter()
    .map(|(id, desc, res, product, date)| {
        let mut meta = Meta::new();
        meta.insert("product".into(), json!(product));
        meta.insert("date".into(), json!(date));
        Incident { incident_id: id.into(), desc: desc.into(), resolution: res.into(), meta }
    })
    .collect()
}

fn search_plan(top_k: usize) -> RoutingPlan {
    RoutingPlan {
        need_search: true,
        top_k,
        filters: SearchFilters::default(),
        degraded: false,
        intent: Intent::HowToFix,
        search_query: None,
        clarification: None,
    }
}

enum Route {
    Plan(RoutingPlan),
    Fail,
    Hang,
}

struct ScriptedRouter {
    route: Route,
    histories: Mutex<Vec<usize>>,
}

impl ScriptedRouter {
    fn new(route: Route) -> Self { Self { route, histories: Mutex::new(vec![]) } }
    fn calls(&self) -> usize { self.histories.lock().unwrap().len() }
}

impl Router for ScriptedRouter {
    fn classify<'a>(&'a self, _query: &'a str, history: &'a [ConversationTurn]) -> BoxFuture<'a, Result<RoutingPlan>> {
        self.histories.lock().unwrap().push(history.len());
        match &self.route {
            Route::Plan(plan) => Box::pin(future::ready(Ok(plan.clone()))),
            Route::Fail => Box::pin(future::ready(Err(Error::Operation("router down".into())))),
            Route::Hang => Box::pin(future::pending()),
        }
    }
}

/// Replays scripted outcomes, then answers citing the first evidence item and
/// one incident it was never given.
#[derive(Default)]
struct ScriptedSynth {
    script: Mutex<VecDeque<Result<SynthesisResult>>>,
    evidence_sizes: Mutex<Vec<usize>>,
    delay: Duration,
}

impl ScriptedSynth {
    fn with_script(script: Vec<Result<SynthesisResult>>) -> Self {
        Self { script: Mutex::new(script.into()), ..Default::default() }
    }
    fn sizes(&self) -> Vec<usize> { self.evidence_sizes.lock().unwrap().clone() }
}

impl Synthesizer for ScriptedSynth {
    fn summarize<'a>(&'a self, input: &'a SynthesisInput) -> BoxFuture<'a, Result<SynthesisResult>> {
        Box::pin(async move {
            self.evidence_sizes.lock().unwrap().push(input.evidence.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => {
                    let mut applied: Vec<AppliedIncident> = input
                        .evidence
                        .iter()
                        .take(1)
                        .map(|e| AppliedIncident { incident_id: e.incident_id.clone(), why: "same symptom".into() })
                        .collect();
                    applied.push(AppliedIncident { incident_id: "INC-NOT-GIVEN".into(), why: "made up".into() });
                    Ok(SynthesisResult { answer: "Reset the palette filter.".into(), applied_incidents: applied, followups: vec!["Which version?".into()] })
                }
            }
        })
    }
}

/// Real channels with injected failures and an optional stall on the semantic
/// side. A counter of `usize::MAX` fails forever.
struct FlakyChannels {
    engine: HybridSearchEngine,
    semantic_failures: AtomicUsize,
    keyword_failures: AtomicUsize,
    keyword_calls: AtomicUsize,
    semantic_delay: Duration,
}

impl ChannelSearch for FlakyChannels {
    fn search(&self, snapshot: &IndexSnapshot, channel: Channel, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<Candidate>> {
        let remaining = match channel {
            Channel::Semantic => {
                if !self.semantic_delay.is_zero() {
                    std::thread::sleep(self.semantic_delay);
                }
                &self.semantic_failures
            }
            Channel::Keyword => {
                self.keyword_calls.fetch_add(1, Ordering::SeqCst);
                &self.keyword_failures
            }
        };
        if remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(Error::ChannelFailed { channel, reason: "injected".into() });
        }
        self.engine.search(snapshot, channel, query, top_k, filters)
    }
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.orchestrator.backoff_base_ms = 1;
    s.orchestrator.backoff_max_ms = 4;
    s.orchestrator.routing_timeout_ms = 100;
    s.cache.enabled = true;
    s
}

struct Harness {
    _tmp: TempDir,
    dir: PathBuf,
    orchestrator: Arc<Orchestrator>,
    router: Arc<ScriptedRouter>,
    synth: Arc<ScriptedSynth>,
    channels: Arc<FlakyChannels>,
}

fn harness_with(settings: Settings, route: Route, synth: ScriptedSynth, failures: (usize, usize), load: bool) -> Harness {
    harness_slow(settings, route, synth, failures, load, Duration::ZERO)
}

fn harness_slow(settings: Settings, route: Route, synth: ScriptedSynth, failures: (usize, usize), load: bool, semantic_delay: Duration) -> Harness {
    let tmp = TempDir::new().unwrap();
    let encoder = Arc::new(HashingEncoder::new(64));
    write_artifacts(tmp.path(), &corpus(), encoder.as_ref(), 8).unwrap();
    let store = Arc::new(IndexStore::new());
    if load {
        store.reload(tmp.path()).unwrap();
    }
    let engine = HybridSearchEngine::new(encoder, FusionEngine::from_settings(&FusionSettings::default()), RetrievalSettings::default());
    let channels = Arc::new(FlakyChannels {
        engine,
        semantic_failures: AtomicUsize::new(failures.0),
        keyword_failures: AtomicUsize::new(failures.1),
        keyword_calls: AtomicUsize::new(0),
        semantic_delay,
    });
    let router = Arc::new(ScriptedRouter::new(route));
    let synth = Arc::new(synth);
    let orchestrator = Orchestrator::new(
        store,
        channels.clone(),
        FusionEngine::from_settings(&settings.fusion),
        router.clone(),
        synth.clone(),
        &settings,
    );
    Harness { dir: tmp.path().to_path_buf(), _tmp: tmp, orchestrator: Arc::new(orchestrator), router, synth, channels }
}

fn harness(route: Route, synth: ScriptedSynth) -> Harness {
    harness_with(settings(), route, synth, (0, 0), true)
}

fn ask(query: &str, top_k: usize) -> AskRequest {
    AskRequest { top_k: Some(top_k), ..AskRequest::new(query) }
}

#[tokio::test]
async fn full_turn_walks_every_phase_and_keeps_only_supplied_citations() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    let request = ask("ejector missing from palette", 3);
    let request_id = request.request_id;
    let resp = h.orchestrator.ask(request).await.unwrap();

    assert_eq!(resp.request_id, request_id);
    assert_eq!(resp.trace, vec![Phase::Idle, Phase::Routing, Phase::Searching, Phase::Synthesizing, Phase::Done]);
    assert!(!resp.degraded);
    assert!(resp.notices.is_empty());
    assert_eq!(resp.results[0].incident_id, "INC1");
    assert_eq!(resp.applied_incidents.len(), 1);
    assert_eq!(resp.applied_incidents[0].incident_id, "INC1");
    assert_eq!(resp.followups, vec!["Which version?".to_string()]);
    assert_eq!(resp.index_meta.as_ref().map(|m| m.index_version), Some(1));
}

#[tokio::test]
async fn both_channels_down_without_fallback_fails_the_request() {
    let h = harness_with(settings(), Route::Plan(search_plan(3)), ScriptedSynth::default(), (usize::MAX, usize::MAX), true);
    let err = h.orchestrator.ask(ask("ejector missing", 3)).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)));
    assert_eq!(h.channels.keyword_calls.load(Ordering::SeqCst), 1);
    assert!(h.synth.sizes().is_empty(), "synthesis never runs after a fatal retrieval failure");
    assert_eq!(h.orchestrator.metrics().failures, 1);
}

#[tokio::test]
async fn keyword_only_mode_retries_keyword_once() {
    let mut s = settings();
    s.retrieval.keyword_only_fallback = true;
    let h = harness_with(s, Route::Plan(search_plan(3)), ScriptedSynth::default(), (usize::MAX, 1), true);
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();

    assert_eq!(h.channels.keyword_calls.load(Ordering::SeqCst), 2);
    assert!(resp.notices.contains(&Notice::KeywordOnlyRetry));
    assert!(resp.degraded);
    assert!(resp.results.iter().all(|r| r.source.contains(Channel::Keyword) && !r.source.contains(Channel::Semantic)));
}

#[tokio::test]
async fn keyword_only_retry_that_fails_is_fatal() {
    let mut s = settings();
    s.retrieval.keyword_only_fallback = true;
    let h = harness_with(s, Route::Plan(search_plan(3)), ScriptedSynth::default(), (usize::MAX, usize::MAX), true);
    let err = h.orchestrator.ask(ask("ejector missing", 3)).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)));
    assert_eq!(h.channels.keyword_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn one_channel_down_degrades_and_is_not_cached() {
    let h = harness_with(settings(), Route::Plan(search_plan(3)), ScriptedSynth::default(), (1, 0), true);
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    assert!(resp.degraded);
    assert!(matches!(resp.notices[0], Notice::ChannelUnavailable { channel: Channel::Semantic, .. }));
    assert!(!resp.results.is_empty());

    let again = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    assert!(!again.cache_hit);
    assert!(!again.degraded);
}

#[tokio::test]
async fn stalled_semantic_channel_does_not_hold_up_keyword_results() {
    let mut s = settings();
    s.retrieval.semantic_timeout_ms = 100;
    let h = harness_slow(s, Route::Plan(search_plan(3)), ScriptedSynth::default(), (0, 0), true, Duration::from_millis(600));
    let started = Instant::now();
    let resp = h.orchestrator.ask(ask("license server unreachable firewall", 3)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(450), "turn waited on the stalled channel: {elapsed:?}");
    assert!(resp.degraded);
    assert!(resp.notices.iter().any(|n| matches!(n, Notice::ChannelUnavailable { channel: Channel::Semantic, .. })));
    assert!(!resp.results.is_empty());
    assert!(resp.results.iter().all(|r| !r.source.contains(Channel::Semantic)));
    assert_eq!(resp.results[0].incident_id, "INC2");
}

#[tokio::test]
async fn rate_limited_twice_then_success_sleeps_exactly_twice() {
    let synth = ScriptedSynth::with_script(vec![
        Err(Error::SynthesisRateLimited { retry_after: None }),
        Err(Error::SynthesisRateLimited { retry_after: None }),
    ]);
    let h = harness(Route::Plan(search_plan(3)), synth);
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();

    assert_eq!(resp.backoff_ms.len(), 2);
    assert!(resp.backoff_ms.iter().all(|ms| *ms <= 4));
    assert!(!resp.degraded);
    assert_eq!(resp.answer, "Reset the palette filter.");
    assert_eq!(h.synth.sizes().len(), 3);
}

#[tokio::test]
async fn exhausted_rate_limit_retries_degrade_to_raw_results() {
    let synth = ScriptedSynth::with_script((0..4).map(|_| Err(Error::SynthesisRateLimited { retry_after: None })).collect());
    let h = harness(Route::Plan(search_plan(3)), synth);
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();

    assert_eq!(resp.backoff_ms.len(), 3);
    assert!(resp.degraded);
    assert!(resp.notices.iter().any(|n| matches!(n, Notice::SynthesisUnavailable { .. })));
    let applied: Vec<&str> = resp.applied_incidents.iter().map(|a| a.incident_id.as_str()).collect();
    let results: Vec<&str> = resp.results.iter().map(|r| r.incident_id.as_str()).collect();
    assert_eq!(applied, results);
    assert!(resp.applied_incidents[0].why.starts_with("retrieval score"));
    assert_eq!(resp.trace.last(), Some(&Phase::Done));
}

#[tokio::test]
async fn routing_timeout_falls_back_to_searching_with_default_top_k() {
    let h = harness(Route::Hang, ScriptedSynth::default());
    let resp = h.orchestrator.ask(AskRequest::new("ejector missing from palette")).await.unwrap();

    assert!(resp.plan.need_search);
    assert!(resp.plan.degraded);
    assert_eq!(resp.plan.top_k, RetrievalSettings::default().default_top_k);
    assert!(resp.degraded);
    assert!(resp.trace.contains(&Phase::Searching));
    assert!(matches!(&resp.notices[0], Notice::RoutingFallback { .. }));
}

#[tokio::test]
async fn routing_failure_also_fails_open() {
    let h = harness(Route::Fail, ScriptedSynth::default());
    let resp = h.orchestrator.ask(AskRequest::new("license server unreachable")).await.unwrap();
    assert!(resp.plan.need_search && resp.plan.degraded);
    assert!(!resp.results.is_empty());
}

#[tokio::test]
async fn cache_hit_skips_routing_and_searching_but_not_synthesis() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    let first = h.orchestrator.ask(ask("Ejector missing from palette", 3)).await.unwrap();
    assert!(!first.cache_hit);

    let second = h.orchestrator.ask(ask("ejector   MISSING from palette", 3)).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.trace, vec![Phase::Idle, Phase::Synthesizing, Phase::Done]);
    assert_eq!(h.router.calls(), 1);
    assert_eq!(h.synth.sizes().len(), 2);
    assert_eq!(second.results, first.results);
    assert!(!second.degraded, "a cache hit alone is not a degradation");
    assert!(second.notices.contains(&Notice::ServedFromCache { index_version: 1 }));

    let m = h.orchestrator.metrics();
    assert_eq!(m.cache_hits, 1);
    assert_eq!(m.cache_misses, 1);
}

#[tokio::test]
async fn cache_hits_even_when_the_router_rewrites_query_and_top_k() {
    let plan = RoutingPlan {
        top_k: 2,
        intent: Intent::LookupReference,
        search_query: Some("ejector palette".into()),
        filters: serde_json::from_value(json!({"version": "V12"})).unwrap(),
        ..search_plan(2)
    };
    let h = harness(Route::Plan(plan), ScriptedSynth::default());

    let first = h.orchestrator.ask(AskRequest::new("Why is the ejector missing from my palette?")).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.plan.top_k, 2);
    assert!(first.results.len() <= 2);

    for _ in 0..2 {
        let again = h.orchestrator.ask(AskRequest::new("why is the ejector missing from my palette?")).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.results, first.results);
        assert_eq!(again.plan.intent, Intent::LookupReference);
        assert_eq!(again.plan.search_query.as_deref(), Some("ejector palette"));
        assert_eq!(again.plan.top_k, 2);
    }
    assert_eq!(h.router.calls(), 1);
    let m = h.orchestrator.metrics();
    assert_eq!((m.cache_hits, m.cache_misses), (2, 1));
}

#[tokio::test]
async fn fail_open_turns_are_not_cached() {
    let h = harness(Route::Fail, ScriptedSynth::default());
    h.orchestrator.ask(ask("license server unreachable", 3)).await.unwrap();
    let again = h.orchestrator.ask(ask("license server unreachable", 3)).await.unwrap();
    assert!(!again.cache_hit);
    assert_eq!(h.router.calls(), 2);
}

#[tokio::test]
async fn search_and_ask_keep_separate_cache_entries() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    h.orchestrator.search(SearchRequest::new("ejector missing from palette", 3)).await.unwrap();
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    assert!(!resp.cache_hit);
    assert_eq!(h.router.calls(), 1);
}

#[tokio::test]
async fn reload_invalidates_cached_results() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    let meta = h.orchestrator.reload(&h.dir).unwrap();
    assert_eq!(meta.index_version, 2);

    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    assert!(!resp.cache_hit);
    assert_eq!(resp.index_meta.map(|m| m.index_version), Some(2));
}

#[tokio::test]
async fn oversized_context_retries_once_truncated() {
    let mut s = settings();
    s.orchestrator.truncated_results = 1;
    let synth = ScriptedSynth::with_script(vec![Err(Error::ContextTooLarge)]);
    let h = harness_with(s, Route::Plan(search_plan(4)), synth, (0, 0), true);
    let resp = h.orchestrator.ask(ask("palette ejector missing", 4)).await.unwrap();

    let sizes = h.synth.sizes();
    assert_eq!(sizes.len(), 2);
    assert!(sizes[0] > 1);
    assert_eq!(sizes[1], 1);
    assert!(resp.notices.contains(&Notice::ContextTruncated { kept: 1 }));
    assert!(resp.degraded);
    assert_eq!(resp.answer, "Reset the palette filter.");
}

#[tokio::test]
async fn second_oversized_context_gives_up() {
    let synth = ScriptedSynth::with_script(vec![Err(Error::ContextTooLarge), Err(Error::ContextTooLarge)]);
    let h = harness(Route::Plan(search_plan(3)), synth);
    let resp = h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    assert_eq!(h.synth.sizes().len(), 2);
    assert!(resp.notices.iter().any(|n| matches!(n, Notice::SynthesisUnavailable { .. })));
}

#[tokio::test]
async fn skip_search_synthesizes_without_evidence() {
    let plan = RoutingPlan { need_search: false, intent: Intent::Explain, ..search_plan(3) };
    let h = harness(Route::Plan(plan), ScriptedSynth::default());
    let resp = h.orchestrator.ask(AskRequest::new("what does the recycle block do")).await.unwrap();

    assert_eq!(resp.trace, vec![Phase::Idle, Phase::Routing, Phase::SkipSearch, Phase::Synthesizing, Phase::Done]);
    assert!(resp.results.is_empty());
    assert!(resp.applied_incidents.is_empty(), "citations outside the evidence are dropped");
    assert_eq!(h.synth.sizes(), vec![0]);
}

#[tokio::test]
async fn unavailable_synthesis_without_retrieval_has_no_applied_incidents() {
    let plan = RoutingPlan { need_search: false, ..search_plan(3) };
    let synth = ScriptedSynth::with_script(vec![Err(Error::SynthesisUnavailable("HTTP 500".into()))]);
    let h = harness(Route::Plan(plan), synth);
    let resp = h.orchestrator.ask(AskRequest::new("hello there")).await.unwrap();
    assert!(resp.degraded);
    assert!(resp.applied_incidents.is_empty());
    assert!(!resp.answer.is_empty());
}

#[tokio::test]
async fn unloaded_index_fails_search_turns_only() {
    let h = harness_with(settings(), Route::Plan(search_plan(3)), ScriptedSynth::default(), (0, 0), false);
    let err = h.orchestrator.ask(ask("ejector missing", 3)).await.unwrap_err();
    assert!(matches!(err, Error::IndexUnavailable));

    let skip = harness_with(settings(), Route::Plan(RoutingPlan { need_search: false, ..search_plan(3) }), ScriptedSynth::default(), (0, 0), false);
    let resp = skip.orchestrator.ask(AskRequest::new("hello")).await.unwrap();
    assert!(resp.index_meta.is_none());
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    assert!(matches!(h.orchestrator.ask(AskRequest::new("   ")).await, Err(Error::InvalidRequest(_))));
    assert_eq!(h.router.calls(), 0);
}

#[tokio::test]
async fn history_grows_per_conversation_only() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    h.orchestrator.ask(ask("ejector missing", 3).in_conversation("a")).await.unwrap();
    h.orchestrator.ask(ask("still missing after restart", 3).in_conversation("a")).await.unwrap();
    h.orchestrator.ask(ask("license server unreachable", 3).in_conversation("b")).await.unwrap();

    assert_eq!(*h.router.histories.lock().unwrap(), vec![0, 1, 0]);
    let history = h.orchestrator.conversations().history("a").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].query, "ejector missing");
    assert_eq!(history[1].answer, "Reset the palette filter.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_in_one_conversation_are_serialized() {
    let synth = ScriptedSynth { delay: Duration::from_millis(5), ..Default::default() };
    let h = harness(Route::Plan(search_plan(3)), synth);
    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.ask(ask(&format!("palette ejector missing {i}"), 3).in_conversation("c")).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let mut seen = h.router.histories.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4], "each turn saw every earlier turn and no partial one");
    assert_eq!(h.orchestrator.conversations().history("c").await.len(), 5);
}

#[tokio::test]
async fn batch_search_preserves_input_order() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    let requests: Vec<SearchRequest> = ["ejector missing from palette", "license server unreachable", "", "recycle solver converge"]
        .into_iter()
        .map(|q| SearchRequest::new(q, 2))
        .collect();
    let ids: Vec<_> = requests.iter().map(|r| r.request_id).collect();
    let responses = h.orchestrator.search_batch(requests).await;

    assert_eq!(responses.len(), 4);
    assert!(matches!(responses[2], Err(Error::InvalidRequest(_))));
    for (i, resp) in responses.iter().enumerate().filter(|(i, _)| *i != 2) {
        let resp = resp.as_ref().unwrap();
        assert_eq!(resp.request_id, ids[i]);
        assert!(resp.results.len() <= 2);
    }
    assert_eq!(responses[1].as_ref().unwrap().results[0].incident_id, "INC2");
}

#[tokio::test]
async fn health_reports_index_and_counters() {
    let h = harness(Route::Plan(search_plan(3)), ScriptedSynth::default());
    h.orchestrator.ask(ask("ejector missing from palette", 3)).await.unwrap();
    let health = h.orchestrator.health();

    assert!(health.index_loaded);
    assert_eq!(health.status, "ok");
    assert_eq!(health.index_version, Some(1));
    assert_eq!(health.incidents, 4);
    assert!(health.approx_bytes > 0);
    assert_eq!(health.embed_model.as_deref(), Some("hashing-xxh64-64"));
    assert_eq!(health.scoring_policy, "half-life/v1+overlap/v1");
    assert_eq!(health.metrics.requests, 1);
}
