use futures::future::BoxFuture;
use serde::Serialize;

use incidentqa_core::types::{ConversationTurn, Intent, Meta, RoutingPlan, SynthesisResult};
use incidentqa_core::Result;

/// One fused result as handed to synthesis, already clipped to the context
/// budget.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evidence {
    pub incident_id: String,
    pub desc: String,
    pub resolution: String,
    pub snippets: Vec<String>,
    pub score: f32,
    pub source: String,
    pub meta: Meta,
}

#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub query: String,
    pub history: Vec<ConversationTurn>,
    pub intent: Intent,
    pub clarification: Option<String>,
    pub evidence: Vec<Evidence>,
}

/// Decides whether and how to retrieve. Failures and timeouts are absorbed by
/// the orchestrator's fail-open plan.
pub trait Router: Send + Sync {
    fn classify<'a>(&'a self, query: &'a str, history: &'a [ConversationTurn]) -> BoxFuture<'a, Result<RoutingPlan>>;
}

/// Turns evidence into an answer. Expected errors are
/// `SynthesisRateLimited`, `ContextTooLarge` and `SynthesisUnavailable`.
pub trait Synthesizer: Send + Sync {
    fn summarize<'a>(&'a self, input: &'a SynthesisInput) -> BoxFuture<'a, Result<SynthesisResult>>;
}
