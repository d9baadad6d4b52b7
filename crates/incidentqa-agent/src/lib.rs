//! incidentqa-agent
//!
//! The two-phase orchestrator (routing, retrieval, synthesis) and the pieces
//! it owns: the result cache, backoff, per-conversation ordering, request
//! metrics and the chat-completion reasoning provider.
pub mod backoff;
pub mod cache;
pub mod context;
pub mod conversation;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod reasoning;

pub use cache::{CacheKey, ResultCache};
pub use orchestrator::{AskRequest, AskResponse, HealthReport, Orchestrator, Phase};
pub use providers::ChatProvider;
pub use reasoning::{Evidence, Router, SynthesisInput, Synthesizer};
