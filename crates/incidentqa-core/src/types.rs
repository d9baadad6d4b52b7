//! Domain types used by the retrievers, the fusion engine and the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

pub type IncidentId = String;
pub type Meta = BTreeMap<String, Value>;

/// A historically resolved support case.
///
/// Owned by the index store and never mutated after load. `meta` holds
/// scalar attributes such as `product`, `version` and `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub incident_id: IncidentId,
    pub desc: String,
    pub resolution: String,
    #[serde(default)]
    pub meta: Meta,
}

impl Incident {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    /// The incident date from `meta.date`, if present and parseable.
    pub fn date(&self) -> Option<NaiveDate> {
        self.meta.get("date").and_then(parse_meta_date)
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_meta_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// One retrieval method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Semantic,
    Keyword,
}

impl Channel {
    /// Wire label used in `source`.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Semantic => "embedding",
            Channel::Keyword => "tfidf",
        }
    }
}

/// Which incident field a candidate matched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Desc,
    Resolution,
}

/// A transient per-channel hit. Several candidates may reference the same
/// incident through different channels or fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub incident_id: IncidentId,
    pub desc_snippet: String,
    pub resolution_snippet: String,
    pub score: f32,
    pub channel: Channel,
    pub field: Field,
}

impl Candidate {
    /// The snippet of the field this candidate matched on.
    pub fn matched_snippet(&self) -> &str {
        match self.field {
            Field::Desc => &self.desc_snippet,
            Field::Resolution => &self.resolution_snippet,
        }
    }
}

/// Set of channels that contributed to a fused result.
///
/// Serialized as `"embedding"`, `"tfidf"` or `"embedding+tfidf"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sources {
    semantic: bool,
    keyword: bool,
}

impl Sources {
    pub fn insert(&mut self, channel: Channel) {
        match channel {
            Channel::Semantic => self.semantic = true,
            Channel::Keyword => self.keyword = true,
        }
    }

    pub fn contains(&self, channel: Channel) -> bool {
        match channel {
            Channel::Semantic => self.semantic,
            Channel::Keyword => self.keyword,
        }
    }

    pub fn both(&self) -> bool {
        self.semantic && self.keyword
    }

    pub fn is_empty(&self) -> bool {
        !self.semantic && !self.keyword
    }

    pub fn label(&self) -> &'static str {
        match (self.semantic, self.keyword) {
            (true, true) => "embedding+tfidf",
            (true, false) => Channel::Semantic.label(),
            (false, true) => Channel::Keyword.label(),
            (false, false) => "",
        }
    }
}

impl FromIterator<Channel> for Sources {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut sources = Sources::default();
        for c in iter {
            sources.insert(c);
        }
        sources
    }
}

impl fmt::Display for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Sources {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Sources {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut sources = Sources::default();
        for part in raw.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "embedding" => sources.insert(Channel::Semantic),
                "tfidf" => sources.insert(Channel::Keyword),
                other => return Err(serde::de::Error::custom(format!("unknown source '{other}'"))),
            }
        }
        Ok(sources)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub channel: Channel,
    pub field: Field,
    pub text: String,
    pub score: f32,
}

/// One incident in a fused response. At most one per `incident_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedResult {
    pub incident_id: IncidentId,
    pub desc: String,
    pub resolution: String,
    pub score_sem: Option<f32>,
    pub score_kw: Option<f32>,
    pub fused_score: f32,
    pub source: Sources,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    #[serde(default)]
    pub meta: Meta,
}

/// Caller-supplied restrictions. `product` and `since` pre-restrict retrieval;
/// any other key is a soft hint that only feeds the filter-match boost.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub request_id: Uuid,
    pub query: String,
    pub top_k: usize,
    #[serde(default)]
    pub filters: SearchFilters,
    /// Reference instant for the recency boost. Replays pass the original value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self { request_id: Uuid::new_v4(), query: query.into(), top_k, filters: SearchFilters::default(), as_of: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMeta {
    pub embed_model: String,
    pub tfidf_version: String,
    #[serde(default)]
    pub index_version: u64,
    /// Versions of the recency and filter-match policies, e.g. `half-life/v1+overlap/v1`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scoring_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub request_id: Uuid,
    pub results: Vec<FusedResult>,
    pub index_meta: IndexMeta,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

/// Disclosed reasons for reduced confidence in an otherwise successful response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    RoutingFallback { reason: String },
    ChannelUnavailable { channel: Channel, reason: String },
    KeywordOnlyRetry,
    ContextTruncated { kept: usize },
    SynthesisUnavailable { reason: String },
    ServedFromCache { index_version: u64 },
}

impl Notice {
    /// Whether this notice lowers confidence. A cache hit alone does not.
    pub fn degrades(&self) -> bool {
        !matches!(self, Notice::ServedFromCache { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Explain,
    #[default]
    HowToFix,
    LookupReference,
    AskMore,
}

impl Intent {
    /// Unknown labels fall back to `HowToFix`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "EXPLAIN" => Intent::Explain,
            "LOOKUP_REFERENCE" => Intent::LookupReference,
            "ASK_MORE" => Intent::AskMore,
            _ => Intent::HowToFix,
        }
    }

    pub fn searches_by_default(self) -> bool {
        matches!(self, Intent::HowToFix | Intent::LookupReference)
    }
}

/// Produced once per query by the routing decision or by the fail-open fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingPlan {
    pub need_search: bool,
    pub top_k: usize,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

impl RoutingPlan {
    /// Fail-open plan used when routing times out or fails: always search.
    pub fn fallback(top_k: usize) -> Self {
        Self {
            need_search: true,
            top_k,
            filters: SearchFilters::default(),
            degraded: true,
            intent: Intent::HowToFix,
            search_query: None,
            clarification: None,
        }
    }

    pub fn effective_query<'a>(&'a self, original: &'a str) -> &'a str {
        self.search_query.as_deref().filter(|q| !q.trim().is_empty()).unwrap_or(original)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedIncident {
    pub incident_id: IncidentId,
    pub why: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisResult {
    pub answer: String,
    #[serde(default)]
    pub applied_incidents: Vec<AppliedIncident>,
    #[serde(default)]
    pub followups: Vec<String>,
}

/// One completed exchange in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub query: String,
    pub results: Vec<FusedResult>,
    pub answer: String,
}
