//! OpenAI-compatible chat-completion client used as both router and
//! synthesizer.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use incidentqa_core::config::LlmSettings;
use incidentqa_core::snippet::clip;
use incidentqa_core::types::{AppliedIncident, ConversationTurn, Intent, RoutingPlan, SearchFilters, SynthesisResult};
use incidentqa_core::{Error, Result};

use crate::reasoning::{Router, SynthesisInput, Synthesizer};

pub const DEFAULT_CLARIFICATION: &str = "Could you share the exact error text and product version?";

const ROUTER_PROMPT: &str = "Classify the support question. Reply with a JSON object: \
{\"intent\": \"EXPLAIN|HOW_TO_FIX|LOOKUP_REFERENCE|ASK_MORE\", \"need_search\": bool, \
\"search_query\": string, \"top_k\": int, \"filters\": {\"product\": string, \"since\": \"YYYY-MM-DD\"}, \
\"ask\": string}. Use ASK_MORE only when the question cannot be answered without more detail.";

const SYNTH_PROMPT: &str = "Answer the support question using only the supplied incidents. Reply with a JSON object: \
{\"answer\": string, \"applied_incidents\": [{\"incident_id\": string, \"why\": string}], \"followups\": [string]}. \
Cite only incident ids that appear in the evidence.";

pub struct ChatProvider {
    client: Client,
    settings: LlmSettings,
    default_top_k: usize,
}

impl ChatProvider {
    pub fn new(settings: LlmSettings, default_top_k: usize) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_millis(settings.timeout_ms)).build()?;
        Ok(Self { client, settings, default_top_k })
    }

    async fn chat(&self, messages: Vec<Value>, temperature: f32, max_tokens: u32) -> Result<Value> {
        let url = format!("{}{}", self.settings.api_base.trim_end_matches('/'), self.settings.path);
        let body = json!({
            "model": self.settings.model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "response_format": { "type": "json_object" },
            "messages": messages,
        });
        let res = self
            .client
            .post(&url)
            .headers(auth_headers(&self.settings.api_key)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::SynthesisUnavailable(format!("request failed: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(res.headers());
            let text = res.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &text));
        }
        let json: Value = res.json().await.map_err(|e| Error::SynthesisUnavailable(format!("invalid response body: {e}")))?;
        parse_content_json(&json)
    }
}

impl Router for ChatProvider {
    fn classify<'a>(&'a self, query: &'a str, history: &'a [ConversationTurn]) -> BoxFuture<'a, Result<RoutingPlan>> {
        Box::pin(async move {
            let mut messages = vec![json!({ "role": "system", "content": ROUTER_PROMPT })];
            messages.extend(history_messages(history));
            messages.push(json!({ "role": "user", "content": query }));
            let value = self.chat(messages, 0.0, self.settings.router_max_tokens).await?;
            let plan = routing_plan_from_json(&value, query, self.default_top_k);
            debug!(intent = ?plan.intent, need_search = plan.need_search, top_k = plan.top_k, "routing decision");
            Ok(plan)
        })
    }
}

impl Synthesizer for ChatProvider {
    fn summarize<'a>(&'a self, input: &'a SynthesisInput) -> BoxFuture<'a, Result<SynthesisResult>> {
        Box::pin(async move {
            if input.intent == Intent::AskMore {
                if let Some(question) = input.clarification.as_deref().filter(|q| !q.trim().is_empty()) {
                    return Ok(SynthesisResult { answer: question.to_string(), ..Default::default() });
                }
            }
            let evidence = serde_json::to_string(&input.evidence)?;
            let mut messages = vec![json!({ "role": "system", "content": SYNTH_PROMPT })];
            messages.extend(history_messages(&input.history));
            messages.push(json!({ "role": "user", "content": format!("Question: {}\n\nIncidents (JSON):\n{}", input.query, evidence) }));
            let value = self.chat(messages, self.settings.temperature, self.settings.synth_max_tokens).await?;
            Ok(synthesis_from_json(&value))
        })
    }
}

fn history_messages(history: &[ConversationTurn]) -> Vec<Value> {
    history
        .iter()
        .flat_map(|t| [json!({ "role": "user", "content": t.query }), json!({ "role": "assistant", "content": t.answer })])
        .collect()
}

pub fn auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if api_key.is_empty() { return Ok(headers); }
    let value: HeaderValue = format!("Bearer {api_key}").parse().map_err(|_| Error::InvalidConfig("llm.api_key is not a valid header value".into()))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub fn map_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::SynthesisRateLimited { retry_after };
    }
    if status == StatusCode::PAYLOAD_TOO_LARGE || body.contains("context_length") {
        return Error::ContextTooLarge;
    }
    Error::SynthesisUnavailable(format!("HTTP {status}: {}", clip(body, 200)))
}

/// JSON object carried in `choices[0].message.content`, parsed directly or from
/// its outermost `{...}` span. A bare object response is accepted as is.
pub fn parse_content_json(json: &Value) -> Result<Value> {
    let content = json
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str());
    match content {
        Some(text) => extract_json_object(text).ok_or_else(|| Error::SynthesisUnavailable("model content is not a JSON object".into())),
        None if json.is_object() && json.get("choices").is_none() => Ok(json.clone()),
        None => Err(Error::SynthesisUnavailable("response is missing message content".into())),
    }
}

fn extract_json_object(text: &str) -> Option<Value> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(v);
    }
    let (start, end) = (text.find('{')?, text.rfind('}')?);
    if end <= start { return None; }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// Normalizes a router reply. Unknown intents become `HowToFix`, a missing
/// `need_search` follows the intent, and an empty rewrite keeps the query.
pub fn routing_plan_from_json(v: &Value, query: &str, default_top_k: usize) -> RoutingPlan {
    let intent = v.get("intent").and_then(Value::as_str).map(Intent::parse).unwrap_or_default();
    let need_search = v.get("need_search").and_then(Value::as_bool).unwrap_or_else(|| intent.searches_by_default());
    let search_query = v
        .get("search_query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty() && *q != query.trim())
        .map(str::to_string);
    let top_k = v.get("top_k").and_then(Value::as_u64).filter(|k| *k > 0).map_or(default_top_k, |k| k as usize);
    let filters = v.get("filters").cloned().and_then(|f| serde_json::from_value::<SearchFilters>(f).ok()).map(drop_blank_filters).unwrap_or_default();
    let clarification = (intent == Intent::AskMore).then(|| {
        v.get("ask").and_then(Value::as_str).map(str::trim).filter(|a| !a.is_empty()).unwrap_or(DEFAULT_CLARIFICATION).to_string()
    });
    RoutingPlan { need_search, top_k, filters, degraded: false, intent, search_query, clarification }
}

fn drop_blank_filters(mut f: SearchFilters) -> SearchFilters {
    if f.product.as_deref().is_some_and(|p| p.trim().is_empty()) { f.product = None; }
    f.extra.retain(|_, v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()));
    f
}

pub fn synthesis_from_json(v: &Value) -> SynthesisResult {
    let answer = v.get("answer").and_then(Value::as_str).unwrap_or_default().trim().to_string();
    let applied_incidents = v
        .get("applied_incidents")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(id) => Some(AppliedIncident { incident_id: id.clone(), why: String::new() }),
                    Value::Object(_) => {
                        let incident_id = item.get("incident_id").and_then(Value::as_str)?.to_string();
                        let why = item.get("why").and_then(Value::as_str).unwrap_or_default().to_string();
                        Some(AppliedIncident { incident_id, why })
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let followups = v
        .get("followups")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    SynthesisResult { answer, applied_incidents, followups }
}
