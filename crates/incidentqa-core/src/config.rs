//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (`__` separates nested keys). Provides helpers to
//! expand `~` and `${VAR}` and to resolve relative paths against a known base
//! directory.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Defaults + one explicit file + `APP_*` env vars.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("APP_").split("__"));
        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The full typed configuration, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub retrieval: RetrievalSettings,
    pub fusion: FusionSettings,
    pub orchestrator: OrchestratorSettings,
    pub cache: CacheSettings,
    pub llm: LlmSettings,
    pub embed: EmbedSettings,
    pub server: ServerSettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.default_top_k == 0 || r.max_top_k == 0 {
            return Err(Error::InvalidConfig("retrieval top_k limits must be > 0".into()));
        }
        if r.default_top_k > r.max_top_k {
            return Err(Error::InvalidConfig("retrieval.default_top_k exceeds retrieval.max_top_k".into()));
        }
        if r.candidate_pool_factor == 0 {
            return Err(Error::InvalidConfig("retrieval.candidate_pool_factor must be > 0".into()));
        }
        if r.semantic_timeout_ms == 0 || r.keyword_timeout_ms == 0 {
            return Err(Error::InvalidConfig("retrieval timeouts must be > 0".into()));
        }

        let f = &self.fusion;
        for (name, w) in [("w_sem", f.w_sem), ("w_kw", f.w_kw), ("w_recency", f.w_recency), ("w_filter", f.w_filter)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!("fusion.{name} must be a finite non-negative number")));
            }
        }
        if f.recency_half_life_days <= 0.0 {
            return Err(Error::InvalidConfig("fusion.recency_half_life_days must be > 0".into()));
        }
        if f.max_snippets_per_incident == 0 {
            return Err(Error::InvalidConfig("fusion.max_snippets_per_incident must be > 0".into()));
        }

        let o = &self.orchestrator;
        if o.routing_timeout_ms == 0 || o.synthesis_timeout_ms == 0 {
            return Err(Error::InvalidConfig("orchestrator timeouts must be > 0".into()));
        }
        if o.truncated_results == 0 || o.truncated_results >= r.default_top_k {
            return Err(Error::InvalidConfig(
                "orchestrator.truncated_results must be in [1, retrieval.default_top_k)".into(),
            ));
        }
        if o.backoff_base_ms > o.backoff_max_ms {
            return Err(Error::InvalidConfig("orchestrator.backoff_base_ms exceeds backoff_max_ms".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding `incidents.jsonl`, `dense.json` and `sparse.json`.
    pub index_dir: String,
    /// Raw incident records consumed by the indexer.
    pub incidents_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { index_dir: "./data/index".into(), incidents_dir: "./data/incidents".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub candidate_pool_factor: usize,
    pub min_candidate_pool: usize,
    pub semantic_timeout_ms: u64,
    pub keyword_timeout_ms: u64,
    /// Retry the keyword channel alone once when both channels fail.
    pub keyword_only_fallback: bool,
}

impl RetrievalSettings {
    /// Per-channel retrieval depth for a requested `top_k`.
    pub fn candidate_pool(&self, top_k: usize) -> usize {
        (top_k * self.candidate_pool_factor).max(self.min_candidate_pool).max(top_k)
    }

    pub fn clamp_top_k(&self, top_k: usize) -> usize {
        top_k.clamp(1, self.max_top_k)
    }

    pub fn semantic_timeout(&self) -> Duration {
        Duration::from_millis(self.semantic_timeout_ms)
    }

    pub fn keyword_timeout(&self) -> Duration {
        Duration::from_millis(self.keyword_timeout_ms)
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_top_k: 8,
            max_top_k: 50,
            candidate_pool_factor: 5,
            min_candidate_pool: 100,
            semantic_timeout_ms: 2_000,
            keyword_timeout_ms: 2_000,
            keyword_only_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub w_sem: f32,
    pub w_kw: f32,
    pub w_recency: f32,
    pub w_filter: f32,
    pub recency_half_life_days: f32,
    pub max_snippets_per_incident: usize,
    pub dedupe_same_resolution: bool,
    pub min_desc_len: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            w_sem: 0.6,
            w_kw: 0.4,
            w_recency: 0.05,
            w_filter: 0.05,
            recency_half_life_days: 365.0,
            max_snippets_per_incident: 2,
            dedupe_same_resolution: true,
            min_desc_len: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub routing_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub max_rate_limit_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Results handed to synthesis at most.
    pub context_max_results: usize,
    /// Results kept after a context-too-large rejection.
    pub truncated_results: usize,
    pub max_desc_chars: usize,
    pub max_resolution_chars: usize,
    pub max_snippet_chars: usize,
    pub truncated_snippet_chars: usize,
    pub history_turns: usize,
}

impl OrchestratorSettings {
    pub fn routing_timeout(&self) -> Duration {
        Duration::from_millis(self.routing_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            routing_timeout_ms: 15_000,
            synthesis_timeout_ms: 60_000,
            max_rate_limit_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            context_max_results: 12,
            truncated_results: 4,
            max_desc_chars: 1_200,
            max_resolution_chars: 1_600,
            max_snippet_chars: 600,
            truncated_snippet_chars: 240,
            history_turns: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, ttl_secs: 600, max_entries: 1_024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_base: String,
    pub path: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub router_max_tokens: u32,
    pub synth_max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:11434/v1".into(),
            path: "/chat/completions".into(),
            api_key: String::new(),
            model: "llama3.1".into(),
            temperature: 0.2,
            router_max_tokens: 800,
            synth_max_tokens: 2_048,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedBackend {
    #[default]
    Hashing,
    Bge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    pub backend: EmbedBackend,
    pub model_dir: Option<String>,
    pub dim: usize,
    pub max_input_chars: usize,
    pub tail_keep_chars: usize,
    /// Run the BGE encoder on Metal when the build and the host allow it.
    pub prefer_gpu: bool,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self { backend: EmbedBackend::Hashing, model_dir: None, dim: 1_024, max_input_chars: 8_000, tail_keep_chars: 2_000, prefer_gpu: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_negative_weight() {
        let mut s = Settings::default();
        s.fusion.w_kw = -0.1;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_truncation_not_below_top_k() {
        let mut s = Settings::default();
        s.orchestrator.truncated_results = s.retrieval.default_top_k;
        assert!(s.validate().is_err());
    }

    #[test]
    fn candidate_pool_has_floor() {
        let r = RetrievalSettings::default();
        assert_eq!(r.candidate_pool(8), 100);
        assert_eq!(r.candidate_pool(40), 200);
        assert_eq!(r.clamp_top_k(0), 1);
        assert_eq!(r.clamp_top_k(500), r.max_top_k);
    }

    #[test]
    fn figment_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string("[fusion]\nw_sem = 0.9\n[retrieval]\nkeyword_only_fallback = true\n"));
        let settings = Config::from_figment(figment).settings().expect("settings");
        assert!((settings.fusion.w_sem - 0.9).abs() < f32::EPSILON);
        assert!(settings.retrieval.keyword_only_fallback);
        assert_eq!(settings.retrieval.default_top_k, 8);
    }

    #[test]
    fn resolves_relative_paths_against_base() {
        let base = Path::new("/srv/incidentqa");
        assert_eq!(resolve_with_base(base, "data/index"), base.join("data/index"));
        assert_eq!(resolve_with_base(base, "/abs/index"), PathBuf::from("/abs/index"));
    }
}
