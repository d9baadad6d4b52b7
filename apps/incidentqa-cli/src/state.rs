use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use incidentqa_agent::{ChatProvider, Orchestrator};
use incidentqa_core::config::Settings;
use incidentqa_embed::encoder_from_settings;
use incidentqa_hybrid::{FusionEngine, HybridSearchEngine, IndexStore};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub index_dir: PathBuf,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, index_dir: PathBuf) -> Self {
        Self { orchestrator, index_dir }
    }

    /// Wires the store, both channels and the chat provider. A missing index
    /// is not fatal: requests fail with `index_unavailable` until a reload.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let index_dir = PathBuf::from(&settings.data.index_dir);
        let store = Arc::new(IndexStore::new());
        if let Err(e) = store.reload(&index_dir) {
            warn!(dir = %index_dir.display(), error = %e, "starting without an index");
        }
        let embedder = encoder_from_settings(&settings.embed)?;
        let fusion = FusionEngine::from_settings(&settings.fusion);
        let channels = Arc::new(
            HybridSearchEngine::new(embedder, fusion.clone(), settings.retrieval.clone()).with_snippet_chars(settings.orchestrator.max_snippet_chars),
        );
        let provider = Arc::new(ChatProvider::new(settings.llm.clone(), settings.retrieval.default_top_k)?);
        let orchestrator = Orchestrator::new(store, channels, fusion, provider.clone(), provider, settings);
        Ok(Self::new(Arc::new(orchestrator), index_dir))
    }
}
