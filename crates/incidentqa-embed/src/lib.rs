//! incidentqa-embed
//!
//! Query encoders for the semantic channel: a candle BGE-M3 encoder and a
//! model-free hashing encoder.
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use incidentqa_core::config::{EmbedBackend, EmbedSettings};
use incidentqa_core::traits::Embedder;

pub mod bge;
pub mod hashing;
pub mod pool;
pub mod preprocess;
pub mod tokenize;

pub use bge::BgeEncoder;
pub use hashing::HashingEncoder;
pub use pool::masked_mean_l2;
pub use preprocess::prepare_input;

pub fn encoder_from_settings(settings: &EmbedSettings) -> Result<Arc<dyn Embedder>> {
    match settings.backend {
        EmbedBackend::Hashing => {
            info!(dim = settings.dim, "using hashing encoder");
            Ok(Arc::new(HashingEncoder::with_limits(settings.dim, settings.max_input_chars, settings.tail_keep_chars)))
        }
        EmbedBackend::Bge => {
            let dir = bge::resolve_model_dir(settings.model_dir.as_deref())?;
            Ok(Arc::new(BgeEncoder::load(&dir, settings.max_input_chars, settings.tail_keep_chars, settings.prefer_gpu)?))
        }
    }
}
