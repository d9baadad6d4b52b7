use std::hash::{Hash, Hasher};

use anyhow::Result;
use twox_hash::XxHash64;

use incidentqa_core::traits::Embedder;

use crate::preprocess::{l2_normalize, prepare_input};

/// Deterministic feature-hashing encoder. Needs no model files, which makes it
/// the default for tests and for deployments without a local model.
pub struct HashingEncoder { dim: usize, max_input_chars: usize, tail_keep: usize, model_id: String }

impl HashingEncoder {
    pub fn new(dim: usize) -> Self { Self::with_limits(dim, 8_000, 2_000) }

    pub fn with_limits(dim: usize, max_input_chars: usize, tail_keep: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, max_input_chars, tail_keep, model_id: format!("hashing-xxh64-{dim}") }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let text = prepare_input(text, self.max_input_chars, self.tail_keep).to_lowercase();
        let mut v = vec![0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0); token.hash(&mut hasher); let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign * (0.5 + ((h >> 32) as u32) as f32 / (u32::MAX as f32));
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for HashingEncoder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.encode(t)).collect()) }
}
