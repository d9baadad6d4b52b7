use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, ensure, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use incidentqa_core::traits::Embedder;

use crate::pool::masked_mean_l2;
use crate::preprocess::prepare_input;
use crate::tokenize::tokenize_on_device;

pub const BGE_M3_DIM: usize = 1024;
const MAX_TOKENS: usize = 512;

/// BGE-M3 (XLM-RoBERTa) encoder loaded from a local model directory holding
/// `tokenizer.json`, `config.json` and `pytorch_model.bin`.
pub struct BgeEncoder { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device, max_input_chars: usize, tail_keep: usize, model_id: String }

impl BgeEncoder {
    pub fn load(model_dir: &Path, max_input_chars: usize, tail_keep: usize, prefer_gpu: bool) -> Result<Self> {
        let device = pick_device(prefer_gpu);
        let started = Instant::now();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        let model_id = model_dir.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "bge-m3".into());
        info!(dir = %model_dir.display(), elapsed_ms = started.elapsed().as_millis() as u64, "loaded embedding model");
        Ok(Self { model, tokenizer, device, max_input_chars, tail_keep, model_id })
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let started = Instant::now();
        let text = prepare_input(text, self.max_input_chars, self.tail_keep);
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, &text, MAX_TOKENS, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_TOKENS), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let v: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        ensure!(v.len() == BGE_M3_DIM, "unexpected embedding width {}", v.len());
        let elapsed = started.elapsed().as_millis() as u64;
        if elapsed > 500 { warn!(elapsed_ms = elapsed, "slow embedding"); } else { debug!(elapsed_ms = elapsed, "embedded query"); }
        Ok(v)
    }
}

impl Embedder for BgeEncoder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { BGE_M3_DIM }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { texts.iter().map(|t| self.encode(t)).collect() }
}

/// Metal when preferred and available, otherwise the CPU. Without the `metal`
/// feature this is always the CPU.
fn pick_device(prefer_gpu: bool) -> Device {
    #[cfg(feature = "metal")]
    {
        if prefer_gpu {
            match Device::new_metal(0) {
                Ok(device) => {
                    info!("embedding on metal");
                    return device;
                }
                Err(e) => warn!(error = %e, "metal unavailable; embedding on cpu"),
            }
        }
    }
    #[cfg(not(feature = "metal"))]
    let _ = prefer_gpu;
    debug!("embedding on cpu");
    Device::Cpu
}

/// First existing directory among the configured one, `APP_MODEL_DIR` and
/// the conventional `models/bge-m3` locations.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = configured { candidates.push(incidentqa_core::config::expand_path(dir)); }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") { candidates.push(PathBuf::from(dir)); }
    candidates.push(PathBuf::from("models/bge-m3"));
    candidates.push(PathBuf::from("../models/bge-m3"));
    candidates.into_iter().find(|p| p.exists()).ok_or_else(|| anyhow!("could not locate BGE-M3 model directory"))
}
