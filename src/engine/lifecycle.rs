use std::time::{Instant, SystemTime, UNIX_EPOCH};

use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use tracing::{debug, info, warn};

use crate::backend::RuntimeModel;
use crate::config::ModelConfig;
use crate::errors::EngineError;
use crate::model_catalog::ModelCatalog;
use crate::prompting::{should_stop_on_text, SamplingParams};

use super::tokenizer::{load_tokenizer, resolve_tokenizer_path};
use super::{GenerationEngine, ModelHandle, TokenGenerator};

/// CUDA, then Metal, then CPU. Chosen once at load.
pub fn select_device() -> Device {
    if let Ok(device) = Device::cuda_if_available(0) {
        if device.is_cuda() {
            return device;
        }
    }
    if let Ok(device) = Device::new_metal(0) {
        return device;
    }
    Device::Cpu
}

impl ModelHandle {
    pub fn load(config: &ModelConfig) -> Result<Self, EngineError> {
        let started = Instant::now();
        let catalog = ModelCatalog::discover(&config.weights)?;
        let entry = catalog.preferred()?.clone();

        let device = select_device();
        info!(
            model = %entry.id,
            family = ?entry.family,
            device = ?device,
            path = %entry.path.display(),
            "loading weights"
        );
        let model = RuntimeModel::load_from_gguf(&entry.path, entry.family, &device)?;

        let tokenizer_path = resolve_tokenizer_path(
            config.tokenizer.as_deref(),
            entry.tokenizer_path.clone(),
            config.hub_tokenizer_repo.as_deref(),
        )?;
        info!(path = %tokenizer_path.display(), "loading tokenizer");
        let (tokenizer, special) = load_tokenizer(&tokenizer_path, entry.family)?;

        info!(
            eos = special.eos,
            eot = special.eot,
            pad = special.pad,
            architecture = model.architecture(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model ready"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            family: entry.family,
            special,
            model_id: entry.id,
        })
    }
}

fn sampling_for(params: &SamplingParams) -> Sampling {
    if !params.do_sample || params.temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    if params.top_p >= 1.0 {
        Sampling::TopK {
            k: params.top_k,
            temperature: params.temperature,
        }
    } else {
        Sampling::TopKThenTopP {
            k: params.top_k,
            p: params.top_p,
            temperature: params.temperature,
        }
    }
}

fn fresh_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            warn!(error = %e, "getrandom failed, seeding from the clock");
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(299_792_458)
        }
    }
}

impl TokenGenerator for GenerationEngine {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        let encoding = self
            .handle
            .tokenizer
            .encode(text, true)
            .map_err(EngineError::inference)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError> {
        self.handle
            .tokenizer
            .decode(tokens, true)
            .map_err(EngineError::inference)
    }

    fn run(&mut self, tokens: &[u32], params: &SamplingParams) -> Result<Vec<u32>, EngineError> {
        let mut all_tokens = tokens.to_vec();
        let budget = params.limit.new_tokens_allowed(tokens.len());
        if tokens.is_empty() || budget == 0 {
            return Ok(all_tokens);
        }

        let handle = &mut self.handle;
        let mut logits_processor =
            LogitsProcessor::from_sampling(params.seed.unwrap_or_else(fresh_seed), sampling_for(params));
        let mut index_pos = 0;

        for _ in 0..budget {
            let context_size = if index_pos == 0 { all_tokens.len() } else { 1 };
            let start_pos = all_tokens.len() - context_size;

            let input = Tensor::new(&all_tokens[start_pos..], &handle.device)?.unsqueeze(0)?;
            let logits = handle.model.forward(&input, index_pos)?;
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            index_pos += context_size;

            let next_token = logits_processor.sample(&logits)?;
            all_tokens.push(next_token);

            if next_token == handle.special.eos || next_token == handle.special.eot {
                debug!(token = next_token, "stop token");
                break;
            }

            if let Ok(piece) = handle.tokenizer.decode(&[next_token], false) {
                if should_stop_on_text(handle.family, &piece) {
                    debug!(piece = %piece, "stop marker");
                    break;
                }
            }
        }

        Ok(all_tokens)
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}, {:?})",
            self.handle.model_id,
            self.handle.model.architecture(),
            self.handle.device
        )
    }

    fn shutdown(&mut self) {
        info!(model = %self.handle.model_id, "releasing model");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompting::{GenerationMode, TokenLimit};

    #[test]
    fn greedy_when_sampling_disabled() {
        let mut params = SamplingParams::defaults_for(GenerationMode::CodePrefix);
        params.do_sample = false;
        assert!(matches!(sampling_for(&params), Sampling::ArgMax));
    }

    #[test]
    fn top_k_then_top_p_by_default() {
        let params = SamplingParams::defaults_for(GenerationMode::CodePrefix);
        match sampling_for(&params) {
            Sampling::TopKThenTopP { k, p, temperature } => {
                assert_eq!(k, 30);
                assert!((p - 0.9).abs() < f64::EPSILON);
                assert!((temperature - 0.3).abs() < f64::EPSILON);
            }
            _ => panic!("expected top-k then top-p sampling"),
        }

        let mut params = SamplingParams::defaults_for(GenerationMode::FunctionName);
        params.top_p = 1.0;
        params.limit = TokenLimit::MaxNewTokens(1);
        assert!(matches!(sampling_for(&params), Sampling::TopK { k: 50, .. }));
    }

    #[test]
    fn cpu_is_always_a_valid_fallback() {
        let device = select_device();
        assert!(device.is_cpu() || device.is_cuda() || device.is_metal());
    }
}
