use std::path::Path;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;

use crate::errors::EngineError;
use crate::prompting::ModelFamily;

pub enum RuntimeModel {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl RuntimeModel {
    pub fn load_from_gguf(
        path: &Path,
        family: ModelFamily,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            EngineError::load(format!("failed to open weights '{}': {}", path.display(), e))
        })?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| {
            EngineError::load(format!("malformed GGUF '{}': {}", path.display(), e))
        })?;

        match family {
            ModelFamily::Qwen => {
                match quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device) {
                    Ok(model) => Ok(Self::Qwen2(model)),
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("cannot find tensor info for output_norm.weight") {
                            Err(EngineError::load(
                                "Qwen load failed: missing 'output_norm.weight'. The GGUF is likely an incomplete split shard; merge all parts into one file.",
                            ))
                        } else {
                            Err(EngineError::load(msg))
                        }
                    }
                }
            }
            ModelFamily::Llama | ModelFamily::Unknown => {
                let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)
                    .map_err(EngineError::load)?;
                Ok(Self::Llama(model))
            }
        }
    }

    /// Logits for the last input position. `position == 0` starts a fresh sequence.
    pub fn forward(&mut self, input: &Tensor, position: usize) -> Result<Tensor, EngineError> {
        let logits = match self {
            Self::Llama(model) => model.forward(input, position)?,
            Self::Qwen2(model) => model.forward(input, position)?,
        };
        Ok(logits)
    }

    pub fn architecture(&self) -> &'static str {
        match self {
            Self::Llama(_) => "llama",
            Self::Qwen2(_) => "qwen2",
        }
    }
}
