mod lifecycle;
mod tokenizer;

use candle_core::Device;
use tokenizers::Tokenizer;

use crate::backend::RuntimeModel;
use crate::errors::EngineError;
use crate::prompting::{ModelFamily, SamplingParams};

pub use lifecycle::select_device;

/// Token-level capability the request pipeline drives.
///
/// `GenerationEngine` is the candle implementation; the pipeline only ever sees
/// this trait so tests can substitute scripted generators.
pub trait TokenGenerator: Send + 'static {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError>;

    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError>;

    /// Returns the prompt tokens followed by everything generated.
    fn run(&mut self, tokens: &[u32], params: &SamplingParams) -> Result<Vec<u32>, EngineError>;

    fn describe(&self) -> String {
        "generator".to_string()
    }

    fn shutdown(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub eos: u32,
    pub eot: u32,
    pub pad: u32,
}

/// Tokenizer, weights and device loaded once at startup.
pub struct ModelHandle {
    pub(super) model: RuntimeModel,
    pub(super) tokenizer: Tokenizer,
    pub(super) device: Device,
    pub(super) family: ModelFamily,
    pub(super) special: SpecialTokens,
    pub(super) model_id: String,
}

impl ModelHandle {
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

pub struct GenerationEngine {
    handle: ModelHandle,
}

impl GenerationEngine {
    pub fn new(handle: ModelHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }
}
