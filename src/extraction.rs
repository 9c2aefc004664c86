//! Stopping rules that cut the generated unit out of the decoded model output.
//!
//! The model is free to keep writing after the function or statement it was asked
//! for; these policies decide where the intended unit ends. They only look at text,
//! so they can be swapped without touching the engine.

use crate::prompting::{signature_fragment, GenerationMode, GenerationRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub raw_text: String,
    pub extracted_code: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    pub code: String,
    pub truncated: bool,
}

impl Extraction {
    fn empty() -> Self {
        Self::default()
    }
}

pub trait ExtractionPolicy: Send + Sync {
    /// `raw_text` is the full decoded output, prompt echo included.
    fn extract(&self, request: &GenerationRequest, prompt: &str, raw_text: &str) -> Extraction;
}

pub const FUNCTION_BOUNDARY: &str = "\n\n";
pub const DEFINITION_KEYWORD: &str = "def ";

#[derive(Debug, Clone)]
pub struct BoundaryExtraction {
    function_boundary: String,
    completion_stops: Vec<String>,
}

impl Default for BoundaryExtraction {
    fn default() -> Self {
        Self {
            function_boundary: FUNCTION_BOUNDARY.to_string(),
            completion_stops: vec![DEFINITION_KEYWORD.to_string()],
        }
    }
}

impl BoundaryExtraction {
    pub fn new(function_boundary: impl Into<String>, completion_stops: Vec<String>) -> Self {
        Self {
            function_boundary: function_boundary.into(),
            completion_stops: completion_stops
                .into_iter()
                .filter(|stop| !stop.is_empty())
                .collect(),
        }
    }

    fn extract_function(&self, name: &str, raw_text: &str) -> Extraction {
        let signature = signature_fragment(name);
        // The prompt echo is not trusted to be byte-identical, so search the whole text.
        let Some(start) = raw_text.find(&signature) else {
            return Extraction::empty();
        };

        let unit = &raw_text[start..];
        let after_signature = &unit[signature.len()..];
        if after_signature.trim().is_empty() {
            return Extraction::empty();
        }

        let boundary = if self.function_boundary.is_empty() {
            None
        } else {
            after_signature.find(&self.function_boundary)
        };

        match boundary {
            Some(offset) => Extraction {
                code: unit[..signature.len() + offset].trim_end().to_string(),
                truncated: true,
            },
            None => Extraction {
                code: unit.trim_end().to_string(),
                truncated: false,
            },
        }
    }

    fn extract_completion(&self, prompt: &str, raw_text: &str) -> Extraction {
        if raw_text.is_empty() {
            return Extraction::empty();
        }

        let split = byte_offset_of_char(raw_text, prompt.chars().count());
        let continuation = &raw_text[split..];

        let stop = self
            .completion_stops
            .iter()
            .filter_map(|marker| continuation.find(marker.as_str()))
            .min();

        match stop {
            Some(pos) => Extraction {
                code: raw_text[..split + pos].to_string(),
                truncated: true,
            },
            None => Extraction {
                code: raw_text.to_string(),
                truncated: false,
            },
        }
    }
}

impl ExtractionPolicy for BoundaryExtraction {
    fn extract(&self, request: &GenerationRequest, prompt: &str, raw_text: &str) -> Extraction {
        match request.mode {
            GenerationMode::FunctionName => self.extract_function(&request.payload, raw_text),
            GenerationMode::CodePrefix => self.extract_completion(prompt, raw_text),
        }
    }
}

/// Byte index of the `n`-th char, or the end of `text` when it is shorter.
fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
