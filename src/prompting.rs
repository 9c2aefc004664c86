use minijinja::{context, Environment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Llama,
    Qwen,
    Unknown,
}

impl ModelFamily {
    pub fn stop_markers(self) -> &'static [&'static str] {
        match self {
            ModelFamily::Llama => &["<|eot_id|>", "<|end_of_text|>"],
            ModelFamily::Qwen => &["<|im_end|>", "<|endoftext|>"],
            ModelFamily::Unknown => &["<|endoftext|>", "</s>"],
        }
    }
}

pub fn should_stop_on_text(family: ModelFamily, text: &str) -> bool {
    family
        .stop_markers()
        .iter()
        .any(|marker| text.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationMode {
    FunctionName,
    CodePrefix,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::FunctionName => "function_name",
            GenerationMode::CodePrefix => "code_prefix",
        }
    }
}

/// How long a generation may run. `MaxLength` counts the prompt tokens too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimit {
    MaxNewTokens(usize),
    MaxLength(usize),
}

impl TokenLimit {
    pub fn new_tokens_allowed(self, prompt_len: usize) -> usize {
        match self {
            TokenLimit::MaxNewTokens(n) => n,
            TokenLimit::MaxLength(n) => n.saturating_sub(prompt_len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub limit: TokenLimit,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub do_sample: bool,
    pub seed: Option<u64>,
}

impl SamplingParams {
    pub fn defaults_for(mode: GenerationMode) -> Self {
        match mode {
            GenerationMode::FunctionName => Self {
                limit: TokenLimit::MaxNewTokens(200),
                temperature: 0.3,
                top_p: 0.9,
                top_k: 50,
                do_sample: true,
                seed: None,
            },
            GenerationMode::CodePrefix => Self {
                limit: TokenLimit::MaxLength(300),
                temperature: 0.3,
                top_p: 0.9,
                top_k: 30,
                do_sample: true,
                seed: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub payload: String,
    pub params: SamplingParams,
}

impl GenerationRequest {
    pub fn function(name: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            mode: GenerationMode::FunctionName,
            payload: name.into(),
            params,
        }
    }

    pub fn completion(prefix: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            mode: GenerationMode::CodePrefix,
            payload: prefix.into(),
            params,
        }
    }
}

/// Opening of the definition the function-name prompt ends with.
pub fn signature_fragment(name: &str) -> String {
    format!("def {}(", name)
}

pub const DEFAULT_FUNCTION_INSTRUCTION: &str = "# Generate a Python function named {{ name }}.\n\n";

pub struct PromptBuilder {
    env: Environment<'static>,
    function_instruction: String,
}

impl PromptBuilder {
    pub fn new(function_instruction: &str) -> Result<Self, minijinja::Error> {
        Environment::new().template_from_str(function_instruction)?;

        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        Ok(Self {
            env,
            function_instruction: function_instruction.to_string(),
        })
    }

    pub fn build(&self, request: &GenerationRequest) -> Result<String, minijinja::Error> {
        match request.mode {
            GenerationMode::FunctionName => {
                let instruction = self.env.render_str(
                    &self.function_instruction,
                    context! { name => request.payload.as_str() },
                )?;
                Ok(format!(
                    "{}{}",
                    instruction,
                    signature_fragment(&request.payload)
                ))
            }
            GenerationMode::CodePrefix => Ok(request.payload.clone()),
        }
    }
}
