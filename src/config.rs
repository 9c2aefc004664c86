use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::extraction::{DEFINITION_KEYWORD, FUNCTION_BOUNDARY};
use crate::prompting::{
    GenerationMode, SamplingParams, TokenLimit, DEFAULT_FUNCTION_INSTRUCTION,
};

pub const CONFIG_PATH_ENV: &str = "CODE_SYNTH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "code_synth.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub bind: String,
    pub log_filter: String,
    /// Requests allowed to wait behind the one being generated. Unbounded when absent.
    pub queue_depth: Option<usize>,
    /// Fixed sampling seed; a fresh random seed is drawn per request when absent.
    pub seed: Option<u64>,
    pub function_instruction: String,
    pub model: ModelConfig,
    pub function: SamplingOverrides,
    pub completion: SamplingOverrides,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub weights: PathBuf,
    pub tokenizer: Option<PathBuf>,
    pub hub_tokenizer_repo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingOverrides {
    pub max_new_tokens: Option<usize>,
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub do_sample: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    pub function_boundary: String,
    pub completion_stops: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            log_filter: "code_synth=info".to_string(),
            queue_depth: None,
            seed: None,
            function_instruction: DEFAULT_FUNCTION_INSTRUCTION.to_string(),
            model: ModelConfig::default(),
            function: SamplingOverrides::default(),
            completion: SamplingOverrides::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("models"),
            tokenizer: None,
            hub_tokenizer_repo: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            function_boundary: FUNCTION_BOUNDARY.to_string(),
            completion_stops: vec![DEFINITION_KEYWORD.to_string()],
        }
    }
}

impl ServiceConfig {
    /// File named by `CODE_SYNTH_CONFIG` (or `code_synth.toml` when present), then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok();
        let mut config = match &explicit {
            Some(path) => Self::from_file(Path::new(path))?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(weights) = lookup("CODE_SYNTH_WEIGHTS") {
            self.model.weights = PathBuf::from(weights);
        }
        if let Some(bind) = lookup("CODE_SYNTH_BIND") {
            self.bind = bind;
        }
        if let Some(depth) = lookup("CODE_SYNTH_QUEUE_DEPTH") {
            let depth = depth.trim();
            self.queue_depth = if depth.is_empty() || depth.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(depth.parse().map_err(|_| ConfigError::Invalid {
                    key: "CODE_SYNTH_QUEUE_DEPTH".to_string(),
                    reason: format!("'{}' is not a number", depth),
                })?)
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == Some(0) {
            return Err(ConfigError::Invalid {
                key: "queue_depth".to_string(),
                reason: "must be > 0 (omit it for an unbounded queue)".to_string(),
            });
        }
        self.sampling_for(GenerationMode::FunctionName)?;
        self.sampling_for(GenerationMode::CodePrefix)?;
        Ok(())
    }

    pub fn sampling_for(&self, mode: GenerationMode) -> Result<SamplingParams, ConfigError> {
        let (overrides, section) = match mode {
            GenerationMode::FunctionName => (&self.function, "function"),
            GenerationMode::CodePrefix => (&self.completion, "completion"),
        };
        let mut params = overrides.apply(SamplingParams::defaults_for(mode), section)?;
        params.seed = self.seed;
        Ok(params)
    }
}

impl SamplingOverrides {
    pub fn apply(&self, base: SamplingParams, section: &str) -> Result<SamplingParams, ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: format!("{}.{}", section, key),
            reason: reason.to_string(),
        };

        let mut cfg = base;

        match (self.max_new_tokens, self.max_length) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "max_length",
                    "set either max_new_tokens or max_length, not both",
                ))
            }
            (Some(0), None) => return Err(invalid("max_new_tokens", "must be > 0")),
            (None, Some(0)) => return Err(invalid("max_length", "must be > 0")),
            (Some(n), None) => cfg.limit = TokenLimit::MaxNewTokens(n),
            (None, Some(n)) => cfg.limit = TokenLimit::MaxLength(n),
            (None, None) => {}
        }

        if let Some(temperature) = self.temperature {
            if !(temperature > 0.0 && temperature <= 2.0) {
                return Err(invalid("temperature", "must be in (0.0, 2.0]"));
            }
            cfg.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(invalid("top_p", "must be in (0.0, 1.0]"));
            }
            cfg.top_p = top_p;
        }
        if let Some(top_k) = self.top_k {
            if top_k == 0 {
                return Err(invalid("top_k", "must be > 0"));
            }
            cfg.top_k = top_k;
        }
        if let Some(do_sample) = self.do_sample {
            cfg.do_sample = do_sample;
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_backend_defaults() {
        let cfg = ServiceConfig::from_toml_str("").expect("parse empty config");
        assert_eq!(cfg.bind, "127.0.0.1:8000");
        assert_eq!(cfg.queue_depth, None);

        let function = cfg
            .sampling_for(GenerationMode::FunctionName)
            .expect("function params");
        assert_eq!(function.limit, TokenLimit::MaxNewTokens(200));
        assert_eq!(function.temperature, 0.3);

        let completion = cfg
            .sampling_for(GenerationMode::CodePrefix)
            .expect("completion params");
        assert_eq!(completion.limit, TokenLimit::MaxLength(300));
        assert_eq!(completion.top_k, 30);
        assert!(completion.do_sample);
    }

    #[test]
    fn sections_override_sampling_and_model() {
        let cfg = ServiceConfig::from_toml_str(
            r#"
            queue_depth = 4
            seed = 7

            [model]
            weights = "/srv/models/qwen2.5-coder"
            hub_tokenizer_repo = "Qwen/Qwen2.5-Coder-1.5B"

            [completion]
            max_new_tokens = 64
            do_sample = false
            "#,
        )
        .expect("parse config");

        assert_eq!(cfg.queue_depth, Some(4));
        assert_eq!(cfg.model.weights, PathBuf::from("/srv/models/qwen2.5-coder"));

        let completion = cfg
            .sampling_for(GenerationMode::CodePrefix)
            .expect("completion params");
        assert_eq!(completion.limit, TokenLimit::MaxNewTokens(64));
        assert!(!completion.do_sample);
        assert_eq!(completion.seed, Some(7));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServiceConfig::from_toml_str("bogus = 1").is_err());
    }

    #[test]
    fn out_of_range_sampling_fails_validation() {
        let cfg = ServiceConfig::from_toml_str("[function]\ntemperature = 3.5\n").expect("parse");
        let err = cfg.validate().expect_err("temperature out of range");
        assert!(err.to_string().contains("function.temperature"));

        let cfg = ServiceConfig::from_toml_str("[completion]\nmax_length = 10\nmax_new_tokens = 5\n")
            .expect("parse");
        assert!(cfg.validate().is_err());

        let cfg = ServiceConfig::from_toml_str("queue_depth = 0").expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CODE_SYNTH_WEIGHTS", "/tmp/weights"),
            ("CODE_SYNTH_BIND", "0.0.0.0:9000"),
            ("CODE_SYNTH_QUEUE_DEPTH", "2"),
        ]);
        let mut cfg = ServiceConfig::default();
        cfg.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("apply overrides");

        assert_eq!(cfg.model.weights, PathBuf::from("/tmp/weights"));
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        assert_eq!(cfg.queue_depth, Some(2));

        let bad = |key: &str| (key == "CODE_SYNTH_QUEUE_DEPTH").then(|| "lots".to_string());
        assert!(cfg.apply_env_overrides(bad).is_err());

        let unbounded =
            |key: &str| (key == "CODE_SYNTH_QUEUE_DEPTH").then(|| "unbounded".to_string());
        cfg.apply_env_overrides(unbounded).expect("unbounded override");
        assert_eq!(cfg.queue_depth, None);
    }
}
