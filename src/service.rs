use std::sync::Arc;

use tracing::{debug, info, warn};
use unicode_ident::{is_xid_continue, is_xid_start};

use crate::config::ServiceConfig;
use crate::engine::TokenGenerator;
use crate::errors::ServiceError;
use crate::extraction::BoundaryExtraction;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::prompting::{GenerationMode, GenerationRequest, PromptBuilder, SamplingParams};
use crate::serializer::{Pipeline, RequestSerializer};

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// A name Python would accept after `def`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || is_xid_start(first)) {
        return false;
    }
    if !chars.all(is_xid_continue) {
        return false;
    }
    !PYTHON_KEYWORDS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedFunction {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCode {
    pub prefix: String,
    pub code: String,
}

pub struct CodeSynthService {
    serializer: RequestSerializer,
    function_params: SamplingParams,
    completion_params: SamplingParams,
    metrics: Arc<ServiceMetrics>,
}

impl CodeSynthService {
    pub fn start<G: TokenGenerator>(engine: G, config: &ServiceConfig) -> Result<Self, ServiceError> {
        let config_error = |e: crate::errors::ConfigError| ServiceError::internal("invalid configuration", e);
        config.validate().map_err(config_error)?;
        let function_params = config
            .sampling_for(GenerationMode::FunctionName)
            .map_err(config_error)?;
        let completion_params = config
            .sampling_for(GenerationMode::CodePrefix)
            .map_err(config_error)?;

        let prompts = PromptBuilder::new(&config.function_instruction)
            .map_err(|e| ServiceError::internal("invalid function instruction template", e))?;
        let policy = BoundaryExtraction::new(
            config.extraction.function_boundary.clone(),
            config.extraction.completion_stops.clone(),
        );

        let metrics = Arc::new(ServiceMetrics::default());
        let serializer = RequestSerializer::start(
            Pipeline::new(engine, prompts, Box::new(policy)),
            config.queue_depth,
            Arc::clone(&metrics),
        )?;

        Ok(Self {
            serializer,
            function_params,
            completion_params,
            metrics,
        })
    }

    pub async fn synthesize_function(&self, name: &str) -> Result<SynthesizedFunction, ServiceError> {
        self.metrics.record_request();
        let name = name.trim();
        if !is_valid_identifier(name) {
            self.metrics.record_invalid();
            debug!(name, "rejected function name");
            return Err(ServiceError::InvalidIntent("invalid function name".to_string()));
        }

        let result = self
            .serializer
            .submit(GenerationRequest::function(name, self.function_params))
            .await?;

        if result.extracted_code.is_empty() {
            self.metrics.record_empty();
            warn!(name, raw_len = result.raw_text.len(), "no function found in model output");
            return Err(ServiceError::GenerationEmpty(
                "failed to produce a valid function body".to_string(),
            ));
        }

        Ok(SynthesizedFunction {
            name: name.to_string(),
            code: result.extracted_code,
        })
    }

    pub async fn complete_code(&self, prefix: &str) -> Result<CompletedCode, ServiceError> {
        self.metrics.record_request();
        if prefix.trim().is_empty() {
            self.metrics.record_invalid();
            return Err(ServiceError::InvalidIntent("prompt must not be empty".to_string()));
        }

        let result = self
            .serializer
            .submit(GenerationRequest::completion(prefix, self.completion_params))
            .await?;

        if result.extracted_code.is_empty() {
            self.metrics.record_empty();
            warn!(raw_len = result.raw_text.len(), "completion produced no code");
            return Err(ServiceError::GenerationEmpty(
                "failed to produce a valid completion".to_string(),
            ));
        }

        Ok(CompletedCode {
            prefix: prefix.to_string(),
            code: result.extracted_code,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending(&self) -> usize {
        self.serializer.pending()
    }

    pub fn queue_depth(&self) -> Option<usize> {
        self.serializer.depth_limit()
    }

    pub fn engine_description(&self) -> &str {
        self.serializer.engine_description()
    }

    pub fn shutdown(&self) {
        self.serializer.shutdown();
        info!(metrics = ?self.metrics.snapshot(), "service stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::serializer::testing::ScriptedGenerator;

    fn service(generator: ScriptedGenerator) -> CodeSynthService {
        CodeSynthService::start(generator, &ServiceConfig::default()).expect("start service")
    }

    #[test]
    fn identifier_rules() {
        for ok in ["add_numbers", "_private", "x1", "données", "CamelCase"] {
            assert!(is_valid_identifier(ok), "{ok} should be valid");
        }
        for bad in ["123abc", "has space", "", "a-b", "def", "None", "x()", "a.b"] {
            assert!(!is_valid_identifier(bad), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn identifier_rules_follow_xid_classes() {
        // superscripts and vulgar fractions are numeric but not XID_Continue
        assert!(!is_valid_identifier("a\u{b2}"));
        assert!(!is_valid_identifier("a\u{bd}"));
        assert!(!is_valid_identifier("\u{b2}"));
        // combining marks may continue an identifier but not start one
        assert!(is_valid_identifier("x\u{301}"));
        assert!(!is_valid_identifier("\u{301}x"));
    }

    #[test]
    fn zero_queue_depth_is_rejected_at_start() {
        let config = ServiceConfig {
            queue_depth: Some(0),
            ..ServiceConfig::default()
        };
        let generator = ScriptedGenerator::appending("pass");
        match CodeSynthService::start(generator, &config) {
            Err(ServiceError::Internal { message, .. }) => assert!(message.contains("queue_depth")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("zero queue depth must be rejected"),
        }
    }

    #[tokio::test]
    async fn synthesize_function_returns_first_unit() {
        let svc = service(ScriptedGenerator::appending(
            "a, b):\n    return a + b\n\ndef unrelated():",
        ));
        let out = svc.synthesize_function("add_numbers").await.expect("function");
        assert_eq!(out.name, "add_numbers");
        assert_eq!(out.code, "def add_numbers(a, b):\n    return a + b");
    }

    #[tokio::test]
    async fn synthesized_code_always_starts_with_requested_signature() {
        for name in ["f", "parse_header", "_x9"] {
            let svc = service(ScriptedGenerator::appending("x):\n    return x\n"));
            let out = svc.synthesize_function(name).await.expect("function");
            assert!(out.code.starts_with(&format!("def {}(", name)));
        }
    }

    #[tokio::test]
    async fn function_name_is_trimmed_before_validation() {
        let svc = service(ScriptedGenerator::appending("):\n    pass"));
        let out = svc.synthesize_function("  noop \n").await.expect("function");
        assert_eq!(out.name, "noop");
        assert_eq!(out.code, "def noop():\n    pass");
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_engine() {
        let generator = ScriptedGenerator::appending("):\n    pass");
        let runs = Arc::clone(&generator.runs);
        let svc = service(generator);

        for bad in ["123abc", "has space", ""] {
            let err = svc.synthesize_function(bad).await.expect_err("invalid name");
            assert!(matches!(err, ServiceError::InvalidIntent(_)));
            assert_eq!(err.to_string(), "invalid function name");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(svc.metrics().invalid, 3);
    }

    #[tokio::test]
    async fn echo_without_body_is_generation_empty() {
        let svc = service(ScriptedGenerator::appending(""));
        let err = svc.synthesize_function("lonely").await.expect_err("empty body");
        assert!(matches!(err, ServiceError::GenerationEmpty(_)));
        assert_eq!(err.to_string(), "failed to produce a valid function body");
    }

    #[tokio::test]
    async fn completion_stops_before_new_definition() {
        let svc = service(ScriptedGenerator::appending(
            "print(f'hi {name}')\n\ndef another():",
        ));
        let prefix = "def greet(name):\n    ";
        let out = svc.complete_code(prefix).await.expect("completion");
        assert_eq!(out.prefix, prefix);
        assert!(out.code.starts_with(prefix));
        assert_eq!(out.code, "def greet(name):\n    print(f'hi {name}')\n\n");
        assert!(!out.code.contains("def another():"));
    }

    #[tokio::test]
    async fn completion_echo_only_returns_prefix() {
        let svc = service(ScriptedGenerator::appending(""));
        let out = svc.complete_code("import os").await.expect("completion");
        assert_eq!(out.code, "import os");
    }

    #[tokio::test]
    async fn blank_prompt_is_invalid() {
        let generator = ScriptedGenerator::appending("x");
        let runs = Arc::clone(&generator.runs);
        let svc = service(generator);

        for blank in ["", "   ", "\n\t"] {
            let err = svc.complete_code(blank).await.expect_err("blank prompt");
            assert!(matches!(err, ServiceError::InvalidIntent(_)));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn engine_failure_surfaces_as_internal_with_message() {
        let svc = service(ScriptedGenerator::failing("CUDA error: out of memory"));
        let err = svc.complete_code("x = ").await.expect_err("engine failure");
        assert!(matches!(err, ServiceError::Internal { .. }));
        assert!(err.to_string().contains("out of memory"));
        assert_eq!(svc.metrics().engine_failures, 1);
    }
}
