use synth_protocol::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl EngineError {
    pub fn load(e: impl std::fmt::Display) -> Self {
        Self::ModelLoad(e.to_string())
    }

    pub fn inference(e: impl std::fmt::Display) -> Self {
        Self::Inference(e.to_string())
    }
}

impl From<candle_core::Error> for EngineError {
    fn from(e: candle_core::Error) -> Self {
        Self::Inference(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidIntent(String),
    #[error("{0}")]
    GenerationEmpty(String),
    #[error("service busy: {pending} requests already waiting")]
    ServiceBusy { pending: usize },
    #[error("{context}: {message}")]
    Internal { context: String, message: String },
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidIntent(_) => ErrorCode::InvalidIntent,
            Self::GenerationEmpty(_) => ErrorCode::GenerationEmpty,
            Self::ServiceBusy { .. } => ErrorCode::ServiceBusy,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    pub fn internal(context: &str, message: impl std::fmt::Display) -> Self {
        Self::Internal {
            context: context.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ModelLoad(msg) => Self::internal("model unavailable", msg),
            EngineError::Inference(msg) => Self::internal("generation failed", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
