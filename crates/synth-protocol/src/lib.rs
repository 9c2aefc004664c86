//! Wire types shared by the code synthesis server and its clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SYNTHESIZE_FUNCTION_PATH: &str = "/synthesize_function";
pub const COMPLETE_CODE_PATH: &str = "/complete_code";
pub const HEALTH_PATH: &str = "/health";

/// Body of a function synthesis request, e.g. `{"function_name": "add_numbers"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub function_name: String,
    pub generated_code: String,
}

/// Body of a completion request. `prompt` is the code fragment to continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub prompt: String,
    pub completed_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidIntent,
    GenerationEmpty,
    ServiceBusy,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidIntent => "INVALID_INTENT",
            Self::GenerationEmpty => "GENERATION_EMPTY",
            Self::ServiceBusy => "SERVICE_BUSY",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServiceBusy | Self::GenerationEmpty)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INVALID_INTENT" => Ok(Self::InvalidIntent),
            "GENERATION_EMPTY" => Ok(Self::GenerationEmpty),
            "SERVICE_BUSY" => Ok(Self::ServiceBusy),
            "INTERNAL" => Ok(Self::Internal),
            _ => Err(UnknownErrorCode(s.to_string())),
        }
    }
}

/// Failure body. `detail` keeps the field name HTTP clients of the service already read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub code: ErrorCode,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            code,
        }
    }
}
