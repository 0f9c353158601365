//! Completion-service contract.
//!
//! The core never runs inference; it sends a prompt and expects JSON back.
//! Responses are validated at the boundary (see `pipeline::response`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CompletionResult;

/// Requested response encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Text,
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,

    pub system_message: String,

    pub response_format: ResponseFormat,

    pub temperature: f32,

    pub max_tokens: u32,
}

impl CompletionRequest {
    /// JSON request with default sampling settings.
    pub fn json(system_message: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_message: system_message.into(),
            response_format: ResponseFormat::Json,
            temperature: 0.1,
            max_tokens: 1500,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Raw completion output; `content` should parse as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Completion service abstraction.
///
/// Implementations wrap a specific provider. Calls are the only suspension
/// points of resolution and are always bounded by a timeout by the caller.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionResponse>;
}
