//! OpenAI-compatible implementation of the completion service.
//!
//! # Example
//!
//! ```rust,ignore
//! use scrape_planner::ai::OpenAI;
//!
//! let completion = Arc::new(OpenAI::from_env()?.with_model("gpt-4o-mini"));
//! let resolver = ContainerResolver::new(completion, PlannerConfig::default());
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{CompletionError, CompletionResult, PlannerError, Result};
use crate::traits::completion::{
    CompletionRequest, CompletionResponse, CompletionService, ResponseFormat,
};

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Clone)]
pub struct OpenAI {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAI {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY` (and `OPENAI_BASE_URL` if set).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PlannerError::Config("OPENAI_API_KEY not set".into()))?;
        let client = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) => client.with_base_url(url),
            Err(_) => client,
        })
    }

    /// Set the chat model (default: gpt-4o).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for OpenAI {
    async fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionResponse> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_message,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: match request.response_format {
                ResponseFormat::Json => Some(ChatResponseFormat {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Unavailable(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(CompletionResponse::new)
            .ok_or_else(|| CompletionError::InvalidResponse("no choices in response".into()))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ChatResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_requests_ask_for_json_object() {
        let body = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            temperature: 0.1,
            max_tokens: 1500,
            response_format: Some(ChatResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");

        let text = ChatRequest {
            response_format: None,
            ..body
        };
        let json = serde_json::to_value(&text).unwrap();
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_builder() {
        let client = OpenAI::new("sk-test")
            .with_model("gpt-4o-mini")
            .with_base_url("http://localhost:8080/v1");
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
