//! Boundary validation of completion-service output.
//!
//! Model output is untyped text. It is parsed once, here, into a closed set
//! of variants; nothing downstream ever sees raw JSON. Any failure (timeout,
//! transport error, malformed JSON, wrong shape) becomes `ParseFailure`,
//! which the resolvers treat as "reject this tier".

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CompletionError;
use crate::traits::completion::{CompletionRequest, CompletionService};
use crate::types::analysis::clamp_confidence;

/// Which schema a response is expected to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Container,
    Pagination,
}

/// Container suggestion from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSuggestion {
    #[serde(default, alias = "example_url_selector")]
    pub example_url_selector: Option<String>,

    #[serde(default, alias = "sibling_container_selector")]
    pub sibling_container_selector: Option<String>,

    #[serde(default, alias = "content_link_selector")]
    pub content_link_selector: Option<String>,

    #[serde(default, alias = "pagination_next_selector")]
    pub pagination_next_selector: Option<String>,

    #[serde(default)]
    pub confidence: Option<f32>,

    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Pagination suggestion from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSuggestion {
    #[serde(default, alias = "pagination_next_selector")]
    pub pagination_next_selector: Option<String>,

    #[serde(default, alias = "pagination_links")]
    pub pagination_links: Vec<String>,

    #[serde(default)]
    pub confidence: Option<f32>,

    #[serde(default)]
    pub reasoning: Option<String>,
}

/// A validated model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAnalysis {
    Container(ContainerSuggestion),
    Pagination(PaginationSuggestion),
    ParseFailure { reason: String },
}

impl ModelAnalysis {
    fn failure(reason: impl Into<String>) -> Self {
        ModelAnalysis::ParseFailure {
            reason: reason.into(),
        }
    }
}

/// Strip code fences and surrounding prose down to the outermost JSON object.
fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Trimmed selector, or `None` for empty/"null" placeholders.
fn clean_selector(selector: Option<String>) -> Option<String> {
    selector
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "null" && s != "none")
}

/// Parse completion content into the expected variant.
pub fn parse_model_response(content: &str, kind: ResponseKind) -> ModelAnalysis {
    let Some(json) = extract_json_object(content) else {
        return ModelAnalysis::failure("response contains no JSON object");
    };
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return ModelAnalysis::failure(format!("invalid JSON: {}", e)),
    };

    match kind {
        ResponseKind::Container => {
            let suggestion: ContainerSuggestion = match serde_json::from_value(value) {
                Ok(s) => s,
                Err(e) => return ModelAnalysis::failure(format!("unexpected shape: {}", e)),
            };
            let suggestion = ContainerSuggestion {
                example_url_selector: clean_selector(suggestion.example_url_selector),
                sibling_container_selector: clean_selector(suggestion.sibling_container_selector),
                content_link_selector: clean_selector(suggestion.content_link_selector),
                pagination_next_selector: clean_selector(suggestion.pagination_next_selector),
                confidence: suggestion.confidence.map(clamp_confidence),
                reasoning: suggestion.reasoning,
            };
            if suggestion.example_url_selector.is_none()
                && suggestion.sibling_container_selector.is_none()
                && suggestion.content_link_selector.is_none()
            {
                return ModelAnalysis::failure("container response carries no selectors");
            }
            ModelAnalysis::Container(suggestion)
        }
        ResponseKind::Pagination => {
            let has_fields = value.get("paginationNextSelector").is_some()
                || value.get("pagination_next_selector").is_some()
                || value.get("paginationLinks").is_some()
                || value.get("pagination_links").is_some();
            if !has_fields {
                return ModelAnalysis::failure("pagination response carries no pagination fields");
            }
            let suggestion: PaginationSuggestion = match serde_json::from_value(value) {
                Ok(s) => s,
                Err(e) => return ModelAnalysis::failure(format!("unexpected shape: {}", e)),
            };
            ModelAnalysis::Pagination(PaginationSuggestion {
                pagination_next_selector: clean_selector(suggestion.pagination_next_selector),
                confidence: suggestion.confidence.map(clamp_confidence),
                ..suggestion
            })
        }
    }
}

/// Call the completion service with a timeout and validate the answer.
///
/// Never fails: every error is folded into `ModelAnalysis::ParseFailure`.
pub async fn request_analysis(
    service: &dyn CompletionService,
    request: CompletionRequest,
    timeout: Duration,
    kind: ResponseKind,
) -> ModelAnalysis {
    let outcome = match tokio::time::timeout(timeout, service.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(CompletionError::Timeout {
            seconds: timeout.as_secs(),
        }),
    };

    match outcome {
        Ok(response) => {
            let analysis = parse_model_response(&response.content, kind);
            if let ModelAnalysis::ParseFailure { reason } = &analysis {
                warn!(kind = ?kind, reason = %reason, "Rejected malformed model response");
            } else {
                debug!(kind = ?kind, "Model response parsed");
            }
            analysis
        }
        Err(e) => {
            warn!(kind = ?kind, error = %e, "Completion call failed, falling back");
            ModelAnalysis::failure(e.to_string())
        }
    }
}
