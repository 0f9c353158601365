//! Resolver outputs: container and pagination analyses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clamp a confidence into `[0.0, 1.0]`; NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// How a container analysis was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerMethod {
    /// Heuristic container, structural link path (model suggestion rejected or unavailable)
    #[serde(rename = "heuristic")]
    Heuristic,

    /// Model suggestion validated against the DOM
    #[serde(rename = "heuristic+model")]
    HeuristicModel,

    /// Links filtered by similarity to the example URL; confidence 0 without a scoring container
    #[serde(rename = "pattern-fallback")]
    PatternFallback,

    /// Nothing usable found
    #[serde(rename = "none")]
    None,
}

impl std::fmt::Display for ContainerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerMethod::Heuristic => write!(f, "heuristic"),
            ContainerMethod::HeuristicModel => write!(f, "heuristic+model"),
            ContainerMethod::PatternFallback => write!(f, "pattern-fallback"),
            ContainerMethod::None => write!(f, "none"),
        }
    }
}

/// Result of resolving the content container for one example URL.
///
/// Produced once per `(page, example_url)` pair and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerAnalysis {
    /// Selector for the element grouping the repeated items
    pub container_selector: String,

    /// Selector yielding exactly one primary link per item
    pub content_link_selector: String,

    /// Selector isolating the example anchor, if it was found
    #[serde(default)]
    pub example_link_selector: Option<String>,

    /// Confidence in `[0.0, 1.0]`
    pub confidence: f32,

    /// How the result was reached
    pub method: ContainerMethod,

    /// Human-readable trail of the decisions taken
    #[serde(default)]
    pub reasoning: String,

    /// Deduplicated absolute URLs the content-link selector yields
    #[serde(default)]
    pub content_links: Vec<String>,
}

impl ContainerAnalysis {
    /// The empty analysis: nothing found, confidence 0.
    pub fn none(reasoning: impl Into<String>) -> Self {
        Self {
            container_selector: String::new(),
            content_link_selector: String::new(),
            example_link_selector: None,
            confidence: 0.0,
            method: ContainerMethod::None,
            reasoning: reasoning.into(),
            content_links: Vec::new(),
        }
    }

    /// Whether a container was resolved at all.
    pub fn is_resolved(&self) -> bool {
        self.method != ContainerMethod::None && !self.container_selector.is_empty()
    }
}

/// How a pagination analysis was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationMethod {
    #[serde(rename = "heuristic")]
    Heuristic,

    #[serde(rename = "heuristic+model-verified")]
    HeuristicModelVerified,

    #[serde(rename = "model")]
    Model,

    #[serde(rename = "none")]
    None,
}

impl std::fmt::Display for PaginationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaginationMethod::Heuristic => write!(f, "heuristic"),
            PaginationMethod::HeuristicModelVerified => write!(f, "heuristic+model-verified"),
            PaginationMethod::Model => write!(f, "model"),
            PaginationMethod::None => write!(f, "none"),
        }
    }
}

/// Result of locating the "next page" control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationAnalysis {
    /// Selector isolating the next-page control
    #[serde(default)]
    pub next_selector: Option<String>,

    /// Pagination URLs in document order, deduplicated
    #[serde(default)]
    pub discovered_links: Vec<String>,

    /// Confidence in `[0.0, 1.0]`
    pub confidence: f32,

    /// How the result was reached
    pub method: PaginationMethod,
}

impl PaginationAnalysis {
    /// No pagination found.
    pub fn none() -> Self {
        Self {
            next_selector: None,
            discovered_links: Vec::new(),
            confidence: 0.0,
            method: PaginationMethod::None,
        }
    }
}

/// Detail-page field selectors supplied from outside the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailSelectors {
    /// Field name to CSS selector
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Confidence of the supplier, in `[0.0, 1.0]`
    #[serde(default)]
    pub confidence: f32,
}

impl DetailSelectors {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field selector.
    pub fn with_field(mut self, field: impl Into<String>, selector: impl Into<String>) -> Self {
        self.fields.insert(field.into(), selector.into());
        self
    }

    /// Set the supplier confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_method_serializes_with_plus() {
        let json = serde_json::to_string(&ContainerMethod::HeuristicModel).unwrap();
        assert_eq!(json, "\"heuristic+model\"");
        let method: PaginationMethod =
            serde_json::from_str("\"heuristic+model-verified\"").unwrap();
        assert_eq!(method, PaginationMethod::HeuristicModelVerified);
    }

    #[test]
    fn test_none_analysis_has_zero_confidence() {
        let analysis = ContainerAnalysis::none("no anchors");
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.method, ContainerMethod::None);
        assert!(!analysis.is_resolved());
    }
}
