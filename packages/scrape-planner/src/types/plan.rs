//! The scraping plan: the durable, versioned artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::analysis::{ContainerMethod, PaginationMethod};

/// Stable identifier of a plan across all of its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// A problem found when testing a plan's selectors against a page.
///
/// Issues are reported, never thrown: a partially invalid plan still
/// reaches human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Which selector the issue is about (`list`, `content_link`, `pagination`, or a field)
    pub target: String,

    /// The selector that was tested
    pub selector: String,

    pub severity: IssueSeverity,

    pub message: String,
}

impl ValidationIssue {
    pub fn warning(
        target: impl Into<String>,
        selector: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            selector: selector.into(),
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn error(
        target: impl Into<String>,
        selector: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            selector: selector.into(),
            severity: IssueSeverity::Error,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.target, self.selector, self.message)
    }
}

/// Descriptive metadata carried by every plan version.
///
/// All fields default on read so older records stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default = "default_container_method")]
    pub container_method: ContainerMethod,

    #[serde(default = "default_pagination_method")]
    pub pagination_method: PaginationMethod,

    /// Reasoning collected from the resolvers
    #[serde(default)]
    pub reasoning: Vec<String>,

    /// Validation findings and fallbacks taken during synthesis
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,

    /// SHA-256 over the selector content, used to detect no-op modifications
    #[serde(default)]
    pub content_hash: String,

    /// Cron schedule for recurring execution
    #[serde(default)]
    pub schedule: Option<String>,

    /// Upper bound on followed pagination pages
    #[serde(default)]
    pub max_pages: Option<u32>,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_container_method() -> ContainerMethod {
    ContainerMethod::None
}

fn default_pagination_method() -> PaginationMethod {
    PaginationMethod::None
}

/// A versioned, confidence-scored scraping plan.
///
/// Immutable once persisted under `(plan_id, version)`; modifications
/// always produce `version + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingPlan {
    pub plan_id: PlanId,

    /// Starts at 1, increments on every modification
    pub version: u32,

    pub entry_urls: Vec<String>,

    /// Selector for the repeated-item container
    pub list_selector: String,

    #[serde(default)]
    pub content_link_selector: Option<String>,

    #[serde(default)]
    pub pagination_selector: Option<String>,

    /// Detail-page field name to selector
    #[serde(default)]
    pub detail_selectors: BTreeMap<String, String>,

    /// Aggregated confidence in `[0.0, 1.0]`
    pub confidence_score: f32,

    pub metadata: PlanMetadata,
}

impl ScrapingPlan {
    /// Hash over everything a crawler would act on.
    pub fn compute_content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for url in &self.entry_urls {
            hasher.update(url.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.list_selector.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.content_link_selector.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        hasher.update(self.pagination_selector.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        for (field, selector) in &self.detail_selectors {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(selector.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.metadata.schedule.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute and store the content hash.
    pub fn refresh_content_hash(&mut self) {
        self.metadata.content_hash = self.compute_content_hash();
    }

    /// Whether this plan needs a human before it can run.
    pub fn needs_review(&self) -> bool {
        self.confidence_score <= 0.0
            || self
                .metadata
                .warnings
                .iter()
                .any(|w| w.severity == IssueSeverity::Error)
    }
}

/// Changes requested against an existing plan version.
///
/// `None` leaves a field untouched; `Some(None)` clears an optional selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanModification {
    #[serde(default)]
    pub entry_urls: Option<Vec<String>>,

    #[serde(default)]
    pub list_selector: Option<String>,

    #[serde(default)]
    pub content_link_selector: Option<Option<String>>,

    #[serde(default)]
    pub pagination_selector: Option<Option<String>>,

    /// Fields to add or replace
    #[serde(default)]
    pub set_detail_selectors: BTreeMap<String, String>,

    /// Fields to drop
    #[serde(default)]
    pub remove_detail_selectors: Vec<String>,

    #[serde(default)]
    pub schedule: Option<Option<String>>,

    #[serde(default)]
    pub confidence_score: Option<f32>,

    /// Who asked for the change
    #[serde(default)]
    pub modified_by: Option<String>,
}

impl PlanModification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_selector(mut self, selector: impl Into<String>) -> Self {
        self.list_selector = Some(selector.into());
        self
    }

    pub fn with_content_link_selector(mut self, selector: Option<String>) -> Self {
        self.content_link_selector = Some(selector);
        self
    }

    pub fn with_pagination_selector(mut self, selector: Option<String>) -> Self {
        self.pagination_selector = Some(selector);
        self
    }

    pub fn with_detail_selector(
        mut self,
        field: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        self.set_detail_selectors.insert(field.into(), selector.into());
        self
    }

    pub fn without_detail_selector(mut self, field: impl Into<String>) -> Self {
        self.remove_detail_selectors.push(field.into());
        self
    }

    pub fn with_schedule(mut self, schedule: Option<String>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn by(mut self, who: impl Into<String>) -> Self {
        self.modified_by = Some(who.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> ScrapingPlan {
        ScrapingPlan {
            plan_id: PlanId::new(),
            version: 1,
            entry_urls: vec!["https://example.com/news".to_string()],
            list_selector: "ul.news-list".to_string(),
            content_link_selector: Some("ul.news-list > li > a".to_string()),
            pagination_selector: None,
            detail_selectors: BTreeMap::new(),
            confidence_score: 0.6,
            metadata: PlanMetadata {
                name: None,
                description: None,
                created_at: Utc::now(),
                container_method: ContainerMethod::Heuristic,
                pagination_method: PaginationMethod::None,
                reasoning: vec![],
                warnings: vec![],
                content_hash: String::new(),
                schedule: None,
                max_pages: None,
                tags: vec![],
            },
        }
    }

    #[test]
    fn test_content_hash_ignores_metadata_noise() {
        let a = plan();
        let mut b = a.clone();
        b.metadata.reasoning.push("extra".to_string());
        b.confidence_score = 0.9;
        assert_eq!(a.compute_content_hash(), b.compute_content_hash());

        b.list_selector = "div.items".to_string();
        assert_ne!(a.compute_content_hash(), b.compute_content_hash());
    }

    #[test]
    fn test_metadata_defaults_on_read() {
        let json = r#"{"created_at":"2024-01-01T00:00:00Z"}"#;
        let meta: PlanMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.container_method, ContainerMethod::None);
        assert!(meta.warnings.is_empty());
        assert!(meta.schedule.is_none());
    }

    #[test]
    fn test_zero_confidence_needs_review() {
        let mut p = plan();
        assert!(!p.needs_review());
        p.confidence_score = 0.0;
        assert!(p.needs_review());
    }

    #[test]
    fn test_plan_id_roundtrips_through_display() {
        let id = PlanId::new();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
