//! Plan synthesis: merge resolver outputs into a versioned plan.
//!
//! Synthesis never fails. Missing selectors fall back to generic defaults
//! and are recorded as warnings; confidence tells callers how far to trust
//! the result.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::Clock;
use crate::schedule::CronSchedule;
use crate::types::analysis::{
    clamp_confidence, ContainerAnalysis, ContainerMethod, DetailSelectors, PaginationAnalysis,
};
use crate::types::plan::{PlanId, PlanMetadata, PlanModification, ScrapingPlan, ValidationIssue};

/// Generic item selectors used when no container was resolved.
pub const DEFAULT_LIST_SELECTOR: &str = "article, .item, .entry, .post";

/// Generic link selectors used when no content-link selector was resolved.
pub const DEFAULT_CONTENT_LINK_SELECTOR: &str =
    "article a[href], .item a[href], .entry a[href], .post a[href]";

/// Caller-supplied plan settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Cron expression (5 or 6 fields)
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub max_pages: Option<u32>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Further list pages sharing the same structure
    #[serde(default)]
    pub additional_entry_urls: Vec<String>,
}

impl SynthesisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Validate an optional schedule, turning failures into an issue.
fn checked_schedule(schedule: Option<String>, warnings: &mut Vec<ValidationIssue>) -> Option<String> {
    let schedule = schedule?;
    match CronSchedule::parse(&schedule) {
        Ok(_) => Some(schedule),
        Err(e) => {
            warn!(schedule = %schedule, error = %e, "Dropping invalid schedule");
            warnings.push(ValidationIssue::error("schedule", schedule, e.to_string()));
            None
        }
    }
}

/// Builds plans and plan revisions.
#[derive(Clone)]
pub struct PlanSynthesizer {
    clock: Arc<dyn Clock>,
}

impl PlanSynthesizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Merge resolver outputs into version 1 of a new plan.
    pub fn synthesize(
        &self,
        entry_url: &str,
        container: &ContainerAnalysis,
        pagination: &PaginationAnalysis,
        detail: &DetailSelectors,
        options: &SynthesisOptions,
    ) -> ScrapingPlan {
        let mut warnings = Vec::new();
        let mut reasoning = Vec::new();

        let list_selector = if container.is_resolved() {
            container.container_selector.clone()
        } else {
            warnings.push(ValidationIssue::warning(
                "list",
                DEFAULT_LIST_SELECTOR,
                "no container resolved, using generic item selectors",
            ));
            DEFAULT_LIST_SELECTOR.to_string()
        };

        let content_link_selector = if container.content_link_selector.is_empty() {
            warnings.push(ValidationIssue::warning(
                "content_link",
                DEFAULT_CONTENT_LINK_SELECTOR,
                "no content link selector resolved, using generic link selectors",
            ));
            DEFAULT_CONTENT_LINK_SELECTOR.to_string()
        } else {
            container.content_link_selector.clone()
        };

        if container.method == ContainerMethod::PatternFallback && container.confidence <= 0.0 {
            warnings.push(ValidationIssue::warning(
                "list",
                &container.container_selector,
                "container is an unverified pattern candidate",
            ));
        }

        if !container.reasoning.is_empty() {
            reasoning.push(format!("container ({}): {}", container.method, container.reasoning));
        }
        reasoning.push(format!(
            "pagination ({}): {}",
            pagination.method,
            pagination.next_selector.as_deref().unwrap_or("no next control")
        ));

        let mut entry_urls = vec![entry_url.to_string()];
        for url in &options.additional_entry_urls {
            if !entry_urls.contains(url) {
                entry_urls.push(url.clone());
            }
        }

        let schedule = checked_schedule(options.schedule.clone(), &mut warnings);

        let confidence_score = clamp_confidence(
            detail
                .confidence
                .max(container.confidence)
                .max(pagination.confidence),
        );

        let mut plan = ScrapingPlan {
            plan_id: PlanId::new(),
            version: 1,
            entry_urls,
            list_selector,
            content_link_selector: Some(content_link_selector),
            pagination_selector: pagination.next_selector.clone(),
            detail_selectors: detail.fields.clone(),
            confidence_score,
            metadata: PlanMetadata {
                name: options.name.clone(),
                description: options.description.clone(),
                created_at: self.clock.now(),
                container_method: container.method,
                pagination_method: pagination.method,
                reasoning,
                warnings,
                content_hash: String::new(),
                schedule,
                max_pages: options.max_pages,
                tags: options.tags.clone(),
            },
        };
        plan.refresh_content_hash();

        debug!(
            plan_id = %plan.plan_id,
            confidence = plan.confidence_score,
            warnings = plan.metadata.warnings.len(),
            "Plan synthesized"
        );
        plan
    }

    /// Derive `version + 1` of `base` with `modification` applied.
    ///
    /// `base` is left untouched. Warnings are reset except for schedule
    /// problems found here; re-validate the revision against a page to
    /// refresh them.
    pub fn revise(&self, base: &ScrapingPlan, modification: &PlanModification) -> ScrapingPlan {
        let mut plan = base.clone();
        plan.version = base.version + 1;
        plan.metadata.created_at = self.clock.now();
        plan.metadata.warnings.clear();

        if let Some(urls) = &modification.entry_urls {
            plan.entry_urls = urls.clone();
        }
        if let Some(selector) = &modification.list_selector {
            plan.list_selector = selector.clone();
        }
        if let Some(selector) = &modification.content_link_selector {
            plan.content_link_selector = selector.clone();
        }
        if let Some(selector) = &modification.pagination_selector {
            plan.pagination_selector = selector.clone();
        }
        for field in &modification.remove_detail_selectors {
            plan.detail_selectors.remove(field);
        }
        for (field, selector) in &modification.set_detail_selectors {
            plan.detail_selectors.insert(field.clone(), selector.clone());
        }
        if let Some(schedule) = &modification.schedule {
            plan.metadata.schedule = checked_schedule(schedule.clone(), &mut plan.metadata.warnings);
        }
        if let Some(confidence) = modification.confidence_score {
            plan.confidence_score = clamp_confidence(confidence);
        }
        if let Some(who) = &modification.modified_by {
            plan.metadata
                .reasoning
                .push(format!("version {} modified by {}", plan.version, who));
        }

        plan.refresh_content_hash();
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use crate::types::analysis::PaginationMethod;
    use crate::types::plan::IssueSeverity;

    fn synthesizer() -> PlanSynthesizer {
        PlanSynthesizer::new(Arc::new(ManualClock::default()))
    }

    fn container(confidence: f32) -> ContainerAnalysis {
        ContainerAnalysis {
            container_selector: "ul.news-list".to_string(),
            content_link_selector: "ul.news-list > li > a".to_string(),
            example_link_selector: None,
            confidence,
            method: ContainerMethod::Heuristic,
            reasoning: "scored list".to_string(),
            content_links: vec!["https://example.com/a1.htm".to_string()],
        }
    }

    #[test]
    fn test_confidence_is_max_of_signals() {
        let pagination = PaginationAnalysis {
            next_selector: Some("a[rel~=\"next\"]".to_string()),
            discovered_links: vec![],
            confidence: 0.8,
            method: PaginationMethod::Heuristic,
        };
        let detail = DetailSelectors::new().with_confidence(0.3);
        let plan = synthesizer().synthesize(
            "https://example.com/news",
            &container(0.6),
            &pagination,
            &detail,
            &SynthesisOptions::default(),
        );

        assert_eq!(plan.version, 1);
        assert!((plan.confidence_score - 0.8).abs() < 1e-6);
        assert_eq!(plan.list_selector, "ul.news-list");
        assert_eq!(plan.pagination_selector.as_deref(), Some("a[rel~=\"next\"]"));
        assert!(plan.metadata.warnings.is_empty());
        assert_eq!(plan.metadata.content_hash, plan.compute_content_hash());
    }

    #[test]
    fn test_all_zero_inputs_yield_zero_confidence_with_defaults() {
        let plan = synthesizer().synthesize(
            "https://example.com/",
            &ContainerAnalysis::none("nothing"),
            &PaginationAnalysis::none(),
            &DetailSelectors::default(),
            &SynthesisOptions::default(),
        );

        assert_eq!(plan.confidence_score, 0.0);
        assert!(plan.needs_review());
        assert_eq!(plan.list_selector, DEFAULT_LIST_SELECTOR);
        assert_eq!(
            plan.content_link_selector.as_deref(),
            Some(DEFAULT_CONTENT_LINK_SELECTOR)
        );
        assert_eq!(plan.metadata.warnings.len(), 2);
    }

    #[test]
    fn test_synthesis_is_deterministic_except_plan_id() {
        let s = synthesizer();
        let options = SynthesisOptions::new().with_name("News").with_schedule("0 0 * * * *");
        let a = s.synthesize(
            "https://example.com/news",
            &container(0.6),
            &PaginationAnalysis::none(),
            &DetailSelectors::default(),
            &options,
        );
        let mut b = s.synthesize(
            "https://example.com/news",
            &container(0.6),
            &PaginationAnalysis::none(),
            &DetailSelectors::default(),
            &options,
        );
        assert_ne!(a.plan_id, b.plan_id);
        b.plan_id = a.plan_id;
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_schedule_becomes_error_issue() {
        let plan = synthesizer().synthesize(
            "https://example.com/news",
            &container(0.6),
            &PaginationAnalysis::none(),
            &DetailSelectors::default(),
            &SynthesisOptions::new().with_schedule("every day"),
        );
        assert!(plan.metadata.schedule.is_none());
        assert!(plan
            .metadata
            .warnings
            .iter()
            .any(|w| w.target == "schedule" && w.severity == IssueSeverity::Error));
        assert!(plan.needs_review());
    }

    #[test]
    fn test_revise_bumps_version_and_keeps_base() {
        let s = synthesizer();
        let base = s.synthesize(
            "https://example.com/news",
            &container(0.6),
            &PaginationAnalysis::none(),
            &DetailSelectors::new().with_field("title", "h1"),
            &SynthesisOptions::default(),
        );
        let modification = PlanModification::new()
            .with_list_selector("div.items")
            .with_detail_selector("date", "time")
            .without_detail_selector("title")
            .by("reviewer");

        let revised = s.revise(&base, &modification);

        assert_eq!(revised.plan_id, base.plan_id);
        assert_eq!(revised.version, 2);
        assert_eq!(revised.list_selector, "div.items");
        assert!(revised.detail_selectors.contains_key("date"));
        assert!(!revised.detail_selectors.contains_key("title"));
        assert_ne!(revised.metadata.content_hash, base.metadata.content_hash);
        assert_eq!(base.version, 1);
        assert_eq!(base.list_selector, "ul.news-list");
    }
}
