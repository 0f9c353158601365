//! Test a plan's selectors against live pages.
//!
//! Findings are returned as `ValidationIssue`s; nothing here fails. A plan
//! whose selectors match nothing still goes to human review.

use tracing::debug;

use crate::dom::{is_valid_selector, Dom};
use crate::schedule::CronSchedule;
use crate::types::page::PageSnapshot;
use crate::types::plan::{ScrapingPlan, ValidationIssue};

/// Check every selector of `plan` against a list page and, optionally, a detail page.
///
/// Detail selectors are only syntax-checked without a detail page.
pub fn validate_plan(
    plan: &ScrapingPlan,
    list_page: &PageSnapshot,
    detail_page: Option<&PageSnapshot>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let list_dom = Dom::parse(&list_page.html, &list_page.url);

    match list_dom.count(&plan.list_selector) {
        None => issues.push(ValidationIssue::error(
            "list",
            &plan.list_selector,
            "selector does not parse",
        )),
        Some(0) => issues.push(ValidationIssue::error(
            "list",
            &plan.list_selector,
            "matches no elements on the list page",
        )),
        Some(_) => {}
    }

    if let Some(selector) = &plan.content_link_selector {
        match list_dom.links_within(list_dom.root(), selector) {
            None => issues.push(ValidationIssue::error(
                "content_link",
                selector,
                "selector does not parse",
            )),
            Some(links) if links.is_empty() => issues.push(ValidationIssue::error(
                "content_link",
                selector,
                "yields no links on the list page",
            )),
            Some(links) if links.len() == 1 => issues.push(ValidationIssue::warning(
                "content_link",
                selector,
                "yields a single link; expected one per item",
            )),
            Some(_) => {}
        }
    }

    if let Some(selector) = &plan.pagination_selector {
        match list_dom.count(selector) {
            None => issues.push(ValidationIssue::error(
                "pagination",
                selector,
                "selector does not parse",
            )),
            Some(0) => issues.push(ValidationIssue::warning(
                "pagination",
                selector,
                "does not resolve on the list page",
            )),
            Some(1) => {}
            Some(n) => issues.push(ValidationIssue::warning(
                "pagination",
                selector,
                format!("matches {} elements; expected exactly one", n),
            )),
        }
    }

    let detail_dom = detail_page.map(|page| Dom::parse(&page.html, &page.url));
    for (field, selector) in &plan.detail_selectors {
        if !is_valid_selector(selector) {
            issues.push(ValidationIssue::error(field, selector, "selector does not parse"));
            continue;
        }
        if let Some(dom) = &detail_dom {
            if dom.count(selector) == Some(0) {
                issues.push(ValidationIssue::warning(
                    field,
                    selector,
                    "matches nothing on the detail page",
                ));
            }
        }
    }

    if let Some(schedule) = &plan.metadata.schedule {
        if let Err(e) = CronSchedule::parse(schedule) {
            issues.push(ValidationIssue::error("schedule", schedule, e.to_string()));
        }
    }

    debug!(plan_id = %plan.plan_id, issues = issues.len(), "Plan validated");
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::types::plan::IssueSeverity;

    fn news_plan() -> ScrapingPlan {
        fixtures::plan("https://example.com/news", "ul.news-list", "ul.news-list > li > a")
    }

    #[test]
    fn test_valid_plan_has_no_issues() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::NEWS_LIST_PAGE);
        let issues = validate_plan(&news_plan(), &page, None);
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_zero_matches_are_errors() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::NEWS_LIST_PAGE);
        let mut plan = news_plan();
        plan.list_selector = "div.missing".to_string();
        plan.content_link_selector = Some("div.missing a".to_string());
        plan.pagination_selector = Some("a.next".to_string());

        let issues = validate_plan(&plan, &page, None);
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .map(|i| i.target.as_str())
            .collect();
        assert_eq!(errors, vec!["list", "content_link"]);
        assert!(issues
            .iter()
            .any(|i| i.target == "pagination" && i.severity == IssueSeverity::Warning));
    }

    #[test]
    fn test_detail_selectors_checked_against_detail_page() {
        let list = PageSnapshot::new("https://example.com/news", fixtures::NEWS_LIST_PAGE);
        let detail = PageSnapshot::new(
            "https://example.com/a1.htm",
            "<html><body><h1>Title</h1><p class='body'>Text</p></body></html>",
        );
        let mut plan = news_plan();
        plan.detail_selectors.insert("title".to_string(), "h1".to_string());
        plan.detail_selectors.insert("date".to_string(), "time.published".to_string());
        plan.detail_selectors.insert("broken".to_string(), "p[[".to_string());

        let issues = validate_plan(&plan, &list, Some(&detail));
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .any(|i| i.target == "broken" && i.severity == IssueSeverity::Error));
        assert!(issues
            .iter()
            .any(|i| i.target == "date" && i.severity == IssueSeverity::Warning));
    }
}
