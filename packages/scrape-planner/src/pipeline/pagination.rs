//! Pagination resolution: find the "next page" control.
//!
//! Tier 1 tries selector families from most to least specific and stops at
//! the first family with matches. Tier 2 lets the model refine a Tier 1 pick;
//! Tier 3 asks the model from scratch when Tier 1 found no next link.

use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::dom::{self, ancestors, class_and_id, parent_element, Anchor, Dom};
use crate::pipeline::prompts::{
    format_pagination_discover_prompt, format_pagination_verify_prompt, PAGINATION_SYSTEM_MESSAGE,
};
use crate::pipeline::response::{request_analysis, ModelAnalysis, ResponseKind};
use crate::similarity::is_content_link;
use crate::traits::completion::{CompletionRequest, CompletionService};
use crate::types::analysis::{clamp_confidence, PaginationAnalysis, PaginationMethod};
use crate::types::config::PlannerConfig;
use crate::types::page::PageSnapshot;

/// Confidence of a Tier 1 pick.
pub const HEURISTIC_CONFIDENCE: f32 = 0.8;
/// Added when the model's refinement of a Tier 1 pick validates.
pub const VERIFICATION_BOOST: f32 = 0.1;
/// Confidence of a model-only pick that reports none.
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.5;

struct SelectorFamily {
    name: &'static str,
    selectors: &'static [&'static str],
    /// Drop anchors that look like content links (query patterns are noisy)
    skip_content_links: bool,
}

const FAMILIES: &[SelectorFamily] = &[
    SelectorFamily {
        name: "semantic",
        selectors: &[
            "a[rel~=\"next\"]",
            "a[aria-label*=\"next\"]",
            "a[aria-label*=\"Next\"]",
            "a[aria-label*=\"weiter\"]",
            "a[aria-label*=\"Weiter\"]",
            "a[aria-label*=\"nächste\"]",
            "a[aria-label*=\"Nächste\"]",
        ],
        skip_content_links: false,
    },
    SelectorFamily {
        name: "class",
        selectors: &[
            ".pagination a",
            ".pager a",
            "a.page-numbers",
            ".paging a",
            ".pagenav a",
            ".pagenavi a",
            ".pagebrowser a",
            ".blaettern a",
            "nav[aria-label*=\"agination\"] a",
            "nav[aria-label*=\"eiten\"] a",
        ],
        skip_content_links: false,
    },
    SelectorFamily {
        name: "query",
        selectors: &[
            "a[href*=\"page=\"]",
            "a[href*=\"?p=\"]",
            "a[href*=\"&p=\"]",
            "a[href*=\"/page/\"]",
            "a[href*=\"seite=\"]",
            "a[href*=\"offset=\"]",
            "a[href*=\"start=\"]",
        ],
        skip_content_links: true,
    },
];

const NEXT_KEYWORDS: &[&str] = &["next", "weiter", "nächste", "naechste", "vorwärts"];
const NEXT_SYMBOLS: &[&str] = &["›", "»", ">", ">>", "→", "→→"];
const REGION_TOKENS: &[&str] = &["pag", "pager", "blaettern", "seiten", "browse"];

/// The Tier 1 next-link pick.
#[derive(Debug, Clone)]
struct NextCandidate {
    selector: String,
    region_html: String,
}

/// Owned result of the heuristic pass.
#[derive(Debug, Clone, Default)]
struct HeuristicPagination {
    family: Option<&'static str>,
    candidate: Option<NextCandidate>,
    discovered_links: Vec<String>,
    /// Broader excerpt for the model when Tier 1 has no candidate
    fallback_region: String,
}

/// Resolves the next-page control of a listing page.
#[derive(Clone)]
pub struct PaginationResolver {
    completion: Arc<dyn CompletionService>,
    config: PlannerConfig,
}

impl PaginationResolver {
    pub fn new(completion: Arc<dyn CompletionService>, config: PlannerConfig) -> Self {
        Self { completion, config }
    }

    /// Locate the next-page control, optionally near a resolved container.
    pub async fn resolve(&self, page: &PageSnapshot, container: Option<&str>) -> PaginationAnalysis {
        let heuristic = find_heuristic_pagination(page, container, &self.config);
        debug!(
            page_url = %page.url,
            family = ?heuristic.family,
            has_candidate = heuristic.candidate.is_some(),
            links = heuristic.discovered_links.len(),
            "Pagination heuristics done"
        );

        let analysis = match &heuristic.candidate {
            Some(candidate) => self.verify(page, &heuristic, candidate).await,
            None => self.discover(page, &heuristic).await,
        };

        info!(
            page_url = %page.url,
            method = %analysis.method,
            next = ?analysis.next_selector,
            confidence = analysis.confidence,
            "Pagination resolved"
        );
        analysis
    }

    async fn verify(
        &self,
        page: &PageSnapshot,
        heuristic: &HeuristicPagination,
        candidate: &NextCandidate,
    ) -> PaginationAnalysis {
        let request = CompletionRequest::json(
            PAGINATION_SYSTEM_MESSAGE,
            format_pagination_verify_prompt(&page.url, &candidate.selector, &candidate.region_html),
        )
        .with_temperature(self.config.model_temperature)
        .with_max_tokens(self.config.model_max_tokens);

        let model = request_analysis(
            self.completion.as_ref(),
            request,
            self.config.completion_timeout(),
            ResponseKind::Pagination,
        )
        .await;

        let heuristic_only = PaginationAnalysis {
            next_selector: Some(candidate.selector.clone()),
            discovered_links: heuristic.discovered_links.clone(),
            confidence: HEURISTIC_CONFIDENCE,
            method: PaginationMethod::Heuristic,
        };

        let Some(refined) = suggested_selector(model) else {
            return heuristic_only;
        };

        let dom = Dom::parse(&page.html, &page.url);
        match dom.count(&refined) {
            Some(1) => {
                debug!(selector = %refined, "Model refinement of next selector accepted");
                PaginationAnalysis {
                    next_selector: Some(refined),
                    confidence: clamp_confidence(HEURISTIC_CONFIDENCE + VERIFICATION_BOOST),
                    method: PaginationMethod::HeuristicModelVerified,
                    ..heuristic_only
                }
            }
            count => {
                debug!(
                    selector = %refined,
                    matches = ?count,
                    "Model refinement does not isolate one element, keeping heuristic pick"
                );
                heuristic_only
            }
        }
    }

    async fn discover(&self, page: &PageSnapshot, heuristic: &HeuristicPagination) -> PaginationAnalysis {
        let request = CompletionRequest::json(
            PAGINATION_SYSTEM_MESSAGE,
            format_pagination_discover_prompt(&page.url, &heuristic.fallback_region),
        )
        .with_temperature(self.config.model_temperature)
        .with_max_tokens(self.config.model_max_tokens);

        let model = request_analysis(
            self.completion.as_ref(),
            request,
            self.config.completion_timeout(),
            ResponseKind::Pagination,
        )
        .await;

        let reported = match &model {
            ModelAnalysis::Pagination(s) => s.confidence,
            _ => None,
        };

        let mut none = PaginationAnalysis::none();
        none.discovered_links = heuristic.discovered_links.clone();

        let Some(selector) = suggested_selector(model) else {
            return none;
        };

        let dom = Dom::parse(&page.html, &page.url);
        let next_href = first_link(&dom, &selector);
        // Buttons and script-driven controls resolve without an href
        if next_href.is_none() && !matches!(dom.count(&selector), Some(n) if n > 0) {
            debug!(selector = %selector, "Model next selector does not resolve");
            return none;
        }

        let mut discovered = heuristic.discovered_links.clone();
        if let Some(href) = next_href {
            if !discovered.contains(&href) {
                discovered.push(href);
            }
        }

        PaginationAnalysis {
            next_selector: Some(selector),
            discovered_links: discovered,
            confidence: clamp_confidence(reported.unwrap_or(DEFAULT_MODEL_CONFIDENCE)),
            method: PaginationMethod::Model,
        }
    }
}

fn suggested_selector(model: ModelAnalysis) -> Option<String> {
    match model {
        ModelAnalysis::Pagination(s) => s
            .pagination_next_selector
            .filter(|sel| dom::is_valid_selector(sel)),
        _ => None,
    }
}

/// Href of the first link a selector resolves to.
fn first_link(dom: &Dom, selector: &str) -> Option<String> {
    dom.links_within(dom.root(), selector)?.into_iter().next()
}

fn find_heuristic_pagination(
    page: &PageSnapshot,
    container: Option<&str>,
    config: &PlannerConfig,
) -> HeuristicPagination {
    let dom = Dom::parse(&page.html, &page.url);
    let fallback_region = broader_region(&dom, container, config.max_prompt_html_chars);
    let current = url::Url::parse(&page.url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| page.url.clone());

    for family in FAMILIES {
        let selectors: Vec<(&'static str, Selector)> = family
            .selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok().map(|parsed| (*s, parsed)))
            .collect();

        let matches: Vec<(Anchor<'_>, &'static str)> = dom
            .anchors()
            .into_iter()
            .filter(|a| !(family.skip_content_links && is_content_link(&a.href, &a.text)))
            .filter_map(|a| {
                let hit = selectors
                    .iter()
                    .find(|(_, sel)| sel.matches(&a.element))
                    .map(|(raw, _)| *raw)?;
                Some((a, hit))
            })
            .collect();

        if matches.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let discovered_links: Vec<String> = matches
            .iter()
            .map(|(a, _)| &a.href)
            .filter(|href| **href != current)
            .filter(|href| seen.insert((*href).clone()))
            .cloned()
            .collect();

        let candidate = matches
            .iter()
            .find(|(a, _)| is_next_anchor(a))
            .and_then(|(a, family_selector)| {
                let selector = next_selector_for(&dom, a, family_selector)?;
                let region = pagination_region(a.element);
                Some(NextCandidate {
                    selector,
                    region_html: dom::truncate_chars(&region.html(), config.max_prompt_html_chars)
                        .to_string(),
                })
            });

        return HeuristicPagination {
            family: Some(family.name),
            candidate,
            discovered_links,
            fallback_region,
        };
    }

    HeuristicPagination {
        fallback_region,
        ..Default::default()
    }
}

/// Whether an anchor reads as "next page" by rel, text, class, aria-label or title.
fn is_next_anchor(anchor: &Anchor<'_>) -> bool {
    let value = anchor.element.value();
    if value
        .attr("rel")
        .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
        .unwrap_or(false)
    {
        return true;
    }

    let text = anchor.text.trim().to_lowercase();
    if NEXT_SYMBOLS.contains(&text.as_str())
        || has_next_keyword(&text)
        || NEXT_SYMBOLS.iter().any(|s| s.chars().count() == 1 && text.ends_with(s) && text.len() < 30)
    {
        return true;
    }

    let labels = format!(
        "{} {} {} {}",
        value.attr("class").unwrap_or(""),
        value.attr("id").unwrap_or(""),
        value.attr("aria-label").unwrap_or(""),
        value.attr("title").unwrap_or("")
    );
    has_next_keyword(&labels)
}

/// Whole-word keyword match, so `weitere` or `context` do not count.
fn has_next_keyword(text: &str) -> bool {
    words(text).iter().any(|w| NEXT_KEYWORDS.contains(&w.as_str()))
}

/// Lowercased words split on non-alphanumerics and camelCase humps.
fn words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() || (prev_lower && c.is_uppercase()) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        }
        prev_lower = c.is_lowercase();
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Most specific selector isolating the next anchor.
///
/// Preference: `rel="next"`, a next-bearing class, an aria-label, the
/// family selector, then a positional path.
fn next_selector_for(dom: &Dom, anchor: &Anchor<'_>, family_selector: &str) -> Option<String> {
    let value = anchor.element.value();
    let mut candidates = Vec::new();

    if value
        .attr("rel")
        .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
        .unwrap_or(false)
    {
        candidates.push("a[rel~=\"next\"]".to_string());
    }

    for class in value.classes() {
        if dom::is_css_identifier(class) && words(class).iter().any(|w| w == "next") {
            candidates.push(format!("a.{}", class));
            if let Some(parent) = parent_element(&anchor.element) {
                candidates.push(format!("{} > a.{}", dom::simple_selector(&parent), class));
            }
        }
    }

    if let Some(label) = value.attr("aria-label") {
        if !label.contains('"') {
            candidates.push(format!("a[aria-label=\"{}\"]", label));
        }
    }

    candidates.push(family_selector.to_string());

    for candidate in candidates {
        if isolates(dom, &candidate, anchor.element) {
            return Some(candidate);
        }
    }

    let fallback = dom.selector_for(anchor.element);
    isolates(dom, &fallback, anchor.element).then_some(fallback)
}

fn isolates(dom: &Dom, selector: &str, element: ElementRef<'_>) -> bool {
    matches!(dom.select(selector), Some(m) if m.len() == 1 && m[0] == element)
}

/// Nearest `nav` or pagination-named ancestor, else the parent.
fn pagination_region(anchor: ElementRef<'_>) -> ElementRef<'_> {
    ancestors(&anchor)
        .take(5)
        .find(|el| {
            el.value().name() == "nav"
                || REGION_TOKENS
                    .iter()
                    .any(|t| class_and_id(el).contains(t))
        })
        .or_else(|| parent_element(&anchor))
        .unwrap_or(anchor)
}

/// Region offered to the model when heuristics found no next link.
fn broader_region(dom: &Dom, container: Option<&str>, max_chars: usize) -> String {
    let from_container = container
        .filter(|sel| dom::is_valid_selector(sel))
        .and_then(|sel| dom.first(sel))
        .and_then(|el| parent_element(&el));

    let html = match from_container {
        Some(region) => region.html(),
        None => {
            let parts: Vec<String> = ["main", "footer"]
                .iter()
                .filter_map(|sel| dom.first(sel))
                .map(|el| el.html())
                .collect();
            if parts.is_empty() {
                dom.first("body").map(|b| b.html()).unwrap_or_default()
            } else {
                parts.join("\n")
            }
        }
    };
    dom::truncate_chars(&html, max_chars).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockCompletion};

    fn resolver(mock: MockCompletion) -> PaginationResolver {
        PaginationResolver::new(Arc::new(mock), PlannerConfig::default())
    }

    #[tokio::test]
    async fn test_rel_next_is_found() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::REL_NEXT_PAGE);
        let analysis = resolver(MockCompletion::failing()).resolve(&page, None).await;

        assert_eq!(analysis.next_selector.as_deref(), Some("a[rel~=\"next\"]"));
        assert_eq!(analysis.method, PaginationMethod::Heuristic);
        assert!(analysis.confidence >= 0.8);
        assert!(analysis
            .discovered_links
            .contains(&"https://example.com/page/2".to_string()));
    }

    #[tokio::test]
    async fn test_verified_refinement_boosts_confidence() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::REL_NEXT_PAGE);
        let mock = MockCompletion::new().with_response(
            r#"{"paginationNextSelector": "nav.pagination a[rel='next']", "paginationLinks": [], "confidence": 0.95}"#,
        );
        let analysis = resolver(mock).resolve(&page, None).await;

        assert_eq!(analysis.method, PaginationMethod::HeuristicModelVerified);
        assert!((analysis.confidence - 0.9).abs() < 1e-6);
        assert_eq!(
            analysis.next_selector.as_deref(),
            Some("nav.pagination a[rel='next']")
        );
    }

    #[tokio::test]
    async fn test_ambiguous_refinement_is_rejected() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::REL_NEXT_PAGE);
        let mock = MockCompletion::new().with_response(
            r#"{"paginationNextSelector": "nav.pagination a", "paginationLinks": []}"#,
        );
        let analysis = resolver(mock).resolve(&page, None).await;

        assert_eq!(analysis.method, PaginationMethod::Heuristic);
        assert_eq!(analysis.next_selector.as_deref(), Some("a[rel~=\"next\"]"));
    }

    #[tokio::test]
    async fn test_weiter_link_in_pager_class() {
        let html = r#"<html><body><ul class="items"><li><a href="/1.htm">One</a></li></ul>
            <div class="pager">
              <a href="/liste?seite=1">1</a>
              <a href="/liste?seite=2">2</a>
              <a class="pager-next" href="/liste?seite=2">weiter</a>
            </div></body></html>"#;
        let page = PageSnapshot::new("https://example.com/liste", html);
        let analysis = resolver(MockCompletion::failing()).resolve(&page, None).await;

        assert_eq!(analysis.next_selector.as_deref(), Some("a.pager-next"));
        assert_eq!(analysis.discovered_links.len(), 2);
    }

    #[tokio::test]
    async fn test_numbers_without_next_fall_through_to_model() {
        let html = r#"<html><body><main>
            <a href="/list?page=1">1</a><a href="/list?page=2">2</a><a href="/list?page=3">3</a>
            <span class="more"><a href="/list?page=2" id="more">Load more results</a></span>
            </main></body></html>"#;
        let page = PageSnapshot::new("https://example.com/list", html);

        let failing = resolver(MockCompletion::failing()).resolve(&page, None).await;
        assert_eq!(failing.method, PaginationMethod::None);
        assert_eq!(failing.confidence, 0.0);
        assert!(failing.next_selector.is_none());
        assert_eq!(failing.discovered_links.len(), 3);

        let mock = MockCompletion::new().with_response(
            r#"{"paginationNextSelector": "a#more", "paginationLinks": ["/list?page=2"], "confidence": 0.7}"#,
        );
        let model = resolver(mock).resolve(&page, None).await;
        assert_eq!(model.method, PaginationMethod::Model);
        assert_eq!(model.next_selector.as_deref(), Some("a#more"));
        assert!((model.confidence - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_model_selector_not_in_dom_is_none() {
        let page = PageSnapshot::new("https://example.com/news", fixtures::NEWS_LIST_PAGE);
        let mock = MockCompletion::new()
            .with_response(r#"{"paginationNextSelector": "a.next-page", "confidence": 0.9}"#);
        let analysis = resolver(mock).resolve(&page, Some("ul.news-list")).await;

        assert_eq!(analysis.method, PaginationMethod::None);
        assert!(analysis.next_selector.is_none());
    }

    #[test]
    fn test_next_detection() {
        let dom = Dom::parse(
            r#"<a href="/2" id="a">Next page</a><a href="/2" id="b">»</a>
               <a href="/2" id="c" aria-label="Nächste Seite">x</a><a href="/3" id="d">3</a>"#,
            "https://example.com/",
        );
        let anchors = dom.anchors();
        let flags: Vec<bool> = anchors.iter().map(is_next_anchor).collect();
        assert_eq!(flags, vec![true, true, true, false]);
    }

    #[test]
    fn test_next_keywords_match_whole_words() {
        let dom = Dom::parse(
            r#"<a href="/more">Weitere Meldungen</a><a href="/x" class="context">Kontext</a>
               <a href="/2" class="pagerNext">2</a><a href="/2">weiter</a>"#,
            "https://example.com/",
        );
        let flags: Vec<bool> = dom.anchors().iter().map(is_next_anchor).collect();
        assert_eq!(flags, vec![false, false, true, true]);
        assert_eq!(words("pagerNext page-2"), vec!["pager", "next", "page", "2"]);
    }

    #[tokio::test]
    async fn test_model_selector_for_button_is_accepted() {
        let html = r#"<html><body><main>
            <ul class="items"><li><a href="/1.htm">One</a></li></ul>
            <button class="load-more" type="button">Mehr laden</button>
        </main></body></html>"#;
        let page = PageSnapshot::new("https://example.com/list", html);
        let mock = MockCompletion::new()
            .with_response(r#"{"paginationNextSelector": "button.load-more", "confidence": 0.7}"#);
        let analysis = resolver(mock).resolve(&page, Some("ul.items")).await;

        assert_eq!(analysis.method, PaginationMethod::Model);
        assert_eq!(analysis.next_selector.as_deref(), Some("button.load-more"));
        assert!(analysis.discovered_links.is_empty());
    }
}
