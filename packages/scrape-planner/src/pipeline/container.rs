//! Container resolution: find the element listing repeated content items.
//!
//! Tiers, each tried only if the previous one produced nothing usable:
//! 1. Heuristic: walk up from the example anchor and score list-like ancestors
//! 2. Model: ask the completion service for container/link selectors and
//!    re-validate them against the DOM (reported confidence is never trusted alone)
//! 3. Pattern filtering: content links similar to the example URL
//! 4. Structural: the common path of all content links in the heuristic container
//!
//! Model failures never propagate; they only demote resolution to the next tier.

use regex::Regex;
use scraper::ElementRef;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::dom::{self, ancestors, child_elements, class_and_id, Anchor, Dom};
use crate::pipeline::prompts::{format_container_prompt, CONTAINER_SYSTEM_MESSAGE};
use crate::pipeline::response::{request_analysis, ContainerSuggestion, ModelAnalysis, ResponseKind};
use crate::similarity::{
    has_token, is_content_link, is_list_container, normalize_url, shares_domain_pattern,
    url_similarity,
};
use crate::traits::completion::{CompletionRequest, CompletionService};
use crate::types::analysis::{clamp_confidence, ContainerAnalysis, ContainerMethod};
use crate::types::config::PlannerConfig;
use crate::types::page::PageSnapshot;

/// Confidence of any result reached without an accepted model suggestion.
pub const HEURISTIC_CONFIDENCE: f32 = 0.6;
/// Confidence of an accepted model suggestion that reports none.
pub const DEFAULT_MODEL_CONFIDENCE: f32 = 0.8;

const DENSITY_WEIGHT: f32 = 0.4;
const CONTENT_TOKEN_WEIGHT: f32 = 0.3;
const SEMANTIC_TAG_WEIGHT: f32 = 0.2;
const CHILD_COUNT_BONUS: f32 = 0.3;
const READ_MORE_BONUS: f32 = 0.2;

const CONTENT_TOKENS: &[&str] = &[
    "news", "article", "post", "entry", "item", "teaser", "content", "list", "result", "meldung",
    "aktuell", "blog", "event", "card",
];

static RE_READ_MORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:read more|more|mehr|weiterlesen|weiter lesen|mehr lesen|details|lesen|continue reading)\b").unwrap()
});

/// The best-scoring ancestor, extracted into owned data.
#[derive(Debug, Clone)]
struct HeuristicContainer {
    selector: String,
    outer_html: String,
    content_links: Vec<String>,
    structural_link_selector: Option<String>,
    example_link_selector: Option<String>,
}

/// Owned result of the heuristic pass (no DOM borrows survive it).
#[derive(Debug, Clone)]
struct HeuristicOutcome {
    container: Option<HeuristicContainer>,
    page_excerpt: String,
    notes: Vec<String>,
}

/// Resolves the content container for a page and an example URL.
///
/// Stateless; safe to share across concurrent workflows.
#[derive(Clone)]
pub struct ContainerResolver {
    completion: Arc<dyn CompletionService>,
    config: PlannerConfig,
}

impl ContainerResolver {
    pub fn new(completion: Arc<dyn CompletionService>, config: PlannerConfig) -> Self {
        Self { completion, config }
    }

    /// Resolve the container holding the item linked by `example_url`.
    ///
    /// Always returns an analysis; confidence communicates reliability.
    pub async fn resolve(&self, page: &PageSnapshot, example_url: &str) -> ContainerAnalysis {
        let example_url = absolutize_url(&page.url, example_url);
        debug!(page_url = %page.url, example_url = %example_url, "Resolving container");

        let heuristic = find_heuristic_container(page, &example_url, &self.config);

        let excerpt = match &heuristic.container {
            Some(container) => {
                dom::truncate_chars(&container.outer_html, self.config.max_prompt_html_chars)
                    .to_string()
            }
            None => heuristic.page_excerpt.clone(),
        };
        let request = CompletionRequest::json(
            CONTAINER_SYSTEM_MESSAGE,
            format_container_prompt(&page.url, &example_url, &excerpt),
        )
        .with_temperature(self.config.model_temperature)
        .with_max_tokens(self.config.model_max_tokens);

        let model = request_analysis(
            self.completion.as_ref(),
            request,
            self.config.completion_timeout(),
            ResponseKind::Container,
        )
        .await;

        let analysis = reconcile(page, &example_url, heuristic, model, &self.config);
        info!(
            page_url = %page.url,
            method = %analysis.method,
            confidence = analysis.confidence,
            links = analysis.content_links.len(),
            "Container resolved"
        );
        analysis
    }
}

/// Resolve a possibly relative example URL against the page URL.
pub fn absolutize_url(page_url: &str, href: &str) -> String {
    url::Url::parse(page_url)
        .ok()
        .and_then(|base| base.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

/// Whether an anchor points at the example (exact, or equal ignoring query).
fn is_example_anchor(anchor: &Anchor<'_>, example_url: &str, normalized_example: &str) -> bool {
    anchor.href == example_url || normalize_url(&anchor.href) == normalized_example
}

fn find_heuristic_container(
    page: &PageSnapshot,
    example_url: &str,
    config: &PlannerConfig,
) -> HeuristicOutcome {
    let dom = Dom::parse(&page.html, &page.url);
    let page_excerpt = dom
        .first("body")
        .map(|b| dom::truncate_chars(&b.html(), config.max_prompt_html_chars).to_string())
        .unwrap_or_default();
    let mut notes = Vec::new();

    let normalized_example = normalize_url(example_url);
    let anchors = dom.anchors();
    let Some(example) = anchors
        .iter()
        .find(|a| is_example_anchor(a, example_url, &normalized_example))
    else {
        notes.push(format!("example link {} not found on page", example_url));
        return HeuristicOutcome {
            container: None,
            page_excerpt,
            notes,
        };
    };

    let mut best: Option<(ElementRef<'_>, f32, Vec<Anchor<'_>>)> = None;
    for ancestor in ancestors(&example.element) {
        let tag = ancestor.value().name();
        if tag == "body" || tag == "html" {
            break;
        }
        if !is_list_container(&ancestor) {
            continue;
        }
        let Some((score, content)) = score_container(&dom, ancestor, config) else {
            continue;
        };
        debug!(tag = %tag, score = score, links = content.len(), "Scored container candidate");
        if best.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true) {
            best = Some((ancestor, score, content));
        }
    }

    let Some((element, score, content)) = best else {
        notes.push("no ancestor of the example link qualifies as a list container".to_string());
        return HeuristicOutcome {
            container: None,
            page_excerpt,
            notes,
        };
    };

    let selector = dom.selector_for(element);
    let structural_link_selector = derive_link_selector(&dom, &selector, element, &content);
    let example_link_selector = example
        .element
        .value()
        .attr("href")
        .map(|raw| format!("{} a[href=\"{}\"]", selector, raw.replace('"', "\\\"")));

    notes.push(format!(
        "heuristic container {} scored {:.2} with {} content links",
        selector,
        score,
        dedupe_hrefs(&content).len()
    ));

    HeuristicOutcome {
        container: Some(HeuristicContainer {
            selector,
            outer_html: element.html(),
            content_links: dedupe_hrefs(&content),
            structural_link_selector,
            example_link_selector,
        }),
        page_excerpt,
        notes,
    }
}

/// Score a list-like element; `None` when its content-link count is out of range.
fn score_container<'a>(
    dom: &'a Dom,
    element: ElementRef<'a>,
    config: &PlannerConfig,
) -> Option<(f32, Vec<Anchor<'a>>)> {
    let anchors = dom.anchors_within(element);
    if anchors.is_empty() {
        return None;
    }
    let total = anchors.len();
    let read_more = anchors
        .iter()
        .filter(|a| RE_READ_MORE.is_match(&a.text))
        .count();
    let content: Vec<Anchor<'a>> = anchors
        .into_iter()
        .filter(|a| is_content_link(&a.href, &a.text))
        .collect();

    let unique = dedupe_hrefs(&content).len();
    if unique < config.min_container_links || unique > config.max_container_links {
        return None;
    }

    let ratio = content.len() as f32 / total as f32;
    let density = if ratio < 0.3 {
        ratio / 0.3
    } else if ratio <= 0.8 {
        1.0
    } else {
        0.8
    };

    let mut score = DENSITY_WEIGHT * density;

    if has_token(&class_and_id(&element), CONTENT_TOKENS) {
        score += CONTENT_TOKEN_WEIGHT;
    }

    let semantic = match element.value().name() {
        "main" | "article" | "section" => 1.0,
        "ul" | "ol" => 0.7,
        "div" => 0.4,
        _ => 0.2,
    };
    score += SEMANTIC_TAG_WEIGHT * semantic;

    let children = child_elements(&element).count();
    if (3..=50).contains(&children) {
        score += CHILD_COUNT_BONUS;
    } else if children > 100 {
        score -= CHILD_COUNT_BONUS;
    }

    if read_more >= 2 {
        score += READ_MORE_BONUS;
    }

    Some((score, content))
}

/// Unique hrefs (ignoring query/fragment), first occurrence wins.
fn dedupe_hrefs(anchors: &[Anchor<'_>]) -> Vec<String> {
    let mut seen = HashSet::new();
    anchors
        .iter()
        .filter(|a| seen.insert(normalize_url(&a.href)))
        .map(|a| a.href.clone())
        .collect()
}

/// Build `container > item > ... > a` from the most common anchor path.
fn derive_link_selector(
    dom: &Dom,
    container_selector: &str,
    container: ElementRef<'_>,
    anchors: &[Anchor<'_>],
) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<&Anchor<'_>>> = HashMap::new();

    for anchor in anchors {
        let Some(path) = path_from(container, anchor.element) else {
            continue;
        };
        if !counts.contains_key(&path) {
            order.push(path.clone());
        }
        *counts.entry(path.clone()).or_default() += 1;
        members.entry(path).or_default().push(anchor);
    }

    let mut best: Option<&String> = None;
    for path in &order {
        if best.map(|b| counts[path] > counts[b]).unwrap_or(true) {
            best = Some(path);
        }
    }
    let best = best?.clone();

    let shared_class = members
        .get(&best)
        .and_then(|group| common_class(group))
        .map(|c| format!(".{}", c))
        .unwrap_or_default();

    let selector = if best.is_empty() {
        format!("{} > a{}", container_selector, shared_class)
    } else {
        format!("{} > {} > a{}", container_selector, best, shared_class)
    };

    let root = dom.root();
    match dom.links_within(root, &selector) {
        Some(links) if !links.is_empty() => Some(selector),
        _ => None,
    }
}

/// Tag path strictly between `container` and `anchor`, joined by ` > `.
fn path_from(container: ElementRef<'_>, anchor: ElementRef<'_>) -> Option<String> {
    let mut tags = Vec::new();
    for ancestor in ancestors(&anchor) {
        if ancestor == container {
            tags.reverse();
            return Some(tags.join(" > "));
        }
        tags.push(ancestor.value().name().to_string());
    }
    None
}

/// A class every anchor in the group carries, if any.
fn common_class(group: &[&Anchor<'_>]) -> Option<String> {
    let first = group.first()?;
    first
        .element
        .value()
        .classes()
        .filter(|c| dom::is_css_identifier(c))
        .find(|c| {
            group
                .iter()
                .all(|a| a.element.value().classes().any(|other| other == *c))
        })
        .map(str::to_string)
}

/// Express a container-relative selector so it selects the same links page-wide.
fn scope_link_selector(
    dom: &Dom,
    container: ElementRef<'_>,
    container_selector: &str,
    selector: &str,
) -> Option<(String, Vec<String>)> {
    if !dom::is_valid_selector(selector) {
        return None;
    }
    let within = dom.links_within(container, selector)?;
    if within.is_empty() {
        return None;
    }
    let expected: HashSet<String> = within.iter().map(|l| normalize_url(l)).collect();

    let scoped = selector
        .split(',')
        .map(|part| format!("{} {}", container_selector, part.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    for candidate in [selector.to_string(), scoped] {
        if let Some(links) = dom.links_within(dom.root(), &candidate) {
            let got: HashSet<String> = links.iter().map(|l| normalize_url(l)).collect();
            if got == expected {
                return Some((candidate, within));
            }
        }
    }
    None
}

/// Try the model's selectors inside `container`; first valid one wins.
fn accept_model_links(
    dom: &Dom,
    container: ElementRef<'_>,
    container_selector: &str,
    suggestion: &ContainerSuggestion,
    notes: &mut Vec<String>,
) -> Option<(String, Vec<String>)> {
    if let Some(selector) = &suggestion.content_link_selector {
        match scope_link_selector(dom, container, container_selector, selector) {
            Some(accepted) => {
                notes.push(format!("model content link selector '{}' accepted", selector));
                return Some(accepted);
            }
            None => notes.push(format!(
                "model content link selector '{}' rejected: no links inside container",
                selector
            )),
        }
    }

    if let Some(selector) = &suggestion.example_url_selector {
        match scope_link_selector(dom, container, container_selector, selector) {
            Some((scoped, links)) if links.len() > 1 => {
                notes.push(format!("model example selector '{}' accepted", selector));
                return Some((scoped, links));
            }
            _ => notes.push(format!(
                "model example selector '{}' rejected: does not select sibling links",
                selector
            )),
        }
    }
    None
}

/// Content anchors similar enough to the example URL.
fn pattern_filter<'a>(
    anchors: Vec<Anchor<'a>>,
    example_url: &str,
    config: &PlannerConfig,
) -> Vec<Anchor<'a>> {
    anchors
        .into_iter()
        .filter(|a| is_content_link(&a.href, &a.text))
        .filter(|a| {
            let threshold = if shares_domain_pattern(example_url, &a.href) {
                config.domain_pattern_threshold
            } else {
                config.similarity_threshold
            };
            url_similarity(example_url, &a.href) >= threshold
        })
        .collect()
}

/// Lowest element containing every anchor.
fn lowest_common_ancestor<'a>(anchors: &[Anchor<'a>]) -> Option<ElementRef<'a>> {
    let first = anchors.first()?;
    ancestors(&first.element).find(|candidate| {
        anchors
            .iter()
            .all(|a| ancestors(&a.element).any(|anc| anc == *candidate))
    })
}

fn resolved(
    container_selector: String,
    content_link_selector: String,
    example_link_selector: Option<String>,
    confidence: f32,
    method: ContainerMethod,
    notes: Vec<String>,
    content_links: Vec<String>,
) -> ContainerAnalysis {
    if content_links.is_empty() {
        return ContainerAnalysis::none(notes.join("; "));
    }
    ContainerAnalysis {
        container_selector,
        content_link_selector,
        example_link_selector,
        confidence: clamp_confidence(confidence),
        method,
        reasoning: notes.join("; "),
        content_links,
    }
}

/// Merge the heuristic outcome with the model's answer, re-validating everything.
fn reconcile(
    page: &PageSnapshot,
    example_url: &str,
    heuristic: HeuristicOutcome,
    model: ModelAnalysis,
    config: &PlannerConfig,
) -> ContainerAnalysis {
    let dom = Dom::parse(&page.html, &page.url);
    let mut notes = heuristic.notes;

    let suggestion = match model {
        ModelAnalysis::Container(s) => {
            if let Some(reasoning) = &s.reasoning {
                notes.push(format!("model: {}", reasoning));
            }
            Some(s)
        }
        ModelAnalysis::Pagination(_) => {
            notes.push("model answered with the wrong schema".to_string());
            None
        }
        ModelAnalysis::ParseFailure { reason } => {
            notes.push(format!("model suggestion rejected: {}", reason));
            None
        }
    };

    if let Some(h) = heuristic.container {
        if let Some(container) = dom.first(&h.selector) {
            if let Some(s) = &suggestion {
                if let Some((selector, links)) =
                    accept_model_links(&dom, container, &h.selector, s, &mut notes)
                {
                    return resolved(
                        h.selector,
                        selector,
                        h.example_link_selector,
                        s.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
                        ContainerMethod::HeuristicModel,
                        notes,
                        links,
                    );
                }
            }

            let similar = pattern_filter(dom.anchors_within(container), example_url, config);
            if let Some(selector) = derive_link_selector(&dom, &h.selector, container, &similar) {
                if let Some(links) = dom.links_within(dom.root(), &selector) {
                    notes.push(format!(
                        "pattern filtering kept {} links similar to the example",
                        links.len()
                    ));
                    return resolved(
                        h.selector,
                        selector,
                        h.example_link_selector,
                        HEURISTIC_CONFIDENCE,
                        ContainerMethod::PatternFallback,
                        notes,
                        links,
                    );
                }
            }

            if let Some(selector) = h.structural_link_selector {
                notes.push("using the structural path shared by content links".to_string());
                return resolved(
                    h.selector,
                    selector,
                    h.example_link_selector,
                    HEURISTIC_CONFIDENCE,
                    ContainerMethod::Heuristic,
                    notes,
                    h.content_links,
                );
            }
        }
    }

    // No heuristic container: a whole-page model suggestion must resolve in the DOM
    if let Some(s) = &suggestion {
        if let Some(container_selector) = &s.sibling_container_selector {
            if let Some(container) = dom.first(container_selector) {
                if let Some((selector, links)) =
                    accept_model_links(&dom, container, container_selector, s, &mut notes)
                {
                    return resolved(
                        container_selector.clone(),
                        selector,
                        None,
                        s.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
                        ContainerMethod::HeuristicModel,
                        notes,
                        links,
                    );
                }
            } else {
                notes.push(format!(
                    "model container selector '{}' does not resolve",
                    container_selector
                ));
            }
        }
    }

    // Page-wide pattern candidate: reported, but with zero confidence
    let similar = pattern_filter(dom.anchors(), example_url, config);
    if let Some(lca) = lowest_common_ancestor(&similar) {
        let container_selector = dom.selector_for(lca);
        if let Some(selector) = derive_link_selector(&dom, &container_selector, lca, &similar) {
            let links = dom.links_within(dom.root(), &selector).unwrap_or_default();
            notes.push(format!(
                "page-wide pattern candidate {} with {} links",
                container_selector,
                links.len()
            ));
            return resolved(
                container_selector,
                selector,
                None,
                0.0,
                ContainerMethod::PatternFallback,
                notes,
                links,
            );
        }
    }

    notes.push("no content links found".to_string());
    ContainerAnalysis::none(notes.join("; "))
}
