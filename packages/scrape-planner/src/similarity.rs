//! URL similarity and link/container classification.
//!
//! Pure functions, no I/O. These are the signals every resolver tier
//! builds on:
//! - `normalize_url`: strip query and fragment
//! - `url_similarity`: weighted host/path/query similarity in `[0, 1]`
//! - `is_content_link`: conservative link-vs-noise classification
//! - `is_list_container`: whether an element plausibly lists items

use regex::Regex;
use scraper::ElementRef;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use url::Url;

use crate::dom::{child_elements, class_and_id};

const HOST_WEIGHT: f32 = 0.3;
const PATH_WEIGHT: f32 = 0.5;
const QUERY_WEIGHT: f32 = 0.2;

/// Anchor text length that marks a link as content on its own.
const MIN_TEXT_LEN_WEAK: usize = 20;
/// Shorter threshold when the path carries a content hint.
const MIN_TEXT_LEN_HINTED: usize = 10;

/// Numeric id plus extension as the last path segment: `12345.html`,
/// `a1.htm`, `artikel-4711.php`. Common on government/municipal CMSes.
static RE_FILENAME_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z_\-]*?)(\d+)\.(s?html?|php|aspx?|jsp|cfm)$").unwrap()
});

static RE_NUMERIC_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/\d{3,}(?:[/\-.]|$)|[-_]\d{3,}(?:\.\w+)?/?$|[?&](?:id|nid|artikel|article|news|p)=\d+)")
        .unwrap()
});

static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/(?:19|20)\d{2}/(?:0?[1-9]|1[0-2])(?:/|$)|(?:19|20)\d{2}-\d{2}-\d{2})").unwrap()
});

static RE_NON_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:/(?:search|suche|login|logout|signin|sign-in|anmelden|register|registrierung|impressum|imprint|datenschutz|privacy|legal|terms|agb|sitemap|cookies?)(?:[/.?#]|$)|[?&](?:q|query|search|s)=)",
    )
    .unwrap()
});

static RE_CONTENT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(?:news|nachrichten|article|artikel|aktuell\w*|meldung\w*|blog|posts?|detail\w*|beitrag|presse\w*|story|stories|events?|veranstaltung\w*)(?:[/\-.]|$)",
    )
    .unwrap()
});

/// Class/id tokens that mark list-like containers.
const LIST_TOKENS: &[&str] = &[
    "list", "items", "results", "feed", "grid", "teaser", "news", "articles", "posts", "entries",
    "cards", "overview", "uebersicht", "archive",
];

/// Tags that are individual items rather than containers.
const ITEM_TAGS: &[&str] = &["li", "article", "dt", "dd", "tr"];

/// Strip query string and fragment. Idempotent.
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            url[..end].to_string()
        }
    }
}

/// Parse an absolute URL, or a relative one against a placeholder host.
fn parse_lenient(url: &str) -> Option<Url> {
    Url::parse(url).ok().or_else(|| {
        Url::parse("http://relative.invalid/")
            .ok()
            .and_then(|base| base.join(url).ok())
    })
}

/// Filename-pattern parts of a URL's last path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    /// Path segments before the filename
    pub directory: Vec<String>,
    /// Letters before the id (`artikel-` in `artikel-4711.php`)
    pub prefix: String,
    pub extension: String,
}

/// Match the numeric-id-plus-extension filename pattern.
pub fn filename_pattern(url: &str) -> Option<FilenamePattern> {
    let parsed = parse_lenient(url)?;
    let segments = path_segments(&parsed);
    let (last, directory) = segments.split_last()?;
    let captures = RE_FILENAME_ID.captures(last)?;
    Some(FilenamePattern {
        directory: directory.to_vec(),
        prefix: captures[1].to_lowercase(),
        extension: captures[3].to_lowercase(),
    })
}

/// Whether both URLs follow the filename pattern (lowered similarity threshold applies).
pub fn shares_domain_pattern(a: &str, b: &str) -> bool {
    filename_pattern(a).is_some() && filename_pattern(b).is_some()
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Score in `[0, 0.5]` for two filename-pattern URLs.
fn filename_pattern_score(a: &FilenamePattern, b: &FilenamePattern) -> f32 {
    let mut score = 0.25;
    if a.extension == b.extension {
        score += 0.15;
    }
    if a.directory == b.directory && a.prefix == b.prefix {
        score += 0.10;
    }
    score
}

/// Positional segment overlap over the longer path.
fn path_overlap(a: &[String], b: &[String]) -> f32 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let shared = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    shared as f32 / longest as f32
}

/// Jaccard ratio of query parameter names; both empty counts as identical.
fn query_overlap(a: &Url, b: &Url) -> f32 {
    let names_a: HashSet<String> = a.query_pairs().map(|(k, _)| k.into_owned()).collect();
    let names_b: HashSet<String> = b.query_pairs().map(|(k, _)| k.into_owned()).collect();
    if names_a.is_empty() && names_b.is_empty() {
        return 1.0;
    }
    let union = names_a.union(&names_b).count();
    let shared = names_a.intersection(&names_b).count();
    shared as f32 / union as f32
}

/// Weighted similarity of two URLs in `[0, 1]`. Symmetric.
///
/// host 0.3 + path 0.5 + query-parameter names 0.2. When both URLs match
/// the numeric-id filename pattern the path part is the pattern score
/// instead of raw segment overlap.
pub fn url_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    let (Some(ua), Some(ub)) = (parse_lenient(a), parse_lenient(b)) else {
        return 0.0;
    };

    let host = if ua.host_str() == ub.host_str() {
        HOST_WEIGHT
    } else {
        0.0
    };

    let path = match (filename_pattern(a), filename_pattern(b)) {
        (Some(pa), Some(pb)) => filename_pattern_score(&pa, &pb),
        _ => PATH_WEIGHT * path_overlap(&path_segments(&ua), &path_segments(&ub)),
    };

    let query = QUERY_WEIGHT * query_overlap(&ua, &ub);

    (host + path + query).clamp(0.0, 1.0)
}

/// Classify a link as a content link (leading to an item's detail page).
///
/// Conservative: false negatives are fine, false positives are filtered
/// downstream by similarity to the example URL.
pub fn is_content_link(href: &str, anchor_text: &str) -> bool {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return false;
    }
    if RE_NON_CONTENT.is_match(href) {
        return false;
    }

    let path_and_query = parse_lenient(href)
        .map(|u| match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        })
        .unwrap_or_else(|| href.to_string());

    if filename_pattern(href).is_some()
        || RE_NUMERIC_ID.is_match(&path_and_query)
        || RE_DATE.is_match(&path_and_query)
    {
        return true;
    }

    let text_len = anchor_text.split_whitespace().collect::<Vec<_>>().join(" ").chars().count();
    let threshold = if RE_CONTENT_HINT.is_match(&path_and_query) {
        MIN_TEXT_LEN_HINTED
    } else {
        MIN_TEXT_LEN_WEAK
    };
    text_len >= threshold
}

/// Whether an element plausibly lists sibling items.
///
/// True for `ul`/`ol`/`dl`, for list-indicating class/id tokens, or for
/// three or more children sharing a tag. Item tags (`li`, `article`)
/// only qualify through repeated children of their own.
pub fn is_list_container(element: &ElementRef<'_>) -> bool {
    let tag = element.value().name();
    let repeated = max_repeated_child_tag(element) >= 3;

    if ITEM_TAGS.contains(&tag) {
        return repeated;
    }
    if matches!(tag, "ul" | "ol" | "dl") {
        return true;
    }
    if has_token(&class_and_id(element), LIST_TOKENS) {
        return true;
    }
    repeated
}

/// Largest number of direct children sharing one tag.
pub fn max_repeated_child_tag(element: &ElementRef<'_>) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for child in child_elements(element) {
        *counts.entry(child.value().name()).or_default() += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

/// Whether any token appears in the class/id string.
pub fn has_token(class_and_id: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| class_and_id.contains(t))
}
