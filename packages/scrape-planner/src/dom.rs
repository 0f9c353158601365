//! Arena-backed DOM queries over `scraper`.
//!
//! `scraper::Html` stores the document in an index arena (ego-tree), so an
//! `ElementRef` is just a node index plus a borrow of the arena. Ancestor
//! walks and subtree queries never clone nodes.
//!
//! `Html` is `!Send`: a `Dom` must never be held across an `.await`.
//! Resolvers parse, compute owned results, drop the `Dom`, then await.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// A parsed page with its base URL for link resolution.
pub struct Dom {
    html: Html,
    base: Option<Url>,
}

/// An anchor with its href resolved against the page URL.
#[derive(Debug, Clone)]
pub struct Anchor<'a> {
    pub element: ElementRef<'a>,
    /// Absolute URL
    pub href: String,
    /// Collapsed visible text
    pub text: String,
}

impl Dom {
    /// Parse a full document.
    pub fn parse(html: &str, base_url: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            base: Url::parse(base_url).ok(),
        }
    }

    /// The `<html>` element.
    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    /// All elements matching `selector`, or `None` if it does not parse.
    pub fn select(&self, selector: &str) -> Option<Vec<ElementRef<'_>>> {
        let selector = Selector::parse(selector).ok()?;
        Some(self.html.select(&selector).collect())
    }

    /// Elements matching `selector` inside `scope` (descendants only).
    pub fn select_within<'a>(
        &'a self,
        scope: ElementRef<'a>,
        selector: &str,
    ) -> Option<Vec<ElementRef<'a>>> {
        let selector = Selector::parse(selector).ok()?;
        Some(scope.select(&selector).collect())
    }

    /// First element matching `selector`.
    pub fn first(&self, selector: &str) -> Option<ElementRef<'_>> {
        let selector = Selector::parse(selector).ok()?;
        self.html.select(&selector).next()
    }

    /// Number of matches, or `None` for an invalid selector.
    pub fn count(&self, selector: &str) -> Option<usize> {
        self.select(selector).map(|m| m.len())
    }

    /// Resolve an href against the page URL.
    pub fn resolve_href(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            return None;
        }
        match &self.base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Url::parse(href).ok().map(|u| u.to_string()),
        }
    }

    /// All anchors with a resolvable href, in document order.
    pub fn anchors(&self) -> Vec<Anchor<'_>> {
        self.anchors_within(self.root())
    }

    /// Anchors with a resolvable href inside `scope` (inclusive).
    pub fn anchors_within<'a>(&'a self, scope: ElementRef<'a>) -> Vec<Anchor<'a>> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let mut anchors = Vec::new();
        if scope.value().name() == "a" {
            if let Some(anchor) = self.anchor(scope) {
                anchors.push(anchor);
            }
        }
        anchors.extend(scope.select(&selector).filter_map(|el| self.anchor(el)));
        anchors
    }

    /// Wrap an `<a>` element as an anchor, if its href resolves.
    pub fn anchor<'a>(&'a self, element: ElementRef<'a>) -> Option<Anchor<'a>> {
        let href = self.resolve_href(element.value().attr("href")?)?;
        Some(Anchor {
            element,
            href,
            text: element_text(&element),
        })
    }

    /// Deduplicated hrefs of the links `selector` yields inside `scope`.
    ///
    /// Matched non-anchor elements contribute their first descendant link.
    pub fn links_within<'a>(&'a self, scope: ElementRef<'a>, selector: &str) -> Option<Vec<String>> {
        let matches = self.select_within(scope, selector)?;
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for el in matches {
            let anchor = if el.value().name() == "a" {
                self.anchor(el)
            } else {
                self.anchors_within(el).into_iter().next()
            };
            if let Some(anchor) = anchor {
                let key = crate::similarity::normalize_url(&anchor.href);
                if seen.insert(key) {
                    links.push(anchor.href);
                }
            }
        }
        Some(links)
    }

    /// Derive a selector that matches `element`, as specific as needed.
    ///
    /// Prefers `tag#id`, then `tag.class`, then a child-combinator path
    /// from the nearest distinctive ancestor, then `:nth-of-type`.
    pub fn selector_for(&self, element: ElementRef<'_>) -> String {
        let own = simple_selector(&element);
        if self.is_unique(&own, element) {
            return own;
        }

        let mut path = vec![own.clone()];
        let mut current = element;
        for _ in 0..4 {
            let Some(parent) = parent_element(&current) else {
                break;
            };
            if parent.value().name() == "html" {
                break;
            }
            path.insert(0, simple_selector(&parent));
            let candidate = path.join(" > ");
            if self.is_unique(&candidate, element) {
                return candidate;
            }
            current = parent;
        }

        let indexed = format!("{}:nth-of-type({})", own, nth_of_type(&element));
        if let Some(last) = path.last_mut() {
            *last = indexed;
        }
        let candidate = path.join(" > ");
        if self.select(&candidate).map(|m| m.contains(&element)).unwrap_or(false) {
            candidate
        } else {
            own
        }
    }

    fn is_unique(&self, selector: &str, element: ElementRef<'_>) -> bool {
        matches!(self.select(selector), Some(m) if m.len() == 1 && m[0] == element)
    }
}

/// Check selector syntax.
pub fn is_valid_selector(selector: &str) -> bool {
    !selector.trim().is_empty() && Selector::parse(selector).is_ok()
}

/// Visible text with whitespace collapsed.
pub fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parent element, skipping non-element nodes.
pub fn parent_element<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element.parent().and_then(ElementRef::wrap)
}

/// Element ancestors from the parent upward.
pub fn ancestors<'a>(element: &ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.ancestors().filter_map(ElementRef::wrap)
}

/// Direct element children.
pub fn child_elements<'a>(element: &ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.children().filter_map(ElementRef::wrap)
}

/// `class` and `id` attributes joined, lowercased.
pub fn class_and_id(element: &ElementRef<'_>) -> String {
    let value = element.value();
    format!(
        "{} {}",
        value.attr("class").unwrap_or(""),
        value.attr("id").unwrap_or("")
    )
    .to_lowercase()
}

/// `tag`, `tag#id` or `tag.class1.class2` for one element.
pub fn simple_selector(element: &ElementRef<'_>) -> String {
    let value = element.value();
    let tag = value.name().to_string();

    if let Some(id) = value.id() {
        if is_css_identifier(id) {
            return format!("{}#{}", tag, id);
        }
    }

    let classes: Vec<&str> = value
        .classes()
        .filter(|c| is_css_identifier(c) && !is_state_class(c))
        .take(2)
        .collect();
    if classes.is_empty() {
        tag
    } else {
        format!("{}.{}", tag, classes.join("."))
    }
}

/// 1-based position among siblings of the same tag.
fn nth_of_type(element: &ElementRef<'_>) -> usize {
    let name = element.value().name();
    element
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|s| s.value().name() == name)
        .count()
        + 1
}

/// Whether a string can be used unescaped as a CSS class or id.
pub fn is_css_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let first = match chars.next() {
        Some('-') => match chars.next() {
            Some(c) => c,
            None => return false,
        },
        Some(c) => c,
        None => return false,
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_state_class(class: &str) -> bool {
    matches!(
        class,
        "active" | "current" | "selected" | "open" | "is-active" | "first" | "last" | "odd" | "even"
    )
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
