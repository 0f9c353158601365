//! Prompts sent to the completion service.
//!
//! Every prompt asks for a single JSON object; the shapes match
//! `response::ContainerSuggestion` and `response::PaginationSuggestion`.

/// System message for container analysis.
pub const CONTAINER_SYSTEM_MESSAGE: &str = "You are an expert in HTML structure and CSS selectors. \
You identify the element that lists repeated content items on a web page and the selector for \
each item's primary link. Answer with JSON only.";

/// Prompt for container analysis.
pub const CONTAINER_PROMPT: &str = r#"Analyze this HTML from {page_url}.

An example content item links to: {example_url}

Find:
1. The element that contains the example link AND its sibling items (the list container)
2. A CSS selector that matches exactly ONE primary link per item (not "read more" duplicates, not category or tag links)
3. A CSS selector that matches the example link itself

Output JSON:
{
    "exampleUrlSelector": "selector matching the example link",
    "siblingContainerSelector": "selector for the list container",
    "contentLinkSelector": "selector for one primary link per item",
    "paginationNextSelector": "selector for the next-page link, or null",
    "confidence": 0.0 to 1.0,
    "reasoning": "brief explanation"
}

HTML:
{html}"#;

/// System message for pagination analysis.
pub const PAGINATION_SYSTEM_MESSAGE: &str = "You are an expert in HTML structure and CSS selectors. \
You locate pagination controls and the link to the next page of a listing. Answer with JSON only.";

/// Prompt asking to refine a heuristic next-page selector.
pub const PAGINATION_VERIFY_PROMPT: &str = r#"This HTML from {page_url} contains pagination controls.

A heuristic picked this selector for the "next page" link: {candidate}

Return the most specific CSS selector that matches ONLY the next-page link.
If the heuristic selector is already correct, return it unchanged.

Output JSON:
{
    "paginationNextSelector": "selector or null",
    "paginationLinks": ["href of every pagination link"],
    "confidence": 0.0 to 1.0,
    "reasoning": "brief explanation"
}

HTML:
{html}"#;

/// Prompt asking to find pagination from scratch.
pub const PAGINATION_DISCOVER_PROMPT: &str = r#"Find the pagination controls in this HTML from {page_url}.

Look for links to the next page of results: "next", "weiter", "›", "»", page numbers,
or "load more" links with a URL.

Output JSON:
{
    "paginationNextSelector": "selector for the next-page link, or null if there is none",
    "paginationLinks": ["href of every pagination link"],
    "confidence": 0.0 to 1.0,
    "reasoning": "brief explanation"
}

HTML:
{html}"#;

/// Format the container prompt.
pub fn format_container_prompt(page_url: &str, example_url: &str, html: &str) -> String {
    CONTAINER_PROMPT
        .replace("{page_url}", page_url)
        .replace("{example_url}", example_url)
        .replace("{html}", html)
}

/// Format the pagination verification prompt.
pub fn format_pagination_verify_prompt(page_url: &str, candidate: &str, html: &str) -> String {
    PAGINATION_VERIFY_PROMPT
        .replace("{page_url}", page_url)
        .replace("{candidate}", candidate)
        .replace("{html}", html)
}

/// Format the pagination discovery prompt.
pub fn format_pagination_discover_prompt(page_url: &str, html: &str) -> String {
    PAGINATION_DISCOVER_PROMPT
        .replace("{page_url}", page_url)
        .replace("{html}", html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_prompt_fills_placeholders() {
        let prompt = format_container_prompt(
            "https://example.com/news",
            "https://example.com/a1.htm",
            "<ul></ul>",
        );
        assert!(prompt.contains("https://example.com/a1.htm"));
        assert!(prompt.contains("<ul></ul>"));
        assert!(!prompt.contains("{html}"));
        assert!(!prompt.contains("{example_url}"));
    }

    #[test]
    fn test_verify_prompt_mentions_candidate() {
        let prompt = format_pagination_verify_prompt("u", "a[rel=\"next\"]", "<nav></nav>");
        assert!(prompt.contains("a[rel=\"next\"]"));
        assert!(!prompt.contains("{candidate}"));
    }
}
