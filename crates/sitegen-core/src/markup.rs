//! Cleanup of raw agent output.

use regex::Regex;
use std::sync::LazyLock;

static LEADING_HTML_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```html").unwrap());
static FENCE_EDGES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```|```$").unwrap());

/// Strip a Markdown code fence wrapped around generated HTML.
///
/// Removes surrounding whitespace, a leading ```` ```html ```` or ```` ``` ````
/// and a trailing ```` ``` ````. Text without a fence comes back trimmed.
pub fn trim_markdown(text: &str) -> String {
    let text = text.trim();
    let text = LEADING_HTML_FENCE.replace(text, "");
    let text = FENCE_EDGES.replace_all(&text, "");
    text.trim().to_string()
}

/// Text strictly between the first `{` and the first `}`.
///
/// Returned verbatim, whitespace included. Empty when either brace is
/// missing or they appear out of order.
pub fn extract_title(response: &str) -> String {
    let (Some(start), Some(end)) = (response.find('{'), response.find('}')) else {
        return String::new();
    };
    if end <= start {
        return String::new();
    }
    response[start + 1..end].to_string()
}
