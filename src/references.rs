use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// `<ref>...</ref>` blocks (optionally with attributes) and self-closing `<ref .../>`.
static CITATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ref(?:\s[^>]*?)?/>|<ref(?:\s[^>]*)?>.*?</ref>").unwrap()
});

pub static LINK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());

/// A link target as written, before title resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference<'a> {
    pub target: &'a str,
    /// Byte offset of `[[` in the citation-stripped text.
    pub offset: usize,
}

/// Removes citation blocks; borrows when there are none.
pub fn strip_citations(text: &str) -> Cow<'_, str> {
    CITATION_REGEX.replace_all(text, "")
}

/// Finds `[[target]]`, `[[target|label]]` and `[[target#section]]` links in
/// `stripped`, which must already be citation-free.
pub fn find_links(stripped: &str) -> Vec<RawReference<'_>> {
    LINK_REGEX
        .captures_iter(stripped)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?.as_str();
            Some(RawReference {
                target: link_target(inner),
                offset: whole.start(),
            })
        })
        .collect()
}

/// Strips citations from `text` and extracts its links, in source order.
///
/// Returned offsets refer to the stripped text, which is returned alongside.
pub fn extract_references(text: &str) -> (Cow<'_, str>, Vec<(String, usize)>) {
    let stripped = strip_citations(text);
    let refs = find_links(&stripped)
        .into_iter()
        .map(|r| (r.target.to_string(), r.offset))
        .collect();
    (stripped, refs)
}

fn link_target(inner: &str) -> &str {
    let before_label = inner.split('|').next().unwrap_or_default();
    before_label.split('#').next().unwrap_or_default()
}
