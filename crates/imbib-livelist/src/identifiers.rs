//! URL and DOI detection for item accessories

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    // DOI regex: 10.XXXX/... pattern, optionally prefixed by "doi:" or a resolver URL
    static ref DOI_REGEX: Regex = Regex::new(
        r#"(?i)(?:doi[:\s]*)?(?:https?://(?:dx\.)?doi\.org/)?(?P<doi>10\.\d{4,}/[^\s\]}>"',;]+)"#
    ).unwrap();
}

/// Absolute http(s) URL with a host.
pub fn is_url(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.contains('\\') || text.contains(char::is_whitespace) {
        return false;
    }
    match Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// First DOI found in `text`, without prefixes or trailing punctuation.
pub fn extract_doi(text: &str) -> Option<String> {
    DOI_REGEX
        .captures(text)
        .and_then(|cap| cap.name("doi"))
        .map(|m| clean_doi(m.as_str()))
        .filter(|doi| doi.contains('/') && !doi.ends_with('/'))
}

fn clean_doi(doi: &str) -> String {
    doi.trim_end_matches(['.', ',', ';', ')', ']']).to_string()
}
