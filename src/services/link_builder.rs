/// Marketplace search page the affiliate links point at
pub const SEARCH_BASE_URL: &str = "https://www.amazon.com.br/s";

/// Affiliate tag used when neither the request nor the config supplies one
pub const DEFAULT_AFFILIATE_TAG: &str = "mordomoai-20";

/// Search term used when sanitization leaves nothing behind
pub const PLACEHOLDER_QUERY: &str = "produto";

/// Builds the marketplace search URL for `query`, tagged with `tag`.
///
/// The query keeps only letters, digits, whitespace and hyphens (accents
/// included), with whitespace runs collapsed. A blank tag falls back to
/// [`DEFAULT_AFFILIATE_TAG`].
pub fn build_search_url(query: &str, tag: &str) -> String {
    let sanitized = sanitize_query(query);
    let query = if sanitized.is_empty() {
        PLACEHOLDER_QUERY
    } else {
        sanitized.as_str()
    };

    let tag = match tag.trim() {
        "" => DEFAULT_AFFILIATE_TAG,
        tag => tag,
    };

    format!(
        "{}?k={}&tag={}",
        SEARCH_BASE_URL,
        urlencoding::encode(query),
        urlencoding::encode(tag)
    )
}

/// Strips everything but letters, digits, whitespace and hyphens, then
/// collapses whitespace runs into single spaces.
pub fn sanitize_query(query: &str) -> String {
    let kept: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
