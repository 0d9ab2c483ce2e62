//! Joining configured base URLs with endpoint paths, and encoding the
//! caller-supplied pieces that go into them.
//!
//! Relay URLs and provider base URLs come from user config and environment
//! variables, so they may or may not end in a slash.

/// Strip trailing slashes from a base URL.
///
/// ```
/// use relaychat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://127.0.0.1:3000/"), "http://127.0.0.1:3000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join `endpoint` onto `base_url` with exactly one slash between them.
///
/// ```
/// use relaychat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://relay.example.com/", "/api/generate"),
///     "https://relay.example.com/api/generate"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{endpoint}", normalize_base_url(base_url))
}

/// Percent-encode a value for use as a single path segment.
///
/// The bare dot segments are encoded too, so a caller-supplied name can never
/// climb out of its parent path.
///
/// ```
/// use relaychat::utils::url::encode_path_segment;
///
/// assert_eq!(encode_path_segment("model-v1:0"), "model-v1%3A0");
/// ```
pub fn encode_path_segment(segment: &str) -> String {
    match segment {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(segment).into_owned(),
    }
}
