// sprout-net/src/validation.rs
use sprout_common::error::{Result, SproutError};
use url::Url;

/// Validates an artifact URL. `https` is always accepted; `http` and `file`
/// only when `allow_insecure` is set.
pub fn validate_url(url_str: &str, allow_insecure: bool) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| SproutError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" | "file" if allow_insecure => {
            tracing::debug!("Accepting insecure URL scheme for {}", url_str);
            Ok(url)
        }
        scheme => Err(SproutError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': must be https, but got '{scheme}'"
        ))),
    }
}

/// File name component of a URL, for log output.
pub fn url_file_name(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()?
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_string)
}
