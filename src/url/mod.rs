//! URL handling module for Shelfscan
//!
//! This module provides target URL resolution and the canonical form used
//! to key the result cache.

mod normalize;

pub use normalize::normalize_url;

use crate::UrlError;
use url::Url;

/// Resolves a target URL, joining relative paths against the site host
///
/// # Examples
///
/// ```
/// use shelfscan::url::resolve_target_url;
/// use url::Url;
///
/// let host = Url::parse("https://c-s-k.example/").unwrap();
/// let url = resolve_target_url("/catalog/item/1", Some(&host)).unwrap();
/// assert_eq!(url.as_str(), "https://c-s-k.example/catalog/item/1");
/// ```
pub fn resolve_target_url(raw: &str, host: Option<&Url>) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Malformed("empty target URL".to_string()));
    }

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match host {
            Some(base) => base.join(raw).map_err(|e| UrlError::Parse(e.to_string()))?,
            None => {
                return Err(UrlError::Parse(format!(
                    "relative URL '{}' but the site has no host configured",
                    raw
                )))
            }
        },
        Err(e) => return Err(UrlError::Parse(e.to_string())),
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}
