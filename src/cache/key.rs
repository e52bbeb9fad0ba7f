//! Cache key strategies

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::url::normalize_url;
use crate::{ConfigError, UrlError};

/// How a target link is turned into a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKeyStrategy {
    /// The canonical link itself
    #[default]
    Canonical,
    /// The canonical link without its query string
    CanonicalNoQuery,
    /// Hex SHA-256 of the canonical link
    Digest,
}

impl CacheKeyStrategy {
    /// Derives the cache key for a target URL
    ///
    /// # Examples
    ///
    /// ```
    /// use shelfscan::cache::CacheKeyStrategy;
    /// use url::Url;
    ///
    /// let url = Url::parse("https://www.shop.example/item/1/?utm_source=x").unwrap();
    /// let key = CacheKeyStrategy::Canonical.key_for(&url).unwrap();
    /// assert_eq!(key, "https://shop.example/item/1");
    /// ```
    pub fn key_for(&self, url: &Url) -> Result<String, UrlError> {
        let mut canonical = normalize_url(url.as_str())?;
        Ok(match self {
            Self::Canonical => canonical.to_string(),
            Self::CanonicalNoQuery => {
                canonical.set_query(None);
                canonical.to_string()
            }
            Self::Digest => hex::encode(Sha256::digest(canonical.as_str().as_bytes())),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::CanonicalNoQuery => "canonical-no-query",
            Self::Digest => "digest",
        }
    }
}

impl fmt::Display for CacheKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKeyStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "canonical" => Ok(Self::Canonical),
            "canonical-no-query" => Ok(Self::CanonicalNoQuery),
            "digest" => Ok(Self::Digest),
            other => Err(ConfigError::Validation(format!(
                "unknown cache key strategy '{}'",
                other
            ))),
        }
    }
}
