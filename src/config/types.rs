use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for a Shelfscan site bundle
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default, rename = "proxy-pool")]
    pub proxy_pools: Vec<ProxyPoolEntry>,
    pub site: SiteSection,
}

/// Engine-wide defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSection {
    /// Maximum number of targets processed at once
    pub workers: Option<usize>,

    /// User agent sent with every request
    pub user_agent: Option<String>,

    /// Delay range in seconds, `"min,max"`
    pub request_delay: Option<String>,

    /// Retries after the first attempt
    pub max_retries: Option<u32>,

    /// Base retry backoff (milliseconds)
    pub backoff_base_ms: Option<u64>,

    pub backoff_multiplier: Option<f64>,

    /// Backoff cap (milliseconds)
    pub max_backoff_ms: Option<u64>,

    /// Per-attempt timeout (milliseconds)
    pub timeout_ms: Option<u64>,
}

/// Result cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheSection {
    /// Path to the SQLite cache file; in-memory when absent
    pub database_path: Option<String>,

    /// Cache key strategy: `canonical`, `canonical-no-query` or `digest`
    pub key: Option<String>,
}

/// A named proxy pool
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyPoolEntry {
    pub id: String,

    /// Proxy URLs (`http://`, `https://`, `socks5://`)
    #[serde(default)]
    pub proxies: Vec<String>,

    /// Maximum concurrent attempts through this pool
    pub max_concurrent: Option<usize>,
}

/// Site defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteSection {
    /// Base URL that relative links are resolved against
    pub host: Option<String>,

    /// Declared fields by wire name
    pub fields: Option<Vec<String>>,

    /// Fields that may be empty
    #[serde(default)]
    pub optional: Vec<String>,

    /// Status code → parse flag; keys are status codes as strings
    #[serde(default)]
    pub parse_codes: BTreeMap<String, bool>,

    pub transient_from: Option<u16>,

    pub transient_codes: Option<Vec<u16>>,

    pub proxy_pool: Option<String>,

    /// Delay range in seconds, `"min,max"`
    pub request_delay: Option<String>,

    /// `normal` or `fragment`
    pub mode: Option<String>,

    pub max_retries: Option<u32>,

    pub timeout_ms: Option<u64>,

    #[serde(default, rename = "bad-link")]
    pub bad_links: Vec<LinkRuleEntry>,

    /// Selector extractors by field name
    #[serde(default)]
    pub extractors: BTreeMap<String, ExtractorEntry>,
}

/// One dead-link rule; exactly one key must be set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LinkRuleEntry {
    pub body_contains: Option<String>,
    pub body_matches: Option<String>,
    pub url_matches: Option<String>,
    pub selector: Option<String>,
    pub redirected_away: Option<bool>,
    pub status: Option<Vec<u16>>,
}

/// A selector-driven extractor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractorEntry {
    /// CSS selector
    pub selector: String,

    /// Attribute to read instead of the element text
    pub attr: Option<String>,

    /// Availability markers (stock fields only)
    #[serde(default)]
    pub markers: Vec<String>,
}
