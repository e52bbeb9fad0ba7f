//! Shelfscan: a generic catalog page engine
//!
//! This crate fetches commerce catalog pages under a configurable delay, retry
//! and proxy policy, classifies each response as valid, not found or a dead
//! link, runs a registry of field extractors against valid documents and
//! caches the outcome per canonical link.

pub mod cache;
pub mod config;
pub mod engine;
pub mod extract;
pub mod state;
pub mod url;

#[cfg(test)]
pub(crate) mod testutil;

use crate::extract::FieldKind;
use thiserror::Error;

/// Main error type for Shelfscan operations
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// These are fatal: they surface while a target configuration is resolved,
/// before any page is fetched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Declared field '{0}' has no registered extractor")]
    MissingExtractor(FieldKind),

    #[error("Override references field '{0}' which has no registered extractor")]
    UnregisteredField(FieldKind),

    #[error("Override references field '{0}' which is not declared for this target")]
    UndeclaredField(FieldKind),

    #[error("Field '{0}' is stamped by the engine and cannot be extracted or overridden")]
    EngineOwnedField(FieldKind),

    #[error("Unknown field name: {0}")]
    UnknownField(String),

    #[error("Invalid status-code map: {0}")]
    InvalidStatusMap(String),

    #[error("Invalid request delay: {0}")]
    InvalidDelay(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Invalid link rule: {0}")]
    InvalidRule(String),

    #[error("Unknown proxy pool: {0}")]
    UnknownProxyPool(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Per-target errors
///
/// Every variant is isolated to the target that produced it. `NotFound` and
/// `InvalidLink` are terminal classifications and are cached; `Network` and
/// `Extraction` are not.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TargetError {
    #[error("Network error for {url} after {attempts} attempt(s): {cause}")]
    Network {
        url: String,
        attempts: u32,
        cause: String,
    },

    #[error("Not found: {url} (HTTP {status})")]
    NotFound { url: String, status: u16 },

    #[error("Invalid link {url}: {reason}")]
    InvalidLink { url: String, reason: String },

    #[error("Extraction of '{field}' failed for {url}: {reason}")]
    Extraction {
        url: String,
        field: FieldKind,
        reason: String,
    },
}

impl TargetError {
    /// Returns true for classifications that are final for the link and
    /// safe to cache (not found, dead link)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidLink { .. })
    }

    /// Short machine-readable label for reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidLink { .. } => "bad_link",
            Self::Extraction { .. } => "extraction_error",
        }
    }
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Shelfscan operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::{CachedOutcome, ResultCache};
pub use config::{resolve, ConfigLayer, TargetConfig};
pub use engine::{Engine, Target};
pub use extract::{ExtractorRegistry, FieldValue, ResultItem};
pub use state::TargetState;
