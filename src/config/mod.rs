//! Configuration module for Shelfscan
//!
//! Two concerns live here:
//! - Resolution: merging engine defaults, site defaults and per-target
//!   overrides into one immutable [`TargetConfig`]
//! - Site bundles: loading, parsing and validating TOML files that declare a
//!   site's fields, extractors, status codes, link rules and proxy pools
//!
//! # Example
//!
//! ```no_run
//! use shelfscan::config::{load_config, ConfigLayer};
//! use std::path::Path;
//!
//! let bundle = load_config(Path::new("site.toml")).unwrap();
//! let config = bundle.resolve(&ConfigLayer::default()).unwrap();
//! println!("Declared fields: {:?}", config.fields());
//! ```

mod parser;
mod policy;
mod resolve;
mod site;
mod types;
mod validation;

// Re-export types
pub use policy::{RequestDelay, RetryPolicy, StatusTable};
pub use resolve::{resolve, ConfigLayer, TargetConfig, DEFAULT_ATTEMPT_TIMEOUT};
pub use site::parse_fields;
pub use types::{
    CacheSection, Config, EngineSection, ExtractorEntry, LinkRuleEntry, ProxyPoolEntry,
    SiteSection,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
