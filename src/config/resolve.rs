//! Configuration layering and resolution
//!
//! A [`TargetConfig`] is resolved from three [`ConfigLayer`]s: engine
//! defaults, site defaults and per-target overrides. Later layers win on
//! collision. Map-valued options merge key by key and list-valued options
//! are replaced wholesale.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use url::Url;

use crate::cache::CacheKeyStrategy;
use crate::config::policy::{
    RequestDelay, RetryPolicy, StatusTable, DEFAULT_TRANSIENT_CODES, DEFAULT_TRANSIENT_FROM,
};
use crate::engine::LinkRule;
use crate::extract::{ExtractorRegistry, FieldKind, ParseMode};
use crate::url::resolve_target_url;
use crate::{ConfigError, UrlError};

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// One layer of partial configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    /// Base URL that relative target links are joined to
    pub host: Option<Url>,
    /// Declared fields
    pub fields: Option<Vec<FieldKind>>,
    /// Per-field optionality
    pub optional: BTreeMap<FieldKind, bool>,
    /// Status → "parse this page"
    pub parse_codes: BTreeMap<u16, bool>,
    pub transient_from: Option<u16>,
    pub transient_codes: Option<Vec<u16>>,
    pub link_rules: Option<Vec<LinkRule>>,
    pub proxy_pool: Option<String>,
    /// Delay range `(min, max)`
    pub delay: Option<(Duration, Duration)>,
    pub parse_mode: Option<ParseMode>,
    pub max_retries: Option<u32>,
    pub backoff_base: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff: Option<Duration>,
    pub attempt_timeout: Option<Duration>,
    pub cache_key: Option<CacheKeyStrategy>,
}

impl ConfigLayer {
    /// The engine's built-in defaults
    pub fn engine_defaults() -> Self {
        let retry = RetryPolicy::default();
        Self {
            host: None,
            fields: None,
            optional: BTreeMap::new(),
            parse_codes: BTreeMap::from([(200, true)]),
            transient_from: Some(DEFAULT_TRANSIENT_FROM),
            transient_codes: Some(DEFAULT_TRANSIENT_CODES.to_vec()),
            link_rules: Some(Vec::new()),
            proxy_pool: None,
            delay: Some((Duration::ZERO, Duration::ZERO)),
            parse_mode: Some(ParseMode::Document),
            max_retries: Some(retry.max_retries),
            backoff_base: Some(retry.backoff_base),
            backoff_multiplier: Some(retry.backoff_multiplier),
            max_backoff: Some(retry.max_backoff),
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            cache_key: Some(CacheKeyStrategy::Canonical),
        }
    }

    /// Overlays `other` on top of `self`
    pub fn merge(mut self, other: &ConfigLayer) -> Self {
        fn pick<T: Clone>(base: &mut Option<T>, over: &Option<T>) {
            if over.is_some() {
                base.clone_from(over);
            }
        }

        pick(&mut self.host, &other.host);
        pick(&mut self.fields, &other.fields);
        self.optional
            .extend(other.optional.iter().map(|(k, v)| (*k, *v)));
        self.parse_codes
            .extend(other.parse_codes.iter().map(|(k, v)| (*k, *v)));
        pick(&mut self.transient_from, &other.transient_from);
        pick(&mut self.transient_codes, &other.transient_codes);
        pick(&mut self.link_rules, &other.link_rules);
        pick(&mut self.proxy_pool, &other.proxy_pool);
        pick(&mut self.delay, &other.delay);
        pick(&mut self.parse_mode, &other.parse_mode);
        pick(&mut self.max_retries, &other.max_retries);
        pick(&mut self.backoff_base, &other.backoff_base);
        pick(&mut self.backoff_multiplier, &other.backoff_multiplier);
        pick(&mut self.max_backoff, &other.max_backoff);
        pick(&mut self.attempt_timeout, &other.attempt_timeout);
        pick(&mut self.cache_key, &other.cache_key);
        self
    }
}

/// The effective configuration for a target
///
/// Immutable once resolved; the engine shares it between concurrent
/// targets behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    host: Option<Url>,
    fields: Vec<FieldKind>,
    optional: BTreeSet<FieldKind>,
    status_table: StatusTable,
    link_rules: Vec<LinkRule>,
    proxy_pool: Option<String>,
    delay: RequestDelay,
    parse_mode: ParseMode,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    cache_key: CacheKeyStrategy,
    extractors: ExtractorRegistry,
    fingerprint: String,
}

impl TargetConfig {
    /// Declared fields in output order, always ending with `timestamp`
    pub fn fields(&self) -> &[FieldKind] {
        &self.fields
    }

    pub fn is_optional(&self, kind: FieldKind) -> bool {
        self.optional.contains(&kind)
    }

    pub fn status_table(&self) -> &StatusTable {
        &self.status_table
    }

    pub fn link_rules(&self) -> &[LinkRule] {
        &self.link_rules
    }

    pub fn proxy_pool(&self) -> Option<&str> {
        self.proxy_pool.as_deref()
    }

    pub fn delay(&self) -> &RequestDelay {
        &self.delay
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn cache_key(&self) -> CacheKeyStrategy {
        self.cache_key
    }

    /// Short digest of everything that shapes an item or a classification
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Cache key for a target link under this configuration
    ///
    /// Equivalent links share a key only when they are processed with the
    /// same fields, extractors, status table, link rules and parse mode.
    pub fn cache_key_for(&self, url: &Url) -> Result<String, UrlError> {
        Ok(format!("{}#{}", self.cache_key.key_for(url)?, self.fingerprint))
    }

    /// Extractors for the declared fields only
    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    pub fn host(&self) -> Option<&Url> {
        self.host.as_ref()
    }

    /// Resolves a raw target link against the site host
    pub fn target_url(&self, raw: &str) -> Result<Url, UrlError> {
        resolve_target_url(raw, self.host.as_ref())
    }

    /// A readable summary of the effective configuration
    pub fn to_json(&self) -> serde_json::Value {
        let parse_codes: BTreeMap<String, bool> = self
            .status_table
            .parse_codes()
            .iter()
            .map(|(code, ok)| (code.to_string(), *ok))
            .collect();

        json!({
            "host": self.host.as_ref().map(Url::as_str),
            "fields": self.fields.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "optional": self.optional.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "parse-codes": parse_codes,
            "transient-from": self.status_table.transient_from(),
            "transient-codes": self.status_table.transient_codes(),
            "bad-link": self.link_rules.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            "proxy-pool": self.proxy_pool,
            "request-delay": self.delay.to_string(),
            "mode": match self.parse_mode {
                ParseMode::Document => "normal",
                ParseMode::Fragment => "fragment",
            },
            "max-retries": self.retry.max_retries,
            "backoff-base-ms": self.retry.backoff_base.as_millis() as u64,
            "backoff-multiplier": self.retry.backoff_multiplier,
            "max-backoff-ms": self.retry.max_backoff.as_millis() as u64,
            "timeout-ms": self.attempt_timeout.as_millis() as u64,
            "cache-key": self.cache_key.as_str(),
            "fingerprint": self.fingerprint,
        })
    }
}

/// Resolves the effective configuration for a target
///
/// Pure and deterministic. Fails when:
/// - a declared field other than `timestamp` has no registered extractor
/// - an override names a field that is unregistered or undeclared
/// - an extractor is registered for `timestamp`
/// - the status table is empty, has no success entry or uses a code outside
///   `100..=599`
/// - the delay range is inverted, the backoff multiplier is below 1.0, or
///   the per-attempt timeout is zero
///
/// Registered extractors for undeclared fields are ignored.
pub fn resolve(
    engine_defaults: &ConfigLayer,
    site: &ConfigLayer,
    overrides: &ConfigLayer,
    registry: &ExtractorRegistry,
) -> Result<TargetConfig, ConfigError> {
    if registry.contains(FieldKind::Timestamp) {
        return Err(ConfigError::EngineOwnedField(FieldKind::Timestamp));
    }

    let merged = engine_defaults.clone().merge(site).merge(overrides);

    // Declared set in canonical order, timestamp always included
    let mut declared: BTreeSet<FieldKind> = match &merged.fields {
        Some(fields) => fields.iter().copied().collect(),
        None => registry.kinds().into_iter().collect(),
    };
    declared.insert(FieldKind::Timestamp);

    if let Some(fields) = &overrides.fields {
        if let Some(kind) = fields
            .iter()
            .find(|k| !k.is_engine_owned() && !registry.contains(**k))
        {
            return Err(ConfigError::UnregisteredField(*kind));
        }
    }
    for kind in overrides.optional.keys() {
        if kind.is_engine_owned() {
            return Err(ConfigError::EngineOwnedField(*kind));
        }
        if !registry.contains(*kind) {
            return Err(ConfigError::UnregisteredField(*kind));
        }
        if !declared.contains(kind) {
            return Err(ConfigError::UndeclaredField(*kind));
        }
    }

    if let Some(kind) = declared
        .iter()
        .find(|k| !k.is_engine_owned() && !registry.contains(**k))
    {
        return Err(ConfigError::MissingExtractor(*kind));
    }

    let status_table = StatusTable::new(
        merged.parse_codes,
        merged.transient_from.unwrap_or(DEFAULT_TRANSIENT_FROM),
        merged
            .transient_codes
            .unwrap_or_else(|| DEFAULT_TRANSIENT_CODES.to_vec()),
    )?;

    let delay = match merged.delay {
        Some((min, max)) => RequestDelay::new(min, max)?,
        None => RequestDelay::none(),
    };

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: merged.max_retries.unwrap_or(defaults.max_retries),
        backoff_base: merged.backoff_base.unwrap_or(defaults.backoff_base),
        backoff_multiplier: merged
            .backoff_multiplier
            .unwrap_or(defaults.backoff_multiplier),
        max_backoff: merged.max_backoff.unwrap_or(defaults.max_backoff),
    };
    retry.validate()?;

    let attempt_timeout = merged.attempt_timeout.unwrap_or(DEFAULT_ATTEMPT_TIMEOUT);
    if attempt_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "per-attempt timeout must be greater than zero".to_string(),
        ));
    }

    let fields: Vec<FieldKind> = declared.into_iter().collect();
    let optional = merged
        .optional
        .into_iter()
        .filter(|(kind, optional)| *optional && fields.contains(kind))
        .map(|(kind, _)| kind)
        .collect();
    let extractors = registry.restricted_to(&fields);
    let link_rules = merged.link_rules.unwrap_or_default();
    let parse_mode = merged.parse_mode.unwrap_or_default();
    let fingerprint = fingerprint(
        &fields,
        &optional,
        &extractors,
        &status_table,
        &link_rules,
        parse_mode,
    );

    Ok(TargetConfig {
        host: merged.host,
        fields,
        optional,
        status_table,
        link_rules,
        proxy_pool: merged.proxy_pool,
        delay,
        parse_mode,
        retry,
        attempt_timeout,
        cache_key: merged.cache_key.unwrap_or_default(),
        extractors,
        fingerprint,
    })
}

fn fingerprint(
    fields: &[FieldKind],
    optional: &BTreeSet<FieldKind>,
    extractors: &ExtractorRegistry,
    status_table: &StatusTable,
    link_rules: &[LinkRule],
    parse_mode: ParseMode,
) -> String {
    let mut hasher = Sha256::new();
    let mut section = |name: &str, parts: Vec<String>| {
        hasher.update(name.as_bytes());
        for part in parts {
            hasher.update([0x1f]);
            hasher.update(part.as_bytes());
        }
        hasher.update([0x1e]);
    };

    let names = |kinds: &mut dyn Iterator<Item = FieldKind>| -> Vec<String> {
        kinds.map(|k| k.as_str().to_string()).collect()
    };

    section("fields", names(&mut fields.iter().copied()));
    section("optional", names(&mut optional.iter().copied()));
    section("extractors", names(&mut extractors.kinds().into_iter()));
    section(
        "parse-codes",
        status_table
            .parse_codes()
            .iter()
            .map(|(code, ok)| format!("{}={}", code, ok))
            .collect(),
    );
    section(
        "transient",
        std::iter::once(status_table.transient_from())
            .chain(status_table.transient_codes().iter().copied())
            .map(|code| code.to_string())
            .collect(),
    );
    section("bad-link", link_rules.iter().map(|r| r.to_string()).collect());
    section("mode", vec![format!("{:?}", parse_mode)]);

    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldValue;

    fn registry(kinds: &[FieldKind]) -> ExtractorRegistry {
        let mut registry = ExtractorRegistry::new();
        for kind in kinds {
            registry.register_fn(*kind, |_, _| Some(FieldValue::Text("v".into())));
        }
        registry
    }

    fn site(fields: &[FieldKind]) -> ConfigLayer {
        ConfigLayer {
            fields: Some(fields.to_vec()),
            ..ConfigLayer::default()
        }
    }

    fn resolve_site(site: &ConfigLayer, registry: &ExtractorRegistry) -> Result<TargetConfig, ConfigError> {
        resolve(
            &ConfigLayer::engine_defaults(),
            site,
            &ConfigLayer::default(),
            registry,
        )
    }

    #[test]
    fn test_defaults_resolve() {
        let reg = registry(&[FieldKind::Name, FieldKind::Price]);
        let cfg = resolve_site(&site(&[FieldKind::Price, FieldKind::Name]), &reg).unwrap();

        assert_eq!(
            cfg.fields(),
            &[FieldKind::Name, FieldKind::Price, FieldKind::Timestamp]
        );
        assert!(cfg.status_table().is_success(200));
        assert_eq!(cfg.attempt_timeout(), DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(cfg.cache_key(), CacheKeyStrategy::Canonical);
        assert_eq!(cfg.retry(), &RetryPolicy::default());
    }

    #[test]
    fn test_missing_extractor_fails() {
        let reg = registry(&[FieldKind::Name]);
        assert!(matches!(
            resolve_site(&site(&[FieldKind::Name, FieldKind::Stock]), &reg),
            Err(ConfigError::MissingExtractor(FieldKind::Stock))
        ));
    }

    #[test]
    fn test_extra_extractors_are_ignored() {
        let reg = registry(&[FieldKind::Name, FieldKind::Article]);
        let cfg = resolve_site(&site(&[FieldKind::Name]), &reg).unwrap();
        assert!(!cfg.extractors().contains(FieldKind::Article));
        assert!(cfg.extractors().contains(FieldKind::Name));
    }

    #[test]
    fn test_undeclared_fields_default_to_registry() {
        let reg = registry(&[FieldKind::Stock, FieldKind::Name]);
        let cfg = resolve_site(&ConfigLayer::default(), &reg).unwrap();
        assert_eq!(
            cfg.fields(),
            &[FieldKind::Name, FieldKind::Stock, FieldKind::Timestamp]
        );
    }

    #[test]
    fn test_timestamp_extractor_rejected() {
        let reg = registry(&[FieldKind::Name, FieldKind::Timestamp]);
        assert!(matches!(
            resolve_site(&site(&[FieldKind::Name]), &reg),
            Err(ConfigError::EngineOwnedField(FieldKind::Timestamp))
        ));
    }

    #[test]
    fn test_override_field_checks() {
        let reg = registry(&[FieldKind::Name, FieldKind::Price]);
        let site = site(&[FieldKind::Name]);
        let defaults = ConfigLayer::engine_defaults();

        let undeclared = ConfigLayer {
            optional: BTreeMap::from([(FieldKind::Price, true)]),
            ..ConfigLayer::default()
        };
        assert!(matches!(
            resolve(&defaults, &site, &undeclared, &reg),
            Err(ConfigError::UndeclaredField(FieldKind::Price))
        ));

        let unregistered = ConfigLayer {
            optional: BTreeMap::from([(FieldKind::Stock, true)]),
            ..ConfigLayer::default()
        };
        assert!(matches!(
            resolve(&defaults, &site, &unregistered, &reg),
            Err(ConfigError::UnregisteredField(FieldKind::Stock))
        ));

        let replaced = ConfigLayer {
            fields: Some(vec![FieldKind::Article]),
            ..ConfigLayer::default()
        };
        assert!(matches!(
            resolve(&defaults, &site, &replaced, &reg),
            Err(ConfigError::UnregisteredField(FieldKind::Article))
        ));
    }

    #[test]
    fn test_layering_precedence() {
        let reg = registry(&[FieldKind::Name, FieldKind::OldPrice]);
        let site = ConfigLayer {
            fields: Some(vec![FieldKind::Name, FieldKind::OldPrice]),
            optional: BTreeMap::from([(FieldKind::OldPrice, true)]),
            parse_codes: BTreeMap::from([(404, false)]),
            delay: Some((Duration::from_secs(3), Duration::from_secs(5))),
            max_retries: Some(5),
            link_rules: Some(vec![LinkRule::body_contains("archived")]),
            ..ConfigLayer::default()
        };
        let overrides = ConfigLayer {
            delay: Some((Duration::ZERO, Duration::from_millis(10))),
            link_rules: Some(vec![LinkRule::RedirectedAway]),
            ..ConfigLayer::default()
        };

        let cfg = resolve(&ConfigLayer::engine_defaults(), &site, &overrides, &reg).unwrap();

        assert_eq!(cfg.delay().max(), Duration::from_millis(10));
        assert_eq!(cfg.retry().max_retries, 5);
        assert!(cfg.is_optional(FieldKind::OldPrice));
        assert!(!cfg.is_optional(FieldKind::Name));
        // Map-valued options merge key by key
        assert!(cfg.status_table().is_success(200));
        assert_eq!(cfg.status_table().parse_codes().get(&404), Some(&false));
        // List-valued options are replaced
        assert_eq!(cfg.link_rules().len(), 1);
        assert!(matches!(cfg.link_rules()[0], LinkRule::RedirectedAway));
    }

    #[test]
    fn test_invalid_policies() {
        let reg = registry(&[FieldKind::Name]);
        let base = site(&[FieldKind::Name]);

        let inverted = ConfigLayer {
            delay: Some((Duration::from_secs(5), Duration::from_secs(3))),
            ..base.clone()
        };
        assert!(matches!(
            resolve_site(&inverted, &reg),
            Err(ConfigError::InvalidDelay(_))
        ));

        let multiplier = ConfigLayer {
            backoff_multiplier: Some(0.9),
            ..base.clone()
        };
        assert!(resolve_site(&multiplier, &reg).is_err());

        let timeout = ConfigLayer {
            attempt_timeout: Some(Duration::ZERO),
            ..base.clone()
        };
        assert!(resolve_site(&timeout, &reg).is_err());

        let no_success = ConfigLayer {
            parse_codes: BTreeMap::from([(200, false)]),
            ..base
        };
        assert!(matches!(
            resolve_site(&no_success, &reg),
            Err(ConfigError::InvalidStatusMap(_))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let reg = registry(&[FieldKind::Name, FieldKind::Price]);
        let site = site(&[FieldKind::Price, FieldKind::Name]);
        let a = resolve_site(&site, &reg).unwrap();
        let b = resolve_site(&site, &reg).unwrap();
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_cache_key_depends_on_item_shape() {
        let reg = registry(&[FieldKind::Name, FieldKind::Article]);
        let url = Url::parse("https://example.test/item/1").unwrap();

        let names = resolve_site(&site(&[FieldKind::Name]), &reg).unwrap();
        let articles = resolve_site(&site(&[FieldKind::Article]), &reg).unwrap();
        assert_ne!(names.fingerprint(), articles.fingerprint());
        assert_ne!(
            names.cache_key_for(&url).unwrap(),
            articles.cache_key_for(&url).unwrap()
        );

        let dead_links = resolve_site(
            &ConfigLayer {
                link_rules: Some(vec![LinkRule::body_contains("discontinued")]),
                ..site(&[FieldKind::Name])
            },
            &reg,
        )
        .unwrap();
        assert_ne!(names.fingerprint(), dead_links.fingerprint());

        // Fetch policy does not change what a page yields
        let patient = resolve_site(
            &ConfigLayer {
                max_retries: Some(9),
                delay: Some((Duration::from_secs(1), Duration::from_secs(2))),
                ..site(&[FieldKind::Name])
            },
            &reg,
        )
        .unwrap();
        assert_eq!(
            names.cache_key_for(&url).unwrap(),
            patient.cache_key_for(&url).unwrap()
        );
        assert!(names
            .cache_key_for(&url)
            .unwrap()
            .starts_with("https://example.test/item/1#"));
    }

    #[test]
    fn test_target_url_uses_host() {
        let reg = registry(&[FieldKind::Name]);
        let cfg = resolve_site(
            &ConfigLayer {
                host: Some(Url::parse("https://c-s-k.example").unwrap()),
                ..site(&[FieldKind::Name])
            },
            &reg,
        )
        .unwrap();
        assert_eq!(
            cfg.target_url("/catalog/1").unwrap().as_str(),
            "https://c-s-k.example/catalog/1"
        );
    }
}
