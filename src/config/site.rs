//! Turns a TOML bundle into resolver layers, extractors and proxy pools

use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::cache::CacheKeyStrategy;
use crate::config::resolve::{resolve, ConfigLayer, TargetConfig};
use crate::config::types::{Config, ExtractorEntry, LinkRuleEntry};
use crate::config::RequestDelay;
use crate::engine::{LinkRule, ProxyPool, ProxyPools, DEFAULT_WORKERS};
use crate::extract::{ExtractorRegistry, FieldKind, ParseMode, SelectorExtractor};
use crate::ConfigError;

impl Config {
    /// Engine defaults with the `[engine]` and `[cache]` sections applied
    pub fn engine_layer(&self) -> Result<ConfigLayer, ConfigError> {
        let engine = &self.engine;
        let layer = ConfigLayer {
            delay: engine
                .request_delay
                .as_deref()
                .map(parse_delay)
                .transpose()?,
            max_retries: engine.max_retries,
            backoff_base: engine.backoff_base_ms.map(Duration::from_millis),
            backoff_multiplier: engine.backoff_multiplier,
            max_backoff: engine.max_backoff_ms.map(Duration::from_millis),
            attempt_timeout: engine.timeout_ms.map(Duration::from_millis),
            cache_key: self
                .cache
                .key
                .as_deref()
                .map(str::parse::<CacheKeyStrategy>)
                .transpose()?,
            ..ConfigLayer::default()
        };
        Ok(ConfigLayer::engine_defaults().merge(&layer))
    }

    /// The `[site]` section as a resolver layer
    pub fn site_layer(&self) -> Result<ConfigLayer, ConfigError> {
        let site = &self.site;

        let host = site
            .host
            .as_deref()
            .map(|h| {
                Url::parse(h).map_err(|e| ConfigError::InvalidUrl(format!("host '{}': {}", h, e)))
            })
            .transpose()?;

        let fields = site.fields.as_deref().map(parse_fields).transpose()?;

        let optional = parse_fields(&site.optional)?
            .into_iter()
            .map(|kind| (kind, true))
            .collect();

        let parse_codes = site
            .parse_codes
            .iter()
            .map(|(code, ok)| {
                code.trim()
                    .parse::<u16>()
                    .map(|code| (code, *ok))
                    .map_err(|_| {
                        ConfigError::InvalidStatusMap(format!("'{}' is not a status code", code))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let link_rules = if site.bad_links.is_empty() {
            None
        } else {
            Some(
                site.bad_links
                    .iter()
                    .map(link_rule)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };

        Ok(ConfigLayer {
            host,
            fields,
            optional,
            parse_codes,
            transient_from: site.transient_from,
            transient_codes: site.transient_codes.clone(),
            link_rules,
            proxy_pool: site.proxy_pool.clone(),
            delay: site.request_delay.as_deref().map(parse_delay).transpose()?,
            parse_mode: site.mode.as_deref().map(str::parse::<ParseMode>).transpose()?,
            max_retries: site.max_retries,
            attempt_timeout: site.timeout_ms.map(Duration::from_millis),
            ..ConfigLayer::default()
        })
    }

    /// Selector extractors declared under `[site.extractors]`
    pub fn registry(&self) -> Result<ExtractorRegistry, ConfigError> {
        let mut registry = ExtractorRegistry::new();
        for (name, entry) in &self.site.extractors {
            let kind: FieldKind = name.parse()?;
            registry.register(kind, selector_extractor(kind, entry)?);
        }
        Ok(registry)
    }

    /// Proxy pools declared with `[[proxy-pool]]`, plus the direct pool
    pub fn proxy_pools(&self) -> ProxyPools {
        let mut pools = ProxyPools::new();
        for entry in &self.proxy_pools {
            let mut pool = ProxyPool::new(entry.id.clone(), entry.proxies.clone());
            if let Some(max) = entry.max_concurrent {
                pool = pool.with_max_concurrent(max);
            }
            pools.insert(pool);
        }
        pools
    }

    /// Worker limit from `[engine]`
    pub fn workers(&self) -> usize {
        self.engine.workers.unwrap_or(DEFAULT_WORKERS)
    }

    /// Resolves the site's effective configuration under `overrides`
    pub fn resolve(&self, overrides: &ConfigLayer) -> Result<TargetConfig, ConfigError> {
        resolve(
            &self.engine_layer()?,
            &self.site_layer()?,
            overrides,
            &self.registry()?,
        )
    }
}

/// Parses a list of wire field names
pub fn parse_fields(names: &[String]) -> Result<Vec<FieldKind>, ConfigError> {
    names.iter().map(|name| name.parse()).collect()
}

fn parse_delay(raw: &str) -> Result<(Duration, Duration), ConfigError> {
    let delay: RequestDelay = raw.parse()?;
    Ok((delay.min(), delay.max()))
}

fn selector_extractor(kind: FieldKind, entry: &ExtractorEntry) -> Result<SelectorExtractor, ConfigError> {
    let mut extractor = SelectorExtractor::for_field(kind, &entry.selector)?;
    if let Some(attr) = &entry.attr {
        extractor = extractor.with_attr(attr.clone());
    }
    if !entry.markers.is_empty() {
        extractor = extractor.with_markers(&entry.markers);
    }
    Ok(extractor)
}

pub(crate) fn link_rule(entry: &LinkRuleEntry) -> Result<LinkRule, ConfigError> {
    let mut rules = Vec::new();
    if let Some(text) = &entry.body_contains {
        rules.push(LinkRule::body_contains(text.clone()));
    }
    if let Some(pattern) = &entry.body_matches {
        rules.push(LinkRule::body_matches(pattern)?);
    }
    if let Some(pattern) = &entry.url_matches {
        rules.push(LinkRule::url_matches(pattern)?);
    }
    if let Some(selector) = &entry.selector {
        rules.push(LinkRule::selector_present(selector)?);
    }
    if entry.redirected_away == Some(true) {
        rules.push(LinkRule::RedirectedAway);
    }
    if let Some(codes) = &entry.status {
        rules.push(LinkRule::status_in(codes.iter().copied()));
    }

    if rules.len() != 1 {
        return Err(ConfigError::InvalidRule(format!(
            "each bad-link rule needs exactly one condition, found {}",
            rules.len()
        )));
    }
    Ok(rules.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldValue;

    const BUNDLE: &str = r#"
[engine]
request-delay = "0,1"
max-retries = 2

[cache]
key = "canonical-no-query"

[[proxy-pool]]
id = "tor"
proxies = ["socks5://127.0.0.1:9050"]
max-concurrent = 2

[site]
host = "https://c-s-k.example"
fields = ["name", "stock", "price", "oldprice", "imageLink", "timestamp"]
optional = ["oldprice"]
parse-codes = { 200 = true, 404 = false }
proxy-pool = "tor"
request-delay = "3,5"
mode = "normal"

[[site.bad-link]]
body-contains = "Товар снят с продажи"

[[site.bad-link]]
redirected-away = true

[site.extractors.name]
selector = "h1"

[site.extractors.stock]
selector = ".availability"
markers = ["в наличии"]

[site.extractors.price]
selector = ".price"

[site.extractors.oldprice]
selector = ".old-price"

[site.extractors.imageLink]
selector = "img.main"
attr = "src"
"#;

    fn config() -> Config {
        toml::from_str(BUNDLE).unwrap()
    }

    #[test]
    fn test_bundle_resolves() {
        let cfg = config().resolve(&ConfigLayer::default()).unwrap();

        assert_eq!(
            cfg.fields(),
            &[
                FieldKind::Name,
                FieldKind::Stock,
                FieldKind::Price,
                FieldKind::OldPrice,
                FieldKind::ImageLink,
                FieldKind::Timestamp
            ]
        );
        assert!(cfg.is_optional(FieldKind::OldPrice));
        assert_eq!(cfg.delay().min(), Duration::from_secs(3));
        assert_eq!(cfg.retry().max_retries, 2);
        assert_eq!(cfg.proxy_pool(), Some("tor"));
        assert_eq!(cfg.link_rules().len(), 2);
        assert_eq!(cfg.status_table().parse_codes().get(&404), Some(&false));
        assert_eq!(cfg.cache_key().as_str(), "canonical-no-query");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigLayer {
            delay: Some((Duration::ZERO, Duration::ZERO)),
            ..ConfigLayer::default()
        };
        let cfg = config().resolve(&overrides).unwrap();
        assert_eq!(cfg.delay().max(), Duration::ZERO);
    }

    #[test]
    fn test_registry_from_extractors() {
        let registry = config().registry().unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.contains(FieldKind::ImageLink));
    }

    #[test]
    fn test_proxy_pools() {
        let pools = config().proxy_pools();
        assert!(pools.contains("tor"));
        assert!(pools.get(None).is_some());
    }

    #[test]
    fn test_missing_extractor_in_bundle() {
        let mut cfg = config();
        cfg.site.extractors.remove("price");
        assert!(matches!(
            cfg.resolve(&ConfigLayer::default()),
            Err(ConfigError::MissingExtractor(FieldKind::Price))
        ));
    }

    #[test]
    fn test_link_rule_needs_one_condition() {
        let empty = LinkRuleEntry::default();
        assert!(link_rule(&empty).is_err());

        let two = LinkRuleEntry {
            body_contains: Some("a".into()),
            status: Some(vec![410]),
            ..LinkRuleEntry::default()
        };
        assert!(link_rule(&two).is_err());

        let one = LinkRuleEntry {
            status: Some(vec![410]),
            ..LinkRuleEntry::default()
        };
        assert!(matches!(link_rule(&one), Ok(LinkRule::StatusIn(_))));
    }

    #[test]
    fn test_bad_parse_code_key() {
        let mut cfg = config();
        cfg.site.parse_codes.insert("ok".into(), true);
        assert!(matches!(
            cfg.site_layer(),
            Err(ConfigError::InvalidStatusMap(_))
        ));
    }

    #[test]
    fn test_extractor_value_kinds() {
        let registry = config().registry().unwrap();
        let doc = crate::extract::Document::parse(
            r#"<img class="main" src="/i/1.jpg"><span class="availability">В наличии</span>"#,
            Url::parse("https://c-s-k.example/p/1").unwrap(),
            ParseMode::Document,
        );
        let ctx = crate::extract::ExtractContext {
            requested_url: "https://c-s-k.example/p/1",
            status: 200,
            proxy: None,
        };
        assert_eq!(
            registry.get(FieldKind::ImageLink).unwrap().extract(&doc, &ctx),
            Some(FieldValue::Link("https://c-s-k.example/i/1.jpg".into()))
        );
        assert_eq!(
            registry.get(FieldKind::Stock).unwrap().extract(&doc, &ctx),
            Some(FieldValue::Availability(true))
        );
    }
}
