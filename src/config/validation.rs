use std::collections::HashSet;

use crate::config::types::{CacheSection, Config, EngineSection, ProxyPoolEntry, SiteSection};
use crate::engine::DIRECT_POOL;
use crate::extract::{parse_selector, FieldKind};
use crate::ConfigError;
use url::Url;

/// Validates the structure of a site bundle
///
/// Field coverage and policy ranges are checked later, when the bundle is
/// resolved into a target configuration.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_section(&config.engine)?;
    validate_cache_section(&config.cache)?;
    validate_proxy_pools(&config.proxy_pools)?;
    validate_site_section(&config.site, &config.proxy_pools)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_section(engine: &EngineSection) -> Result<(), ConfigError> {
    if let Some(workers) = engine.workers {
        if !(1..=256).contains(&workers) {
            return Err(ConfigError::Validation(format!(
                "workers must be between 1 and 256, got {}",
                workers
            )));
        }
    }

    if let Some(agent) = &engine.user_agent {
        if agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user-agent cannot be empty".to_string(),
            ));
        }
    }

    if engine.timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "timeout-ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates cache configuration
fn validate_cache_section(cache: &CacheSection) -> Result<(), ConfigError> {
    if let Some(path) = &cache.database_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validates proxy pool entries
fn validate_proxy_pools(pools: &[ProxyPoolEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for pool in pools {
        if pool.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "proxy pool id cannot be empty".to_string(),
            ));
        }

        if pool.id == DIRECT_POOL {
            return Err(ConfigError::Validation(format!(
                "proxy pool id '{}' is reserved",
                DIRECT_POOL
            )));
        }

        if !seen.insert(pool.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate proxy pool id '{}'",
                pool.id
            )));
        }

        if pool.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(format!(
                "proxy pool '{}' max-concurrent must be >= 1",
                pool.id
            )));
        }

        for proxy in &pool.proxies {
            validate_proxy_url(proxy)?;
        }
    }

    Ok(())
}

/// Validates a proxy URL
fn validate_proxy_url(proxy: &str) -> Result<(), ConfigError> {
    let url = Url::parse(proxy)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy URL '{}': {}", proxy, e)))?;

    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "Proxy URL '{}' has unsupported scheme '{}'",
                proxy, other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Proxy URL '{}' has no host",
            proxy
        )));
    }

    Ok(())
}

/// Validates site configuration
fn validate_site_section(site: &SiteSection, pools: &[ProxyPoolEntry]) -> Result<(), ConfigError> {
    if let Some(host) = &site.host {
        let url = Url::parse(host)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid host '{}': {}", host, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Host '{}' must use http or https",
                host
            )));
        }
    }

    if let Some(pool) = &site.proxy_pool {
        if pool != DIRECT_POOL && !pools.iter().any(|p| &p.id == pool) {
            return Err(ConfigError::UnknownProxyPool(pool.clone()));
        }
    }

    for name in site.fields.iter().flatten().chain(&site.optional) {
        name.parse::<FieldKind>()?;
    }

    for (name, entry) in &site.extractors {
        let kind: FieldKind = name.parse()?;
        if kind.is_engine_owned() {
            return Err(ConfigError::EngineOwnedField(kind));
        }
        parse_selector(&entry.selector)?;
        if !entry.markers.is_empty() && kind != FieldKind::Stock {
            return Err(ConfigError::Validation(format!(
                "markers are only meaningful for the stock field, not '{}'",
                name
            )));
        }
    }

    Ok(())
}
