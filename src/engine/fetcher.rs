//! Fetch/retry controller
//!
//! This module issues the HTTP request for a target:
//! - A uniformly random delay before every attempt
//! - Exponential backoff before retries, capped per policy
//! - One proxy lease per attempt, rotating the pool on failure
//! - A timeout around each transport call
//! - Retries only for transient outcomes

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::TargetConfig;
use crate::engine::classifier::{verdict, Verdict};
use crate::engine::proxy::ProxyPools;
use crate::engine::transport::{HttpTransport, TransportError, TransportRequest};
use crate::{ConfigError, TargetError};

/// A fetched page
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The requested URL
    pub url: Url,
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Time spent in the final attempt's transport call
    pub elapsed: Duration,
    /// Proxy used for the final attempt
    pub proxy: Option<String>,
    /// Attempts made, counting the first
    pub attempts: u32,
}

/// Why an attempt failed
enum AttemptFailure {
    /// Worth another attempt
    Transient(String),
    /// Not worth retrying
    Fatal(String),
}

/// Issues requests under a target's delay, retry and proxy policy
pub struct FetchController<T> {
    transport: T,
    pools: ProxyPools,
}

impl<T: HttpTransport> FetchController<T> {
    pub fn new(transport: T, pools: ProxyPools) -> Self {
        Self { transport, pools }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pools(&self) -> &ProxyPools {
        &self.pools
    }

    /// Checks that the configuration's proxy pool exists
    pub fn check_config(&self, config: &TargetConfig) -> Result<(), ConfigError> {
        match config.proxy_pool() {
            Some(id) if !self.pools.contains(id) => {
                Err(ConfigError::UnknownProxyPool(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Fetches `url`, retrying transient failures
    ///
    /// Returns the first non-transient response together with its verdict,
    /// or a network error once retries are exhausted. Each response is
    /// classified exactly once, here.
    pub async fn fetch(
        &self,
        url: &Url,
        config: &TargetConfig,
    ) -> Result<(FetchResult, Verdict), TargetError> {
        let pool = self.pools.get(config.proxy_pool()).ok_or_else(|| TargetError::Network {
            url: url.to_string(),
            attempts: 0,
            cause: format!(
                "unknown proxy pool '{}'",
                config.proxy_pool().unwrap_or_default()
            ),
        })?;

        let retry = config.retry();
        let max_attempts = retry.max_attempts();
        let mut last_cause = String::new();

        for attempt in 0..max_attempts {
            let wait = config.delay().sample().saturating_add(retry.backoff_for(attempt));
            if !wait.is_zero() {
                tracing::debug!("Waiting {:?} before attempt {} for {}", wait, attempt + 1, url);
                tokio::time::sleep(wait).await;
            }

            let lease = pool.lease().await;
            let proxy = lease.proxy().map(str::to_string);

            match self.attempt(url, proxy.clone(), config, attempt + 1).await {
                Ok(fetched) => return Ok(fetched),
                Err(AttemptFailure::Fatal(cause)) => {
                    return Err(TargetError::Network {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        cause,
                    });
                }
                Err(AttemptFailure::Transient(cause)) => {
                    pool.report_failure(&lease);
                    if attempt + 1 < max_attempts {
                        tracing::warn!(
                            "Attempt {}/{} for {} failed ({}), retrying",
                            attempt + 1,
                            max_attempts,
                            url,
                            cause
                        );
                    }
                    last_cause = cause;
                }
            }
        }

        tracing::warn!(
            "Giving up on {} after {} attempt(s): {}",
            url,
            max_attempts,
            last_cause
        );
        Err(TargetError::Network {
            url: url.to_string(),
            attempts: max_attempts,
            cause: last_cause,
        })
    }

    async fn attempt(
        &self,
        url: &Url,
        proxy: Option<String>,
        config: &TargetConfig,
        attempt: u32,
    ) -> Result<(FetchResult, Verdict), AttemptFailure> {
        let timeout = config.attempt_timeout();
        let request = TransportRequest {
            url: url.to_string(),
            proxy: proxy.clone(),
            timeout,
        };

        tracing::debug!(
            "Attempt {} for {} via {}",
            attempt,
            url,
            proxy.as_deref().unwrap_or("direct")
        );

        let started = Instant::now();
        let response = match tokio::time::timeout(timeout, self.transport.fetch(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(transport_failure(e)),
            Err(_) => return Err(transport_failure(TransportError::Timeout(timeout))),
        };
        let elapsed = started.elapsed();

        let final_url = match response.final_url.as_deref() {
            Some(landed) => Url::parse(landed).unwrap_or_else(|_| url.clone()),
            None => url.clone(),
        };

        let page = FetchResult {
            url: url.clone(),
            final_url,
            status: response.status,
            headers: response.headers,
            body: response.body,
            elapsed,
            proxy,
            attempts: attempt,
        };

        match verdict(&page, config) {
            Verdict::TransientError { cause } => Err(AttemptFailure::Transient(cause)),
            settled => Ok((page, settled)),
        }
    }
}

fn transport_failure(error: TransportError) -> AttemptFailure {
    if error.is_transient() {
        AttemptFailure::Transient(error.to_string())
    } else {
        AttemptFailure::Fatal(error.to_string())
    }
}
