//! Catalog page engine
//!
//! This module wires the pipeline for a single target:
//! - Result cache claim (one computation per key)
//! - Fetch under delay, retry and proxy policy
//! - Validity classification
//! - Item assembly from the extractor set
//!
//! Targets run concurrently as independent tasks bounded by a worker
//! semaphore. Within a target the steps run strictly in order.

mod assembler;
mod classifier;
mod clock;
mod fetcher;
mod proxy;
mod transport;

pub use assembler::assemble;
pub use classifier::{classify, verdict, ClassifiedOutcome, LinkPredicate, LinkRule, Verdict};
pub use clock::{Clock, FixedClock, SystemClock};
pub use fetcher::{FetchController, FetchResult};
pub use proxy::{ProxyLease, ProxyPool, ProxyPools, DIRECT_POOL};
pub use transport::{
    build_http_client, HttpTransport, ReqwestTransport, TransportError, TransportRequest,
    TransportResponse, DEFAULT_USER_AGENT,
};

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{CachedOutcome, ResultCache};
use crate::config::TargetConfig;
use crate::extract::{ExtractContext, ResultItem};
use crate::{ConfigError, TargetError};

/// Default number of targets processed at once
pub const DEFAULT_WORKERS: usize = 8;

/// A unit of work: a link plus the configuration to process it with
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub config: Arc<TargetConfig>,
}

impl Target {
    pub fn new(url: impl Into<String>, config: Arc<TargetConfig>) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }
}

/// Outcome of one target in a batch
#[derive(Debug)]
pub struct TargetReport {
    pub url: String,
    pub result: Result<ResultItem, TargetError>,
    pub elapsed: Duration,
}

impl TargetReport {
    /// One JSON object per report: the item fields, or the error
    pub fn to_json(&self) -> serde_json::Value {
        match &self.result {
            Ok(item) => json!({
                "url": self.url,
                "status": "ok",
                "item": item.to_json(),
            }),
            Err(e) => json!({
                "url": self.url,
                "status": e.kind(),
                "error": e.to_string(),
            }),
        }
    }
}

/// The fetch, classify and extract engine
pub struct Engine<T> {
    fetcher: FetchController<T>,
    cache: Arc<ResultCache>,
    clock: Arc<dyn Clock>,
    workers: Arc<Semaphore>,
}

impl<T: HttpTransport + 'static> Engine<T> {
    pub fn new(transport: T, pools: ProxyPools, cache: Arc<ResultCache>) -> Self {
        Self {
            fetcher: FetchController::new(transport, pools),
            cache,
            clock: Arc::new(SystemClock),
            workers: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
        }
    }

    /// Uses `clock` for item timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Limits how many targets are processed at once
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Arc::new(Semaphore::new(workers.max(1)));
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &FetchController<T> {
        &self.fetcher
    }

    /// Checks a resolved configuration against the engine's resources
    pub fn check_config(&self, config: &TargetConfig) -> Result<(), ConfigError> {
        self.fetcher.check_config(config)
    }

    /// Processes one target
    ///
    /// Returns the complete item or exactly one classified error. Terminal
    /// outcomes are served from the cache on repeat requests.
    pub async fn process(&self, target: &Target) -> Result<ResultItem, TargetError> {
        let config = target.config.as_ref();
        let url = config
            .target_url(&target.url)
            .map_err(|e| TargetError::InvalidLink {
                url: target.url.clone(),
                reason: e.to_string(),
            })?;
        let key = config
            .cache_key_for(&url)
            .map_err(|e| TargetError::InvalidLink {
                url: target.url.clone(),
                reason: e.to_string(),
            })?;

        // The semaphore is never closed
        let _permit = self.workers.acquire().await.ok();

        let outcome = self
            .cache
            .get_or_compute(&key, || self.compute(&url, config))
            .await;

        let result = outcome.and_then(|outcome| outcome.into_result(url.as_str()));
        match &result {
            Ok(_) => tracing::info!("Extracted item from {}", url),
            Err(e) if e.is_terminal() => tracing::info!("{}: {}", e.kind(), e),
            Err(e) => tracing::warn!("{}: {}", e.kind(), e),
        }
        result
    }

    /// Processes targets concurrently, reporting in completion order
    pub async fn run_batch(self: Arc<Self>, targets: Vec<Target>) -> Vec<TargetReport> {
        let mut tasks = JoinSet::new();
        for target in targets {
            let engine = Arc::clone(&self);
            tasks.spawn(async move {
                let started = Instant::now();
                let result = engine.process(&target).await;
                TargetReport {
                    url: target.url,
                    result,
                    elapsed: started.elapsed(),
                }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Target task failed: {}", e),
            }
        }
        reports
    }

    async fn compute(
        &self,
        url: &url::Url,
        config: &TargetConfig,
    ) -> Result<CachedOutcome, TargetError> {
        let (page, settled) = self.fetcher.fetch(url, config).await?;
        settle(&page, settled, config, self.clock.as_ref())
    }
}

/// Classifies a fetched page and assembles its item
///
/// Runs without suspension points, so the parsed document never lives
/// across an await.
fn settle(
    page: &FetchResult,
    settled: Verdict,
    config: &TargetConfig,
    clock: &dyn Clock,
) -> Result<CachedOutcome, TargetError> {
    let context = ExtractContext {
        requested_url: page.url.as_str(),
        status: page.status,
        proxy: page.proxy.as_deref(),
    };

    match ClassifiedOutcome::from_verdict(settled, page, config) {
        ClassifiedOutcome::Valid(document) => {
            assemble(&document, config, &context, clock).map(CachedOutcome::Item)
        }
        ClassifiedOutcome::NotFound { status } => Ok(CachedOutcome::NotFound { status }),
        ClassifiedOutcome::BadLink { reason } => Ok(CachedOutcome::BadLink { reason }),
        ClassifiedOutcome::TransientError { cause } => Err(TargetError::Network {
            url: page.url.to_string(),
            attempts: page.attempts,
            cause,
        }),
    }
}
