//! HTTP transport
//!
//! The engine talks to the network through [`HttpTransport`], so tests can
//! substitute a scripted transport and the fetch controller never touches
//! `reqwest` directly.

use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// User agent sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("shelfscan/", env!("CARGO_PKG_VERSION"));

/// One attempt's request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    /// Proxy URL to route this attempt through, if any
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// A received response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// URL after redirects, when it differs from the request
    pub final_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Transport-level failure of a single attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read body: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_) | Self::Body(_))
    }
}

/// Issues a single HTTP GET
pub trait HttpTransport: Send + Sync {
    fn fetch(
        &self,
        request: &TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

impl<T: HttpTransport> HttpTransport for Arc<T> {
    fn fetch(
        &self,
        request: &TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        (**self).fetch(request)
    }
}

/// `reqwest`-backed transport
///
/// Keeps one client per proxy so connection pools are not shared across
/// exit addresses.
pub struct ReqwestTransport {
    user_agent: String,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let key = proxy.map(str::to_string);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, proxy)
            .map_err(|e| TransportError::Request(format!("failed to build client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an HTTP client, optionally routed through `proxy`
///
/// # Example
///
/// ```no_run
/// use shelfscan::engine::build_http_client;
///
/// let client = build_http_client("shelfscan/0.1", Some("socks5://127.0.0.1:9050")).unwrap();
/// ```
pub fn build_http_client(user_agent: &str, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(request.proxy.as_deref())?;

        let response = client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(request.timeout)
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().as_str();
        let final_url = (final_url != request.url).then(|| final_url.to_string());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        Ok(TransportResponse {
            status,
            final_url,
            headers,
            body,
        })
    }
}
