//! Test utilities: a scripted HTTP transport.
//!
//! Handwritten mock for dependency injection in unit tests. Records every
//! request so tests can assert on call counts and the proxies used.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{HttpTransport, TransportError, TransportRequest, TransportResponse};

type Reply = Result<TransportResponse, TransportError>;

/// Mock transport that replays scripted responses.
///
/// Lookup order per call: a route matching the request path, then the next
/// queued reply, then the `respond_always` fallback, then a default page.
pub struct MockTransport {
    routes: HashMap<String, TransportResponse>,
    queue: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

pub fn response(status: u16, body: &str) -> TransportResponse {
    TransportResponse {
        status,
        final_url: None,
        headers: BTreeMap::new(),
        body: body.to_string(),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            latency: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues one reply.
    pub fn respond(self, status: u16, body: &str) -> Self {
        self.queue.lock().unwrap().push_back(Ok(response(status, body)));
        self
    }

    /// Queues one full response.
    pub fn respond_with(self, reply: TransportResponse) -> Self {
        self.queue.lock().unwrap().push_back(Ok(reply));
        self
    }

    /// Queues one transport failure.
    pub fn fail(self, error: TransportError) -> Self {
        self.queue.lock().unwrap().push_back(Err(error));
        self
    }

    /// Reply used once the queue is empty.
    pub fn respond_always(mut self, status: u16, body: &str) -> Self {
        self.fallback = Some(Ok(response(status, body)));
        self
    }

    /// Fixed reply for a request path.
    pub fn route(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes.insert(path.to_string(), response(status, body));
        self
    }

    /// Delay before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn proxies(&self) -> Vec<Option<String>> {
        self.requests().into_iter().map(|r| r.proxy).collect()
    }

    fn next_reply(&self, request: &TransportRequest) -> Reply {
        let path = url::Url::parse(&request.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if let Some(routed) = self.routes.get(&path) {
            return Ok(routed.clone());
        }
        if let Some(queued) = self.queue.lock().unwrap().pop_front() {
            return queued;
        }
        match &self.fallback {
            Some(reply) => reply.clone(),
            None => Ok(response(200, "<html><body>default</body></html>")),
        }
    }
}

impl HttpTransport for MockTransport {
    async fn fetch(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_reply(request)
    }
}
