//! Shared helpers for request engine tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use horizon_request::{
    CacheStore, DirectContext, ExecutionContext, NetworkConfig, NetworkError, Request,
    TransportClient, TransportRequest, TransportResponse,
};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("horizon_request=trace,horizon_request_core=debug")
        .try_init();
}

type Responder =
    dyn Fn(usize, &TransportRequest) -> Result<TransportResponse, NetworkError> + Send + Sync;

/// An in-process transport that counts invocations.
pub struct MockTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    delay: Duration,
    responder: Box<Responder>,
}

impl MockTransport {
    /// Respond with the result of `responder(call_number, request)`.
    /// Call numbers start at 1.
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, NetworkError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            responder: Box::new(responder),
        })
    }

    /// Like [`new`](Self::new), but every call takes `delay`.
    pub fn delayed<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(usize, &TransportRequest) -> Result<TransportResponse, NetworkError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay,
            responder: Box::new(responder),
        })
    }

    /// Always answer with `status` and `body`.
    pub fn fixed(status: u16, body: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Ok(TransportResponse::new(status, body)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, NetworkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(call, &request)
    }
}

/// A network delivering callbacks inline, backed by `transport` and a cache in `cache_dir`.
pub fn network(transport: Arc<MockTransport>, cache_dir: &Path) -> NetworkConfig {
    network_with(transport, CacheStore::new(cache_dir), Arc::new(DirectContext::new()))
}

pub fn network_with(
    transport: Arc<MockTransport>,
    cache: CacheStore,
    context: Arc<dyn ExecutionContext>,
) -> NetworkConfig {
    NetworkConfig::builder()
        .base_url("https://api.example.com/v1")
        .transport(transport)
        .cache_store(cache)
        .context(context)
        .build()
        .expect("network config")
}

/// Record lifecycle events in order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Completion blocks appending `success`/`failure` with the given label.
    pub fn blocks(
        &self,
        label: &str,
    ) -> (
        impl Fn(&Request) + Send + Sync + 'static,
        impl Fn(&Request) + Send + Sync + 'static,
    ) {
        let success_log = self.clone();
        let failure_log = self.clone();
        let success_label = format!("{label}:success");
        let failure_label = format!("{label}:failure");
        (
            move |_: &Request| success_log.push(success_label.clone()),
            move |_: &Request| failure_log.push(failure_label.clone()),
        )
    }
}

/// Wait until `condition` holds, polling the runtime.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}
