//! The request lifecycle controller.
//!
//! A [`Request`] owns one request's state and drives it through
//! `Ready → Executing → {Finished | Failed | Cancelled}`:
//!
//! 1. A valid cache entry finishes the request immediately.
//! 2. Otherwise the configuration is built into a transport request; a build
//!    failure fails the request without touching the transport.
//! 3. Accessories receive `will_start`, then the transport is called until an
//!    attempt succeeds or the retry policy gives up.
//! 4. The outcome is committed, successful responses are written to the
//!    cache, and filters, accessories and observers run on the execution
//!    context: `filter → will_stop → delegates → blocks → did_stop`.
//!
//! [`Request::stop`] cancels a running request. Whichever of `stop` and the
//! terminal commit takes the state lock first wins; after a successful stop
//! nothing else fires.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::HeaderMap;
use horizon_request_core::invocation::{QueuedInvocation, panic_message};
use horizon_request_core::logging::{span_names, targets};
use horizon_request_core::run_or_post;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::accessory::{Accessory, AccessoryChain, AccessoryPoint};
use crate::cache::{CacheWriteError, fingerprint};
use crate::config::{RequestConfig, RequestHook};
use crate::descriptor::{RequestDescriptor, TransportRequest};
use crate::error::{BuildError, CacheErrorKind, RequestError, ValidationError};
use crate::network::NetworkConfig;
use crate::observer::{CompletionBlock, ObserverId, Observers, RequestDelegate};
use crate::response::{ResponseObject, TransportResponse};
use crate::retry::{RetryContext, RetryInput, RetryState};
use crate::runtime;

/// Unique identifier of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Not started.
    Ready,
    /// Running, including retries and callback delivery.
    Executing,
    /// Completed successfully.
    Finished,
    /// Completed with an error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl RequestState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

struct StateData {
    status: RequestState,
    started: bool,
    committed: bool,
    ignore_cache: bool,
    from_cache: bool,
    response_status: Option<u16>,
    response_headers: Option<HeaderMap>,
    response_data: Option<Bytes>,
    response_object: Option<ResponseObject>,
    error: Option<RequestError>,
    current_request: Option<TransportRequest>,
    attempts: u32,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    task: Option<AbortHandle>,
    accessories: AccessoryChain,
    observers: Observers,
    primary_delegate: Option<ObserverId>,
    primary_block: Option<ObserverId>,
}

impl StateData {
    fn new() -> Self {
        Self {
            status: RequestState::Ready,
            started: false,
            committed: false,
            ignore_cache: false,
            from_cache: false,
            response_status: None,
            response_headers: None,
            response_data: None,
            response_object: None,
            error: None,
            current_request: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            task: None,
            accessories: AccessoryChain::new(),
            observers: Observers::new(),
            primary_delegate: None,
            primary_block: None,
        }
    }
}

struct RequestInner {
    id: RequestId,
    network: NetworkConfig,
    config: RwLock<Arc<RequestConfig>>,
    tag: AtomicI64,
    state: Mutex<StateData>,
    done: watch::Sender<bool>,
}

struct AttemptOutcome {
    response: Option<TransportResponse>,
    object: Option<ResponseObject>,
    error: Option<RequestError>,
}

/// A request and its runtime state.
///
/// Cloning is cheap; clones refer to the same request.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    /// Create a request in the `Ready` state.
    pub fn new(network: NetworkConfig, config: RequestConfig) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(RequestInner {
                id: RequestId::next(),
                network,
                tag: AtomicI64::new(config.tag),
                config: RwLock::new(Arc::new(config)),
                state: Mutex::new(StateData::new()),
                done,
            }),
        }
    }

    /// The request's unique ID.
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// The caller-defined tag.
    pub fn tag(&self) -> i64 {
        self.inner.tag.load(Ordering::Relaxed)
    }

    /// Set the caller-defined tag.
    pub fn set_tag(&self, tag: i64) {
        self.inner.tag.store(tag, Ordering::Relaxed);
    }

    /// The network configuration this request belongs to.
    pub fn network(&self) -> &NetworkConfig {
        &self.inner.network
    }

    /// A snapshot of the configuration.
    pub fn config(&self) -> Arc<RequestConfig> {
        self.inner.config.read().clone()
    }

    /// Modify the configuration. Only possible before the request started.
    pub fn configure(&self, f: impl FnOnce(&mut RequestConfig)) -> bool {
        let state = self.inner.state.lock();
        if state.started {
            return false;
        }
        let mut config = (*self.config()).clone();
        f(&mut config);
        *self.inner.config.write() = Arc::new(config);
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        self.inner.state.lock().status
    }

    /// Whether the request is running.
    pub fn is_executing(&self) -> bool {
        self.state() == RequestState::Executing
    }

    /// Whether the request was stopped.
    pub fn is_cancelled(&self) -> bool {
        self.state() == RequestState::Cancelled
    }

    /// Raw response body of the last attempt, or the cached payload.
    pub fn response_data(&self) -> Option<Bytes> {
        self.inner.state.lock().response_data.clone()
    }

    /// Response body as text.
    pub fn response_string(&self) -> Option<String> {
        self.response_data()
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Decoded response.
    pub fn response_object(&self) -> Option<ResponseObject> {
        self.inner.state.lock().response_object.clone()
    }

    /// Decoded JSON response.
    pub fn response_json(&self) -> Option<Value> {
        match self.response_object() {
            Some(ResponseObject::Json(value)) => Some(value),
            _ => None,
        }
    }

    /// HTTP status of the last attempt. `None` for cached responses.
    pub fn response_status_code(&self) -> Option<u16> {
        self.inner.state.lock().response_status
    }

    /// Headers of the last attempt. `None` for cached responses.
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.inner.state.lock().response_headers.clone()
    }

    /// The error of the last attempt, or the terminal error.
    pub fn error(&self) -> Option<RequestError> {
        self.inner.state.lock().error.clone()
    }

    /// Number of transport invocations so far.
    pub fn request_total_count(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Time from start until the outcome was committed, or until now.
    pub fn request_total_time(&self) -> Duration {
        let state = self.inner.state.lock();
        match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Whether the response was served from the cache.
    pub fn is_data_from_cache(&self) -> bool {
        self.inner.state.lock().from_cache
    }

    /// The last transport request built for this request.
    pub fn current_request(&self) -> Option<TransportRequest> {
        self.inner.state.lock().current_request.clone()
    }

    /// Register an accessory.
    pub fn add_accessory(&self, accessory: Accessory) {
        self.inner.state.lock().accessories.push(accessory);
    }

    /// Register a delegate in addition to existing observers.
    pub fn add_delegate(&self, delegate: &Arc<dyn RequestDelegate>) -> ObserverId {
        self.inner.state.lock().observers.add_delegate(delegate)
    }

    /// Replace the delegate registered through this method.
    pub fn set_delegate(&self, delegate: Option<&Arc<dyn RequestDelegate>>) {
        let mut state = self.inner.state.lock();
        if let Some(previous) = state.primary_delegate.take() {
            state.observers.remove(previous);
        }
        if let Some(delegate) = delegate {
            state.primary_delegate = Some(state.observers.add_delegate(delegate));
        }
    }

    /// Register a success/failure block pair in addition to existing observers.
    pub fn add_completion_block(
        &self,
        success: Option<CompletionBlock>,
        failure: Option<CompletionBlock>,
    ) -> ObserverId {
        self.inner.state.lock().observers.add_block(success, failure)
    }

    /// Replace the completion blocks registered through this method.
    pub fn set_completion_block<S, F>(&self, success: S, failure: F)
    where
        S: Fn(&Request) + Send + Sync + 'static,
        F: Fn(&Request) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if let Some(previous) = state.primary_block.take() {
            state.observers.remove(previous);
        }
        let id = state
            .observers
            .add_block(Some(Arc::new(success)), Some(Arc::new(failure)));
        state.primary_block = Some(id);
    }

    /// Remove the completion blocks set with [`set_completion_block`](Self::set_completion_block).
    pub fn clear_completion_block(&self) {
        let mut state = self.inner.state.lock();
        if let Some(previous) = state.primary_block.take() {
            state.observers.remove(previous);
        }
    }

    /// Unregister an observer.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.state.lock().observers.remove(id)
    }

    /// Set the completion blocks and start.
    pub fn start_with_completion<S, F>(&self, success: S, failure: F)
    where
        S: Fn(&Request) + Send + Sync + 'static,
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.set_completion_block(success, failure);
        self.start();
    }

    /// Start, skipping the cache read.
    pub fn start_without_cache(&self) {
        self.inner.state.lock().ignore_cache = true;
        self.start();
    }

    /// Start the request. Does nothing unless the request is `Ready`.
    pub fn start(&self) {
        let config = {
            let mut state = self.inner.state.lock();
            if state.started || state.status != RequestState::Ready {
                return;
            }
            state.started = true;
            state.started_at = Some(Instant::now());
            self.config()
        };

        tracing::debug!(
            target: targets::REQUEST,
            request_id = self.id().as_u64(),
            method = %config.method,
            url = %config.request_url,
            "starting request"
        );

        let ignore_cache = self.inner.state.lock().ignore_cache;
        if config.use_cache_response && !ignore_cache && !config.is_download() {
            match self.load_cache() {
                Ok(()) => {
                    self.finish_from_cache();
                    return;
                }
                Err(reason) => {
                    tracing::debug!(
                        target: targets::CACHE,
                        request_id = self.id().as_u64(),
                        %reason,
                        "cache not used"
                    );
                }
            }
        }

        let request = match RequestDescriptor::new(&config, &self.inner.network).build_request() {
            Ok(request) => request,
            Err(error) => {
                self.finish_build_failure(error);
                return;
            }
        };

        {
            let mut state = self.inner.state.lock();
            state.status = RequestState::Executing;
            state.current_request = Some(request.clone());
            state.from_cache = false;
            state.response_data = None;
            state.response_object = None;
            state.response_status = None;
            state.response_headers = None;
        }

        let will_start = self.dispatch_will_start();
        if !self.is_live() {
            return;
        }

        let span = tracing::debug_span!(
            target: targets::REQUEST,
            span_names::REQUEST,
            request_id = self.id().as_u64()
        );
        let this = self.clone();
        let handle = runtime::spawn(
            async move { this.run(config, request, will_start).await }.instrument(span),
        );

        let mut state = self.inner.state.lock();
        if !state.committed {
            state.task = Some(handle.abort_handle());
        } else if state.status == RequestState::Cancelled {
            handle.abort();
        }
    }

    /// Cancel a running request.
    ///
    /// Safe in any state; only an executing request whose outcome has not
    /// been committed is affected. No accessory, observer or cache write runs
    /// after a successful stop.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.status != RequestState::Executing || state.committed {
                return;
            }
            state.status = RequestState::Cancelled;
            state.committed = true;
            state.finished_at = Some(Instant::now());
            state.error = Some(RequestError::Cancelled);
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.observers.clear();
            state.primary_delegate = None;
            state.primary_block = None;
        }
        tracing::debug!(
            target: targets::REQUEST,
            request_id = self.id().as_u64(),
            "request cancelled"
        );
        self.inner.done.send_replace(true);
    }

    /// Wait until the request reached a terminal state.
    ///
    /// Resolves immediately when it already has. A request that is never
    /// started never resolves.
    pub async fn wait(&self) -> RequestState {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
        self.state()
    }

    /// The cache fingerprint of this request.
    pub fn cache_fingerprint(&self) -> String {
        let config = self.config();
        let base = RequestDescriptor::new(&config, &self.inner.network).base_url();
        fingerprint(
            config.method,
            base,
            &config.request_url,
            &config.cache_argument(),
        )
    }

    /// Location of this request's cache entry.
    pub fn cache_file_path(&self) -> PathBuf {
        self.inner
            .network
            .cache()
            .path_for(&self.cache_fingerprint())
    }

    /// Load the cached response into this request without delivering it.
    pub fn load_cache(&self) -> Result<(), CacheErrorKind> {
        let config = self.config();
        let cached = self
            .inner
            .network
            .cache()
            .load(&self.cache_fingerprint(), &config.cache_expectation())?;
        let object = config
            .response_serializer
            .decode(&cached.data)
            .map_err(|_| CacheErrorKind::InvalidCacheData)?;

        let mut state = self.inner.state.lock();
        state.response_data = Some(cached.data);
        state.response_object = Some(object);
        state.response_status = None;
        state.response_headers = None;
        state.from_cache = true;
        Ok(())
    }

    /// Write `data` as this request's cache entry.
    ///
    /// Skipped when the cache time is not positive or the current response
    /// came from the cache.
    pub fn save_response_data_to_cache_file(&self, data: &[u8]) -> Result<(), CacheWriteError> {
        let config = self.config();
        if config.cache_time_in_seconds <= 0 || self.is_data_from_cache() {
            return Ok(());
        }
        let store = self.inner.network.cache();
        let metadata = store.metadata_for(&config.cache_expectation());
        store.save(&self.cache_fingerprint(), data, &metadata)
    }

    fn dispatch_will_start(&self) -> Option<oneshot::Receiver<()>> {
        let context = self.inner.network.context();
        if context.is_current() {
            self.fire_accessories(AccessoryPoint::WillStart);
            return None;
        }

        let (sender, receiver) = oneshot::channel();
        let this = self.clone();
        let posted = context.post(QueuedInvocation::new(move || {
            if this.state() == RequestState::Executing {
                this.fire_accessories(AccessoryPoint::WillStart);
            }
            let _ = sender.send(());
        }));
        match posted {
            Ok(()) => Some(receiver),
            Err(e) => {
                tracing::warn!(
                    target: targets::REQUEST,
                    request_id = self.id().as_u64(),
                    context = context.name(),
                    error = %e,
                    "could not dispatch will_start"
                );
                None
            }
        }
    }

    async fn run(
        &self,
        config: Arc<RequestConfig>,
        request: TransportRequest,
        will_start: Option<oneshot::Receiver<()>>,
    ) {
        if let Some(will_start) = will_start {
            let _ = will_start.await;
        }

        let mut retry = RetryContext::new();
        let succeeded = loop {
            if !self.is_live() {
                return;
            }
            retry.record_attempt();
            self.inner.state.lock().attempts = retry.attempts();

            let span = tracing::trace_span!(
                target: targets::REQUEST,
                span_names::ATTEMPT,
                attempt = retry.attempts()
            );
            let outcome = self
                .attempt(&config, request.clone(), &retry)
                .instrument(span)
                .await;
            self.record_outcome(&outcome);

            let Some(error) = outcome.error else {
                self.run_hook("complete_preprocessor", config.hooks.complete_preprocessor.as_ref());
                break true;
            };

            tracing::debug!(
                target: targets::REQUEST,
                request_id = self.id().as_u64(),
                attempt = retry.attempts(),
                %error,
                "attempt failed"
            );
            self.run_hook("failed_preprocessor", config.hooks.failed_preprocessor.as_ref());
            retry.record_error(error.clone());

            let input = RetryInput {
                attempt: retry.attempts(),
                response: outcome.response,
                response_object: outcome.object,
                error,
                elapsed: retry.elapsed(),
            };
            match config.retry.decide(&retry, input).await {
                RetryState::Retrying(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryState::Exhausted => {
                    if let Some(error) = retry.last_error() {
                        tracing::debug!(
                            target: targets::REQUEST,
                            request_id = self.id().as_u64(),
                            attempts = retry.attempts(),
                            %error,
                            "giving up"
                        );
                    }
                    break false;
                }
            }
        };

        if !self.commit() {
            return;
        }
        if succeeded {
            self.persist_cache(&config);
        }
        self.deliver(succeeded, true);
    }

    async fn attempt(
        &self,
        config: &RequestConfig,
        request: TransportRequest,
        retry: &RetryContext,
    ) -> AttemptOutcome {
        let transport = self.inner.network.transport().clone();
        let call = match &config.resumable_download_path {
            Some(path) => transport.download(request, path, config.download_progress.clone()),
            None => transport.execute(request),
        };

        let result = match config.retry.remaining(retry) {
            Some(remaining) => tokio::time::timeout(remaining, call)
                .await
                .unwrap_or_else(|elapsed| Err(elapsed.into())),
            None => call.await,
        };

        match result {
            Ok(response) => evaluate(config, response),
            Err(error) => AttemptOutcome {
                response: None,
                object: None,
                error: Some(error.into()),
            },
        }
    }

    fn record_outcome(&self, outcome: &AttemptOutcome) {
        let is_download = self.config().is_download();
        let mut state = self.inner.state.lock();
        state.response_status = outcome.response.as_ref().map(|r| r.status);
        state.response_headers = outcome.response.as_ref().map(|r| r.headers.clone());
        state.response_data = if is_download {
            None
        } else {
            outcome.response.as_ref().map(|r| r.body.clone())
        };
        state.response_object = outcome.object.clone();
        state.error = outcome.error.clone();
        state.from_cache = false;
    }

    /// Whether the request is executing and its outcome is still open.
    fn is_live(&self) -> bool {
        let state = self.inner.state.lock();
        state.status == RequestState::Executing && !state.committed
    }

    fn commit(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.committed || state.status == RequestState::Cancelled {
            return false;
        }
        state.committed = true;
        state.task = None;
        state.finished_at = Some(Instant::now());
        true
    }

    fn persist_cache(&self, config: &RequestConfig) {
        if config.is_download() || config.cache_time_in_seconds <= 0 {
            return;
        }
        let (data, from_cache) = {
            let state = self.inner.state.lock();
            (state.response_data.clone(), state.from_cache)
        };
        let Some(data) = data else {
            return;
        };
        if from_cache {
            return;
        }

        let store = self.inner.network.cache().clone();
        let key = self.cache_fingerprint();
        let metadata = store.metadata_for(&config.cache_expectation());
        let request_id = self.id().as_u64();
        let write = move || {
            if let Err(e) = store.save(&key, &data, &metadata) {
                tracing::warn!(
                    target: targets::CACHE,
                    request_id,
                    error = %e,
                    "failed to write cache"
                );
            }
        };

        if config.write_cache_asynchronously {
            runtime::spawn_blocking(write);
        } else {
            write();
        }
    }

    fn finish_from_cache(&self) {
        {
            let mut state = self.inner.state.lock();
            state.status = RequestState::Executing;
            state.committed = true;
            state.finished_at = Some(Instant::now());
        }
        tracing::debug!(
            target: targets::REQUEST,
            request_id = self.id().as_u64(),
            "served from cache"
        );
        self.deliver(true, false);
    }

    fn finish_build_failure(&self, error: BuildError) {
        tracing::debug!(
            target: targets::REQUEST,
            request_id = self.id().as_u64(),
            %error,
            "request could not be built"
        );
        {
            let mut state = self.inner.state.lock();
            state.error = Some(error.into());
            state.committed = true;
            state.finished_at = Some(Instant::now());
        }
        self.deliver(false, false);
    }

    fn deliver(&self, succeeded: bool, with_accessories: bool) {
        let context = self.inner.network.context().clone();
        let this = self.clone();
        let delivered = run_or_post(context.as_ref(), move || {
            this.complete_on_context(succeeded, with_accessories);
        });
        if let Err(e) = delivered {
            tracing::warn!(
                target: targets::REQUEST,
                request_id = self.id().as_u64(),
                context = context.name(),
                error = %e,
                "execution context rejected completion"
            );
            self.set_final_state(succeeded);
        }
    }

    fn complete_on_context(&self, succeeded: bool, with_accessories: bool) {
        let config = self.config();
        if succeeded {
            self.run_hook("complete_filter", config.hooks.complete_filter.as_ref());
        } else {
            self.run_hook("failed_filter", config.hooks.failed_filter.as_ref());
        }

        if with_accessories {
            self.fire_accessories(AccessoryPoint::WillStop);
        }

        let observers = std::mem::take(&mut self.inner.state.lock().observers);
        observers.notify(self, succeeded);

        if with_accessories {
            self.fire_accessories(AccessoryPoint::DidStop);
        }

        self.set_final_state(succeeded);
    }

    fn set_final_state(&self, succeeded: bool) {
        {
            let mut state = self.inner.state.lock();
            state.status = if succeeded {
                RequestState::Finished
            } else {
                RequestState::Failed
            };
            state.observers.clear();
            state.primary_delegate = None;
            state.primary_block = None;
        }

        if self.inner.network.debug_log_enabled() {
            let config = self.config();
            tracing::info!(
                target: targets::REQUEST,
                request_id = self.id().as_u64(),
                method = %config.method,
                url = %config.request_url,
                succeeded,
                status = ?self.response_status_code(),
                attempts = self.request_total_count(),
                elapsed_ms = self.request_total_time().as_millis() as u64,
                from_cache = self.is_data_from_cache(),
                "request finished"
            );
        }

        self.inner.done.send_replace(true);
    }

    fn fire_accessories(&self, point: AccessoryPoint) {
        let accessories = self.inner.state.lock().accessories.clone();
        accessories.fire(point, self);
    }

    fn run_hook(&self, name: &str, hook: Option<&RequestHook>) {
        let Some(hook) = hook else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(self))) {
            tracing::warn!(
                target: targets::REQUEST,
                request_id = self.id().as_u64(),
                hook = name,
                panic = %panic_message(payload.as_ref()),
                "request hook panicked"
            );
        }
    }
}

fn evaluate(config: &RequestConfig, response: TransportResponse) -> AttemptOutcome {
    if !config.is_status_code_valid(response.status) {
        let object = if config.is_download() {
            None
        } else {
            config.response_serializer.decode(&response.body).ok()
        };
        let error = ValidationError::InvalidStatusCode {
            status: response.status,
        };
        return AttemptOutcome {
            response: Some(response),
            object,
            error: Some(error.into()),
        };
    }

    if let Some(path) = &config.resumable_download_path {
        return AttemptOutcome {
            response: Some(response),
            object: Some(ResponseObject::File(path.clone())),
            error: None,
        };
    }

    match config.response_serializer.decode(&response.body) {
        Ok(object) => {
            let error = match (&config.json_validator, &object) {
                (Some(shape), ResponseObject::Json(value)) if !shape.validate(value) => {
                    Some(ValidationError::InvalidJsonFormat.into())
                }
                _ => None,
            };
            AttemptOutcome {
                response: Some(response),
                object: Some(object),
                error,
            }
        }
        Err(error) => AttemptOutcome {
            response: Some(response),
            object: None,
            error: Some(error),
        },
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("tag", &self.tag())
            .field("state", &state.status)
            .field("attempts", &state.attempts)
            .field("from_cache", &state.from_cache)
            .field("error", &state.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{JsonShape, ResponseSerializerType};
    use serde_json::json;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestState::Ready.is_terminal());
        assert!(!RequestState::Executing.is_terminal());
        assert!(RequestState::Finished.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
    }

    #[test]
    fn test_evaluate_rejects_status_but_keeps_body() {
        let config = RequestConfig::default();
        let outcome = evaluate(&config, TransportResponse::new(500, r#"{"message":"down"}"#));
        assert_eq!(
            outcome.error,
            Some(ValidationError::InvalidStatusCode { status: 500 }.into())
        );
        assert_eq!(
            outcome.object.and_then(|o| o.as_json().cloned()),
            Some(json!({"message": "down"}))
        );
    }

    #[test]
    fn test_evaluate_applies_json_validator() {
        let config = RequestConfig {
            json_validator: Some(JsonShape::object([("id", JsonShape::Number)])),
            ..RequestConfig::default()
        };
        let ok = evaluate(&config, TransportResponse::new(200, r#"{"id":7}"#));
        assert!(ok.error.is_none());

        let bad = evaluate(&config, TransportResponse::new(200, r#"{"id":"7"}"#));
        assert_eq!(bad.error, Some(ValidationError::InvalidJsonFormat.into()));
    }

    #[test]
    fn test_evaluate_serialization_failure() {
        let config = RequestConfig {
            response_serializer: ResponseSerializerType::Xml,
            ..RequestConfig::default()
        };
        let outcome = evaluate(&config, TransportResponse::new(200, "<open></close>"));
        assert!(matches!(outcome.error, Some(RequestError::Serialization(_))));
        assert_eq!(outcome.response.map(|r| r.status), Some(200));
    }
}
