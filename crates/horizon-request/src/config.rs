//! Request configuration.
//!
//! A [`RequestConfig`] describes one request declaratively: where it goes, how
//! its argument and response are encoded, and its cache and retry behaviour.
//! Behavioural customization is supplied as closures in [`RequestHooks`]
//! rather than by overriding methods.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use horizon_request_core::logging::targets;
use serde::Serialize;
use serde_json::Value;

use crate::accessory::Accessory;
use crate::cache::CacheExpectation;
use crate::descriptor::{CachePolicy, HttpMethod, RequestSerializerType, TransportRequest};
use crate::error::BuildError;
use crate::network::NetworkConfig;
use crate::request::Request;
use crate::response::{JsonShape, ResponseSerializerType, TransferProgress};
use crate::retry::{RetryInput, RetryPolicy};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A hook receiving the request.
pub type RequestHook = Arc<dyn Fn(&Request) + Send + Sync>;

/// Replaces request derivation entirely.
pub type CustomRequestFn =
    Arc<dyn Fn(&RequestConfig) -> Result<TransportRequest, BuildError> + Send + Sync>;

/// Mutates the derived request before it is sent.
pub type RequestFilterFn = Arc<dyn Fn(&mut TransportRequest) + Send + Sync>;

/// Decides whether a status code is acceptable.
pub type StatusCodeValidator = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// Canonicalizes the argument before it is used in the cache fingerprint.
pub type CacheFileNameFilter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Receives download progress.
pub type DownloadProgressFn = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// Behavioural hooks of a request.
///
/// Preprocessors run on a runtime worker right after each attempt; filters
/// run on the execution context right before observers.
#[derive(Clone, Default)]
pub struct RequestHooks {
    /// Supplies the transport request verbatim.
    pub custom_request: Option<CustomRequestFn>,
    /// Adjusts the derived transport request.
    pub filter_request: Option<RequestFilterFn>,
    /// Runs off the execution context after a successful attempt.
    pub complete_preprocessor: Option<RequestHook>,
    /// Runs off the execution context after a failed attempt.
    pub failed_preprocessor: Option<RequestHook>,
    /// Runs on the execution context before success observers.
    pub complete_filter: Option<RequestHook>,
    /// Runs on the execution context before failure observers.
    pub failed_filter: Option<RequestHook>,
}

impl fmt::Debug for RequestHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHooks")
            .field("custom_request", &self.custom_request.is_some())
            .field("filter_request", &self.filter_request.is_some())
            .field("complete_preprocessor", &self.complete_preprocessor.is_some())
            .field("failed_preprocessor", &self.failed_preprocessor.is_some())
            .field("complete_filter", &self.complete_filter.is_some())
            .field("failed_filter", &self.failed_filter.is_some())
            .finish()
    }
}

/// Declarative description of a request.
#[derive(Clone)]
pub struct RequestConfig {
    /// Base URL; the network base URL when empty.
    pub base_url: String,
    /// Path relative to the base URL, or an absolute URL.
    pub request_url: String,
    /// CDN URL; the network CDN URL when empty.
    pub cdn_url: String,
    /// Resolve against the CDN URL instead of the base URL.
    pub use_cdn: bool,
    /// HTTP method.
    pub method: HttpMethod,
    /// Argument encoding.
    pub request_serializer: RequestSerializerType,
    /// Response decoding.
    pub response_serializer: ResponseSerializerType,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Transport cache policy.
    pub cache_policy: CachePolicy,
    /// Request argument.
    pub argument: Option<Value>,
    /// Extra headers.
    pub header_fields: Vec<(String, String)>,
    /// Basic authorization username and password.
    pub authorization: Option<(String, String)>,
    /// Whether cellular interfaces may be used.
    pub allows_cellular_access: bool,
    /// Structural validator for JSON responses.
    pub json_validator: Option<JsonShape>,
    /// Status code validator; 200..=299 when unset.
    pub status_code_validator: Option<StatusCodeValidator>,
    /// Retry behaviour.
    pub retry: RetryPolicy,
    /// Read successful responses back from the cache.
    pub use_cache_response: bool,
    /// Cache lifetime in seconds; non-positive disables cache reads.
    pub cache_time_in_seconds: i64,
    /// Cache entries from other versions are ignored.
    pub cache_version: i64,
    /// Cache entries with other sensitive data are ignored.
    pub cache_sensitive_data: Option<String>,
    /// Write the cache on a blocking worker instead of inline.
    pub write_cache_asynchronously: bool,
    /// Canonicalizes the argument for the cache fingerprint.
    pub cache_file_name_filter: Option<CacheFileNameFilter>,
    /// Caller-defined tag.
    pub tag: i64,
    /// Turns the request into a resumable download into this file.
    pub resumable_download_path: Option<PathBuf>,
    /// Download progress callback.
    pub download_progress: Option<DownloadProgressFn>,
    /// Behavioural hooks.
    pub hooks: RequestHooks,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_url: String::new(),
            cdn_url: String::new(),
            use_cdn: false,
            method: HttpMethod::Get,
            request_serializer: RequestSerializerType::Http,
            response_serializer: ResponseSerializerType::Json,
            timeout: DEFAULT_TIMEOUT,
            cache_policy: CachePolicy::UseProtocolCachePolicy,
            argument: None,
            header_fields: Vec::new(),
            authorization: None,
            allows_cellular_access: true,
            json_validator: None,
            status_code_validator: None,
            retry: RetryPolicy::default(),
            use_cache_response: false,
            cache_time_in_seconds: -1,
            cache_version: 0,
            cache_sensitive_data: None,
            write_cache_asynchronously: true,
            cache_file_name_filter: None,
            tag: 0,
            resumable_download_path: None,
            download_progress: None,
            hooks: RequestHooks::default(),
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("base_url", &self.base_url)
            .field("request_url", &self.request_url)
            .field("cdn_url", &self.cdn_url)
            .field("use_cdn", &self.use_cdn)
            .field("method", &self.method)
            .field("request_serializer", &self.request_serializer)
            .field("response_serializer", &self.response_serializer)
            .field("timeout", &self.timeout)
            .field("cache_policy", &self.cache_policy)
            .field("argument", &self.argument)
            .field("header_fields", &self.header_fields)
            .field("authorization", &self.authorization.as_ref().map(|(user, _)| user))
            .field("json_validator", &self.json_validator)
            .field("retry", &self.retry)
            .field("use_cache_response", &self.use_cache_response)
            .field("cache_time_in_seconds", &self.cache_time_in_seconds)
            .field("cache_version", &self.cache_version)
            .field("cache_sensitive_data", &self.cache_sensitive_data)
            .field("tag", &self.tag)
            .field("resumable_download_path", &self.resumable_download_path)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl RequestConfig {
    /// Whether `status` passes the status code validator.
    pub fn is_status_code_valid(&self, status: u16) -> bool {
        match &self.status_code_validator {
            Some(validator) => validator(status),
            None => (200..=299).contains(&status),
        }
    }

    /// The argument as it takes part in the cache fingerprint.
    pub fn cache_argument(&self) -> Value {
        let argument = self.argument.clone().unwrap_or(Value::Null);
        match &self.cache_file_name_filter {
            Some(filter) => filter(&argument),
            None => argument,
        }
    }

    /// What a cache entry must satisfy to serve this request.
    pub fn cache_expectation(&self) -> CacheExpectation {
        CacheExpectation {
            cache_version: self.cache_version,
            sensitive_data: self.cache_sensitive_data.clone(),
            ttl_seconds: self.cache_time_in_seconds,
        }
    }

    /// Whether this request is a file download.
    pub fn is_download(&self) -> bool {
        self.resumable_download_path.is_some()
    }
}

/// Builder for requests.
///
/// Obtained from [`NetworkConfig::request`].
///
/// ```no_run
/// use std::time::Duration;
/// use horizon_request::{HttpMethod, NetworkConfig};
/// use serde_json::json;
///
/// # fn demo(network: &NetworkConfig) {
/// let request = network
///     .request("/users")
///     .method(HttpMethod::Post)
///     .json_argument(json!({"name": "ada"}))
///     .retry(2, Duration::from_secs(1))
///     .build();
/// request.start();
/// # }
/// ```
#[must_use = "builders do nothing until built"]
pub struct RequestBuilder {
    network: NetworkConfig,
    config: RequestConfig,
    accessories: Vec<Accessory>,
}

impl RequestBuilder {
    /// Create a builder for `request_url` within `network`.
    pub fn new(network: NetworkConfig, request_url: impl Into<String>) -> Self {
        let config = RequestConfig {
            request_url: request_url.into(),
            timeout: network.default_timeout(),
            ..RequestConfig::default()
        };
        Self {
            network,
            config,
            accessories: Vec::new(),
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.config.method = method;
        self
    }

    /// Override the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Resolve against the CDN, optionally overriding its URL.
    pub fn use_cdn(mut self, cdn_url: Option<String>) -> Self {
        self.config.use_cdn = true;
        if let Some(cdn_url) = cdn_url {
            self.config.cdn_url = cdn_url;
        }
        self
    }

    /// Set the argument from a serializable value.
    pub fn argument<T: Serialize>(mut self, argument: &T) -> Self {
        match serde_json::to_value(argument) {
            Ok(value) => self.config.argument = Some(value),
            Err(e) => {
                tracing::error!(
                    target: targets::REQUEST,
                    "Failed to serialize request argument: {}",
                    e
                );
            }
        }
        self
    }

    /// Set a JSON argument sent with the JSON serializer.
    pub fn json_argument(mut self, argument: Value) -> Self {
        self.config.argument = Some(argument);
        self.config.request_serializer = RequestSerializerType::Json;
        self
    }

    /// Set the argument encoding.
    pub fn request_serializer(mut self, serializer: RequestSerializerType) -> Self {
        self.config.request_serializer = serializer;
        self
    }

    /// Set the response decoding.
    pub fn response_serializer(mut self, serializer: ResponseSerializerType) -> Self {
        self.config.response_serializer = serializer;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.header_fields.push((name.into(), value.into()));
        self
    }

    /// Set basic authorization.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.authorization = Some((username.into(), password.into()));
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the transport cache policy.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.config.cache_policy = policy;
        self
    }

    /// Forbid cellular interfaces.
    ///
    /// Only honored by transports that can choose a network interface.
    pub fn disallow_cellular_access(mut self) -> Self {
        self.config.allows_cellular_access = false;
        self
    }

    /// Validate JSON responses against a shape.
    pub fn json_validator(mut self, shape: JsonShape) -> Self {
        self.config.json_validator = Some(shape);
        self
    }

    /// Replace the status code validator.
    pub fn status_code_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.config.status_code_validator = Some(Arc::new(validator));
        self
    }

    /// Retry up to `count` times, `interval` apart.
    pub fn retry(mut self, count: u32, interval: Duration) -> Self {
        self.config.retry.count = count;
        self.config.retry.interval = interval;
        self
    }

    /// Bound the whole request, retries included.
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.timeout = timeout;
        self
    }

    /// Replace the retry validator.
    pub fn retry_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&RetryInput) -> bool + Send + Sync + 'static,
    {
        self.config.retry.validator = Some(Arc::new(validator));
        self
    }

    /// Install an async retry processor.
    pub fn retry_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(RetryInput) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.config.retry.processor = Some(Arc::new(processor));
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Serve responses younger than `seconds` from the cache.
    pub fn cache_response(mut self, seconds: i64) -> Self {
        self.config.use_cache_response = true;
        self.config.cache_time_in_seconds = seconds;
        self
    }

    /// Set the cache time without enabling cache reads.
    pub fn cache_time(mut self, seconds: i64) -> Self {
        self.config.cache_time_in_seconds = seconds;
        self
    }

    /// Set the cache version.
    pub fn cache_version(mut self, version: i64) -> Self {
        self.config.cache_version = version;
        self
    }

    /// Set the cache sensitive data.
    pub fn cache_sensitive_data(mut self, data: impl Into<String>) -> Self {
        self.config.cache_sensitive_data = Some(data.into());
        self
    }

    /// Write the cache inline on the completion path.
    pub fn write_cache_synchronously(mut self) -> Self {
        self.config.write_cache_asynchronously = false;
        self
    }

    /// Canonicalize the argument for the cache fingerprint.
    pub fn cache_file_name_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.config.cache_file_name_filter = Some(Arc::new(filter));
        self
    }

    /// Set the caller-defined tag.
    pub fn tag(mut self, tag: i64) -> Self {
        self.config.tag = tag;
        self
    }

    /// Download the response into `path`, resuming partial files.
    pub fn resumable_download(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.resumable_download_path = Some(path.into());
        self
    }

    /// Receive download progress.
    pub fn download_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        self.config.download_progress = Some(Arc::new(progress));
        self
    }

    /// Supply the transport request verbatim.
    pub fn custom_request<F>(mut self, build: F) -> Self
    where
        F: Fn(&RequestConfig) -> Result<TransportRequest, BuildError> + Send + Sync + 'static,
    {
        self.config.hooks.custom_request = Some(Arc::new(build));
        self
    }

    /// Adjust the derived transport request.
    pub fn filter_request<F>(mut self, filter: F) -> Self
    where
        F: Fn(&mut TransportRequest) + Send + Sync + 'static,
    {
        self.config.hooks.filter_request = Some(Arc::new(filter));
        self
    }

    /// Run after each successful attempt, off the execution context.
    pub fn complete_preprocessor<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.config.hooks.complete_preprocessor = Some(Arc::new(hook));
        self
    }

    /// Run after each failed attempt, off the execution context.
    pub fn failed_preprocessor<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.config.hooks.failed_preprocessor = Some(Arc::new(hook));
        self
    }

    /// Run on the execution context before success observers.
    pub fn complete_filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.config.hooks.complete_filter = Some(Arc::new(hook));
        self
    }

    /// Run on the execution context before failure observers.
    pub fn failed_filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.config.hooks.failed_filter = Some(Arc::new(hook));
        self
    }

    /// Register an accessory.
    pub fn accessory(mut self, accessory: Accessory) -> Self {
        self.accessories.push(accessory);
        self
    }

    /// Modify the configuration directly.
    pub fn configure(mut self, f: impl FnOnce(&mut RequestConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build the request in the `Ready` state.
    pub fn build(self) -> Request {
        let request = Request::new(self.network, self.config);
        for accessory in self.accessories {
            request.add_accessory(accessory);
        }
        request
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("config", &self.config)
            .field("accessories", &self.accessories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.cache_time_in_seconds, -1);
        assert!(config.write_cache_asynchronously);
        assert!(config.allows_cellular_access);
        assert_eq!(config.response_serializer, ResponseSerializerType::Json);
        assert_eq!(config.retry.count, 0);
    }

    #[test]
    fn test_status_code_validator() {
        let mut config = RequestConfig::default();
        assert!(config.is_status_code_valid(204));
        assert!(!config.is_status_code_valid(304));
        config.status_code_validator = Some(Arc::new(|status| status == 304));
        assert!(config.is_status_code_valid(304));
    }

    #[test]
    fn test_cache_argument_filter() {
        let mut config = RequestConfig {
            argument: Some(json!({"page": 1, "nonce": "abc"})),
            ..RequestConfig::default()
        };
        config.cache_file_name_filter = Some(Arc::new(|arg| {
            let mut arg = arg.clone();
            if let Some(map) = arg.as_object_mut() {
                map.remove("nonce");
            }
            arg
        }));
        assert_eq!(config.cache_argument(), json!({"page": 1}));
    }
}
