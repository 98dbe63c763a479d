//! Translation of a request configuration into a transport-ready request.
//!
//! [`RequestDescriptor`] composes the final URL from the base, CDN and request
//! URLs, encodes the argument with the configured serializer, and collects
//! headers and authorization. Any failure here is a [`BuildError`]: the
//! request fails immediately without reaching the transport.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::config::RequestConfig;
use crate::error::BuildError;
use crate::network::NetworkConfig;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    #[default]
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP HEAD method.
    Head,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Head => reqwest::Method::HEAD,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }

    /// Whether arguments for this method travel in the query string.
    pub fn encodes_arguments_in_url(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Head => write!(f, "HEAD"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
        }
    }
}

/// How the outgoing argument is encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestSerializerType {
    /// Query string or `application/x-www-form-urlencoded` body.
    #[default]
    Http,
    /// `application/json` body.
    Json,
}

/// Transport-level cache policy override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Let the transport apply standard HTTP caching.
    #[default]
    UseProtocolCachePolicy,
    /// Always go to the origin.
    ReloadIgnoringLocalCacheData,
    /// Accept stale intermediary responses, otherwise load.
    ReturnCacheDataElseLoad,
    /// Only accept cached intermediary responses.
    ReturnCacheDataDontLoad,
}

impl CachePolicy {
    /// The `Cache-Control` request directive matching this policy.
    pub fn cache_control(self) -> Option<&'static str> {
        match self {
            Self::UseProtocolCachePolicy => None,
            Self::ReloadIgnoringLocalCacheData => Some("no-cache"),
            Self::ReturnCacheDataElseLoad => Some("max-stale"),
            Self::ReturnCacheDataDontLoad => Some("only-if-cached"),
        }
    }
}

/// The body of a transport request.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    None,
    /// URL-encoded form pairs.
    Form(Vec<(String, String)>),
    /// JSON body.
    Json(Value),
    /// Raw binary body.
    Bytes(bytes::Bytes),
}

/// A fully composed request ready for the transport.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// The absolute URL, query included.
    pub url: Url,
    /// Request headers, authorization included.
    pub headers: HeaderMap,
    /// Request body.
    pub body: RequestBody,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Transport cache policy.
    pub cache_policy: CachePolicy,
    /// Whether the transport may use cellular interfaces.
    ///
    /// Advisory: transports that cannot select a network interface, such as
    /// [`ReqwestTransport`](crate::transport::ReqwestTransport), ignore it.
    pub allows_cellular_access: bool,
}

impl TransportRequest {
    /// Create a request with default options.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::None,
            timeout: Duration::from_secs(60),
            cache_policy: CachePolicy::default(),
            allows_cellular_access: true,
        }
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Rewrites a relative request URL before it is resolved against the base URL.
///
/// Filters are registered on the [`NetworkConfig`] and run in registration order.
pub trait UrlFilter: Send + Sync {
    /// Return the filtered URL.
    fn filter_url(&self, url: &str, config: &RequestConfig) -> String;
}

/// A [`UrlFilter`] that appends fixed query arguments to every request,
/// e.g. an app version or channel identifier.
#[derive(Clone, Debug, Default)]
pub struct ArgumentsUrlFilter {
    arguments: Vec<(String, String)>,
}

impl ArgumentsUrlFilter {
    /// Create a filter with no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument.
    pub fn argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push((key.into(), value.into()));
        self
    }
}

impl UrlFilter for ArgumentsUrlFilter {
    fn filter_url(&self, url: &str, _config: &RequestConfig) -> String {
        if self.arguments.is_empty() {
            return url.to_string();
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.arguments.iter())
            .finish();
        let separator = match url.find('?') {
            None => "?",
            Some(_) if url.ends_with('?') || url.ends_with('&') => "",
            Some(_) => "&",
        };
        format!("{url}{separator}{encoded}")
    }
}

/// Builds [`TransportRequest`]s from a request configuration.
pub struct RequestDescriptor<'a> {
    config: &'a RequestConfig,
    network: &'a NetworkConfig,
}

impl<'a> RequestDescriptor<'a> {
    /// Create a descriptor for `config` within `network`.
    pub fn new(config: &'a RequestConfig, network: &'a NetworkConfig) -> Self {
        Self { config, network }
    }

    /// The base the request URL resolves against.
    ///
    /// The request's own base or CDN URL wins over the network default.
    pub fn base_url(&self) -> &'a str {
        let (own, fallback) = if self.config.use_cdn {
            (self.config.cdn_url.as_str(), self.network.cdn_url())
        } else {
            (self.config.base_url.as_str(), self.network.base_url())
        };
        if own.is_empty() { fallback } else { own }
    }

    /// Compose the request URL (without arguments).
    pub fn build_url(&self) -> Result<Url, BuildError> {
        let detail = &self.config.request_url;

        if let Ok(url) = Url::parse(detail)
            && url.has_host()
        {
            return Ok(url);
        }

        let mut detail = detail.clone();
        for filter in self.network.url_filters() {
            detail = filter.filter_url(&detail, self.config);
        }

        let base = self.base_url();
        if base.is_empty() {
            return Url::parse(&detail).map_err(|e| BuildError::invalid_url(detail.clone(), e));
        }

        let mut base_url = Url::parse(base).map_err(|e| BuildError::invalid_url(base, e))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        base_url
            .join(&detail)
            .map_err(|e| BuildError::invalid_url(format!("{base}{detail}"), e))
    }

    /// Build the transport request.
    ///
    /// A custom request supplied by the configuration is returned verbatim.
    /// Otherwise the request is derived from the configuration and passed
    /// through the `filter_request` hook.
    pub fn build_request(&self) -> Result<TransportRequest, BuildError> {
        if let Some(custom) = &self.config.hooks.custom_request {
            return custom(self.config);
        }

        let mut url = self.build_url()?;
        let mut body = RequestBody::None;

        if let Some(argument) = self.config.argument.as_ref().filter(|a| !a.is_null()) {
            if self.config.method.encodes_arguments_in_url() {
                let pairs = query_pairs(argument)?;
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(pairs.iter());
                }
            } else {
                body = match self.config.request_serializer {
                    RequestSerializerType::Http => RequestBody::Form(query_pairs(argument)?),
                    RequestSerializerType::Json => RequestBody::Json(argument.clone()),
                };
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.header_fields {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BuildError::InvalidHeader { name: name.clone() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| BuildError::InvalidHeader { name: name.clone() })?;
            headers.insert(header_name, header_value);
        }

        if let Some((username, password)) = &self.config.authorization {
            let credentials = BASE64.encode(format!("{username}:{password}"));
            let value = HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|_| {
                BuildError::InvalidHeader {
                    name: http::header::AUTHORIZATION.to_string(),
                }
            })?;
            headers.insert(http::header::AUTHORIZATION, value);
        }

        let mut request = TransportRequest {
            method: self.config.method,
            url,
            headers,
            body,
            timeout: self.config.timeout,
            cache_policy: self.config.cache_policy,
            allows_cellular_access: self.config.allows_cellular_access,
        };

        if let Some(filter) = &self.config.hooks.filter_request {
            filter(&mut request);
        }

        Ok(request)
    }
}

/// Flatten an argument object into query pairs.
///
/// Nested objects become `key[sub]`, arrays become `key[]`; object keys are
/// emitted in sorted order.
pub fn query_pairs(argument: &Value) -> Result<Vec<(String, String)>, BuildError> {
    let Value::Object(map) = argument else {
        return Err(BuildError::InvalidArgument(
            "arguments encoded as query or form pairs must be a JSON object".to_string(),
        ));
    };
    let mut pairs = Vec::new();
    for (key, value) in map {
        flatten_pair(key.clone(), value, &mut pairs);
    }
    Ok(pairs)
}

fn flatten_pair(key: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (sub, nested) in map {
                flatten_pair(format!("{key}[{sub}]"), nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_pair(format!("{key}[]"), item, out);
            }
        }
        Value::Null => out.push((key, String::new())),
        Value::String(s) => out.push((key, s.clone())),
        other => out.push((key, other.to_string())),
    }
}
