//! Error types for the request engine.

use std::fmt;

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// HTTP request failed.
    Request(String),
    /// Request timed out.
    Timeout,
    /// Connection refused or failed.
    Connection(String),
    /// Invalid header name or value.
    InvalidHeader(String),
    /// I/O error.
    Io(String),
    /// Invalid response body.
    InvalidBody(String),
    /// Redirect limit exceeded.
    TooManyRedirects,
    /// Proxy configuration error.
    Proxy(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "HTTP request error: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::InvalidHeader(msg) => write!(f, "Invalid header: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::InvalidBody(msg) => write!(f, "Invalid response body: {msg}"),
            Self::TooManyRedirects => write!(f, "Too many redirects"),
            Self::Proxy(msg) => write!(f, "Proxy error: {msg}"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if err.is_body() || err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for NetworkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Errors raised while turning a request configuration into a transport request.
///
/// Build errors are fatal: no transport call is attempted and the request is
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Base URL and request URL did not combine into a parseable URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A configured header name or value is not valid HTTP.
    #[error("Invalid header '{name}'")]
    InvalidHeader { name: String },

    /// The request argument could not be encoded with the chosen serializer.
    #[error("Invalid request argument: {0}")]
    InvalidArgument(String),
}

impl BuildError {
    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Post-transport validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The status code was rejected by the status code validator.
    #[error("Invalid status code ({status})")]
    InvalidStatusCode { status: u16 },

    /// The JSON response did not match the configured JSON validator.
    #[error("Invalid JSON format")]
    InvalidJsonFormat,
}

/// Reasons a cache entry cannot be used.
///
/// Cache errors never reach completion observers: a failed read falls through
/// to a live request and a failed write is logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CacheErrorKind {
    /// The entry is older than the request's cache time.
    #[error("Cache expired")]
    Expired,
    /// The entry was written with another cache version.
    #[error("Cache version mismatch")]
    VersionMismatch,
    /// The entry was written with other sensitive data.
    #[error("Cache sensitive data mismatch")]
    SensitiveDataMismatch,
    /// The entry was written by another application version.
    #[error("App version mismatch")]
    AppVersionMismatch,
    /// The request's cache time does not allow cache reads.
    #[error("Invalid cache time")]
    InvalidCacheTime,
    /// The metadata is missing, unreadable, or from an unknown schema.
    #[error("Invalid metadata. Cache may not exist")]
    InvalidMetadata,
    /// The payload could not be decoded.
    #[error("Invalid cache data")]
    InvalidCacheData,
}

/// The error delivered to completion observers for a failed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The request could not be built.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The transport failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The response was received but rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The response body could not be decoded by the response serializer.
    #[error("Response serialization failed: {0}")]
    Serialization(String),

    /// The request was stopped before it finished.
    #[error("Request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Whether this is a build error.
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Whether this is a transport error.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
