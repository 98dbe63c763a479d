//! Shared network configuration.
//!
//! A [`NetworkConfig`] bundles what every request of an application shares:
//! default base and CDN URLs, URL filters, the transport, the cache store and
//! the execution context callbacks are delivered on. It is cheap to clone.
//!
//! # Example
//!
//! ```no_run
//! use horizon_request::{ArgumentsUrlFilter, NetworkConfig};
//!
//! let network = NetworkConfig::builder()
//!     .base_url("https://api.example.com/v1")
//!     .url_filter(ArgumentsUrlFilter::new().argument("channel", "desktop"))
//!     .build()
//!     .unwrap();
//!
//! let request = network.request("users/42").build();
//! request.start();
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use horizon_request_core::{ExecutionContext, MainContext};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::config::{DEFAULT_TIMEOUT, RequestBuilder};
use crate::descriptor::UrlFilter;
use crate::error::{NetworkError, Result};
use crate::transport::{ReqwestTransport, TransportClient};

/// File-based network settings.
///
/// ```
/// use horizon_request::NetworkSettings;
///
/// let settings = NetworkSettings::from_toml_str(r#"
///     base_url = "https://api.example.com"
///     timeout_secs = 15
///     app_version = "3.1.0"
/// "#).unwrap();
/// assert_eq!(settings.timeout_secs, 15);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Default base URL.
    pub base_url: String,
    /// Default CDN URL.
    pub cdn_url: String,
    /// Cache directory; a directory under the system temp dir when unset.
    pub cache_dir: Option<PathBuf>,
    /// Default per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// User agent sent by the default transport.
    pub user_agent: Option<String>,
    /// Application version stamped into cache entries.
    pub app_version: Option<String>,
    /// Log a summary of every finished request.
    pub debug_log_enabled: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cdn_url: String::new(),
            cache_dir: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            user_agent: None,
            app_version: None,
            debug_log_enabled: false,
        }
    }
}

/// Errors raised while loading [`NetworkSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid TOML for this schema.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

impl NetworkSettings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, SettingsError> {
        Ok(toml::from_str(source)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, SettingsError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Render the settings as TOML.
    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

struct NetworkInner {
    base_url: String,
    cdn_url: String,
    url_filters: Vec<Arc<dyn UrlFilter>>,
    transport: Arc<dyn TransportClient>,
    cache: CacheStore,
    context: Arc<dyn ExecutionContext>,
    default_timeout: Duration,
    debug_log_enabled: bool,
}

/// Configuration shared by a family of requests.
#[derive(Clone)]
pub struct NetworkConfig {
    inner: Arc<NetworkInner>,
}

impl NetworkConfig {
    /// Create a builder.
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::new()
    }

    /// Build a configuration from file-based settings.
    pub fn from_settings(settings: &NetworkSettings) -> Result<Self> {
        NetworkConfigBuilder::from_settings(settings).build()
    }

    /// Start describing a request to `request_url`.
    pub fn request(&self, request_url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), request_url)
    }

    /// Default base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Default CDN URL.
    pub fn cdn_url(&self) -> &str {
        &self.inner.cdn_url
    }

    /// URL filters, in the order they run.
    pub fn url_filters(&self) -> &[Arc<dyn UrlFilter>] {
        &self.inner.url_filters
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.inner.transport
    }

    /// The cache store.
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// The context callbacks are delivered on.
    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.inner.context
    }

    /// Default per-attempt timeout for new requests.
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Whether finished requests are summarized in the log.
    pub fn debug_log_enabled(&self) -> bool {
        self.inner.debug_log_enabled
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("base_url", &self.inner.base_url)
            .field("cdn_url", &self.inner.cdn_url)
            .field("url_filters", &self.inner.url_filters.len())
            .field("cache", &self.inner.cache)
            .field("context", &self.inner.context.name())
            .field("default_timeout", &self.inner.default_timeout)
            .field("debug_log_enabled", &self.inner.debug_log_enabled)
            .finish()
    }
}

/// Builder for [`NetworkConfig`].
#[derive(Default)]
pub struct NetworkConfigBuilder {
    base_url: String,
    cdn_url: String,
    url_filters: Vec<Arc<dyn UrlFilter>>,
    transport: Option<Arc<dyn TransportClient>>,
    cache: Option<CacheStore>,
    context: Option<Arc<dyn ExecutionContext>>,
    default_timeout: Option<Duration>,
    user_agent: Option<String>,
    debug_log_enabled: bool,
}

impl NetworkConfigBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a builder from file-based settings.
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        let mut cache = match &settings.cache_dir {
            Some(dir) => CacheStore::new(dir),
            None => CacheStore::in_temp_dir(),
        };
        if let Some(app_version) = &settings.app_version {
            cache = cache.with_app_version(app_version.clone());
        }
        Self {
            base_url: settings.base_url.clone(),
            cdn_url: settings.cdn_url.clone(),
            cache: Some(cache),
            default_timeout: Some(Duration::from_secs(settings.timeout_secs)),
            user_agent: settings.user_agent.clone(),
            debug_log_enabled: settings.debug_log_enabled,
            ..Self::default()
        }
    }

    /// Set the default base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default CDN URL.
    pub fn cdn_url(mut self, url: impl Into<String>) -> Self {
        self.cdn_url = url.into();
        self
    }

    /// Append a URL filter.
    pub fn url_filter(mut self, filter: impl UrlFilter + 'static) -> Self {
        self.url_filters.push(Arc::new(filter));
        self
    }

    /// Use a specific transport.
    pub fn transport(mut self, transport: Arc<dyn TransportClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a specific cache store.
    pub fn cache_store(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Deliver callbacks on `context`.
    pub fn context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the default per-attempt timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the user agent of the default transport.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Summarize finished requests in the log.
    pub fn debug_log(mut self, enabled: bool) -> Self {
        self.debug_log_enabled = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// Without an explicit transport a [`ReqwestTransport`] is created;
    /// without an explicit context a dedicated callback thread is spawned.
    pub fn build(self) -> Result<NetworkConfig> {
        let transport: Arc<dyn TransportClient> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut builder = ReqwestTransport::builder();
                if let Some(user_agent) = self.user_agent {
                    builder = builder.user_agent(user_agent);
                }
                Arc::new(builder.build()?)
            }
        };

        let context: Arc<dyn ExecutionContext> = match self.context {
            Some(context) => context,
            None => MainContext::spawn("horizon-request-callbacks")
                .map_err(|e| NetworkError::Io(e.to_string()))?,
        };

        Ok(NetworkConfig {
            inner: Arc::new(NetworkInner {
                base_url: self.base_url,
                cdn_url: self.cdn_url,
                url_filters: self.url_filters,
                transport,
                cache: self.cache.unwrap_or_else(CacheStore::in_temp_dir),
                context,
                default_timeout: self.default_timeout.unwrap_or(DEFAULT_TIMEOUT),
                debug_log_enabled: self.debug_log_enabled,
            }),
        })
    }
}
