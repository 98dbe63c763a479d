//! Transport clients.
//!
//! The request engine never performs I/O itself: a [`TransportClient`]
//! executes composed [`TransportRequest`]s asynchronously. [`ReqwestTransport`]
//! is the default implementation; tests and embedders can supply their own.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use horizon_request_core::logging::targets;
use reqwest::redirect::Policy;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::descriptor::{RequestBody, TransportRequest};
use crate::error::{NetworkError, Result};
use crate::response::{TransferProgress, TransportResponse};

/// Callback receiving download progress.
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// Executes composed requests.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Execute a data request and return the full response.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Execute a download request, writing the body to `destination`.
    ///
    /// The returned response has an empty body. The default implementation
    /// buffers the body through [`execute`](Self::execute).
    async fn download(
        &self,
        request: TransportRequest,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<TransportResponse> {
        let response = self.execute(request).await?;
        if response.is_success() {
            tokio::fs::write(destination, &response.body).await?;
            if let Some(progress) = progress {
                let len = response.body.len() as u64;
                progress(&TransferProgress {
                    bytes_transferred: len,
                    total_bytes: Some(len),
                });
            }
        }
        Ok(TransportResponse {
            body: Bytes::new(),
            ..response
        })
    }
}

/// Configuration for the reqwest transport.
#[derive(Clone, Debug)]
pub struct ReqwestTransportConfig {
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Whether to enable cookie storage.
    pub cookies_enabled: bool,
    /// Default user agent.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
}

impl Default for ReqwestTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            follow_redirects: true,
            max_redirects: 10,
            cookies_enabled: true,
            user_agent: Some(format!(
                "HorizonRequest/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
            proxy: None,
        }
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Default)]
pub struct ReqwestTransportBuilder {
    config: ReqwestTransportConfig,
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Disable redirect following.
    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Disable cookie storage.
    pub fn no_cookies(mut self) -> Self {
        self.config.cookies_enabled = false;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set a proxy URL.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy_url.into());
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<ReqwestTransport> {
        let mut builder = reqwest::Client::builder();

        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        if self.config.follow_redirects {
            builder = builder.redirect(Policy::limited(self.config.max_redirects));
        } else {
            builder = builder.redirect(Policy::none());
        }

        if self.config.cookies_enabled {
            builder = builder.cookie_store(true);
        }

        if let Some(ref ua) = self.config.user_agent {
            builder = builder.user_agent(ua);
        }

        if let Some(ref proxy_url) = self.config.proxy {
            let proxy =
                reqwest::Proxy::all(proxy_url).map_err(|e| NetworkError::Proxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        Ok(ReqwestTransport {
            client: builder.build()?,
            config: self.config,
        })
    }
}

/// A [`TransportClient`] backed by `reqwest`.
///
/// Cheaply cloneable; clones share the connection pool. The
/// `allows_cellular_access` flag of a [`TransportRequest`] is not enforced.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ReqwestTransportConfig,
}

impl ReqwestTransport {
    /// Create a transport with default configuration.
    pub fn new() -> Result<Self> {
        ReqwestTransportBuilder::new().build()
    }

    /// Create a builder for configuring a transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            config: ReqwestTransportConfig::default(),
        }
    }

    /// Get the transport's configuration.
    pub fn config(&self) -> &ReqwestTransportConfig {
        &self.config
    }

    /// `allows_cellular_access` is not applied: reqwest has no interface
    /// selection.
    fn prepare(&self, request: TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), request.url)
            .timeout(request.timeout);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if let Some(directive) = request.cache_policy.cache_control()
            && !request.headers.contains_key(http::header::CACHE_CONTROL)
        {
            builder = builder.header(http::header::CACHE_CONTROL, directive);
        }

        match request.body {
            RequestBody::None => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(bytes) => builder.body(bytes),
        }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl TransportClient for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        tracing::trace!(
            target: targets::TRANSPORT,
            method = %request.method,
            url = %request.url,
            "sending request"
        );
        let response = self.prepare(request).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        tracing::trace!(
            target: targets::TRANSPORT,
            status,
            bytes = body.len(),
            "received response"
        );
        Ok(TransportResponse {
            status,
            headers,
            url: Some(url),
            body,
        })
    }

    async fn download(
        &self,
        mut request: TransportRequest,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<TransportResponse> {
        let offset = match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        if offset > 0 {
            let range = http::HeaderValue::from_str(&format!("bytes={offset}-"))
                .map_err(|e| NetworkError::InvalidHeader(e.to_string()))?;
            request.headers.insert(http::header::RANGE, range);
        }

        let mut response = self.prepare(request).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();

        if !(200..300).contains(&status) {
            let body = response.bytes().await?;
            return Ok(TransportResponse {
                status,
                headers,
                url: Some(url),
                body,
            });
        }

        // 206 means the server honoured the range; anything else restarts the file.
        let resumed = status == 206 && offset > 0;
        let total_bytes = response
            .content_length()
            .map(|len| if resumed { len + offset } else { len });

        let mut file = if resumed {
            OpenOptions::new().append(true).open(destination).await?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(destination)
                .await?
        };

        let mut bytes_transferred = if resumed { offset } else { 0 };
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes_transferred += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(&TransferProgress {
                    bytes_transferred,
                    total_bytes,
                });
            }
        }
        file.flush().await?;

        tracing::debug!(
            target: targets::TRANSPORT,
            path = %destination.display(),
            bytes_transferred,
            resumed,
            "download finished"
        );

        Ok(TransportResponse {
            status,
            headers,
            url: Some(url),
            body: Bytes::new(),
        })
    }
}
