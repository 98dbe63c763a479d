//! Declarative HTTP requests with retry and on-disk caching.
//!
//! Requests are described with a [`RequestConfig`] (usually through a
//! [`RequestBuilder`]) and executed by a [`Request`], which handles cache
//! lookups, retries, and delivery of the outcome to accessories and
//! completion observers on a well-defined [`ExecutionContext`].
//!
//! # Components
//!
//! - [`descriptor`]: configuration → transport request
//! - [`cache`]: versioned on-disk response cache
//! - [`retry`]: retry policy and bookkeeping
//! - [`accessory`]: lifecycle observers (`will_start`, `will_stop`, `did_stop`)
//! - [`observer`]: completion delegates and blocks
//! - [`request`]: the lifecycle controller
//! - [`transport`]: the async HTTP client seam and its reqwest implementation
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_request::NetworkConfig;
//!
//! let network = NetworkConfig::builder()
//!     .base_url("https://api.example.com")
//!     .build()
//!     .unwrap();
//!
//! let request = network
//!     .request("/articles")
//!     .cache_response(60)
//!     .retry(2, Duration::from_secs(1))
//!     .build();
//!
//! request.start_with_completion(
//!     |request| println!("loaded: {:?}", request.response_json()),
//!     |request| eprintln!("failed: {:?}", request.error()),
//! );
//! ```

pub mod accessory;
pub mod cache;
pub mod config;
pub mod descriptor;
mod error;
pub mod network;
pub mod observer;
pub mod request;
pub mod response;
pub mod retry;
pub mod runtime;
pub mod transport;

pub use accessory::{Accessory, AccessoryChain, AccessoryPoint};
pub use cache::{CacheExpectation, CacheMetadata, CacheStore, CacheWriteError, CachedPayload};
pub use config::{RequestBuilder, RequestConfig, RequestHooks};
pub use descriptor::{
    ArgumentsUrlFilter, CachePolicy, HttpMethod, RequestBody, RequestDescriptor,
    RequestSerializerType, TransportRequest, UrlFilter,
};
pub use error::{
    BuildError, CacheErrorKind, NetworkError, RequestError, Result, ValidationError,
};
pub use horizon_request_core::{DirectContext, ExecutionContext, MainContext};
pub use network::{NetworkConfig, NetworkConfigBuilder, NetworkSettings, SettingsError};
pub use observer::{CompletionBlock, ObserverId, RequestDelegate};
pub use request::{Request, RequestId, RequestState};
pub use response::{
    JsonShape, ResponseObject, ResponseSerializerType, TransferProgress, TransportResponse,
    XmlDocument,
};
pub use retry::{RetryContext, RetryInput, RetryPolicy, RetryState};
pub use transport::{ReqwestTransport, ReqwestTransportBuilder, TransportClient};
