//! Logging targets and span names for Horizon Request.
//!
//! Horizon Request uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_request=debug,horizon_request_core=info")
//!     .init();
//! ```

/// Span names used throughout Horizon Request for tracing.
pub mod span_names {
    /// A full request lifecycle.
    pub const REQUEST: &str = "horizon_request::request";
    /// A single transport attempt.
    pub const ATTEMPT: &str = "horizon_request::attempt";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Execution context dispatch.
    pub const CONTEXT: &str = "horizon_request_core::context";
    /// Request lifecycle controller.
    pub const REQUEST: &str = "horizon_request::request";
    /// On-disk response cache.
    pub const CACHE: &str = "horizon_request::cache";
    /// Retry decisions.
    pub const RETRY: &str = "horizon_request::retry";
    /// Transport client.
    pub const TRANSPORT: &str = "horizon_request::transport";
    /// Accessory hooks.
    pub const ACCESSORY: &str = "horizon_request::accessory";
}
