//! Core systems for Horizon Request.
//!
//! This crate provides the threading primitives the request engine builds on:
//!
//! - **Execution contexts**: where request callbacks are delivered
//!   ([`MainContext`], [`DirectContext`])
//! - **Queued invocations**: type-erased closures posted across threads
//! - **Logging**: shared `tracing` targets and span names
//!
//! # Example
//!
//! ```
//! use horizon_request_core::{ExecutionContext, MainContext, QueuedInvocation};
//!
//! let main = MainContext::spawn("request-callbacks").unwrap();
//! main.post(QueuedInvocation::new(|| {
//!     println!("delivered on the callback thread");
//! }))
//! .unwrap();
//! ```

mod error;
pub mod context;
pub mod invocation;
pub mod logging;

pub use context::{DirectContext, ExecutionContext, MainContext, run_or_post};
pub use error::{ContextError, Result};
pub use invocation::{InvocationId, QueuedInvocation};
