//! Tokio runtime used to drive requests.
//!
//! Requests started from inside a tokio runtime run on that runtime. Requests
//! started from plain threads (a GUI event loop, a CLI `main`) run on a
//! lazily created global multi-threaded runtime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the global runtime.
///
/// Call this early to control when the worker threads start; otherwise the
/// runtime is created on first use.
///
/// # Panics
///
/// Panics if the operating system refuses to create the worker threads.
pub fn init() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("horizon-request-worker")
            .enable_all()
            .build()
            .expect("failed to create the horizon-request runtime")
    })
}

/// A handle to the ambient runtime, or to the global one.
pub fn handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| init().handle().clone())
}

/// Spawn a future on the ambient or global runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle().spawn(future)
}

/// Run blocking work on the runtime's blocking pool.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    handle().spawn_blocking(f)
}
