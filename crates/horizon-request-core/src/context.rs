//! Execution contexts for request callbacks.
//!
//! Request completions arrive on whichever runtime worker finished the
//! transport call. Everything a caller observes (accessory hooks, completion
//! filters, delegates and completion blocks) is instead delivered on one
//! well-defined [`ExecutionContext`], the equivalent of a UI "main queue".
//!
//! # Implementations
//!
//! - [`MainContext::spawn`] - a dedicated thread draining a channel
//! - [`MainContext::for_current_thread`] - the caller pumps pending
//!   invocations from its own loop (GUI integration)
//! - [`DirectContext`] - runs invocations on the posting thread
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_request_core::context::{ExecutionContext, MainContext};
//! use horizon_request_core::invocation::QueuedInvocation;
//!
//! let main = MainContext::for_current_thread("ui");
//! let worker_view = Arc::clone(&main);
//!
//! std::thread::spawn(move || {
//!     worker_view
//!         .post(QueuedInvocation::new(|| println!("runs on the ui thread")))
//!         .unwrap();
//! })
//! .join()
//! .unwrap();
//!
//! assert_eq!(main.process_pending(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ContextError, Result};
use crate::invocation::QueuedInvocation;
use crate::logging::targets;

/// A place where deferred invocations run.
pub trait ExecutionContext: Send + Sync {
    /// Queue an invocation for execution on this context.
    fn post(&self, invocation: QueuedInvocation) -> Result<()>;

    /// Whether the calling thread is this context's thread.
    fn is_current(&self) -> bool;

    /// Human readable name used in logs.
    fn name(&self) -> &str {
        "context"
    }
}

/// Run `f` immediately when already on `context`, otherwise post it.
pub fn run_or_post<C, F>(context: &C, f: F) -> Result<()>
where
    C: ExecutionContext + ?Sized,
    F: FnOnce() + Send + 'static,
{
    let invocation = QueuedInvocation::new(f);
    if context.is_current() {
        invocation.execute();
        Ok(())
    } else {
        context.post(invocation)
    }
}

/// A single-threaded context backed by a channel.
///
/// Invocations posted from any thread run in FIFO order on the owning thread.
pub struct MainContext {
    name: String,
    sender: Sender<QueuedInvocation>,
    receiver: Receiver<QueuedInvocation>,
    owner: ThreadId,
    dedicated: bool,
    closed: AtomicBool,
}

impl MainContext {
    /// Create a context owned by the calling thread.
    ///
    /// The caller must periodically call [`process_pending`](Self::process_pending)
    /// (or [`process_for`](Self::process_for)) from this thread.
    pub fn for_current_thread(name: impl Into<String>) -> Arc<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Arc::new(Self {
            name: name.into(),
            sender,
            receiver,
            owner: std::thread::current().id(),
            dedicated: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn a dedicated thread that drains the context.
    ///
    /// The thread exits once the last reference to the context is dropped
    /// or [`close`](Self::close) is called.
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<QueuedInvocation>();
        let thread_receiver = receiver.clone();
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(
                    target: targets::CONTEXT,
                    context = %thread_name,
                    "context thread started"
                );
                while let Ok(invocation) = thread_receiver.recv() {
                    tracing::trace!(
                        target: targets::CONTEXT,
                        context = %thread_name,
                        invocation_id = invocation.id().as_u64(),
                        "executing queued invocation"
                    );
                    invocation.execute();
                }
                tracing::debug!(
                    target: targets::CONTEXT,
                    context = %thread_name,
                    "context thread stopped"
                );
            })?;

        Ok(Arc::new(Self {
            name,
            sender,
            receiver,
            owner: handle.thread().id(),
            dedicated: true,
            closed: AtomicBool::new(false),
        }))
    }

    /// Whether this context runs its own thread.
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// Stop accepting new invocations.
    ///
    /// Already queued invocations still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Check whether the context has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of invocations waiting to run.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Run every invocation queued so far on the calling thread.
    ///
    /// Returns the number of invocations executed. Does nothing when called
    /// from a thread other than the owner, or on a dedicated context.
    pub fn process_pending(&self) -> usize {
        if self.dedicated || !self.is_current() {
            return 0;
        }
        let mut executed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(invocation) => {
                    invocation.execute();
                    executed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        executed
    }

    /// Pump invocations on the calling thread for up to `timeout`.
    ///
    /// Returns the number of invocations executed.
    pub fn process_for(&self, timeout: Duration) -> usize {
        if self.dedicated || !self.is_current() {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut executed = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(invocation) => {
                    invocation.execute();
                    executed += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        executed
    }

    /// Pump invocations until `done` returns `true` or `timeout` elapses.
    ///
    /// Returns whether `done` was satisfied.
    pub fn process_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return done();
            }
            self.process_for(remaining.min(Duration::from_millis(10)));
        }
        true
    }
}

impl ExecutionContext for MainContext {
    fn post(&self, invocation: QueuedInvocation) -> Result<()> {
        if self.is_closed() {
            return Err(ContextError::Closed);
        }
        tracing::trace!(
            target: targets::CONTEXT,
            context = %self.name,
            invocation_id = invocation.id().as_u64(),
            "posting invocation"
        );
        self.sender.send(invocation).map_err(|_| ContextError::Closed)
    }

    fn is_current(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainContext")
            .field("name", &self.name)
            .field("dedicated", &self.dedicated)
            .field("pending", &self.receiver.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A context that runs invocations immediately on the posting thread.
///
/// Useful for headless tools and tests that do not care which thread runs
/// the callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectContext;

impl DirectContext {
    /// Create a new direct context.
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionContext for DirectContext {
    fn post(&self, invocation: QueuedInvocation) -> Result<()> {
        invocation.execute();
        Ok(())
    }

    fn is_current(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_direct_context_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        DirectContext::new()
            .post(QueuedInvocation::new(move || ran_clone.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_manual_context_ignores_foreign_pump() {
        let main = MainContext::for_current_thread("manual");
        main.post(QueuedInvocation::new(|| {})).unwrap();

        let other = main.clone();
        let executed = std::thread::spawn(move || other.process_pending())
            .join()
            .unwrap();
        assert_eq!(executed, 0);
        assert_eq!(main.process_pending(), 1);
    }

    #[test]
    fn test_closed_context_rejects_posts() {
        let main = MainContext::for_current_thread("closing");
        main.close();
        assert_eq!(
            main.post(QueuedInvocation::new(|| {})).unwrap_err(),
            ContextError::Closed
        );
    }

    #[test]
    fn test_run_or_post_inline_on_owner() {
        let main = MainContext::for_current_thread("inline");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        run_or_post(main.as_ref(), move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(main.pending_count(), 0);
    }
}
