//! Completion observers.
//!
//! A request reports its terminal outcome to every registered observer:
//! delegates first, then completion blocks, each group in registration order.
//! The request owns its observers until delivery or stop, then drops them.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use horizon_request_core::invocation::panic_message;
use horizon_request_core::logging::targets;

use crate::request::Request;

/// A completion callback.
pub type CompletionBlock = Arc<dyn Fn(&Request) + Send + Sync>;

/// Receives terminal outcomes of requests.
pub trait RequestDelegate: Send + Sync {
    /// The request finished successfully.
    fn request_finished(&self, request: &Request);

    /// The request failed.
    fn request_failed(&self, _request: &Request) {}
}

/// Identifies a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
enum Observer {
    Delegate(Arc<dyn RequestDelegate>),
    Block {
        success: Option<CompletionBlock>,
        failure: Option<CompletionBlock>,
    },
}

impl Observer {
    fn notify(&self, request: &Request, succeeded: bool) {
        match self {
            Self::Delegate(delegate) => {
                if succeeded {
                    delegate.request_finished(request);
                } else {
                    delegate.request_failed(request);
                }
            }
            Self::Block { success, failure } => {
                let block = if succeeded { success } else { failure };
                if let Some(block) = block {
                    block(request);
                }
            }
        }
    }
}

/// The completion observers of one request.
#[derive(Clone, Default)]
pub struct Observers {
    delegates: Vec<(ObserverId, Observer)>,
    blocks: Vec<(ObserverId, Observer)>,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("delegates", &self.delegates.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl Observers {
    /// No observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delegate.
    pub fn add_delegate(&mut self, delegate: &Arc<dyn RequestDelegate>) -> ObserverId {
        let id = ObserverId::next();
        self.delegates
            .push((id, Observer::Delegate(Arc::clone(delegate))));
        id
    }

    /// Register a success/failure block pair.
    pub fn add_block(
        &mut self,
        success: Option<CompletionBlock>,
        failure: Option<CompletionBlock>,
    ) -> ObserverId {
        let id = ObserverId::next();
        self.blocks.push((id, Observer::Block { success, failure }));
        id
    }

    /// Unregister an observer. Returns whether it was registered.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.len();
        self.delegates.retain(|(entry, _)| *entry != id);
        self.blocks.retain(|(entry, _)| *entry != id);
        self.len() != before
    }

    /// Unregister every observer.
    pub fn clear(&mut self) {
        self.delegates.clear();
        self.blocks.clear();
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.delegates.len() + self.blocks.len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify delegates, then blocks. A panicking observer is logged and the
    /// remaining observers still run.
    pub fn notify(&self, request: &Request, succeeded: bool) {
        for (id, observer) in self.delegates.iter().chain(self.blocks.iter()) {
            let result = catch_unwind(AssertUnwindSafe(|| observer.notify(request, succeeded)));
            if let Err(payload) = result {
                tracing::warn!(
                    target: targets::REQUEST,
                    request_id = request.id().as_u64(),
                    observer = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "completion observer panicked"
                );
            }
        }
    }
}
