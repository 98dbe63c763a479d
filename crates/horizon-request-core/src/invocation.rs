//! Deferred invocations posted to an execution context.
//!
//! A [`QueuedInvocation`] wraps a closure that must run on another thread,
//! typically the context that owns request callbacks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging::targets;

/// Global invocation counter for unique IDs.
static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a queued invocation, used in trace output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvocationId(u64);

impl InvocationId {
    fn next() -> Self {
        Self(NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value of this invocation ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A type-erased closure that will be executed later on a target context.
pub struct QueuedInvocation {
    id: InvocationId,
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: InvocationId::next(),
            invoke: Box::new(invoke),
        }
    }

    /// The invocation's ID.
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Execute the invocation.
    ///
    /// A panic raised by the closure is caught and logged. Returns `false` if
    /// the closure panicked.
    pub fn execute(self) -> bool {
        let id = self.id;
        match panic::catch_unwind(AssertUnwindSafe(self.invoke)) {
            Ok(()) => true,
            Err(payload) => {
                tracing::error!(
                    target: targets::CONTEXT,
                    invocation_id = id.as_u64(),
                    panic = %panic_message(payload.as_ref()),
                    "queued invocation panicked"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedInvocation")
            .field("id", &self.id)
            .finish()
    }
}

/// Extract a printable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_execute_runs_closure() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert!(invocation.execute());
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = QueuedInvocation::new(|| {});
        let b = QueuedInvocation::new(|| {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_panicking_invocation_reports_failure() {
        let invocation = QueuedInvocation::new(|| panic!("boom"));
        assert!(!invocation.execute());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
