//! Request accessories.
//!
//! An [`Accessory`] observes the three transport lifecycle points of a
//! request: `will_start`, `will_stop` and `did_stop`. Every hook is optional.
//! Hooks always run on the request's execution context, in registration order.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use horizon_request_core::invocation::panic_message;
use horizon_request_core::logging::targets;

use crate::request::Request;

/// A lifecycle hook.
pub type AccessoryHook = Arc<dyn Fn(&Request) + Send + Sync>;

/// The lifecycle point an accessory hook is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessoryPoint {
    /// Before the first transport call.
    WillStart,
    /// Before completion observers run.
    WillStop,
    /// After completion observers ran.
    DidStop,
}

impl fmt::Display for AccessoryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WillStart => write!(f, "will_start"),
            Self::WillStop => write!(f, "will_stop"),
            Self::DidStop => write!(f, "did_stop"),
        }
    }
}

/// An observer of a request's transport lifecycle.
///
/// ```
/// use horizon_request::Accessory;
///
/// let spinner = Accessory::named("spinner")
///     .on_will_start(|request| println!("request {} started", request.id()))
///     .on_did_stop(|_| println!("hide spinner"));
/// assert_eq!(spinner.name(), Some("spinner"));
/// ```
#[derive(Clone, Default)]
pub struct Accessory {
    name: Option<String>,
    will_start: Option<AccessoryHook>,
    will_stop: Option<AccessoryHook>,
    did_stop: Option<AccessoryHook>,
}

impl Accessory {
    /// An accessory with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// An accessory with a name used in logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The accessory's name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the `will_start` hook.
    pub fn on_will_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.will_start = Some(Arc::new(hook));
        self
    }

    /// Set the `will_stop` hook.
    pub fn on_will_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.will_stop = Some(Arc::new(hook));
        self
    }

    /// Set the `did_stop` hook.
    pub fn on_did_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.did_stop = Some(Arc::new(hook));
        self
    }

    fn hook(&self, point: AccessoryPoint) -> Option<&AccessoryHook> {
        match point {
            AccessoryPoint::WillStart => self.will_start.as_ref(),
            AccessoryPoint::WillStop => self.will_stop.as_ref(),
            AccessoryPoint::DidStop => self.did_stop.as_ref(),
        }
    }
}

impl fmt::Debug for Accessory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessory")
            .field("name", &self.name)
            .field("will_start", &self.will_start.is_some())
            .field("will_stop", &self.will_stop.is_some())
            .field("did_stop", &self.did_stop.is_some())
            .finish()
    }
}

/// Accessories of one request, in registration order.
#[derive(Clone, Debug, Default)]
pub struct AccessoryChain {
    accessories: Vec<Accessory>,
}

impl AccessoryChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accessory.
    pub fn push(&mut self, accessory: Accessory) {
        self.accessories.push(accessory);
    }

    /// Number of registered accessories.
    pub fn len(&self) -> usize {
        self.accessories.len()
    }

    /// Whether no accessory is registered.
    pub fn is_empty(&self) -> bool {
        self.accessories.is_empty()
    }

    /// Run every hook registered for `point`.
    ///
    /// A panicking hook is logged and skipped.
    pub fn fire(&self, point: AccessoryPoint, request: &Request) {
        for (index, accessory) in self.accessories.iter().enumerate() {
            let Some(hook) = accessory.hook(point) else {
                continue;
            };
            tracing::trace!(
                target: targets::ACCESSORY,
                request_id = request.id().as_u64(),
                accessory = accessory.name().unwrap_or("<unnamed>"),
                %point,
                "firing accessory hook"
            );
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(request))) {
                tracing::warn!(
                    target: targets::ACCESSORY,
                    request_id = request.id().as_u64(),
                    index,
                    accessory = accessory.name().unwrap_or("<unnamed>"),
                    %point,
                    panic = %panic_message(payload.as_ref()),
                    "accessory hook panicked"
                );
            }
        }
    }
}

impl FromIterator<Accessory> for AccessoryChain {
    fn from_iter<I: IntoIterator<Item = Accessory>>(iter: I) -> Self {
        Self {
            accessories: iter.into_iter().collect(),
        }
    }
}
