//! Handler decorators.
//!
//! A managed handler's action is a fixed chain:
//! [`PauseGuard`] → [`DelegationFilter`] → [`SelfRemoval`] → [`Invoke`].
//! Delegation and self-removal are present only when the registration asks
//! for them. Each layer returns whether the user handler ran.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::bus::BusInner;
use crate::handler::{EventRef, Handler, HandlerEvent};
use crate::platform::{NativeEvent, Target};
use crate::registry::RegistrationPath;

/// Per-call context threaded through the chain.
pub(crate) struct Invocation<'a, T: Target> {
    pub event: EventRef<'a, T>,
    pub current_target: &'a T,
    pub delegate_target: Option<T>,
    pub namespace: &'a str,
}

pub(crate) trait Action<T: Target> {
    fn run(&self, invocation: &Invocation<'_, T>) -> bool;

    /// Layer names, outermost first.
    #[cfg(test)]
    fn layers(&self, out: &mut Vec<&'static str>);
}

pub(crate) struct Invoke<T: Target> {
    handler: Handler<T>,
}

impl<T: Target> Invoke<T> {
    pub fn new(handler: Handler<T>) -> Self {
        Self { handler }
    }
}

impl<T: Target> Action<T> for Invoke<T> {
    fn run(&self, invocation: &Invocation<'_, T>) -> bool {
        self.handler.call(&HandlerEvent {
            event: invocation.event,
            current_target: invocation.current_target.clone(),
            delegate_target: invocation.delegate_target.clone(),
            namespace: invocation.namespace,
        });
        true
    }

    #[cfg(test)]
    fn layers(&self, out: &mut Vec<&'static str>) {
        out.push("invoke");
    }
}

/// Removes its own registration before running the rest of the chain, so a
/// re-entrant dispatch from inside the handler cannot invoke it again.
pub(crate) struct SelfRemoval<T: Target> {
    bus: Weak<BusInner<T>>,
    path: RegistrationPath<T::Id>,
    inner: Box<dyn Action<T>>,
}

impl<T: Target> SelfRemoval<T> {
    pub fn new(bus: Weak<BusInner<T>>, path: RegistrationPath<T::Id>, inner: Box<dyn Action<T>>) -> Self {
        Self { bus, path, inner }
    }
}

impl<T: Target> Action<T> for SelfRemoval<T> {
    fn run(&self, invocation: &Invocation<'_, T>) -> bool {
        if let Some(bus) = self.bus.upgrade() {
            if let Err(err) = bus.remove_registration(&self.path) {
                warn!(%err, path = ?self.path, "once handler could not remove itself");
            }
        }
        self.inner.run(invocation)
    }

    #[cfg(test)]
    fn layers(&self, out: &mut Vec<&'static str>) {
        out.push("once");
        self.inner.layers(out);
    }
}

/// Runs the rest of the chain only when the event originated below the
/// registration's ancestor at a node matching the selector.
///
/// Synthetic events from `fire` were already scoped to the delegation when
/// they were looked up, so they pass straight through.
pub(crate) struct DelegationFilter<T: Target> {
    selector: String,
    inner: Box<dyn Action<T>>,
}

impl<T: Target> DelegationFilter<T> {
    pub fn new(selector: impl Into<String>, inner: Box<dyn Action<T>>) -> Self {
        Self {
            selector: selector.into(),
            inner,
        }
    }

    /// The closest node between the origin and the ancestor (exclusive) matching the selector.
    fn delegate_for(&self, origin: T, ancestor: &T) -> Option<T> {
        let ancestor_id = ancestor.target_id();
        let mut node = Some(origin);
        while let Some(current) = node {
            if current.target_id() == ancestor_id {
                return None;
            }
            if current.matches(&self.selector) {
                return Some(current);
            }
            node = current.parent_target();
        }
        None
    }
}

impl<T: Target> Action<T> for DelegationFilter<T> {
    fn run(&self, invocation: &Invocation<'_, T>) -> bool {
        let EventRef::Native(event) = invocation.event else {
            return self.inner.run(invocation);
        };
        let Some(origin) = event.origin() else {
            return false;
        };
        match self.delegate_for(origin, invocation.current_target) {
            Some(delegate) => self.inner.run(&Invocation {
                event: invocation.event,
                current_target: invocation.current_target,
                delegate_target: Some(delegate),
                namespace: invocation.namespace,
            }),
            None => {
                trace!(selector = %self.selector, "delegated handler skipped: no match");
                false
            }
        }
    }

    #[cfg(test)]
    fn layers(&self, out: &mut Vec<&'static str>) {
        out.push("delegate");
        self.inner.layers(out);
    }
}

/// Skips the whole chain while the shared pause flag is set.
pub(crate) struct PauseGuard<T: Target> {
    paused: Rc<Cell<bool>>,
    inner: Box<dyn Action<T>>,
}

impl<T: Target> PauseGuard<T> {
    pub fn new(paused: Rc<Cell<bool>>, inner: Box<dyn Action<T>>) -> Self {
        Self { paused, inner }
    }
}

impl<T: Target> Action<T> for PauseGuard<T> {
    fn run(&self, invocation: &Invocation<'_, T>) -> bool {
        if self.paused.get() {
            trace!(namespace = invocation.namespace, "paused handler skipped");
            return false;
        }
        self.inner.run(invocation)
    }

    #[cfg(test)]
    fn layers(&self, out: &mut Vec<&'static str>) {
        out.push("pause");
        self.inner.layers(out);
    }
}

/// Compose the chain for one registration.
pub(crate) fn compose<T: Target>(
    handler: Handler<T>,
    paused: Rc<Cell<bool>>,
    selector: Option<&str>,
    once: Option<(Weak<BusInner<T>>, RegistrationPath<T::Id>)>,
) -> Box<dyn Action<T>> {
    let mut action: Box<dyn Action<T>> = Box::new(Invoke::new(handler));
    if let Some((bus, path)) = once {
        action = Box::new(SelfRemoval::new(bus, path, action));
    }
    if let Some(selector) = selector {
        action = Box::new(DelegationFilter::new(selector, action));
    }
    Box::new(PauseGuard::new(paused, action))
}
