//! User handlers and the event view they receive.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::platform::{ListenerTarget, NativeEvent};

/// Where a synthetic event was aimed.
#[derive(Debug, Clone)]
pub enum SyntheticTarget<T> {
    /// A plain target.
    Single(T),
    /// A delegation pair: the ancestor holding the registration and its selector.
    Delegated { ancestor: T, selector: String },
}

impl<T: Clone> SyntheticTarget<T> {
    /// The target holding the registration.
    pub fn target(&self) -> &T {
        match self {
            SyntheticTarget::Single(t) => t,
            SyntheticTarget::Delegated { ancestor, .. } => ancestor,
        }
    }

    /// The `(target, selector)` pair as it appeared in the target list.
    pub fn elements(&self) -> (T, Option<&str>) {
        match self {
            SyntheticTarget::Single(t) => (t.clone(), None),
            SyntheticTarget::Delegated { ancestor, selector } => {
                (ancestor.clone(), Some(selector.as_str()))
            }
        }
    }
}

/// Event built by [`EventBus::fire`](crate::EventBus::fire). Never touches
/// platform dispatch, so it neither bubbles nor can be canceled.
#[derive(Debug, Clone)]
pub struct SyntheticEvent<T> {
    pub event_type: String,
    pub namespace: String,
    pub detail: Option<Value>,
    pub bubbles: bool,
    pub cancelable: bool,
    pub synthetic_target: SyntheticTarget<T>,
}

impl<T> SyntheticEvent<T> {
    pub(crate) fn new(
        event_type: &str,
        namespace: &str,
        detail: Option<Value>,
        synthetic_target: SyntheticTarget<T>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            namespace: namespace.to_string(),
            detail,
            bubbles: false,
            cancelable: false,
            synthetic_target,
        }
    }
}

/// The event a handler was invoked with.
pub enum EventRef<'a, T: ListenerTarget> {
    /// Delivered by platform dispatch.
    Native(&'a T::Event),
    /// Delivered by `fire`.
    Synthetic(&'a SyntheticEvent<T>),
}

impl<T: ListenerTarget> Clone for EventRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ListenerTarget> Copy for EventRef<'_, T> {}

/// What a handler sees when it runs.
pub struct HandlerEvent<'a, T: ListenerTarget> {
    pub event: EventRef<'a, T>,
    /// The target holding the registration (the ancestor for delegated handlers).
    pub current_target: T,
    /// For delegated handlers under native dispatch: the node that matched the selector.
    pub delegate_target: Option<T>,
    /// Namespace the handler was registered under.
    pub namespace: &'a str,
}

impl<T: ListenerTarget> HandlerEvent<'_, T> {
    pub fn event_type(&self) -> &str {
        match self.event {
            EventRef::Native(e) => e.event_type(),
            EventRef::Synthetic(e) => &e.event_type,
        }
    }

    /// Payload of a synthetic event. Native payloads live on the platform event.
    pub fn detail(&self) -> Option<&Value> {
        match self.event {
            EventRef::Native(_) => None,
            EventRef::Synthetic(e) => e.detail.as_ref(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.event, EventRef::Synthetic(_))
    }

    /// The platform event, when delivered by native dispatch.
    pub fn native(&self) -> Option<&T::Event> {
        match self.event {
            EventRef::Native(e) => Some(e),
            EventRef::Synthetic(_) => None,
        }
    }

    /// The node the event originated from.
    pub fn origin(&self) -> Option<T> {
        match self.event {
            EventRef::Native(e) => e.origin(),
            EventRef::Synthetic(e) => Some(e.synthetic_target.target().clone()),
        }
    }
}

/// A user callback. Identity (for `off`, `pause`, `resume`) is pointer identity,
/// so keep a clone of the handler you registered to address it later.
pub struct Handler<T: ListenerTarget>(Rc<dyn Fn(&HandlerEvent<'_, T>)>);

impl<T: ListenerTarget> Handler<T> {
    pub fn new(f: impl Fn(&HandlerEvent<'_, T>) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, event: &HandlerEvent<'_, T>) {
        (self.0)(event)
    }

    /// Whether both handles refer to the same callback.
    pub fn same_as(&self, other: &Handler<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ListenerTarget> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ListenerTarget> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}
