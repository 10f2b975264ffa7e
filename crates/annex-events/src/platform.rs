//! Platform capability traits.
//!
//! The bus never talks to a concrete DOM. It needs three capabilities from
//! whatever node type it is given:
//!
//! - [`ListenerTarget`]: identity, weak handles, and native listener attach/detach
//! - [`CanDispatch`]: native event dispatch
//! - [`Matchable`]: selector matching and tree queries for delegation
//!
//! [`Target`] is the union of all three and is what [`EventBus`](crate::EventBus)
//! is generic over.

use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;

bitflags! {
    /// Listener options the platform honours when passed in an options object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ListenerCapabilities: u8 {
        const CAPTURE = 1 << 0;
        const ONCE = 1 << 1;
        const PASSIVE = 1 << 2;
        const SIGNAL = 1 << 3;
    }
}

/// Options a caller may request when registering a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenOptions {
    /// Listen during the capture phase.
    pub capture: bool,
    /// Remove the handler after its first invocation.
    pub once: bool,
    /// The handler never prevents the default action.
    pub passive: bool,
}

impl ListenOptions {
    /// Options requesting capture-phase delivery.
    pub fn capture() -> Self {
        Self {
            capture: true,
            ..Default::default()
        }
    }

    /// Options requesting self-removal after the first invocation.
    pub fn once() -> Self {
        Self {
            once: true,
            ..Default::default()
        }
    }
}

/// Options actually handed to the platform when attaching a native listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeListenerOptions {
    /// Legacy boolean form: only the capture flag.
    Capture(bool),
    /// Options object restricted to the supported flags.
    Options(ListenOptions),
}

/// Restrict `options` to what the platform supports.
///
/// A platform without options-object support only understands the boolean
/// capture argument, so everything but `capture` is dropped.
pub fn filter_listener_options(
    options: ListenOptions,
    capabilities: ListenerCapabilities,
) -> NativeListenerOptions {
    if capabilities.is_empty() {
        return NativeListenerOptions::Capture(options.capture);
    }
    NativeListenerOptions::Options(ListenOptions {
        capture: options.capture && capabilities.contains(ListenerCapabilities::CAPTURE),
        once: options.once && capabilities.contains(ListenerCapabilities::ONCE),
        passive: options.passive && capabilities.contains(ListenerCapabilities::PASSIVE),
    })
}

/// Flags for events built by [`EventBus::emit`](crate::EventBus::emit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventInitOptions {
    pub bubbles: bool,
    pub cancelable: bool,
    pub composed: bool,
}

impl Default for EventInitOptions {
    fn default() -> Self {
        Self {
            bubbles: true,
            cancelable: true,
            composed: false,
        }
    }
}

/// Everything needed to construct a platform event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventInit {
    /// Raw event name, without namespace.
    pub event_type: String,
    /// Namespace given in the specifier, if any.
    pub namespace: Option<String>,
    /// Payload, surfaced as the event's `detail`.
    pub detail: Option<Value>,
    pub options: EventInitOptions,
}

/// Custom event constructor accepted by `emit`.
pub type EventConstructor<E> = dyn Fn(EventInit) -> E;

/// A native listener as attached to a platform target.
pub type NativeListener<E> = Rc<dyn Fn(&E)>;

/// The platform's event type.
pub trait NativeEvent<T>: Sized {
    /// The raw event name.
    fn event_type(&self) -> &str;

    /// The node the platform dispatched this event on.
    fn origin(&self) -> Option<T>;

    /// Default constructor, used by `emit` when no custom constructor is given.
    fn from_init(init: EventInit) -> Self;
}

/// Identity plus native listener attach/detach.
pub trait ListenerTarget: Clone + 'static {
    /// Stable identity used as the registry key.
    type Id: Copy + Eq + Hash + Ord + Debug;
    /// Non-owning handle; the registry never extends a target's lifetime.
    type Weak: Clone + 'static;
    /// Handle for detaching a listener.
    type ListenerId: Copy + Eq + Debug;
    /// The platform event type.
    type Event: NativeEvent<Self>;

    fn target_id(&self) -> Self::Id;

    fn downgrade(&self) -> Self::Weak;

    fn upgrade(weak: &Self::Weak) -> Option<Self>;

    /// Whether this node can host listeners at all.
    fn accepts_listeners(&self) -> bool {
        true
    }

    fn add_listener(
        &self,
        event_type: &str,
        listener: NativeListener<Self::Event>,
        options: NativeListenerOptions,
    ) -> Self::ListenerId;

    /// Returns false if the listener was not attached.
    fn remove_listener(&self, event_type: &str, id: Self::ListenerId) -> bool;

    /// Which listener options the platform honours. Queried once per bus.
    fn probe_listener_capabilities() -> ListenerCapabilities {
        ListenerCapabilities::all()
    }
}

/// Native event dispatch.
pub trait CanDispatch: ListenerTarget {
    /// Dispatch through the platform. Returns false if the default was prevented.
    fn dispatch_event(&self, event: Self::Event) -> bool;
}

/// Selector matching and tree queries.
pub trait Matchable: ListenerTarget {
    fn matches(&self, selector: &str) -> bool;

    /// Descendants matching `selector`, in document order.
    fn query_selector_all(&self, selector: &str) -> Vec<Self>;

    fn parent_target(&self) -> Option<Self>;

    /// Whether the node is attached to a live document.
    fn is_connected(&self) -> bool;
}

/// Everything the bus needs from a node.
pub trait Target: CanDispatch + Matchable {}

impl<T: CanDispatch + Matchable> Target for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_keeps_supported_flags() {
        let requested = ListenOptions {
            capture: true,
            once: true,
            passive: true,
        };
        let caps = ListenerCapabilities::CAPTURE | ListenerCapabilities::PASSIVE;
        assert_eq!(
            filter_listener_options(requested, caps),
            NativeListenerOptions::Options(ListenOptions {
                capture: true,
                once: false,
                passive: true,
            })
        );
    }

    #[test]
    fn test_filter_degrades_to_boolean_capture() {
        let none = ListenerCapabilities::empty();
        assert_eq!(
            filter_listener_options(ListenOptions::capture(), none),
            NativeListenerOptions::Capture(true)
        );
        assert_eq!(
            filter_listener_options(ListenOptions::once(), none),
            NativeListenerOptions::Capture(false)
        );
    }

    #[test]
    fn test_capabilities_serde() {
        let caps = ListenerCapabilities::CAPTURE | ListenerCapabilities::ONCE;
        let json = serde_json::to_string(&caps).unwrap();
        let back: ListenerCapabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(back, caps);
    }

    #[test]
    fn test_event_init_defaults() {
        let opts = EventInitOptions::default();
        assert!(opts.bubbles);
        assert!(opts.cancelable);
        assert!(!opts.composed);
    }
}
