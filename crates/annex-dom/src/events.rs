//! # DOM Events
//!
//! Events, per-node listener storage and three-phase dispatch.
//!
//! Listeners run from a snapshot of the list, so a listener may add or
//! remove listeners (itself included) while an event is in flight.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::trace;

use crate::Node;

/// Where an event currently is on its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventPhase {
    /// Not being dispatched.
    None = 0,
    /// Root towards the target's parent.
    Capturing = 1,
    AtTarget = 2,
    /// Target's parent back towards the root.
    Bubbling = 3,
}

/// State shared by every event variant.
///
/// Dispatch state lives in cells so listeners can stop propagation or
/// prevent the default through a shared reference.
#[derive(Debug, Clone)]
pub struct Event {
    /// Raw event name, e.g. `"click"`.
    pub event_type: String,
    pub bubbles: bool,
    pub cancelable: bool,
    /// Carried for callers that build shadow-aware events; dispatch ignores it.
    pub composed: bool,
    phase: Cell<EventPhase>,
    /// The node the event was dispatched on.
    target: RefCell<Option<Rc<Node>>>,
    /// The node whose listeners are currently running.
    current_target: RefCell<Option<Rc<Node>>>,
    propagation_stopped: Cell<bool>,
    immediate_propagation_stopped: Cell<bool>,
    default_prevented: Cell<bool>,
    in_passive_listener: Cell<bool>,
}

impl Event {
    pub fn new(event_type: &str, bubbles: bool, cancelable: bool) -> Self {
        Self {
            event_type: event_type.to_string(),
            bubbles,
            cancelable,
            composed: false,
            phase: Cell::new(EventPhase::None),
            target: RefCell::new(None),
            current_target: RefCell::new(None),
            propagation_stopped: Cell::new(false),
            immediate_propagation_stopped: Cell::new(false),
            default_prevented: Cell::new(false),
            in_passive_listener: Cell::new(false),
        }
    }

    /// Phase of the dispatch in progress.
    pub fn phase(&self) -> EventPhase {
        self.phase.get()
    }

    /// The node the event was dispatched on.
    pub fn target(&self) -> Option<Rc<Node>> {
        self.target.borrow().clone()
    }

    /// The node whose listeners are currently running.
    pub fn current_target(&self) -> Option<Rc<Node>> {
        self.current_target.borrow().clone()
    }

    /// Skip the nodes after the current one.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Also skip the remaining listeners on the current node.
    pub fn stop_immediate_propagation(&self) {
        self.propagation_stopped.set(true);
        self.immediate_propagation_stopped.set(true);
    }

    /// Prevent the default action. Ignored inside passive listeners.
    pub fn prevent_default(&self) {
        if self.cancelable && !self.in_passive_listener.get() {
            self.default_prevented.set(true);
        }
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    pub fn immediate_propagation_stopped(&self) -> bool {
        self.immediate_propagation_stopped.get()
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub(crate) fn set_phase(&self, phase: EventPhase) {
        self.phase.set(phase);
    }

    pub(crate) fn set_target(&self, target: Option<Rc<Node>>) {
        *self.target.borrow_mut() = target;
    }

    pub(crate) fn set_current_target(&self, target: Option<Rc<Node>>) {
        *self.current_target.borrow_mut() = target;
    }
}

/// Pointer position and modifiers of a mouse event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MouseEventData {
    pub client_x: f64,
    pub client_y: f64,
    /// 0 is the primary button.
    pub button: i16,
    pub ctrl_key: bool,
    pub shift_key: bool,
}

/// An event together with its variant-specific payload.
#[derive(Debug, Clone)]
pub enum DomEvent {
    /// Generic event.
    Generic(Event),
    /// Mouse event.
    Mouse(Event, MouseEventData),
    /// Application event carrying a JSON `detail` payload.
    Custom(Event, Value),
}

impl DomEvent {
    /// The shared part of every variant.
    pub fn event(&self) -> &Event {
        match self {
            DomEvent::Generic(e) => e,
            DomEvent::Mouse(e, _) => e,
            DomEvent::Custom(e, _) => e,
        }
    }

    /// The custom payload, if this is a custom event.
    pub fn detail(&self) -> Option<&Value> {
        match self {
            DomEvent::Custom(_, detail) => Some(detail),
            _ => None,
        }
    }

    /// Create a generic event.
    pub fn generic(event_type: &str, bubbles: bool, cancelable: bool) -> Self {
        DomEvent::Generic(Event::new(event_type, bubbles, cancelable))
    }

    pub fn mouse(event_type: &str, bubbles: bool, data: MouseEventData) -> Self {
        let event = Event::new(event_type, bubbles, true);
        DomEvent::Mouse(event, data)
    }

    /// Create an untrusted custom event.
    pub fn custom(event_type: &str, bubbles: bool, cancelable: bool, detail: Value) -> Self {
        DomEvent::Custom(Event::new(event_type, bubbles, cancelable), detail)
    }
}

/// Flags given to [`EventTarget::add_event_listener`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddEventListenerOptions {
    /// Run during capture instead of bubble.
    pub capture: bool,
    /// If true, the listener is automatically removed before its first invocation.
    pub once: bool,
    /// If true, `prevent_default` is ignored while the listener runs.
    pub passive: bool,
}

impl AddEventListenerOptions {
    /// Options that only set the capture flag.
    pub fn capture(capture: bool) -> Self {
        Self {
            capture,
            ..Default::default()
        }
    }
}

pub type EventListenerCallback = Rc<dyn Fn(&DomEvent) + 'static>;

/// Handle returned by [`EventTarget::add_event_listener`] for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct EventListener {
    id: ListenerId,
    callback: EventListenerCallback,
    options: AddEventListenerOptions,
    removed: Cell<bool>,
}

/// Listener storage of one node.
#[derive(Default)]
pub struct EventTarget {
    listeners: RefCell<HashMap<String, Vec<Rc<EventListener>>>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; returns the handle needed to remove it.
    pub fn add_event_listener(
        &self,
        event_type: &str,
        callback: EventListenerCallback,
        options: AddEventListenerOptions,
    ) -> ListenerId {
        let id = ListenerId::next();
        let mut listeners = self.listeners.borrow_mut();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Rc::new(EventListener {
                id,
                callback,
                options,
                removed: Cell::new(false),
            }));
        trace!(event_type, ?id, ?options, "listener added");
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    ///
    /// A listener removed while a dispatch is in flight does not run for
    /// the remainder of that dispatch.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(event_type) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| l.id == id) else {
            return false;
        };
        let listener = list.remove(index);
        listener.removed.set(true);
        if list.is_empty() {
            listeners.remove(event_type);
        }
        trace!(event_type, ?id, "listener removed");
        true
    }

    pub fn has_listeners(&self, event_type: &str) -> bool {
        self.listener_count(event_type) > 0
    }

    /// Number of listeners registered for an event type.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .borrow()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of listeners across all event types.
    pub fn total_listener_count(&self) -> usize {
        self.listeners.borrow().values().map(Vec::len).sum()
    }

    /// Invoke listeners for an event in the given phase.
    ///
    /// The listener list is snapshotted first, so callbacks may add or remove
    /// listeners on this target.
    pub fn invoke_listeners(&self, event: &DomEvent, phase: EventPhase) {
        let base = event.event();
        let snapshot: Vec<Rc<EventListener>> = match self.listeners.borrow().get(&base.event_type) {
            Some(list) => list.clone(),
            None => return,
        };

        for listener in snapshot {
            if listener.removed.get() {
                continue;
            }
            let should_fire = match phase {
                EventPhase::Capturing => listener.options.capture,
                EventPhase::AtTarget => true,
                EventPhase::Bubbling => !listener.options.capture,
                EventPhase::None => false,
            };
            if !should_fire {
                continue;
            }

            if listener.options.once {
                self.remove_event_listener(&base.event_type, listener.id);
            }

            base.in_passive_listener.set(listener.options.passive);
            (listener.callback)(event);
            base.in_passive_listener.set(false);

            if base.immediate_propagation_stopped() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("listener_count", &self.total_listener_count())
            .finish()
    }
}

/// Capture, target and bubble propagation over a node's ancestors.
pub struct EventDispatcher;

impl EventDispatcher {
    /// Dispatch an event to a target node, walking its current ancestor chain.
    /// Returns true if the event was not prevented.
    pub fn dispatch(event: &DomEvent, target: &Rc<Node>) -> bool {
        let base = event.event();
        base.set_target(Some(target.clone()));

        // Root to parent.
        let mut path = target.ancestors();
        path.reverse();

        trace!(
            event_type = %base.event_type,
            node = ?target.id,
            depth = path.len(),
            "dispatching event"
        );

        base.set_phase(EventPhase::Capturing);
        for node in &path {
            if base.propagation_stopped() {
                break;
            }
            base.set_current_target(Some(node.clone()));
            node.event_target
                .invoke_listeners(event, EventPhase::Capturing);
        }

        if !base.propagation_stopped() {
            base.set_phase(EventPhase::AtTarget);
            base.set_current_target(Some(target.clone()));
            target
                .event_target
                .invoke_listeners(event, EventPhase::AtTarget);
        }

        if base.bubbles && !base.propagation_stopped() {
            base.set_phase(EventPhase::Bubbling);
            for node in path.iter().rev() {
                if base.propagation_stopped() {
                    break;
                }
                base.set_current_target(Some(node.clone()));
                node.event_target
                    .invoke_listeners(event, EventPhase::Bubbling);
            }
        }

        base.set_phase(EventPhase::None);
        base.set_current_target(None);

        !base.default_prevented()
    }
}
