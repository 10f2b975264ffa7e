//! Adapter for `annex-dom` nodes.
//!
//! ## Feature
//!
//! Enable with `dom` (on by default).
//!
//! ## Notes
//!
//! `Node` has inherent methods named like the trait methods below, so the
//! impls call them through the type path.

use std::rc::{Rc, Weak};

use annex_dom::{AddEventListenerOptions, DomEvent, Event, ListenerId, Node, NodeId};
use serde_json::Value;
use tracing::trace;

use crate::platform::{
    CanDispatch, EventInit, ListenerCapabilities, ListenerTarget, Matchable, NativeEvent,
    NativeListener, NativeListenerOptions,
};

impl NativeEvent<Rc<Node>> for DomEvent {
    fn event_type(&self) -> &str {
        &self.event().event_type
    }

    fn origin(&self) -> Option<Rc<Node>> {
        self.event().target()
    }

    /// Builds a custom event; a missing payload becomes `null`.
    fn from_init(init: EventInit) -> Self {
        let mut event = Event::new(
            &init.event_type,
            init.options.bubbles,
            init.options.cancelable,
        );
        event.composed = init.options.composed;
        DomEvent::Custom(event, init.detail.unwrap_or(Value::Null))
    }
}

fn listener_options(options: NativeListenerOptions) -> AddEventListenerOptions {
    match options {
        NativeListenerOptions::Capture(capture) => AddEventListenerOptions::capture(capture),
        NativeListenerOptions::Options(options) => AddEventListenerOptions {
            capture: options.capture,
            once: options.once,
            passive: options.passive,
        },
    }
}

impl ListenerTarget for Rc<Node> {
    type Id = NodeId;
    type Weak = Weak<Node>;
    type ListenerId = ListenerId;
    type Event = DomEvent;

    fn target_id(&self) -> NodeId {
        self.id
    }

    fn downgrade(&self) -> Weak<Node> {
        Rc::downgrade(self)
    }

    fn upgrade(weak: &Weak<Node>) -> Option<Self> {
        weak.upgrade()
    }

    fn accepts_listeners(&self) -> bool {
        Node::accepts_listeners(self)
    }

    fn add_listener(
        &self,
        event_type: &str,
        listener: NativeListener<DomEvent>,
        options: NativeListenerOptions,
    ) -> ListenerId {
        self.event_target
            .add_event_listener(event_type, listener, listener_options(options))
    }

    fn remove_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.event_target.remove_event_listener(event_type, id)
    }

    /// `annex-dom` honours capture, once and passive but has no abort signals.
    fn probe_listener_capabilities() -> ListenerCapabilities {
        ListenerCapabilities::CAPTURE | ListenerCapabilities::ONCE | ListenerCapabilities::PASSIVE
    }
}

impl CanDispatch for Rc<Node> {
    fn dispatch_event(&self, event: DomEvent) -> bool {
        Node::dispatch_event(self, &event)
    }
}

impl Matchable for Rc<Node> {
    fn matches(&self, selector: &str) -> bool {
        Node::matches(self, selector)
    }

    fn query_selector_all(&self, selector: &str) -> Vec<Self> {
        Node::query_selector_all(self, selector).unwrap_or_else(|err| {
            trace!(%err, selector, "selector query failed");
            Vec::new()
        })
    }

    fn parent_target(&self) -> Option<Self> {
        Node::parent(self)
    }

    fn is_connected(&self) -> bool {
        Node::is_connected(self)
    }
}
