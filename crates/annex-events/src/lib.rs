//! # Annex Events
//!
//! Event delegation and namespacing over a DOM-like platform.
//!
//! Handlers are registered per target under `event.namespace` specifiers and
//! can be removed, paused or invoked in bulk by namespace, by event, or by
//! delegation selector. Each target gets at most one native listener per
//! event name and listener flags, however many handlers share it.
//!
//! ## Design Goals
//!
//! 1. **Explicit registry**: an [`EventBus`] is an ordinary value; independent
//!    buses never share state
//! 2. **Platform traits**: the bus talks to nodes only through
//!    [`ListenerTarget`], [`CanDispatch`] and [`Matchable`]
//! 3. **Validate, then act**: argument errors leave the registry untouched
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use annex_dom::Node;
//! use annex_events::{EventBus, Handler, ListenOptions};
//!
//! let list = Node::element("ul", &[]);
//! let bus: EventBus<Rc<Node>> = EventBus::new();
//! let handler = Handler::<Rc<Node>>::new(|event| println!("{} fired", event.event_type()));
//!
//! bus.on((&list, "li"), "click.menu", handler, ListenOptions::default())
//!     .unwrap();
//! assert_eq!(bus.fire(&list, ".menu", None).unwrap(), 1);
//! assert_eq!(bus.off(&list, "*.menu", None).unwrap(), 1);
//! assert!(!bus.is_registered(&list));
//! ```

mod action;
pub mod adapters;
mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod params;
pub mod platform;
mod registry;
pub mod specifier;

pub use bus::{EventBus, Remover};
pub use config::BusConfig;
pub use error::{EventError, EventResult};
pub use handler::{EventRef, Handler, HandlerEvent, SyntheticEvent, SyntheticTarget};
pub use params::{
    prepare_base_params, resolve_target_info, BaseParams, Events, TargetInfo, TargetItem,
    Targets,
};
pub use platform::{
    filter_listener_options, CanDispatch, EventConstructor, EventInit, EventInitOptions,
    ListenOptions, ListenerCapabilities, ListenerTarget, Matchable, NativeEvent, NativeListener,
    NativeListenerOptions, Target,
};
pub use registry::{HandlerScopeSnapshot, HandlerSnapshot, RegistrySnapshot, TargetSnapshot};
pub use specifier::{parse_specifier, sanitize_specifiers, EventSpecifier, DEFAULT_NAMESPACE};
