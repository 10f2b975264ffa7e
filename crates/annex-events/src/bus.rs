//! The event bus.
//!
//! [`EventBus`] owns one [`EventMap`] and the native listeners serving it.
//! For every `(target, event name, listener flags)` that has at least one
//! handler, exactly one shared listener is attached to the platform. It looks
//! the handlers up at dispatch time, so handlers added or removed on the same
//! target and event never touch the platform again.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::action::{compose, Invocation};
use crate::config::BusConfig;
use crate::error::{EventError, EventResult};
use crate::handler::{EventRef, Handler, SyntheticEvent, SyntheticTarget};
use crate::params::{prepare_base_params, registration_sites, Events, Site, TargetItem, Targets};
use crate::platform::{
    filter_listener_options, EventConstructor, EventInit, EventInitOptions, ListenOptions,
    ListenerCapabilities, ListenerTarget, NativeEvent, NativeListener, Target,
};
use crate::registry::{
    EventMap, ListenerFlags, ManagedHandler, RegistrationPath, RegistrySnapshot, SelectorFilter,
};
use crate::specifier::{parse_specifier, EventSpecifier};

/// Identifies one shared native listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey<Id> {
    target: Id,
    event_type: String,
    flags: ListenerFlags,
}

struct Binding<T: ListenerTarget> {
    target: T::Weak,
    listener_id: T::ListenerId,
}

pub(crate) struct BusInner<T: Target> {
    map: RefCell<EventMap<T>>,
    bindings: RefCell<HashMap<BindingKey<T::Id>, Binding<T>>>,
    capabilities: ListenerCapabilities,
    config: BusConfig,
    next_handler_id: Cell<u64>,
}

impl<T: Target> BusInner<T> {
    fn next_handler_id(&self) -> u64 {
        let id = self.next_handler_id.get();
        self.next_handler_id.set(id + 1);
        id
    }

    /// Remove exactly one registration, then collect whatever it leaves empty.
    pub(crate) fn remove_registration(&self, path: &RegistrationPath<T::Id>) -> EventResult<()> {
        let managed = self.map.borrow_mut().remove(path)?;
        trace!(handler = managed.id(), event = %path.event, namespace = %path.namespace, "registration removed");
        self.release(&[managed]);
        Ok(())
    }

    /// Flag handlers that left the map and clean up their targets.
    fn release(&self, removed: &[Rc<ManagedHandler<T>>]) {
        for managed in removed {
            managed.removed.set(true);
        }
        let affected: BTreeSet<T::Id> = removed.iter().map(|m| m.path.target).collect();
        if !affected.is_empty() {
            self.collect(Some(&affected));
        }
    }

    fn collect(&self, targets: Option<&BTreeSet<T::Id>>) {
        let orphaned = self
            .map
            .borrow_mut()
            .clean_up(targets, self.config.prune_dead_targets);
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "dropped handlers of targets that no longer exist");
        }
        for managed in &orphaned {
            managed.removed.set(true);
        }
        self.sync_bindings(targets);
    }

    /// Detach shared listeners no handler needs anymore.
    fn sync_bindings(&self, targets: Option<&BTreeSet<T::Id>>) {
        let stale: Vec<BindingKey<T::Id>> = {
            let map = self.map.borrow();
            self.bindings
                .borrow()
                .keys()
                .filter(|key| targets.map_or(true, |ids| ids.contains(&key.target)))
                .filter(|key| !map.needs_listener(key.target, &key.event_type, key.flags))
                .cloned()
                .collect()
        };

        for key in stale {
            let binding = self.bindings.borrow_mut().remove(&key);
            let Some(binding) = binding else {
                continue;
            };
            match T::upgrade(&binding.target) {
                Some(target) => {
                    if !target.remove_listener(&key.event_type, binding.listener_id) {
                        warn!(node = ?key.target, event = %key.event_type, "native listener was already gone");
                    }
                    debug!(node = ?key.target, event = %key.event_type, "native listener detached");
                }
                None => trace!(node = ?key.target, "binding of dropped target discarded"),
            }
        }
    }

    /// Entry point of every shared native listener.
    fn dispatch_native(&self, host: &T, key: &BindingKey<T::Id>, event: &T::Event) {
        let handlers = self
            .map
            .borrow()
            .for_native(key.target, &key.event_type, key.flags);
        trace!(node = ?key.target, event = %key.event_type, handlers = handlers.len(), "native dispatch");

        for managed in handlers {
            if managed.removed.get() {
                continue;
            }
            managed.action.run(&Invocation {
                event: EventRef::Native(event),
                current_target: host,
                delegate_target: None,
                namespace: &managed.path.namespace,
            });
        }
    }
}

type RemoveFn = Rc<dyn Fn() -> EventResult<usize>>;

/// Undoes the registrations made by one `on`/`once` call.
///
/// Removing twice is harmless: the second call removes nothing.
#[derive(Clone)]
pub struct Remover {
    parts: Vec<RemoveFn>,
}

impl Remover {
    fn combine(parts: Vec<RemoveFn>) -> Option<Self> {
        (!parts.is_empty()).then_some(Self { parts })
    }

    /// Remove every registration still present. Returns how many were removed.
    pub fn remove(&self) -> EventResult<usize> {
        let mut removed = 0;
        for part in &self.parts {
            removed += part()?;
        }
        Ok(removed)
    }

    /// Number of registrations this remover covers.
    pub fn registrations(&self) -> usize {
        self.parts.len()
    }
}

impl fmt::Debug for Remover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remover")
            .field("registrations", &self.parts.len())
            .finish()
    }
}

/// Namespaced, delegating event registry over a platform of `T` nodes.
///
/// Single-threaded: the bus is neither `Send` nor `Sync`, and handlers may
/// call back into it (including removing themselves) while being dispatched.
pub struct EventBus<T: Target> {
    inner: Rc<BusInner<T>>,
}

impl<T: Target> EventBus<T> {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    /// Create a bus from a validated configuration.
    pub fn with_config(config: BusConfig) -> EventResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BusConfig) -> Self {
        let capabilities = config
            .capabilities
            .unwrap_or_else(T::probe_listener_capabilities);
        debug!(?capabilities, namespace = %config.default_namespace, "event bus created");
        Self {
            inner: Rc::new(BusInner {
                map: RefCell::new(EventMap::default()),
                bindings: RefCell::new(HashMap::new()),
                capabilities,
                config,
                next_handler_id: Cell::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Listener options the platform honours, as probed at construction.
    pub fn capabilities(&self) -> ListenerCapabilities {
        self.inner.capabilities
    }

    /// Register `handler` for every target and event.
    ///
    /// Returns `None` when nothing was registered. Validation errors leave the
    /// registry untouched.
    pub fn on(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Handler<T>,
        options: ListenOptions,
    ) -> EventResult<Option<Remover>> {
        self.register(targets.into(), events.into(), handler, options, false)
    }

    /// Like [`on`](Self::on), but each registration removes itself before
    /// its first invocation.
    pub fn once(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Handler<T>,
        options: ListenOptions,
    ) -> EventResult<Option<Remover>> {
        self.register(targets.into(), events.into(), handler, options, true)
    }

    fn register(
        &self,
        targets: Targets<T>,
        events: Events,
        handler: Handler<T>,
        options: ListenOptions,
        once: bool,
    ) -> EventResult<Option<Remover>> {
        let params = prepare_base_params(targets, events, Some(handler), true)?;
        let Some(handler) = params.handler else {
            return Err(EventError::argument("a handler is required"));
        };
        let sites = registration_sites(&params.targets)?;
        let specs = params
            .events
            .iter()
            .map(|raw| self.registration_specifier(raw))
            .collect::<EventResult<Vec<_>>>()?;

        let once = once || options.once;
        let mut parts = Vec::with_capacity(sites.len() * specs.len());
        for site in &sites {
            for (event, namespace) in &specs {
                parts.push(self.register_one(site, event, namespace, &handler, options, once));
            }
        }
        debug!(registrations = parts.len(), once, "handler registered");
        Ok(Remover::combine(parts))
    }

    /// `(event, namespace)` for a registration. The event must be concrete.
    fn registration_specifier(&self, raw: &str) -> EventResult<(String, String)> {
        let default_namespace = self.inner.config.default_namespace.as_str();
        let spec = parse_specifier(raw, None, Some(default_namespace));
        let event = spec
            .event
            .ok_or_else(|| EventError::argument(format!("'{raw}' does not name an event")))?;
        let namespace = spec
            .namespace
            .unwrap_or_else(|| default_namespace.to_string());
        Ok((event, namespace))
    }

    fn register_one(
        &self,
        site: &Site<'_, T>,
        event: &str,
        namespace: &str,
        handler: &Handler<T>,
        options: ListenOptions,
        once: bool,
    ) -> RemoveFn {
        let host = site.host();
        let path = RegistrationPath {
            target: host.target_id(),
            namespace: namespace.to_string(),
            event: event.to_string(),
            selector: site.selector().map(str::to_string),
            handler_id: self.inner.next_handler_id(),
        };
        let paused = Rc::new(Cell::new(false));
        let self_removal = once.then(|| (Rc::downgrade(&self.inner), path.clone()));
        let flags = ListenerFlags {
            capture: options.capture,
            passive: options.passive,
        };

        let managed = Rc::new(ManagedHandler {
            action: compose(handler.clone(), paused.clone(), site.selector(), self_removal),
            handler: handler.clone(),
            path,
            paused,
            removed: Cell::new(false),
            capture: flags.capture,
            passive: flags.passive,
            once,
        });
        trace!(path = ?managed.path, "registration added");
        self.inner.map.borrow_mut().insert(host, managed.clone());
        self.bind(host, event, flags);

        let bus = Rc::downgrade(&self.inner);
        let registration = Rc::downgrade(&managed);
        Rc::new(move || {
            let (Some(bus), Some(managed)) = (bus.upgrade(), registration.upgrade()) else {
                return Ok(0);
            };
            if managed.removed.get() {
                return Ok(0);
            }
            bus.remove_registration(&managed.path)?;
            Ok(1)
        })
    }

    /// Attach the shared native listener for `(host, event_type, flags)` unless present.
    fn bind(&self, host: &T, event_type: &str, flags: ListenerFlags) {
        let key = BindingKey {
            target: host.target_id(),
            event_type: event_type.to_string(),
            flags,
        };
        if self.inner.bindings.borrow().contains_key(&key) {
            return;
        }

        let bus: Weak<BusInner<T>> = Rc::downgrade(&self.inner);
        let weak_host = host.downgrade();
        let dispatch_key = key.clone();
        let listener: NativeListener<T::Event> = Rc::new(move |event: &T::Event| {
            let (Some(bus), Some(host)) = (bus.upgrade(), T::upgrade(&weak_host)) else {
                return;
            };
            bus.dispatch_native(&host, &dispatch_key, event);
        });

        // The shared listener outlives any single once-handler, so `once`
        // never reaches the platform.
        let native_options = filter_listener_options(
            ListenOptions {
                capture: flags.capture,
                once: false,
                passive: flags.passive,
            },
            self.inner.capabilities,
        );
        let listener_id = host.add_listener(event_type, listener, native_options);
        debug!(node = ?key.target, event = event_type, ?native_options, "native listener attached");
        self.inner.bindings.borrow_mut().insert(
            key,
            Binding {
                target: host.downgrade(),
                listener_id,
            },
        );
    }

    /// Specifiers for lookups, where a missing part matches anything.
    fn query_specifiers(events: &[String]) -> Vec<EventSpecifier> {
        events
            .iter()
            .map(|raw| parse_specifier(raw, None, None))
            .collect()
    }

    fn selector_filter<'a>(site: &Site<'a, T>) -> SelectorFilter<'a> {
        match site.selector() {
            Some(selector) => SelectorFilter::Only(selector),
            None => SelectorFilter::Any,
        }
    }

    /// Handlers addressed by `(targets, events, handler)` that are still registered.
    fn select(
        &self,
        targets: Targets<T>,
        events: Events,
        handler: Option<&Handler<T>>,
    ) -> EventResult<Vec<Rc<ManagedHandler<T>>>> {
        let params = prepare_base_params(targets, events, handler.cloned(), false)?;
        let sites = registration_sites(&params.targets)?;
        let specs = Self::query_specifiers(&params.events);

        let map = self.inner.map.borrow();
        let mut seen = BTreeSet::new();
        let mut selected = Vec::new();
        for site in &sites {
            for spec in &specs {
                let found = map.matching(site.host().target_id(), spec, Self::selector_filter(site));
                selected.extend(found.into_iter().filter(|m| {
                    handler.map_or(true, |h| h.same_as(&m.handler)) && seen.insert(m.id())
                }));
            }
        }
        Ok(selected)
    }

    /// Remove matching registrations. A missing handler removes every match.
    ///
    /// Returns how many registrations were removed; zero is not an error.
    pub fn off(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Option<&Handler<T>>,
    ) -> EventResult<usize> {
        let selected = self.select(targets.into(), events.into(), handler)?;
        let mut removed = Vec::with_capacity(selected.len());
        {
            let mut map = self.inner.map.borrow_mut();
            for managed in selected {
                removed.push(map.remove(&managed.path)?);
            }
        }
        self.inner.release(&removed);
        debug!(removed = removed.len(), "handlers removed");
        Ok(removed.len())
    }

    /// Suspend matching handlers without removing them.
    pub fn pause(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Option<&Handler<T>>,
    ) -> EventResult<usize> {
        self.set_paused(targets, events, handler, true)
    }

    pub fn resume(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Option<&Handler<T>>,
    ) -> EventResult<usize> {
        self.set_paused(targets, events, handler, false)
    }

    /// Set the pause flag of every matching handler. Returns how many matched.
    ///
    /// Nothing is removed, so no cleanup runs: paused handlers stay
    /// addressable for a later resume.
    pub fn set_paused(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        handler: Option<&Handler<T>>,
        paused: bool,
    ) -> EventResult<usize> {
        let selected = self.select(targets.into(), events.into(), handler)?;
        for managed in &selected {
            managed.paused.set(paused);
        }
        debug!(affected = selected.len(), paused, "pause state changed");
        Ok(selected.len())
    }

    /// Invoke matching handlers directly with a synthetic event.
    ///
    /// Platform dispatch is bypassed: nothing bubbles and delegated handlers
    /// run without a selector match. Returns how many handlers ran; paused
    /// ones do not count.
    pub fn fire(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        detail: Option<Value>,
    ) -> EventResult<usize> {
        let params = prepare_base_params(targets.into(), events.into(), None, false)?;
        let sites = registration_sites(&params.targets)?;
        let specs = Self::query_specifiers(&params.events);

        let mut invoked = 0;
        for site in &sites {
            let synthetic_target = match *site {
                Site::Direct(target) => SyntheticTarget::Single(target.clone()),
                Site::Delegated { ancestor, selector } => SyntheticTarget::Delegated {
                    ancestor: ancestor.clone(),
                    selector: selector.to_string(),
                },
            };
            for spec in &specs {
                let handlers = self.inner.map.borrow().matching(
                    site.host().target_id(),
                    spec,
                    Self::selector_filter(site),
                );
                for managed in handlers {
                    if managed.removed.get() {
                        continue;
                    }
                    let event = SyntheticEvent::new(
                        &managed.path.event,
                        &managed.path.namespace,
                        detail.clone(),
                        synthetic_target.clone(),
                    );
                    let ran = managed.action.run(&Invocation {
                        event: EventRef::Synthetic(&event),
                        current_target: site.host(),
                        delegate_target: None,
                        namespace: &managed.path.namespace,
                    });
                    if ran {
                        invoked += 1;
                    }
                }
            }
        }
        trace!(invoked, "synthetic fire finished");
        Ok(invoked)
    }

    /// Build a platform event per target and event and dispatch it natively.
    ///
    /// Delegated targets dispatch on every descendant of the ancestor that
    /// matches the selector. Returns the number of dispatches.
    pub fn emit(
        &self,
        targets: impl Into<Targets<T>>,
        events: impl Into<Events>,
        detail: Option<Value>,
        constructor: Option<&EventConstructor<T::Event>>,
        options: Option<EventInitOptions>,
    ) -> EventResult<usize> {
        let params = prepare_base_params(targets.into(), events.into(), None, false)?;
        let sites = registration_sites(&params.targets)?;
        let options = options.unwrap_or(self.inner.config.emit_defaults);
        let inits = params
            .events
            .iter()
            .map(|raw| {
                let spec = parse_specifier(raw, None, None);
                let event_type = spec
                    .event
                    .ok_or_else(|| EventError::argument(format!("cannot emit '{raw}' without an event name")))?;
                Ok(EventInit {
                    event_type,
                    namespace: spec.namespace,
                    detail: detail.clone(),
                    options,
                })
            })
            .collect::<EventResult<Vec<_>>>()?;

        let mut dispatched = 0;
        for site in &sites {
            let concrete = match *site {
                Site::Direct(target) => vec![target.clone()],
                Site::Delegated { ancestor, selector } => ancestor.query_selector_all(selector),
            };
            for init in &inits {
                for node in &concrete {
                    let event = match constructor {
                        Some(construct) => construct(init.clone()),
                        None => <T::Event as NativeEvent<T>>::from_init(init.clone()),
                    };
                    node.dispatch_event(event);
                    dispatched += 1;
                }
            }
        }
        debug!(dispatched, "events emitted");
        Ok(dispatched)
    }

    /// Drop every registration of targets that were dropped or detached from
    /// their document. Restricted to `targets` when given.
    ///
    /// Returns the number of targets removed from the registry.
    pub fn off_detached_elements(&self, targets: Option<Targets<T>>) -> usize {
        let candidates: Vec<(T::Id, Option<T>)> = {
            let map = self.inner.map.borrow();
            let ids: Vec<T::Id> = match targets {
                Some(targets) => targets
                    .items()
                    .iter()
                    .filter_map(TargetItem::as_node)
                    .map(|target| target.target_id())
                    .collect(),
                None => map.targets.keys().copied().collect(),
            };
            ids.into_iter()
                .filter_map(|id| map.targets.get(&id).map(|scope| (id, scope.target())))
                .collect()
        };

        let detached: Vec<T::Id> = candidates
            .into_iter()
            .filter(|(_, target)| !target.as_ref().is_some_and(|t| t.is_connected()))
            .map(|(id, _)| id)
            .collect();
        if detached.is_empty() {
            return 0;
        }

        let removed: Vec<_> = {
            let mut map = self.inner.map.borrow_mut();
            detached
                .iter()
                .flat_map(|id| map.remove_target(*id))
                .collect()
        };
        self.inner.release(&removed);
        debug!(targets = detached.len(), handlers = removed.len(), "detached targets swept");
        detached.len()
    }

    /// Delete empty registry scopes, restricted to `targets` when given.
    pub fn clean_up(&self, targets: Option<Targets<T>>) {
        let ids: Option<BTreeSet<T::Id>> = targets.map(|targets| {
            targets
                .items()
                .iter()
                .filter_map(TargetItem::as_node)
                .map(|target| target.target_id())
                .collect()
        });
        self.inner.collect(ids.as_ref());
    }

    /// Serializable view of the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.map.borrow().snapshot()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.map.borrow().handler_count()
    }

    pub fn target_count(&self) -> usize {
        self.inner.map.borrow().targets.len()
    }

    /// Whether `target` holds any registration.
    pub fn is_registered(&self, target: &T) -> bool {
        self.inner
            .map
            .borrow()
            .targets
            .contains_key(&target.target_id())
    }

    /// Number of native listeners the bus currently has attached.
    pub fn listener_binding_count(&self) -> usize {
        self.inner.bindings.borrow().len()
    }
}

impl<T: Target> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Target> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Target> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("targets", &self.target_count())
            .field("handlers", &self.handler_count())
            .field("bindings", &self.listener_binding_count())
            .field("capabilities", &self.inner.capabilities)
            .finish()
    }
}
