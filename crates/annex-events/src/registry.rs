//! The event map.
//!
//! ```text
//! EventMap
//! └── target id ─► TargetScope
//!     └── namespace ─► EventScope
//!         └── event name ─► HandlerScope { target, handlers, delegations }
//!                                               └── selector ─► DelegationScope { handlers }
//! ```
//!
//! Scopes are created on first use and removed by [`EventMap::clean_up`] as
//! soon as nothing below them holds a handler. Pausing never removes anything.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use crate::action::Action;
use crate::error::{EventError, EventResult};
use crate::handler::Handler;
use crate::platform::Target;
use crate::specifier::EventSpecifier;

/// Exact location of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegistrationPath<Id> {
    pub target: Id,
    pub namespace: String,
    pub event: String,
    pub selector: Option<String>,
    pub handler_id: u64,
}

/// The registry's record of one `on`/`once` registration.
pub(crate) struct ManagedHandler<T: Target> {
    /// Original callback; identity key for `off`/`pause`/`resume`.
    pub handler: Handler<T>,
    pub path: RegistrationPath<T::Id>,
    pub paused: Rc<Cell<bool>>,
    /// Set once the registration has left the registry.
    pub removed: Cell<bool>,
    pub capture: bool,
    pub passive: bool,
    pub once: bool,
    pub action: Box<dyn Action<T>>,
}

impl<T: Target> ManagedHandler<T> {
    pub fn id(&self) -> u64 {
        self.path.handler_id
    }

    /// Whether this handler is served by the native listener with `flags`.
    pub fn served_by(&self, flags: ListenerFlags) -> bool {
        self.capture == flags.capture && self.passive == flags.passive
    }
}

/// Options that distinguish one shared native listener from another on the
/// same target and event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ListenerFlags {
    pub capture: bool,
    pub passive: bool,
}

/// Which delegations an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectorFilter<'a> {
    /// Direct handlers and every delegation.
    Any,
    /// Only the delegation registered under this selector.
    Only(&'a str),
}

pub(crate) struct DelegationScope<T: Target> {
    pub handlers: Vec<Rc<ManagedHandler<T>>>,
}

impl<T: Target> Default for DelegationScope<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

pub(crate) struct HandlerScope<T: Target> {
    /// The target holding the native listener (the ancestor for delegations).
    pub target: T::Weak,
    pub handlers: Vec<Rc<ManagedHandler<T>>>,
    pub delegations: BTreeMap<String, DelegationScope<T>>,
}

impl<T: Target> HandlerScope<T> {
    fn new(target: T::Weak) -> Self {
        Self {
            target,
            handlers: Vec::new(),
            delegations: BTreeMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.delegations.values().all(|d| d.handlers.is_empty())
    }

    /// Every handler, direct and delegated.
    fn all(&self) -> impl Iterator<Item = &Rc<ManagedHandler<T>>> {
        self.handlers
            .iter()
            .chain(self.delegations.values().flat_map(|d| d.handlers.iter()))
    }

    fn filtered<'s>(
        &'s self,
        filter: SelectorFilter<'s>,
    ) -> Box<dyn Iterator<Item = &'s Rc<ManagedHandler<T>>> + 's> {
        match filter {
            SelectorFilter::Any => Box::new(self.all()),
            SelectorFilter::Only(selector) => Box::new(
                self.delegations
                    .get(selector)
                    .into_iter()
                    .flat_map(|d| d.handlers.iter()),
            ),
        }
    }

    fn list_mut(&mut self, selector: Option<&str>) -> Option<&mut Vec<Rc<ManagedHandler<T>>>> {
        match selector {
            None => Some(&mut self.handlers),
            Some(selector) => self.delegations.get_mut(selector).map(|d| &mut d.handlers),
        }
    }
}

pub(crate) struct EventScope<T: Target> {
    pub events: BTreeMap<String, HandlerScope<T>>,
}

impl<T: Target> Default for EventScope<T> {
    fn default() -> Self {
        Self {
            events: BTreeMap::new(),
        }
    }
}

pub(crate) struct TargetScope<T: Target> {
    pub namespaces: BTreeMap<String, EventScope<T>>,
}

impl<T: Target> Default for TargetScope<T> {
    fn default() -> Self {
        Self {
            namespaces: BTreeMap::new(),
        }
    }
}

impl<T: Target> TargetScope<T> {
    fn handler_scopes(&self) -> impl Iterator<Item = (&str, &str, &HandlerScope<T>)> {
        self.namespaces.iter().flat_map(|(ns, scope)| {
            scope
                .events
                .iter()
                .map(move |(event, hs)| (ns.as_str(), event.as_str(), hs))
        })
    }

    /// Any live handle to the target this scope belongs to.
    pub fn target(&self) -> Option<T> {
        self.handler_scopes()
            .find_map(|(_, _, hs)| T::upgrade(&hs.target))
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

pub(crate) struct EventMap<T: Target> {
    pub targets: BTreeMap<T::Id, TargetScope<T>>,
}

impl<T: Target> Default for EventMap<T> {
    fn default() -> Self {
        Self {
            targets: BTreeMap::new(),
        }
    }
}

impl<T: Target> EventMap<T> {
    /// Insert a managed handler at its path, creating scopes as needed.
    pub fn insert(&mut self, host: &T, managed: Rc<ManagedHandler<T>>) {
        let path = &managed.path;
        let scope = self
            .targets
            .entry(path.target)
            .or_default()
            .namespaces
            .entry(path.namespace.clone())
            .or_default()
            .events
            .entry(path.event.clone())
            .or_insert_with(|| HandlerScope::new(host.downgrade()));
        match path.selector {
            Some(ref selector) => scope
                .delegations
                .entry(selector.clone())
                .or_default()
                .handlers
                .push(managed),
            None => scope.handlers.push(managed),
        }
    }

    /// Remove exactly the registration at `path`.
    pub fn remove(&mut self, path: &RegistrationPath<T::Id>) -> EventResult<Rc<ManagedHandler<T>>> {
        let missing = || EventError::scope(format!("no registration at {path:?}"));
        let list = self
            .targets
            .get_mut(&path.target)
            .and_then(|ts| ts.namespaces.get_mut(&path.namespace))
            .and_then(|es| es.events.get_mut(&path.event))
            .and_then(|hs| hs.list_mut(path.selector.as_deref()))
            .ok_or_else(missing)?;
        let index = list
            .iter()
            .position(|m| m.id() == path.handler_id)
            .ok_or_else(missing)?;
        Ok(list.remove(index))
    }

    /// Handlers under `target` selected by `spec` and `filter`, in registration order.
    pub fn matching(
        &self,
        target: T::Id,
        spec: &EventSpecifier,
        filter: SelectorFilter<'_>,
    ) -> Vec<Rc<ManagedHandler<T>>> {
        let Some(scope) = self.targets.get(&target) else {
            return Vec::new();
        };
        let mut found: Vec<_> = scope
            .handler_scopes()
            .filter(|(ns, event, _)| spec.selects(event, ns))
            .flat_map(|(_, _, hs)| hs.filtered(filter).cloned().collect::<Vec<_>>())
            .collect();
        found.sort_by_key(|m| m.id());
        found
    }

    /// Handlers the shared native listener for `(target, event_type, flags)` must run.
    pub fn for_native(
        &self,
        target: T::Id,
        event_type: &str,
        flags: ListenerFlags,
    ) -> Vec<Rc<ManagedHandler<T>>> {
        let Some(scope) = self.targets.get(&target) else {
            return Vec::new();
        };
        let mut found: Vec<_> = scope
            .namespaces
            .values()
            .filter_map(|es| es.events.get(event_type))
            .flat_map(|hs| hs.all())
            .filter(|m| m.served_by(flags))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.id());
        found
    }

    /// Whether the native listener for `(target, event_type, flags)` is still needed.
    pub fn needs_listener(&self, target: T::Id, event_type: &str, flags: ListenerFlags) -> bool {
        self.targets.get(&target).is_some_and(|scope| {
            scope
                .namespaces
                .values()
                .filter_map(|es| es.events.get(event_type))
                .flat_map(|hs| hs.all())
                .any(|m| m.served_by(flags))
        })
    }

    /// Detach a whole target, returning every handler it held.
    pub fn remove_target(&mut self, target: T::Id) -> Vec<Rc<ManagedHandler<T>>> {
        self.targets
            .remove(&target)
            .map(|scope| {
                scope
                    .handler_scopes()
                    .flat_map(|(_, _, hs)| hs.all().cloned().collect::<Vec<_>>())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delete empty scopes bottom-up, restricted to `targets` when given.
    ///
    /// With `prune_dead`, target scopes whose target has been dropped are
    /// removed too; their handlers are returned so callers can flag them.
    /// Idempotent.
    pub fn clean_up(
        &mut self,
        targets: Option<&BTreeSet<T::Id>>,
        prune_dead: bool,
    ) -> Vec<Rc<ManagedHandler<T>>> {
        let ids: Vec<T::Id> = match targets {
            Some(ids) => ids.iter().copied().collect(),
            None => self.targets.keys().copied().collect(),
        };
        let mut orphaned = Vec::new();

        for id in ids {
            let Some(target_scope) = self.targets.get_mut(&id) else {
                continue;
            };
            for event_scope in target_scope.namespaces.values_mut() {
                for handler_scope in event_scope.events.values_mut() {
                    handler_scope.delegations.retain(|_, d| !d.handlers.is_empty());
                }
                event_scope.events.retain(|_, hs| !hs.is_empty());
            }
            target_scope.namespaces.retain(|_, es| !es.events.is_empty());

            if target_scope.is_empty() {
                self.targets.remove(&id);
                debug!(node = ?id, "target scope removed");
            } else if prune_dead && target_scope.target().is_none() {
                debug!(node = ?id, "pruning scope of dropped target");
                orphaned.extend(self.remove_target(id));
            }
        }
        orphaned
    }

    pub fn handler_count(&self) -> usize {
        self.targets
            .values()
            .flat_map(|ts| ts.handler_scopes())
            .map(|(_, _, hs)| hs.all().count())
            .sum()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let targets = self
            .targets
            .iter()
            .map(|(id, ts)| {
                let namespaces = ts
                    .namespaces
                    .iter()
                    .map(|(ns, es)| {
                        let events = es
                            .events
                            .iter()
                            .map(|(event, hs)| (event.clone(), HandlerScopeSnapshot::of(hs)))
                            .collect();
                        (ns.clone(), events)
                    })
                    .collect();
                (format!("{id:?}"), TargetSnapshot { namespaces })
            })
            .collect();
        RegistrySnapshot { targets }
    }
}

/// Serializable view of the whole registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Keyed by the target id's debug form.
    pub targets: BTreeMap<String, TargetSnapshot>,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSnapshot {
    /// namespace → event name → scope
    pub namespaces: BTreeMap<String, BTreeMap<String, HandlerScopeSnapshot>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerScopeSnapshot {
    pub handlers: Vec<HandlerSnapshot>,
    pub delegations: BTreeMap<String, Vec<HandlerSnapshot>>,
}

impl HandlerScopeSnapshot {
    fn of<T: Target>(scope: &HandlerScope<T>) -> Self {
        Self {
            handlers: scope.handlers.iter().map(HandlerSnapshot::of).collect(),
            delegations: scope
                .delegations
                .iter()
                .map(|(sel, d)| {
                    (
                        sel.clone(),
                        d.handlers.iter().map(HandlerSnapshot::of).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerSnapshot {
    pub id: u64,
    pub paused: bool,
    pub once: bool,
    pub capture: bool,
    pub passive: bool,
}

impl HandlerSnapshot {
    fn of<T: Target>(managed: &Rc<ManagedHandler<T>>) -> Self {
        Self {
            id: managed.id(),
            paused: managed.paused.get(),
            once: managed.once,
            capture: managed.capture,
            passive: managed.passive,
        }
    }
}

#[cfg(all(test, feature = "dom"))]
mod tests {
    use super::*;
    use crate::action::compose;
    use crate::specifier::parse_specifier;
    use annex_dom::Node;

    type Dom = Rc<Node>;

    fn managed(host: &Dom, ns: &str, event: &str, selector: Option<&str>, id: u64) -> Rc<ManagedHandler<Dom>> {
        let handler = Handler::new(|_| {});
        let paused = Rc::new(Cell::new(false));
        Rc::new(ManagedHandler {
            action: compose(handler.clone(), paused.clone(), selector, None),
            handler,
            path: RegistrationPath {
                target: host.id,
                namespace: ns.to_string(),
                event: event.to_string(),
                selector: selector.map(str::to_string),
                handler_id: id,
            },
            paused,
            removed: Cell::new(false),
            capture: false,
            passive: false,
            once: false,
        })
    }

    fn populated(host: &Dom) -> EventMap<Dom> {
        let mut map = EventMap::default();
        map.insert(host, managed(host, "foo", "click", None, 1));
        map.insert(host, managed(host, "bar", "click", None, 2));
        map.insert(host, managed(host, "bar", "click", Some("li"), 3));
        map.insert(host, managed(host, "foo", "keyup", None, 4));
        map
    }

    fn ids(found: &[Rc<ManagedHandler<Dom>>]) -> Vec<u64> {
        found.iter().map(|m| m.id()).collect()
    }

    #[test]
    fn test_matching_wildcards_and_filters() {
        let host = Node::element("ul", &[]);
        let map = populated(&host);

        let all_clicks = parse_specifier("click", None, None);
        assert_eq!(ids(&map.matching(host.id, &all_clicks, SelectorFilter::Any)), vec![1, 2, 3]);
        assert_eq!(ids(&map.matching(host.id, &all_clicks, SelectorFilter::Only("li"))), vec![3]);

        let in_foo = parse_specifier("*.foo", None, None);
        assert_eq!(ids(&map.matching(host.id, &in_foo, SelectorFilter::Any)), vec![1, 4]);
        assert_eq!(map.handler_count(), 4);
    }

    #[test]
    fn test_native_lookup_spans_namespaces_and_delegations() {
        let host = Node::element("ul", &[]);
        let map = populated(&host);
        let bubble = ListenerFlags { capture: false, passive: false };
        let capture = ListenerFlags { capture: true, passive: false };

        assert_eq!(ids(&map.for_native(host.id, "click", bubble)), vec![1, 2, 3]);
        assert!(map.for_native(host.id, "click", capture).is_empty());
        assert!(map.needs_listener(host.id, "keyup", bubble));
        assert!(!map.needs_listener(host.id, "focus", bubble));
    }

    #[test]
    fn test_clean_up_removes_empty_scopes_bottom_up() {
        let host = Node::element("ul", &[]);
        let mut map = populated(&host);

        let removed = map.remove(&managed(&host, "bar", "click", None, 2).path).unwrap();
        assert_eq!(removed.id(), 2);
        map.clean_up(None, true);
        // "bar/click" survives through its delegation alone.
        let snapshot = map.snapshot();
        let target = &snapshot.targets[&format!("{:?}", host.id)];
        assert_eq!(target.namespaces["bar"]["click"].delegations["li"].len(), 1);
        assert!(target.namespaces["bar"]["click"].handlers.is_empty());

        for (ns, event, selector, id) in [("bar", "click", Some("li"), 3), ("foo", "click", None, 1), ("foo", "keyup", None, 4)] {
            map.remove(&managed(&host, ns, event, selector, id).path).unwrap();
        }
        map.clean_up(None, true);
        assert!(map.targets.is_empty());
        assert!(map.snapshot().is_empty());
    }

    #[test]
    fn test_remove_missing_path_is_scope_error() {
        let host = Node::element("div", &[]);
        let mut map = populated(&host);
        let missing = managed(&host, "foo", "click", None, 99);
        assert!(matches!(map.remove(&missing.path), Err(EventError::InvalidScope(_))));
    }

    #[test]
    fn test_prune_dead_targets() {
        let survivor = Node::element("div", &[]);
        let mut map = populated(&survivor);
        let dead_id = {
            let doomed = Node::element("span", &[]);
            map.insert(&doomed, managed(&doomed, "foo", "click", None, 10));
            doomed.id
        };

        let kept = map.clean_up(None, false);
        assert!(kept.is_empty());
        assert!(map.targets.contains_key(&dead_id));

        let orphaned = map.clean_up(None, true);
        assert_eq!(ids(&orphaned), vec![10]);
        assert!(!map.targets.contains_key(&dead_id));
        assert!(map.targets.contains_key(&survivor.id));
    }
}
