//! Argument normalization and validation shared by every bus operation.
//!
//! Targets are a flat, ordered list. A selector item delegates to the node
//! right before it, so `[list, "li", form, "button"]` expresses two
//! independent delegations in one call.

use crate::error::{EventError, EventResult};
use crate::handler::Handler;
use crate::platform::ListenerTarget;
use crate::specifier::sanitize_specifiers;

/// One entry in a target list.
#[derive(Debug, Clone)]
pub enum TargetItem<T> {
    Node(T),
    Selector(String),
}

impl<T> TargetItem<T> {
    /// Whether this item is a usable selector string.
    pub fn is_selector_like(&self) -> bool {
        matches!(self, TargetItem::Selector(s) if !s.trim().is_empty())
    }

    pub fn as_node(&self) -> Option<&T> {
        match self {
            TargetItem::Node(t) => Some(t),
            TargetItem::Selector(_) => None,
        }
    }

    pub fn as_selector(&self) -> Option<&str> {
        match self {
            TargetItem::Node(_) => None,
            TargetItem::Selector(s) => Some(s.trim()),
        }
    }
}

/// An ordered list of targets and delegation selectors.
#[derive(Debug, Clone)]
pub struct Targets<T>(pub Vec<TargetItem<T>>);

impl<T> Targets<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a plain target.
    pub fn node(mut self, target: T) -> Self {
        self.0.push(TargetItem::Node(target));
        self
    }

    /// Append a delegation pair.
    pub fn delegate(mut self, ancestor: T, selector: impl Into<String>) -> Self {
        self.0.push(TargetItem::Node(ancestor));
        self.0.push(TargetItem::Selector(selector.into()));
        self
    }

    /// Append a bare selector, delegating to whatever node precedes it.
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.0.push(TargetItem::Selector(selector.into()));
        self
    }

    pub fn items(&self) -> &[TargetItem<T>] {
        &self.0
    }
}

impl<T> Default for Targets<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<T> for Targets<T> {
    fn from(target: T) -> Self {
        Self(vec![TargetItem::Node(target)])
    }
}

impl<T: Clone> From<&T> for Targets<T> {
    fn from(target: &T) -> Self {
        Self(vec![TargetItem::Node(target.clone())])
    }
}

impl<T, S: Into<String>> From<(T, S)> for Targets<T> {
    fn from((ancestor, selector): (T, S)) -> Self {
        Self::new().delegate(ancestor, selector)
    }
}

impl<T: Clone, S: Into<String>> From<(&T, S)> for Targets<T> {
    fn from((ancestor, selector): (&T, S)) -> Self {
        Self::new().delegate(ancestor.clone(), selector)
    }
}

impl<T> From<Vec<T>> for Targets<T> {
    fn from(targets: Vec<T>) -> Self {
        Self(targets.into_iter().map(TargetItem::Node).collect())
    }
}

impl<T> From<Vec<TargetItem<T>>> for Targets<T> {
    fn from(items: Vec<TargetItem<T>>) -> Self {
        Self(items)
    }
}

/// One or more event specifier strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Events(pub Vec<String>);

impl From<&str> for Events {
    fn from(raw: &str) -> Self {
        Self(vec![raw.to_string()])
    }
}

impl From<String> for Events {
    fn from(raw: String) -> Self {
        Self(vec![raw])
    }
}

impl From<Vec<&str>> for Events {
    fn from(raw: Vec<&str>) -> Self {
        Self(raw.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Events {
    fn from(raw: Vec<String>) -> Self {
        Self(raw)
    }
}

impl From<&[&str]> for Events {
    fn from(raw: &[&str]) -> Self {
        Self(raw.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Events {
    fn from(raw: [&str; N]) -> Self {
        Self(raw.iter().map(|s| s.to_string()).collect())
    }
}

/// Validated, normalized arguments.
#[derive(Debug)]
pub struct BaseParams<T: ListenerTarget> {
    pub targets: Vec<TargetItem<T>>,
    /// Sanitized specifiers, one per entry.
    pub events: Vec<String>,
    pub handler: Option<Handler<T>>,
}

/// Normalize and validate `(targets, events, handler)`.
///
/// Checks, in order: at least one target, at least one event, a handler
/// when `handler_required`, then every target item (a selector must follow
/// a usable node; a node must accept listeners).
pub fn prepare_base_params<T: ListenerTarget>(
    targets: Targets<T>,
    events: Events,
    handler: Option<Handler<T>>,
    handler_required: bool,
) -> EventResult<BaseParams<T>> {
    let targets = targets.0;
    if targets.is_empty() {
        return Err(EventError::argument("at least one target is required"));
    }
    let events = sanitize_specifiers(&events.0);
    if events.is_empty() {
        return Err(EventError::argument("at least one event is required"));
    }
    if handler_required && handler.is_none() {
        return Err(EventError::argument("a handler is required"));
    }

    for (index, item) in targets.iter().enumerate() {
        match item {
            TargetItem::Selector(_) if item.is_selector_like() => {
                let prev = index.checked_sub(1).and_then(|i| targets[i].as_node());
                if !prev.is_some_and(|t| t.accepts_listeners()) {
                    return Err(EventError::delegation(format!(
                        "selector '{}' at index {index} has no preceding target",
                        item.as_selector().unwrap_or_default()
                    )));
                }
            }
            TargetItem::Selector(s) => {
                return Err(EventError::target(format!(
                    "item at index {index} is neither a target nor a selector: {s:?}"
                )));
            }
            TargetItem::Node(t) if !t.accepts_listeners() => {
                return Err(EventError::target(format!(
                    "item at index {index} cannot host listeners"
                )));
            }
            TargetItem::Node(_) => {}
        }
    }

    Ok(BaseParams {
        targets,
        events,
        handler,
    })
}

/// Neighbourhood of one position in a target list.
#[derive(Debug)]
pub struct TargetInfo<'a, T> {
    pub prev_target: Option<&'a TargetItem<T>>,
    pub next_target: Option<&'a TargetItem<T>>,
    /// The next item is a selector: this node is its ancestor and gets no
    /// registration of its own.
    pub has_delegation: bool,
    /// This item is a selector delegating to `prev_target`.
    pub is_delegation: bool,
}

pub fn resolve_target_info<T: ListenerTarget>(
    targets: &[TargetItem<T>],
    index: usize,
) -> EventResult<TargetInfo<'_, T>> {
    let item = targets
        .get(index)
        .ok_or_else(|| EventError::argument(format!("no target at index {index}")))?;
    let prev_target = index.checked_sub(1).and_then(|i| targets.get(i));
    let next_target = targets.get(index + 1);
    let is_delegation = item.is_selector_like();
    let has_delegation = next_target.is_some_and(TargetItem::is_selector_like);

    if is_delegation
        && !prev_target
            .and_then(TargetItem::as_node)
            .is_some_and(|t| t.accepts_listeners())
    {
        return Err(EventError::delegation(format!(
            "selector at index {index} has no preceding target"
        )));
    }

    Ok(TargetInfo {
        prev_target,
        next_target,
        has_delegation,
        is_delegation,
    })
}

/// Where an operation acts: a plain target or an `(ancestor, selector)` pair.
#[derive(Debug)]
pub enum Site<'a, T> {
    Direct(&'a T),
    Delegated { ancestor: &'a T, selector: &'a str },
}

impl<T> Clone for Site<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Site<'_, T> {}

impl<'a, T> Site<'a, T> {
    /// The target that holds the registration.
    pub fn host(&self) -> &'a T {
        match *self {
            Site::Direct(t) => t,
            Site::Delegated { ancestor, .. } => ancestor,
        }
    }

    pub fn selector(&self) -> Option<&'a str> {
        match *self {
            Site::Direct(_) => None,
            Site::Delegated { selector, .. } => Some(selector),
        }
    }
}

/// Resolve every position that acts on its own, skipping delegation ancestors.
pub fn registration_sites<T: ListenerTarget>(
    targets: &[TargetItem<T>],
) -> EventResult<Vec<Site<'_, T>>> {
    let mut sites = Vec::new();
    for index in 0..targets.len() {
        let info = resolve_target_info(targets, index)?;
        if info.has_delegation {
            continue;
        }
        let site = match (&targets[index], info.is_delegation) {
            (TargetItem::Selector(selector), true) => {
                let ancestor = info
                    .prev_target
                    .and_then(TargetItem::as_node)
                    .ok_or_else(|| EventError::delegation("delegation without ancestor"))?;
                Site::Delegated {
                    ancestor,
                    selector: selector.trim(),
                }
            }
            (TargetItem::Node(target), false) => Site::Direct(target),
            (TargetItem::Selector(_), false) | (TargetItem::Node(_), true) => {
                return Err(EventError::target(format!(
                    "item at index {index} is neither a target nor a selector"
                )));
            }
        };
        sites.push(site);
    }
    Ok(sites)
}
