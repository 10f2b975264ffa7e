//! # Annex DOM
//!
//! A small, mutable DOM used as the event platform for `annex-events`.
//! Uses html5ever for HTML parsing and constructs a traversable `Rc` tree.
//!
//! ## Design Goals
//!
//! 1. **Live tree**: nodes can be appended, removed and re-attached; `is_connected`
//!    reflects whether a node still hangs off a document
//! 2. **Selector support**: `matches`, `closest` and `query_selector_all` over
//!    compound selectors with descendant/child combinators
//! 3. **Event dispatch**: DOM Events with capture/bubble phases and listener
//!    removal that is safe while a dispatch is in flight

pub mod events;
pub mod selector;

pub use events::{
    AddEventListenerOptions, DomEvent, Event, EventDispatcher, EventListenerCallback,
    EventPhase, EventTarget, ListenerId, MouseEventData,
};
pub use selector::SelectorList;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

/// Failures of tree mutation, parsing and selector compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Node not found")]
    NodeNotFound,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Identity of a node, stable for its whole life.
///
/// Ids are allocated from a process-wide counter so nodes from different
/// documents never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Allocate the next unused id.
    pub fn next() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Type of DOM node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    Document,
    DocumentType { name: String },
    Element { tag_name: String, namespace: String },
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// A DOM node.
pub struct Node {
    /// Unique id for this node.
    pub id: NodeId,
    pub node_type: NodeType,
    attributes: RefCell<HashMap<String, String>>,
    parent: RefCell<Option<Weak<Node>>>,
    children: RefCell<Vec<Rc<Node>>>,
    /// Listeners attached to this node.
    pub event_target: EventTarget,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("attributes", &self.attributes.borrow())
            .field("child_count", &self.children.borrow().len())
            .finish()
    }
}

impl Node {
    /// Create a new, parentless node.
    pub fn new(node_type: NodeType) -> Rc<Self> {
        Rc::new(Self {
            id: NodeId::next(),
            node_type,
            attributes: RefCell::new(HashMap::new()),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            event_target: EventTarget::new(),
        })
    }

    /// Create a new HTML element with the given attributes.
    pub fn element(tag_name: &str, attributes: &[(&str, &str)]) -> Rc<Self> {
        let node = Self::new(NodeType::Element {
            tag_name: tag_name.to_ascii_lowercase(),
            namespace: "http://www.w3.org/1999/xhtml".to_string(),
        });
        {
            let mut attrs = node.attributes.borrow_mut();
            for (name, value) in attributes {
                attrs.insert(name.to_ascii_lowercase(), value.to_string());
            }
        }
        node
    }

    /// `None` for anything but elements.
    pub fn tag_name(&self) -> Option<&str> {
        match &self.node_type {
            NodeType::Element { tag_name, .. } => Some(tag_name),
            _ => None,
        }
    }

    /// Attribute value by name.
    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow().get(name).cloned()
    }

    /// Check whether an attribute is present.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.borrow().contains_key(name)
    }

    /// Set an attribute value. Fails on non-element nodes.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<(), DomError> {
        if !self.is_element() {
            return Err(DomError::InvalidOperation(format!(
                "cannot set attribute '{name}' on a non-element node"
            )));
        }
        self.attributes
            .borrow_mut()
            .insert(name.to_ascii_lowercase(), value.to_string());
        Ok(())
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow_mut().remove(name)
    }

    /// The whitespace-separated entries of the `class` attribute.
    pub fn class_list(&self) -> Vec<String> {
        self.attributes
            .borrow()
            .get("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Check for a single class name.
    pub fn has_class(&self, class_name: &str) -> bool {
        self.attributes
            .borrow()
            .get("class")
            .map(|c| c.split_whitespace().any(|cls| cls == class_name))
            .unwrap_or(false)
    }

    /// Get the text content.
    pub fn text_content(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result
    }

    fn collect_text(&self, result: &mut String) {
        match &self.node_type {
            NodeType::Text(text) => result.push_str(text),
            _ => {
                for child in self.children.borrow().iter() {
                    child.collect_text(result);
                }
            }
        }
    }

    /// Get parent node.
    pub fn parent(&self) -> Option<Rc<Node>> {
        self.parent.borrow().as_ref().and_then(|w| w.upgrade())
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self) -> Vec<Rc<Node>> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            result.push(node);
        }
        result
    }

    /// Get child nodes.
    pub fn children(&self) -> Vec<Rc<Node>> {
        self.children.borrow().clone()
    }

    /// Check if this is an element node.
    pub fn is_element(&self) -> bool {
        matches!(self.node_type, NodeType::Element { .. })
    }

    /// Whether the node can host event listeners.
    ///
    /// Doctype and processing-instruction nodes never receive events in this DOM.
    pub fn accepts_listeners(&self) -> bool {
        !matches!(
            self.node_type,
            NodeType::DocumentType { .. } | NodeType::ProcessingInstruction { .. }
        )
    }

    /// Whether the node is attached to a document.
    pub fn is_connected(&self) -> bool {
        if self.node_type == NodeType::Document {
            return true;
        }
        self.ancestors()
            .last()
            .map(|root| root.node_type == NodeType::Document)
            .unwrap_or(false)
    }

    /// Append a child node, detaching it from any previous parent first.
    pub fn append_child(self: &Rc<Self>, child: Rc<Node>) -> Result<(), DomError> {
        if Rc::ptr_eq(self, &child) || self.ancestors().iter().any(|a| Rc::ptr_eq(a, &child)) {
            return Err(DomError::InvalidOperation(
                "cannot append a node to itself or its descendant".to_string(),
            ));
        }
        child.detach();
        *child.parent.borrow_mut() = Some(Rc::downgrade(self));
        self.children.borrow_mut().push(child);
        Ok(())
    }

    /// Remove a direct child.
    pub fn remove_child(&self, child: &Rc<Node>) -> Result<Rc<Node>, DomError> {
        let mut children = self.children.borrow_mut();
        let index = children
            .iter()
            .position(|c| Rc::ptr_eq(c, child))
            .ok_or(DomError::NodeNotFound)?;
        let removed = children.remove(index);
        *removed.parent.borrow_mut() = None;
        Ok(removed)
    }

    /// Detach this node from its parent, if any.
    pub fn detach(self: &Rc<Self>) {
        if let Some(parent) = self.parent() {
            // The child is known to be present, so this cannot fail.
            let _ = parent.remove_child(self);
        }
    }

    /// Whether this element matches `selector`. Invalid selectors never match.
    pub fn matches(self: &Rc<Self>, selector: &str) -> bool {
        match SelectorList::parse(selector) {
            Ok(list) => list.matches(self),
            Err(err) => {
                trace!(%err, "selector rejected in matches()");
                false
            }
        }
    }

    /// The closest inclusive ancestor matching `selector`.
    pub fn closest(self: &Rc<Self>, selector: &str) -> Option<Rc<Node>> {
        let list = SelectorList::parse(selector).ok()?;
        std::iter::once(self.clone())
            .chain(self.ancestors())
            .find(|node| list.matches(node))
    }

    /// All descendants (document order, excluding `self`) matching `selector`.
    pub fn query_selector_all(self: &Rc<Self>, selector: &str) -> Result<Vec<Rc<Node>>, DomError> {
        let list = SelectorList::parse(selector)?;
        let mut found = Vec::new();
        for child in self.children() {
            collect_matching(&child, &list, &mut found);
        }
        Ok(found)
    }

    /// Dispatch an event with this node as its target.
    ///
    /// Returns false if a listener prevented the default action.
    pub fn dispatch_event(self: &Rc<Self>, event: &DomEvent) -> bool {
        EventDispatcher::dispatch(event, self)
    }
}

fn collect_matching(node: &Rc<Node>, list: &SelectorList, found: &mut Vec<Rc<Node>>) {
    if list.matches(node) {
        found.push(node.clone());
    }
    for child in node.children() {
        collect_matching(&child, list, found);
    }
}

/// A DOM document.
pub struct Document {
    root: Rc<Node>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("root", &self.root.id).finish()
    }
}

impl Document {
    /// An empty document with no children.
    pub fn new() -> Self {
        Self {
            root: Node::new(NodeType::Document),
        }
    }

    /// Build a document from HTML source with html5ever.
    pub fn parse_html(html: &str) -> Result<Self, DomError> {
        debug!(bytes = html.len(), "parsing document");

        let dom = parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut html.as_bytes())
            .map_err(|e| DomError::ParseError(e.to_string()))?;

        let doc = Document::new();
        doc.convert_rcdom(&dom.document, &doc.root)?;

        let mut count = 0usize;
        doc.traverse(|_| count += 1);
        debug!(node_count = count, "HTML parsed");
        Ok(doc)
    }

    fn convert_rcdom(&self, handle: &Handle, parent: &Rc<Node>) -> Result<(), DomError> {
        for child_handle in handle.children.borrow().iter() {
            let node = match &child_handle.data {
                NodeData::Document => continue,
                NodeData::Doctype { name, .. } => Node::new(NodeType::DocumentType {
                    name: name.to_string(),
                }),
                NodeData::Element { name, attrs, .. } => {
                    let node = Node::new(NodeType::Element {
                        tag_name: name.local.to_string(),
                        namespace: name.ns.to_string(),
                    });
                    {
                        let mut attributes = node.attributes.borrow_mut();
                        for attr in attrs.borrow().iter() {
                            attributes.insert(attr.name.local.to_string(), attr.value.to_string());
                        }
                    }
                    node
                }
                NodeData::Text { contents } => {
                    Node::new(NodeType::Text(contents.borrow().to_string()))
                }
                NodeData::Comment { contents } => Node::new(NodeType::Comment(contents.to_string())),
                NodeData::ProcessingInstruction { target, contents } => {
                    Node::new(NodeType::ProcessingInstruction {
                        target: target.to_string(),
                        data: contents.to_string(),
                    })
                }
            };

            parent.append_child(node.clone())?;
            self.convert_rcdom(child_handle, &node)?;
        }
        Ok(())
    }

    /// The document node.
    pub fn root(&self) -> &Rc<Node> {
        &self.root
    }

    /// Create a detached element owned by no parent yet.
    pub fn create_element(&self, tag_name: &str, attributes: &[(&str, &str)]) -> Rc<Node> {
        Node::element(tag_name, attributes)
    }

    /// Create a detached text node.
    pub fn create_text_node(&self, text: &str) -> Rc<Node> {
        Node::new(NodeType::Text(text.to_string()))
    }

    /// The `<html>` element.
    pub fn document_element(&self) -> Option<Rc<Node>> {
        self.root
            .children()
            .into_iter()
            .find(|n| n.tag_name() == Some("html"))
    }

    /// First `<body>` in document order.
    pub fn body(&self) -> Option<Rc<Node>> {
        self.document_element()?
            .children()
            .into_iter()
            .find(|n| n.tag_name() == Some("body"))
    }

    /// Get element by ID.
    pub fn get_element_by_id(&self, id: &str) -> Option<Rc<Node>> {
        let mut found = None;
        self.traverse(|node| {
            if found.is_none() && node.get_attribute("id").as_deref() == Some(id) {
                found = Some(node.clone());
            }
        });
        found
    }

    /// All elements in the document matching `selector`.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Rc<Node>>, DomError> {
        self.root.query_selector_all(selector)
    }

    /// Visit every node in document order, the root first.
    pub fn traverse<F>(&self, mut callback: F)
    where
        F: FnMut(&Rc<Node>),
    {
        traverse_node(&self.root, &mut callback);
    }
}

fn traverse_node<F>(node: &Rc<Node>, callback: &mut F)
where
    F: FnMut(&Rc<Node>),
{
    callback(node);
    for child in node.children() {
        traverse_node(&child, callback);
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
