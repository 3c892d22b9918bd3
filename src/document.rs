//! # Host Document
//!
//! In-memory host tree the engine renders into. It offers exactly what the
//! template instance needs from a browser document:
//!
//! 1. **Node creation from markup**: HTML5 fragment parsing through html5ever,
//!    honouring the context element so `<tr>` inside a `<tbody>` survives.
//! 2. **Structure**: insertion, removal, sibling/child navigation.
//! 3. **Attributes**: read/write/remove, plus simple selector queries
//!    (`tag`, `#id`, `.class`, `[attr]`, `[attr=value]`, comma lists).
//! 4. **Listeners**: registration, removal and bubbling dispatch.
//! 5. **Comments**: usable as stable position anchors (fragment boundaries).
//! 6. **Reclamation**: nodes live in a generational arena. A destroyed subtree
//!    gives its slots back; handles to it read as detached and empty.
//!
//! A [`Document`] is a cheap-clone handle; a [`Node`] pairs a document handle
//! with a node key, so node handles compare by identity.

use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tendril::TendrilSink;

use crate::arena::{Arena, Key};
use crate::value::Value;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

// ═══════════════════════════════════════════════════════════════════════════════
// NODE STORAGE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Key);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

struct NodeSlot {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

pub type ListenerFn = Rc<dyn Fn(&Event)>;

struct ListenerEntry {
    id: ListenerId,
    node: NodeId,
    event: String,
    callback: ListenerFn,
}

struct DocumentInner {
    nodes: Arena<NodeSlot>,
    listeners: Vec<ListenerEntry>,
    next_listener: u64,
    root: NodeId,
    body: NodeId,
}

impl DocumentInner {
    fn push(&mut self, kind: NodeKind) -> NodeId {
        NodeId(self.nodes.insert(NodeSlot {
            kind,
            parent: None,
            children: Vec::new(),
        }))
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes.get(id.0)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes.get_mut(id.0)
    }

    fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.slot(id).map(|s| &s.kind)
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id)?.parent
    }

    fn children(&self, id: NodeId) -> &[NodeId] {
        match self.slot(id) {
            Some(slot) => &slot.children,
            None => &[],
        }
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.slot_mut(id).and_then(|s| s.parent.take()) else {
            return;
        };
        if let Some(parent) = self.slot_mut(parent) {
            parent.children.retain(|c| *c != id);
        }
    }

    /// Link a detached `child` under `parent`, before `reference` when it is
    /// one of `parent`'s children, else last.
    fn attach(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let Some(slot) = self.slot_mut(parent) else {
            return;
        };
        let index = reference
            .and_then(|r| slot.children.iter().position(|c| *c == r))
            .unwrap_or(slot.children.len());
        slot.children.insert(index, child);
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            out.push(*child);
            self.collect_descendants(*child, out);
        }
    }

    /// Detach `id` and free its subtree along with the listeners registered
    /// on it. The document root and body are never freed. Returns the number
    /// of slots freed.
    fn release(&mut self, id: NodeId) -> usize {
        if self.is_inclusive_ancestor(id, self.body) {
            return 0;
        }
        self.detach(id);

        let mut freed = 0;
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(slot) = self.nodes.remove(node.0) {
                stack.extend(slot.children);
                freed += 1;
            }
        }
        let nodes = &self.nodes;
        self.listeners.retain(|l| nodes.contains(l.node.0));
        freed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Document {
    inner: Rc<RefCell<DocumentInner>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document holding an empty `<body>`.
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let root = NodeId(nodes.insert(NodeSlot {
            kind: NodeKind::Root,
            parent: None,
            children: Vec::new(),
        }));
        let body = NodeId(nodes.insert(NodeSlot {
            kind: NodeKind::Element {
                tag: "body".to_string(),
                attributes: Vec::new(),
            },
            parent: Some(root),
            children: Vec::new(),
        }));
        if let Some(slot) = nodes.get_mut(root.0) {
            slot.children.push(body);
        }

        Document {
            inner: Rc::new(RefCell::new(DocumentInner {
                nodes,
                listeners: Vec::new(),
                next_listener: 0,
                root,
                body,
            })),
        }
    }

    pub fn root(&self) -> Node {
        let id = self.inner.borrow().root;
        self.node(id)
    }

    pub fn body(&self) -> Node {
        let id = self.inner.borrow().body;
        self.node(id)
    }

    pub fn node(&self, id: NodeId) -> Node {
        Node {
            document: self.clone(),
            id,
        }
    }

    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn create_element(&self, tag: &str) -> Node {
        let id = self.inner.borrow_mut().push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        });
        self.node(id)
    }

    pub fn create_text(&self, text: &str) -> Node {
        let id = self.inner.borrow_mut().push(NodeKind::Text(text.to_string()));
        self.node(id)
    }

    pub fn create_comment(&self, text: &str) -> Node {
        let id = self
            .inner
            .borrow_mut()
            .push(NodeKind::Comment(text.to_string()));
        self.node(id)
    }

    /// Parse `markup` as the content of a `context_tag` element and return the
    /// resulting detached top-level nodes in document order.
    pub fn parse_fragment(&self, markup: &str, context_tag: &str) -> Vec<Node> {
        if markup.is_empty() {
            return Vec::new();
        }

        let context = html5ever::QualName::new(
            None,
            html5ever::Namespace::from(HTML_NAMESPACE),
            html5ever::LocalName::from(context_tag),
        );
        let dom: RcDom = html5ever::parse_fragment(
            RcDom::default(),
            html5ever::ParseOpts::default(),
            context,
            vec![],
        )
        .one(markup);

        // Fragment parsing wraps the parsed nodes in a synthetic <html> element.
        let document_children = dom.document.children.borrow();
        let top: Vec<Handle> = match document_children.first() {
            Some(first) if is_html_wrapper(first) => first.children.borrow().clone(),
            _ => document_children.clone(),
        };

        let mut nodes = Vec::new();
        let mut inner = self.inner.borrow_mut();
        for handle in &top {
            if let Some(id) = import_handle(&mut inner, handle) {
                nodes.push(id);
            }
        }
        drop(inner);

        nodes.into_iter().map(|id| self.node(id)).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Live node slots, attached or not.
    pub fn node_count(&self) -> usize {
        self.inner.borrow().nodes.len()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Document")
            .field("nodes", &inner.nodes.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

fn is_html_wrapper(handle: &Handle) -> bool {
    match &handle.data {
        NodeData::Element { name, .. } => name.local.as_ref() == "html",
        _ => false,
    }
}

/// Copy an html5ever node (and its subtree) into the arena.
fn import_handle(inner: &mut DocumentInner, handle: &Handle) -> Option<NodeId> {
    let id = match &handle.data {
        NodeData::Element { name, attrs, .. } => {
            let attributes = attrs
                .borrow()
                .iter()
                .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                .collect();
            inner.push(NodeKind::Element {
                tag: name.local.to_string(),
                attributes,
            })
        }
        NodeData::Text { contents } => inner.push(NodeKind::Text(contents.borrow().to_string())),
        NodeData::Comment { contents } => inner.push(NodeKind::Comment(contents.to_string())),
        NodeData::Document => inner.push(NodeKind::Root),
        NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => return None,
    };

    for child in handle.children.borrow().iter() {
        if let Some(child_id) = import_handle(inner, child) {
            inner.attach(id, child_id, None);
        }
    }

    Some(id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: String,
    pub target: Node,
    pub current_target: Node,
    pub detail: Value,
}

impl Event {
    /// Object form handed to handler expressions as `event`.
    pub fn to_value(&self) -> Value {
        Value::object(vec![
            ("type", Value::from(self.kind.as_str())),
            ("target", Value::Node(self.target.clone())),
            ("currentTarget", Value::Node(self.current_target.clone())),
            ("detail", self.detail.clone()),
        ])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Node {
    document: Document,
    id: NodeId,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.document.ptr_eq(&other.document)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(NodeKind::Root) => write!(f, "Node({:?} root)", self.id.0),
            Some(NodeKind::Element { tag, .. }) => write!(f, "Node({:?} <{}>)", self.id.0, tag),
            Some(NodeKind::Text(text)) => write!(f, "Node({:?} {:?})", self.id.0, text),
            Some(NodeKind::Comment(text)) => write!(f, "Node({:?} <!--{}-->)", self.id.0, text),
            None => write!(f, "Node({:?} destroyed)", self.id.0),
        }
    }
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn sibling(&self, id: NodeId) -> Node {
        self.document.node(id)
    }

    /// `None` once the node has been destroyed.
    pub fn kind(&self) -> Option<NodeKind> {
        self.document.inner.borrow().kind(self.id).cloned()
    }

    pub fn is_element(&self) -> bool {
        matches!(
            self.document.inner.borrow().kind(self.id),
            Some(NodeKind::Element { .. })
        )
    }

    pub fn is_destroyed(&self) -> bool {
        self.document.inner.borrow().slot(self.id).is_none()
    }

    pub fn tag_name(&self) -> Option<String> {
        match self.document.inner.borrow().kind(self.id) {
            Some(NodeKind::Element { tag, .. }) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn comment_text(&self) -> Option<String> {
        match self.document.inner.borrow().kind(self.id) {
            Some(NodeKind::Comment(text)) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn set_text(&self, text: &str) {
        let mut inner = self.document.inner.borrow_mut();
        if let Some(NodeKind::Text(existing)) = inner.slot_mut(self.id).map(|s| &mut s.kind) {
            *existing = text.to_string();
        }
    }

    // ─── Tree navigation ───────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<Node> {
        let parent = self.document.inner.borrow().parent(self.id);
        parent.map(|id| self.sibling(id))
    }

    pub fn children(&self) -> Vec<Node> {
        let ids = self.document.inner.borrow().children(self.id).to_vec();
        ids.into_iter().map(|id| self.sibling(id)).collect()
    }

    pub fn first_child(&self) -> Option<Node> {
        let first = self.document.inner.borrow().children(self.id).first().copied();
        first.map(|id| self.sibling(id))
    }

    pub fn last_child(&self) -> Option<Node> {
        let last = self.document.inner.borrow().children(self.id).last().copied();
        last.map(|id| self.sibling(id))
    }

    fn sibling_at(&self, offset: isize) -> Option<Node> {
        let id = {
            let inner = self.document.inner.borrow();
            let parent = inner.parent(self.id)?;
            let siblings = inner.children(parent);
            let pos = siblings.iter().position(|c| *c == self.id)?.checked_add_signed(offset)?;
            siblings.get(pos).copied()?
        };
        Some(self.sibling(id))
    }

    pub fn next_sibling(&self) -> Option<Node> {
        self.sibling_at(1)
    }

    pub fn previous_sibling(&self) -> Option<Node> {
        self.sibling_at(-1)
    }

    /// Whether `other` is this node or one of its descendants.
    pub fn contains(&self, other: &Node) -> bool {
        self.document.ptr_eq(&other.document)
            && self
                .document
                .inner
                .borrow()
                .is_inclusive_ancestor(self.id, other.id)
    }

    /// Whether the node is reachable from the document root.
    pub fn is_connected(&self) -> bool {
        let inner = self.document.inner.borrow();
        let root = inner.root;
        inner.is_inclusive_ancestor(root, self.id)
    }

    /// All descendants in document (pre-)order, excluding `self`.
    pub fn descendants(&self) -> Vec<Node> {
        let mut ids = Vec::new();
        self.document.inner.borrow().collect_descendants(self.id, &mut ids);
        ids.into_iter().map(|id| self.sibling(id)).collect()
    }

    // ─── Mutation ──────────────────────────────────────────────────────────────

    pub fn append_child(&self, child: &Node) {
        self.insert_at(child, None);
    }

    pub fn prepend_child(&self, child: &Node) {
        let first = self.first_child();
        match first {
            Some(first) if first != *child => self.insert_before(child, Some(&first)),
            Some(_) => {}
            None => self.append_child(child),
        }
    }

    /// Insert `child` before `reference` (appends when `reference` is `None`
    /// or not a child of this node).
    pub fn insert_before(&self, child: &Node, reference: Option<&Node>) {
        self.insert_at(child, reference.map(|r| r.id));
    }

    fn insert_at(&self, child: &Node, reference: Option<NodeId>) {
        if !self.document.ptr_eq(&child.document) {
            tracing::warn!("refusing to insert a node from another document");
            return;
        }
        let mut inner = self.document.inner.borrow_mut();
        if inner.slot(self.id).is_none() || inner.slot(child.id).is_none() {
            tracing::debug!(parent = ?self.id, child = ?child.id, "insertion involving a destroyed node ignored");
            return;
        }
        if inner.is_inclusive_ancestor(child.id, self.id) {
            tracing::warn!(node = ?child.id, "refusing to insert a node into its own subtree");
            return;
        }
        if reference == Some(child.id) {
            return;
        }
        inner.detach(child.id);
        inner.attach(self.id, child.id, reference);
    }

    /// Detach from the parent. The subtree stays intact and can be reinserted.
    pub fn remove(&self) {
        self.document.inner.borrow_mut().detach(self.id);
    }

    /// Detach and free the whole subtree, dropping its listeners. Handles to
    /// destroyed nodes stay safe to hold: they read as detached and empty, and
    /// mutations through them are ignored. Returns the number of nodes freed.
    pub fn destroy(&self) -> usize {
        self.document.inner.borrow_mut().release(self.id)
    }

    // ─── Attributes ────────────────────────────────────────────────────────────

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        match self.document.inner.borrow().kind(self.id) {
            Some(NodeKind::Element { attributes, .. }) => attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        let mut inner = self.document.inner.borrow_mut();
        if let Some(NodeKind::Element { attributes, .. }) = inner.slot_mut(self.id).map(|s| &mut s.kind) {
            match attributes.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        let mut inner = self.document.inner.borrow_mut();
        if let Some(NodeKind::Element { attributes, .. }) = inner.slot_mut(self.id).map(|s| &mut s.kind) {
            attributes.retain(|(n, _)| n != name);
        }
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        match self.document.inner.borrow().kind(self.id) {
            Some(NodeKind::Element { attributes, .. }) => attributes.clone(),
            _ => Vec::new(),
        }
    }

    // ─── Queries ───────────────────────────────────────────────────────────────

    /// Descendants matching a simple selector list, in document order.
    pub fn query_selector_all(&self, selector: &str) -> Vec<Node> {
        let selectors = parse_selector_list(selector);
        if selectors.is_empty() {
            return Vec::new();
        }
        self.descendants()
            .into_iter()
            .filter(|node| selectors.iter().any(|s| s.matches(node)))
            .collect()
    }

    pub fn query_selector(&self, selector: &str) -> Option<Node> {
        self.query_selector_all(selector).into_iter().next()
    }

    /// Whether this node itself matches a simple selector list.
    pub fn matches(&self, selector: &str) -> bool {
        parse_selector_list(selector).iter().any(|s| s.matches(self))
    }

    // ─── Serialization ─────────────────────────────────────────────────────────

    pub fn text_content(&self) -> String {
        let inner = self.document.inner.borrow();
        let mut out = String::new();
        collect_text(&inner, self.id, &mut out);
        out
    }

    pub fn inner_html(&self) -> String {
        let inner = self.document.inner.borrow();
        let mut out = String::new();
        let raw = matches!(
            inner.kind(self.id),
            Some(NodeKind::Element { tag, .. }) if RAW_TEXT_ELEMENTS.contains(&tag.as_str())
        );
        for child in inner.children(self.id) {
            serialize(&inner, *child, raw, &mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let inner = self.document.inner.borrow();
        let mut out = String::new();
        serialize(&inner, self.id, false, &mut out);
        out
    }

    // ─── Listeners ─────────────────────────────────────────────────────────────

    pub fn add_event_listener(&self, event: &str, callback: impl Fn(&Event) + 'static) -> ListenerId {
        let mut inner = self.document.inner.borrow_mut();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.listeners.push(ListenerEntry {
            id,
            node: self.id,
            event: event.to_string(),
            callback: Rc::new(callback),
        });
        id
    }

    /// Returns `false` when the listener was not registered.
    pub fn remove_event_listener(&self, listener: ListenerId) -> bool {
        let mut inner = self.document.inner.borrow_mut();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| l.id != listener);
        inner.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.document
            .inner
            .borrow()
            .listeners
            .iter()
            .filter(|l| l.node == self.id)
            .count()
    }

    /// Fire `event` at this node, bubbling to ancestors. Returns the number of
    /// listeners invoked.
    pub fn dispatch_event(&self, event: &str, detail: Value) -> usize {
        let path: Vec<NodeId> = {
            let inner = self.document.inner.borrow();
            let mut path = Vec::new();
            let mut current = inner.slot(self.id).map(|_| self.id);
            while let Some(id) = current {
                path.push(id);
                current = inner.parent(id);
            }
            path
        };

        let mut invoked = 0;
        for node in path {
            // Snapshot so listeners may add/remove listeners while running.
            let callbacks: Vec<ListenerFn> = self
                .document
                .inner
                .borrow()
                .listeners
                .iter()
                .filter(|l| l.node == node && l.event == event)
                .map(|l| Rc::clone(&l.callback))
                .collect();

            let evt = Event {
                kind: event.to_string(),
                target: self.clone(),
                current_target: self.sibling(node),
                detail: detail.clone(),
            };
            for callback in callbacks {
                callback(&evt);
                invoked += 1;
            }
        }
        invoked
    }
}

fn collect_text(inner: &DocumentInner, id: NodeId, out: &mut String) {
    for child in inner.children(id) {
        match inner.kind(*child) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Element { .. } | NodeKind::Root) => collect_text(inner, *child, out),
            Some(NodeKind::Comment(_)) | None => {}
        }
    }
}

fn serialize(inner: &DocumentInner, id: NodeId, raw_text: bool, out: &mut String) {
    let Some(slot) = inner.slot(id) else {
        return;
    };
    match &slot.kind {
        NodeKind::Root => {
            for child in &slot.children {
                serialize(inner, *child, false, out);
            }
        }
        NodeKind::Text(text) => {
            if raw_text {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::Element { tag, attributes } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }
            let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
            for child in &slot.children {
                serialize(inner, *child, raw, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl SimpleSelector {
    fn matches(&self, node: &Node) -> bool {
        let Some(tag) = node.tag_name() else {
            return false;
        };
        if let Some(expected) = &self.tag {
            if *expected != "*" && !expected.eq_ignore_ascii_case(&tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.get_attribute("id").as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = node.get_attribute("class").unwrap_or_default();
            let classes: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        self.attributes.iter().all(|(name, value)| {
            match (node.get_attribute(name), value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == *expected,
                (None, _) => false,
            }
        })
    }
}

lazy_static! {
    static ref SELECTOR_PART_RE: Regex = Regex::new(
        r#"^(?:#([\w-]+)|\.([\w-]+)|\[\s*([\w:-]+)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\]\s]*)))?\s*\])"#
    )
    .unwrap();
    static ref SELECTOR_TAG_RE: Regex = Regex::new(r"^(\*|[a-zA-Z][\w-]*)").unwrap();
}

fn parse_selector_list(selector: &str) -> Vec<SimpleSelector> {
    selector
        .split(',')
        .filter_map(|part| parse_simple_selector(part.trim()))
        .collect()
}

fn parse_simple_selector(mut input: &str) -> Option<SimpleSelector> {
    if input.is_empty() {
        return None;
    }
    let mut selector = SimpleSelector::default();

    if let Some(m) = SELECTOR_TAG_RE.find(input) {
        selector.tag = Some(m.as_str().to_string());
        input = &input[m.end()..];
    }

    while !input.is_empty() {
        let caps = SELECTOR_PART_RE.captures(input)?;
        let whole = caps.get(0)?;
        if let Some(id) = caps.get(1) {
            selector.id = Some(id.as_str().to_string());
        } else if let Some(class) = caps.get(2) {
            selector.classes.push(class.as_str().to_string());
        } else if let Some(name) = caps.get(3) {
            let value = caps
                .get(4)
                .or_else(|| caps.get(5))
                .or_else(|| caps.get(6))
                .map(|m| m.as_str().to_string());
            selector.attributes.push((name.as_str().to_string(), value));
        }
        input = &input[whole.end()..];
    }

    Some(selector)
}
