//! # Container Binding
//!
//! One copy of an instance's markup inside a host container. Every fragment
//! is inserted between a pair of boundary comments so its region can be
//! replaced on its own. After each insertion the new nodes go through the
//! binding passes in a fixed order:
//!
//! 1. refs: tagged elements are written into the scope
//! 2. injection: tagged elements move into their target (heads before tails)
//! 3. events: listeners are attached once nodes sit in their final position
//!
//! Directive key attributes are removed from the host tree afterwards. When a
//! region is patched, its old nodes are destroyed so their document slots are
//! reused.

use std::collections::{HashMap, HashSet};

use crate::document::{Event, ListenerId, Node, NodeId, NodeKind};
use crate::escape::unmask;
use crate::eval::call_sync;
use crate::expression::Expression;
use crate::rule::{InjectPosition, ResultData};
use crate::scope::Scope;
use crate::tree::{FragmentId, RenderTree, SectionId};
use crate::value::Value;

struct Region {
    start: Node,
    end: Node,
    /// Enclosing region at insertion time.
    parent: Option<FragmentId>,
}

struct BoundListener {
    node: Node,
    id: ListenerId,
}

/// An element carrying directive keys and the region it was rendered in.
struct Tagged {
    node: Node,
    fragment: FragmentId,
    sections: Vec<SectionId>,
}

/// What the binding passes need from the instance.
pub(crate) struct BindContext<'a> {
    pub(crate) tree: &'a RenderTree,
    pub(crate) scope: &'a Scope,
    /// Prefix of directive key attributes.
    pub(crate) prefix: &'a str,
}

pub(crate) struct ContainerBinding {
    pub(crate) container: Node,
    regions: HashMap<FragmentId, Region>,
    listeners: Vec<BoundListener>,
    injected: Vec<(Node, FragmentId)>,
    refs: HashMap<String, Node>,
}

impl ContainerBinding {
    /// Render the whole tree into `container` and run the binding passes.
    pub(crate) fn attach(container: &Node, ctx: &BindContext<'_>) -> Self {
        let mut binding = Self {
            container: container.clone(),
            regions: HashMap::new(),
            listeners: Vec::new(),
            injected: Vec::new(),
            refs: HashMap::new(),
        };

        let Some(root) = ctx.tree.root() else {
            return binding;
        };
        let markup = ctx.tree.render_region(root);
        let context_tag = container.tag_name().unwrap_or_else(|| "body".to_string());
        let nodes = container
            .document()
            .parse_fragment(&unmask(&markup), &context_tag);
        for node in &nodes {
            container.append_child(node);
        }

        let tagged = binding.scan(&nodes, None, ctx.prefix);
        binding.apply(&tagged, ctx);
        tracing::debug!(
            nodes = nodes.len(),
            regions = binding.regions.len(),
            directives = tagged.len(),
            "container bound"
        );
        binding
    }

    /// Replace the region of `fragment` with its current markup. Returns the
    /// newly inserted top-level nodes, or `None` when this container has no
    /// such region.
    pub(crate) fn patch(&mut self, fragment: FragmentId, ctx: &BindContext<'_>) -> Option<Vec<Node>> {
        let (start, end) = {
            let region = self.regions.get(&fragment)?;
            (region.start.clone(), region.end.clone())
        };
        let Some(parent) = start.parent() else {
            tracing::warn!(?fragment, "fragment region detached from the host tree; skipping patch");
            return None;
        };

        let affected: HashSet<FragmentId> = self
            .regions
            .keys()
            .copied()
            .filter(|f| *f == fragment || self.region_within(*f, fragment))
            .collect();

        // Old content: everything between the markers plus nodes this region
        // injected elsewhere.
        let mut removed = Vec::new();
        let mut cursor = start.next_sibling();
        while let Some(node) = cursor {
            if node == end {
                break;
            }
            cursor = node.next_sibling();
            removed.push(node);
        }
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.injected)
            .into_iter()
            .partition(|(_, f)| affected.contains(f));
        self.injected = kept;
        removed.extend(dropped.into_iter().map(|(node, _)| node));

        self.listeners.retain(|l| {
            if removed.iter().any(|r| r.contains(&l.node)) {
                l.node.remove_event_listener(l.id);
                false
            } else {
                true
            }
        });
        let stale: Vec<(String, Node)> = self
            .refs
            .iter()
            .filter(|(_, node)| removed.iter().any(|r| r.contains(node)))
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect();
        for (name, _) in &stale {
            self.refs.remove(name);
        }

        let freed: usize = removed.iter().map(Node::destroy).sum();
        tracing::trace!(?fragment, freed, "region content released");
        self.regions.retain(|f, _| *f == fragment || !affected.contains(f));

        let markup = ctx.tree.render_fragment(fragment, true);
        let context_tag = parent.tag_name().unwrap_or_else(|| "body".to_string());
        let nodes = parent.document().parse_fragment(&unmask(&markup), &context_tag);
        for node in &nodes {
            parent.insert_before(node, Some(&end));
        }

        let tagged = self.scan(&nodes, Some(fragment), ctx.prefix);
        self.apply(&tagged, ctx);

        for (name, node) in stale {
            if !self.refs.contains_key(&name) {
                release_ref(ctx.scope, &name, &node);
            }
        }

        Some(nodes)
    }

    /// Detach listeners and release refs. The inserted nodes stay in place.
    pub(crate) fn detach(self, scope: &Scope) {
        for listener in &self.listeners {
            listener.node.remove_event_listener(listener.id);
        }
        for (name, node) in &self.refs {
            release_ref(scope, name, node);
        }
        tracing::debug!(
            listeners = self.listeners.len(),
            refs = self.refs.len(),
            "container unbound"
        );
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn region_within(&self, fragment: FragmentId, ancestor: FragmentId) -> bool {
        let mut current = self.regions.get(&fragment).and_then(|r| r.parent);
        while let Some(f) = current {
            if f == ancestor {
                return true;
            }
            current = self.regions.get(&f).and_then(|r| r.parent);
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCAN
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register the regions found in `nodes` and collect directive-tagged
    /// elements in document order.
    fn scan(&mut self, nodes: &[Node], base: Option<FragmentId>, prefix: &str) -> Vec<Tagged> {
        let mut stack: Vec<FragmentId> = base.into_iter().collect();
        let mut tagged = Vec::new();
        for node in nodes {
            self.scan_node(node, &mut stack, &mut tagged, prefix);
        }
        tagged
    }

    fn scan_node(&mut self, node: &Node, stack: &mut Vec<FragmentId>, tagged: &mut Vec<Tagged>, prefix: &str) {
        match node.kind() {
            Some(NodeKind::Comment(text)) => {
                let Some((fragment, is_end)) = FragmentId::parse_marker(&text) else {
                    return;
                };
                if is_end {
                    if let Some(region) = self.regions.get_mut(&fragment) {
                        region.end = node.clone();
                    }
                    if stack.last() == Some(&fragment) {
                        stack.pop();
                    }
                } else {
                    self.regions.insert(
                        fragment,
                        Region {
                            start: node.clone(),
                            end: node.clone(),
                            parent: stack.last().copied(),
                        },
                    );
                    stack.push(fragment);
                }
            }
            Some(NodeKind::Element { attributes, .. }) => {
                let sections: Vec<SectionId> = attributes
                    .iter()
                    .filter_map(|(name, _)| SectionId::from_token(name.strip_prefix(prefix)?))
                    .collect();
                if !sections.is_empty() {
                    if let Some(&fragment) = stack.last() {
                        tagged.push(Tagged {
                            node: node.clone(),
                            fragment,
                            sections,
                        });
                    }
                }
                for child in node.children() {
                    self.scan_node(&child, stack, tagged, prefix);
                }
            }
            Some(NodeKind::Text(_) | NodeKind::Root) | None => {}
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BINDING PASSES
    // ═══════════════════════════════════════════════════════════════════════════

    fn apply(&mut self, tagged: &[Tagged], ctx: &BindContext<'_>) {
        let data = |id: &SectionId| ctx.tree.section(*id).map(|s| &s.data);

        // Refs
        for item in tagged {
            for id in &item.sections {
                if let Some(ResultData::Ref { name }) = data(id) {
                    self.refs.insert(name.clone(), item.node.clone());
                    ctx.scope.set(name, Value::Node(item.node.clone()));
                }
            }
        }

        // Injection
        let mut heads = Vec::new();
        let mut tails = Vec::new();
        for item in tagged {
            for id in &item.sections {
                if let Some(ResultData::Injection { target, position }) = data(id) {
                    match position {
                        InjectPosition::Head => heads.push((item, target)),
                        InjectPosition::Tail => tails.push((item, target)),
                    }
                }
            }
        }
        let mut dropped: HashSet<NodeId> = HashSet::new();
        // Prepending in reverse keeps heads in document order.
        for (item, target) in heads.iter().rev() {
            self.inject(item, target, InjectPosition::Head, ctx.scope, &mut dropped);
        }
        for (item, target) in &tails {
            self.inject(item, target, InjectPosition::Tail, ctx.scope, &mut dropped);
        }

        // Events
        for item in tagged {
            if dropped.contains(&item.node.id()) {
                continue;
            }
            for id in &item.sections {
                let Some(section) = ctx.tree.section(*id) else {
                    continue;
                };
                if let ResultData::Event { event, handler } = &section.data {
                    let handler = handler.clone();
                    let scope = section.scope.clone();
                    let listener = item
                        .node
                        .add_event_listener(event, move |evt| run_handler(&handler, &scope, evt));
                    self.listeners.push(BoundListener {
                        node: item.node.clone(),
                        id: listener,
                    });
                }
            }
        }

        for item in tagged {
            for (name, _) in item.node.attributes() {
                if name.starts_with(ctx.prefix) {
                    item.node.remove_attribute(&name);
                }
            }
        }
    }

    fn inject(
        &mut self,
        item: &Tagged,
        target: &str,
        position: InjectPosition,
        scope: &Scope,
        dropped: &mut HashSet<NodeId>,
    ) {
        if dropped.contains(&item.node.id()) {
            return;
        }
        let resolved = self
            .refs
            .get(target)
            .cloned()
            .or_else(|| scope.get(target).and_then(|v| v.as_node().cloned()));

        let Some(target_node) = resolved else {
            tracing::warn!(injection_target = target, "injection target not found; dropping node");
            item.node.destroy();
            dropped.insert(item.node.id());
            return;
        };

        match position {
            InjectPosition::Head => target_node.prepend_child(&item.node),
            InjectPosition::Tail => target_node.append_child(&item.node),
        }
        self.injected.push((item.node.clone(), item.fragment));
    }
}

/// Null `name` in the scope if it still points at `node`.
fn release_ref(scope: &Scope, name: &str, node: &Node) {
    let current = scope.get(name);
    if current.as_ref().and_then(Value::as_node) == Some(node) {
        scope.set(name, Value::Null);
    }
}

fn run_handler(handler: &Expression, scope: &Scope, event: &Event) {
    let event_value = event.to_value();
    let result = handler.execute(scope, &[("event", event_value.clone())]);
    if let Value::Function(func) = result {
        if let Err(err) = call_sync(&func, vec![event_value]) {
            tracing::warn!(handler = handler.source(), error = %err, "event handler failed");
        }
    }
}
