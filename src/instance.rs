//! # Template Instance
//!
//! Owns a parsed template's section tree and keeps every bound container in
//! sync with it.
//!
//! ## Lifecycle
//!
//! Unbound → Bound (one or more containers) → Disposed. Disposal is terminal:
//! bindings are released, subscriptions dropped and the tree cleared.
//!
//! ## Change propagation
//!
//! Each observable a section depends on is subscribed once. When it changes:
//!
//! 1. Dependent sections nested in another dependent are skipped; rebuilding
//!    the outer one replaces them anyway.
//! 2. Each remaining section drops its subtree and re-runs its rule against
//!    its stored match and scope.
//! 3. The fragments displaying those sections are re-rendered into every
//!    bound container, outermost only.
//! 4. One [`FragmentChange`] is emitted per patched (fragment, container).
//!
//! Changes raised while a rebuild is running (an expression assigning to an
//! observable, say) are queued and drained before the outermost notification
//! returns.

use futures_util::future::join_all;
use futures_util::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::binding::{BindContext, ContainerBinding};
use crate::document::Node;
use crate::error::EngineError;
use crate::escape::unmask;
use crate::observable::{ObservableId, Subscription};
use crate::render::{EngineCore, RenderContext};
use crate::scope::Scope;
use crate::tree::{FragmentId, PendingOutput, Piece, RenderTree, SectionId};
use crate::value::Value;

/// Guards against expressions that keep re-triggering their own updates.
const MAX_PROPAGATION_ROUNDS: usize = 100;

lazy_static! {
    static ref KEY_SUFFIX_RE: Regex = Regex::new(r"^\d+-\d+$").unwrap();
}

#[derive(Debug, Clone)]
pub struct FragmentChange {
    pub fragment: FragmentId,
    pub container: Node,
    /// Top-level nodes now inside the fragment's region.
    pub nodes: Vec<Node>,
}

type ChangeListener = Rc<dyn Fn(&FragmentChange)>;

struct ObservableTracking {
    subscription: Subscription<Value>,
    sections: BTreeSet<SectionId>,
}

struct InstanceState {
    core: Rc<EngineCore>,
    scope: Scope,
    tree: RenderTree,
    bindings: Vec<ContainerBinding>,
    trackings: HashMap<ObservableId, ObservableTracking>,
    disposed: bool,
}

struct Shared {
    state: RefCell<InstanceState>,
    queue: RefCell<VecDeque<ObservableId>>,
    listeners: RefCell<Vec<(u64, ChangeListener)>>,
    next_listener: Cell<u64>,
}

#[derive(Clone)]
pub struct TemplateInstance {
    shared: Rc<Shared>,
}

/// Returned by [`TemplateInstance::on_fragment_change`]. Dropping the handle
/// keeps the listener registered; call [`unsubscribe`](Self::unsubscribe).
pub struct ListenerHandle {
    id: u64,
    shared: Weak<Shared>,
}

impl ListenerHandle {
    pub fn unsubscribe(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut listeners = shared.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC SURFACE
// ═══════════════════════════════════════════════════════════════════════════════

impl TemplateInstance {
    pub(crate) fn new(core: Rc<EngineCore>, scope: Scope, mut tree: RenderTree) -> Self {
        let created = tree.take_created();
        let shared = Rc::new(Shared {
            state: RefCell::new(InstanceState {
                core,
                scope,
                tree,
                bindings: Vec::new(),
                trackings: HashMap::new(),
                disposed: false,
            }),
            queue: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        });

        let weak = Rc::downgrade(&shared);
        shared.state.borrow_mut().track(&created, &weak);
        TemplateInstance { shared }
    }

    /// Insert the template into `container` and attach refs, injections and
    /// listeners.
    pub fn bind(&self, container: &Node) -> Result<(), EngineError> {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            if state.bindings.iter().any(|b| b.container == *container) {
                return Err(EngineError::AlreadyBound);
            }

            let prefix = state.core.key_prefix();
            let binding = ContainerBinding::attach(
                container,
                &BindContext {
                    tree: &state.tree,
                    scope: &state.scope,
                    prefix: &prefix,
                },
            );
            state.bindings.push(binding);
        }
        self.shared.flush();
        Ok(())
    }

    /// Detach `container`'s listeners and release its refs. The rendered
    /// nodes stay in the container.
    pub fn unbind(&self, container: &Node) -> Result<(), EngineError> {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            let Some(index) = state.bindings.iter().position(|b| b.container == *container) else {
                return Err(EngineError::NotBound);
            };
            let binding = state.bindings.remove(index);
            binding.detach(&state.scope);
        }
        self.shared.flush();
        Ok(())
    }

    /// Current markup of the whole template, without boundary markers or
    /// directive keys.
    pub fn get_template(&self) -> String {
        let state = self.shared.state.borrow();
        let Some(root) = state.tree.root() else {
            return String::new();
        };
        let markup = state.tree.render_fragment(root, false);
        strip_directive_keys(&unmask(&markup), &state.core.key_prefix())
    }

    pub fn on_fragment_change(&self, listener: impl Fn(&FragmentChange) + 'static) -> ListenerHandle {
        let id = self.shared.next_listener.get();
        self.shared.next_listener.set(id + 1);
        self.shared
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        ListenerHandle {
            id,
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn dispose(&self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.disposed {
                return;
            }
            for binding in std::mem::take(&mut state.bindings) {
                binding.detach(&state.scope);
            }
            for (_, tracking) in state.trackings.drain() {
                tracking.subscription.unsubscribe();
            }
            state.tree.clear();
            state.disposed = true;
        }
        self.shared.queue.borrow_mut().clear();
        self.shared.listeners.borrow_mut().clear();
        tracing::debug!("template instance disposed");
    }

    pub fn is_bound(&self) -> bool {
        !self.shared.state.borrow().bindings.is_empty()
    }

    pub fn is_bound_to(&self, container: &Node) -> bool {
        self.shared
            .state
            .borrow()
            .bindings
            .iter()
            .any(|b| b.container == *container)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state.borrow().disposed
    }

    /// Number of live sections.
    pub fn sections(&self) -> usize {
        self.shared.state.borrow().tree.section_count()
    }

    /// Number of observables currently subscribed.
    pub fn tracked_observables(&self) -> usize {
        self.shared.state.borrow().trackings.len()
    }

    /// Event listeners attached to `container` by this instance.
    pub fn listener_count(&self, container: &Node) -> usize {
        self.shared
            .state
            .borrow()
            .bindings
            .iter()
            .find(|b| b.container == *container)
            .map_or(0, ContainerBinding::listener_count)
    }

    pub fn scope(&self) -> Scope {
        self.shared.state.borrow().scope.clone()
    }

    /// Wait for every pending async evaluation and apply the results that
    /// are still current. A result whose section was rebuilt (or whose
    /// instance was disposed) while it was pending is discarded.
    pub async fn settle(&self) {
        loop {
            let pending = {
                let mut state = self.shared.state.borrow_mut();
                if state.disposed {
                    return;
                }
                state.tree.take_pending()
            };
            if pending.is_empty() {
                return;
            }

            let results = join_all(pending.into_iter().map(
                |PendingOutput {
                     section,
                     generation,
                     output,
                 }| output.map(move |pieces| (section, generation, pieces)),
            ))
            .await;

            let changes = {
                let mut state = self.shared.state.borrow_mut();
                if state.disposed {
                    return;
                }
                state.apply_outputs(results)
            };
            self.shared.emit(&changes);
            self.shared.flush();
        }
    }
}

impl fmt::Debug for TemplateInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("TemplateInstance")
            .field("tree", &state.tree)
            .field("bindings", &state.bindings.len())
            .field("trackings", &state.trackings.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

fn strip_directive_keys(markup: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(pos) = rest.find(prefix) {
        let key_end = rest[pos + prefix.len()..]
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .map_or(rest.len(), |n| pos + prefix.len() + n);
        let is_key = rest[..pos].ends_with(' ')
            && KEY_SUFFIX_RE.is_match(&rest[pos + prefix.len()..key_end]);
        if is_key {
            out.push_str(&rest[..pos - 1]);
        } else {
            out.push_str(&rest[..key_end]);
        }
        rest = &rest[key_end..];
    }
    out.push_str(rest);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPAGATION
// ═══════════════════════════════════════════════════════════════════════════════

impl Shared {
    fn notify(self: &Rc<Self>, id: ObservableId) {
        self.queue.borrow_mut().push_back(id);
        self.flush();
    }

    /// Drain queued changes. Whoever holds the state already is draining, so
    /// a nested call only queues.
    fn flush(self: &Rc<Self>) {
        let mut rounds = 0;
        loop {
            let changes = {
                let Ok(mut state) = self.state.try_borrow_mut() else {
                    return;
                };
                let weak = Rc::downgrade(self);
                let mut changes = Vec::new();
                loop {
                    let next = self.queue.borrow_mut().pop_front();
                    let Some(id) = next else {
                        break;
                    };
                    if state.disposed {
                        continue;
                    }
                    rounds += 1;
                    if rounds > MAX_PROPAGATION_ROUNDS {
                        tracing::warn!(
                            rounds,
                            "observable updates keep re-triggering; dropping queued changes"
                        );
                        self.queue.borrow_mut().clear();
                        break;
                    }
                    changes.extend(state.handle_change(id, &weak));
                }
                changes
            };

            self.emit(&changes);
            if self.queue.borrow().is_empty() {
                return;
            }
        }
    }

    fn emit(&self, changes: &[FragmentChange]) {
        if changes.is_empty() {
            return;
        }
        let listeners: Vec<ChangeListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for change in changes {
            for listener in &listeners {
                listener(change);
            }
        }
    }
}

impl InstanceState {
    /// Subscribe to the observables of `ids` and record them as dependents.
    fn track(&mut self, ids: &[SectionId], weak: &Weak<Shared>) {
        let InstanceState {
            tree, trackings, ..
        } = self;
        for id in ids {
            let Some(section) = tree.section(*id) else {
                continue;
            };
            for obs in &section.observables {
                let observable_id = obs.id();
                trackings
                    .entry(observable_id)
                    .or_insert_with(|| {
                        let weak = weak.clone();
                        let subscription = obs.subscribe(move |_| {
                            if let Some(shared) = weak.upgrade() {
                                shared.notify(observable_id);
                            }
                        });
                        ObservableTracking {
                            subscription,
                            sections: BTreeSet::new(),
                        }
                    })
                    .sections
                    .insert(*id);
            }
        }
    }

    fn untrack(&mut self, id: SectionId, observables: impl IntoIterator<Item = ObservableId>) {
        for observable_id in observables {
            if let Some(tracking) = self.trackings.get_mut(&observable_id) {
                tracking.sections.remove(&id);
            }
        }
    }

    fn handle_change(&mut self, id: ObservableId, weak: &Weak<Shared>) -> Vec<FragmentChange> {
        let Some(tracking) = self.trackings.get(&id) else {
            return Vec::new();
        };
        let dependents: BTreeSet<SectionId> = tracking
            .sections
            .iter()
            .copied()
            .filter(|s| self.tree.section(*s).is_some())
            .collect();
        let roots: Vec<SectionId> = dependents
            .iter()
            .copied()
            .filter(|s| !self.has_ancestor_in(*s, &dependents))
            .collect();

        tracing::debug!(observable = ?id, dependents = dependents.len(), rebuilt = roots.len(), "observable changed");

        let mut touched = Vec::new();
        for section in roots {
            if self.tree.section(section).is_none() {
                continue;
            }
            self.rebuild(section, weak);
            touched.extend(self.tree.display_fragment(section));
        }

        let changes = self.patch_fragments(touched);
        self.collect_garbage();
        changes
    }

    fn has_ancestor_in(&self, id: SectionId, set: &BTreeSet<SectionId>) -> bool {
        let mut current = self.tree.section(id).and_then(|s| s.parent);
        while let Some(parent) = current {
            if set.contains(&parent) {
                return true;
            }
            current = self.tree.section(parent).and_then(|s| s.parent);
        }
        false
    }

    fn rebuild(&mut self, id: SectionId, weak: &Weak<Shared>) {
        let previous: Vec<ObservableId> = match self.tree.section(id) {
            Some(section) => section.observables.iter().map(|o| o.id()).collect(),
            None => return,
        };
        self.untrack(id, previous);

        for (removed, section) in self.tree.dispose_children(id) {
            let observables: Vec<ObservableId> = section.observables.iter().map(|o| o.id()).collect();
            self.untrack(removed, observables);
        }
        if let Some(section) = self.tree.section_mut(id) {
            section.generation += 1;
        }

        let core = Rc::clone(&self.core);
        let result = RenderContext::new(&core, &mut self.tree).execute_section(id);
        if let Err(err) = result {
            tracing::error!(code = err.code(), error = %err, "directive rejected during rebuild");
            if let Some(section) = self.tree.section_mut(id) {
                section.output.clear();
            }
        }

        let mut created = self.tree.take_created();
        created.push(id);
        self.track(&created, weak);
    }

    /// Patch the outermost of `touched` into every container.
    fn patch_fragments(&mut self, mut touched: Vec<FragmentId>) -> Vec<FragmentChange> {
        touched.sort();
        touched.dedup();
        let outermost: Vec<FragmentId> = touched
            .iter()
            .copied()
            .filter(|f| !touched.iter().any(|other| other != f && self.tree.is_fragment_within(*f, *other)))
            .collect();

        let prefix = self.core.key_prefix();
        let ctx = BindContext {
            tree: &self.tree,
            scope: &self.scope,
            prefix: &prefix,
        };

        let mut changes = Vec::new();
        for fragment in outermost {
            for binding in &mut self.bindings {
                if let Some(nodes) = binding.patch(fragment, &ctx) {
                    changes.push(FragmentChange {
                        fragment,
                        container: binding.container.clone(),
                        nodes,
                    });
                }
            }
        }
        changes
    }

    fn apply_outputs(&mut self, results: Vec<(SectionId, u64, Vec<Piece>)>) -> Vec<FragmentChange> {
        let mut touched = Vec::new();
        for (id, generation, pieces) in results {
            let current = self
                .tree
                .section_mut(id)
                .filter(|s| s.generation == generation);
            let Some(section) = current else {
                tracing::debug!(section = ?id, generation, "discarding superseded async output");
                continue;
            };
            section.output = pieces;
            touched.extend(self.tree.display_fragment(id));
        }
        self.patch_fragments(touched)
    }

    fn collect_garbage(&mut self) {
        let tree = &self.tree;
        self.trackings.retain(|_, tracking| {
            tracking.sections.retain(|s| tree.section(*s).is_some());
            if tracking.sections.is_empty() {
                tracking.subscription.unsubscribe();
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_directive_keys() {
        let markup = "<p data-tpl-node-3-0 class=\"a\" data-tpl-node-12-1>data-tpl-node-x</p>";
        assert_eq!(
            strip_directive_keys(markup, "data-tpl-node-"),
            "<p class=\"a\">data-tpl-node-x</p>"
        );
    }
}
