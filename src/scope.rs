//! # Scope
//!
//! Hierarchical name → value environment expressions evaluate against.
//!
//! A scope is a cheap-clone handle. Child scopes hold their own locals and
//! fall back to the parent chain on lookup. Writes are copy-on-branch: `set`
//! and `delete` only ever touch the scope they are called on, so a child
//! shadows a parent binding instead of replacing it.
//!
//! Scopes built from a [`ScopeProvider`] keep a back-reference to it and
//! forward their own assignments through [`ScopeProvider::write_binding`].

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Object exposing a fixed set of named bindings (data fields and bound
/// methods) to templates.
pub trait ScopeProvider {
    fn bindings(&self) -> Vec<(String, Value)>;

    /// Accept an assignment made from a template. Returns `false` when the
    /// provider does not own `name`.
    fn write_binding(&self, _name: &str, _value: &Value) -> bool {
        false
    }
}

struct ScopeInner {
    vars: HashMap<String, Value>,
    parent: Option<Scope>,
    origin: Option<Rc<dyn ScopeProvider>>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Rc<RefCell<ScopeInner>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::with_parts(HashMap::new(), None, None)
    }

    fn with_parts(
        vars: HashMap<String, Value>,
        parent: Option<Scope>,
        origin: Option<Rc<dyn ScopeProvider>>,
    ) -> Self {
        Scope {
            inner: Rc::new(RefCell::new(ScopeInner {
                vars,
                parent,
                origin,
            })),
        }
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::with_parts(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            None,
            None,
        )
    }

    /// Build a scope from the bindings of `provider`, keeping it as the
    /// write-through origin.
    pub fn from_provider(provider: Rc<dyn ScopeProvider>) -> Self {
        let mut vars = HashMap::new();
        for (name, value) in provider.bindings() {
            if vars.insert(name.clone(), value).is_some() {
                tracing::warn!(name = %name, "scope provider exposes a binding twice, keeping the last");
            }
        }
        Self::with_parts(vars, None, Some(provider))
    }

    /// Top-level keys of a JSON object become variables. Anything else yields
    /// an empty scope.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => {
                Self::from_pairs(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
            other => {
                tracing::warn!(kind = ?other, "scope data is not an object, starting empty");
                Self::new()
            }
        }
    }

    /// Merge several sources into a fresh scope, left to right.
    pub fn combine<'a>(sources: impl IntoIterator<Item = &'a Scope>) -> Self {
        let scope = Scope::new();
        for source in sources {
            scope.merge(source);
        }
        scope
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner.borrow().parent.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get(&self, name: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        match inner.vars.get(name) {
            Some(value) => Some(value.clone()),
            None => inner.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        let inner = self.inner.borrow();
        inner.vars.contains_key(name) || inner.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// Whether `name` is bound in this scope itself, ignoring parents.
    pub fn has_own(&self, name: &str) -> bool {
        self.inner.borrow().vars.contains_key(name)
    }

    /// Every visible name, deduplicated and sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names.into_iter().collect()
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        let inner = self.inner.borrow();
        names.extend(inner.vars.keys().cloned());
        if let Some(parent) = &inner.parent {
            parent.collect_names(names);
        }
    }

    /// Visible bindings with child scopes shadowing parents.
    pub fn variables(&self) -> Vec<(String, Value)> {
        self.names()
            .into_iter()
            .filter_map(|name| self.get(&name).map(|value| (name, value)))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bind `name` in this scope, writing through to the origin provider when
    /// there is one. Parent scopes are never modified.
    pub fn set(&self, name: &str, value: Value) {
        let origin = {
            let mut inner = self.inner.borrow_mut();
            inner.vars.insert(name.to_string(), value.clone());
            inner.origin.clone()
        };
        // Borrow released: the provider may read the scope back.
        if let Some(origin) = origin {
            if !origin.write_binding(name, &value) {
                tracing::debug!(name, "scope origin declined write-through");
            }
        }
    }

    /// Bind `name` in this scope only, shadowing any parent binding.
    pub fn define(&self, name: &str, value: Value) {
        self.inner.borrow_mut().vars.insert(name.to_string(), value);
    }

    /// Remove this scope's own binding of `name`. Returns whether one existed.
    /// A parent binding of the same name becomes visible again.
    pub fn delete(&self, name: &str) -> bool {
        self.inner.borrow_mut().vars.remove(name).is_some()
    }

    /// Copy every visible binding of `source` into this scope. Conflicting
    /// names are reported; the incoming value wins.
    pub fn merge(&self, source: &Scope) {
        for (name, value) in source.variables() {
            if let Some(existing) = self.get(&name) {
                if !existing.strict_equals(&value) {
                    tracing::warn!(name = %name, "scope merge overrides an existing binding");
                }
            }
            self.define(&name, value);
        }
    }

    pub fn child(&self) -> Scope {
        Self::with_parts(HashMap::new(), Some(self.clone()), None)
    }

    pub fn create_child<K: Into<String>>(&self, locals: impl IntoIterator<Item = (K, Value)>) -> Scope {
        Self::with_parts(
            locals.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            Some(self.clone()),
            None,
        )
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let mut names: Vec<&String> = inner.vars.keys().collect();
        names.sort();
        f.debug_struct("Scope")
            .field("vars", &names)
            .field("has_parent", &inner.parent.is_some())
            .field("has_origin", &inner.origin.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Counter {
        count: RefCell<f64>,
    }

    impl ScopeProvider for Counter {
        fn bindings(&self) -> Vec<(String, Value)> {
            vec![
                ("count".to_string(), Value::from(*self.count.borrow())),
                (
                    "double".to_string(),
                    Value::function("double", |args| {
                        Ok(Value::from(args.first().map(Value::to_number).unwrap_or(0.0) * 2.0))
                    }),
                ),
            ]
        }

        fn write_binding(&self, name: &str, value: &Value) -> bool {
            if name == "count" {
                *self.count.borrow_mut() = value.to_number();
                return true;
            }
            false
        }
    }

    #[test]
    fn test_child_does_not_touch_parent() {
        let parent = Scope::from_pairs([("a", Value::from(1))]);
        let child = parent.create_child([("b", Value::from(2))]);

        assert_eq!(child.get("a"), Some(Value::from(1)));
        assert_eq!(child.get("b"), Some(Value::from(2)));
        assert!(!parent.has("b"));

        child.define("a", Value::from(10));
        assert_eq!(child.get("a"), Some(Value::from(10)));
        assert_eq!(parent.get("a"), Some(Value::from(1)));
    }

    #[test]
    fn test_set_in_child_leaves_parent_unaffected() {
        let parent = Scope::from_pairs([("x", Value::from(1))]);
        let child = parent.create_child([("y", Value::Null)]);
        child.set("x", Value::from(99));
        child.set("fresh", Value::from(true));

        assert_eq!(child.get("x"), Some(Value::from(99)));
        assert_eq!(parent.get("x"), Some(Value::from(1)));
        assert!(!parent.has("fresh"));
        assert!(child.has_own("fresh"));

        assert!(child.delete("x"));
        assert_eq!(child.get("x"), Some(Value::from(1)));
        assert!(!child.delete("x"));
        assert!(parent.has("x"));
    }

    #[test]
    fn test_observable_binding_is_shared_with_children() {
        let parent = Scope::from_pairs([("n", Value::observable(1))]);
        let child = parent.child();
        if let Some(Value::Observable(obs)) = child.get("n") {
            obs.set(Value::from(2));
        }
        assert_eq!(parent.get("n").map(|v| v.unwrapped()), Some(Value::from(2)));
    }

    #[test]
    fn test_provider_write_through() {
        let provider = Rc::new(Counter {
            count: RefCell::new(3.0),
        });
        let scope = Scope::from_provider(provider.clone());
        assert_eq!(scope.get("count"), Some(Value::from(3)));
        assert!(matches!(scope.get("double"), Some(Value::Function(_))));

        scope.set("count", Value::from(9));
        assert_eq!(*provider.count.borrow(), 9.0);
        assert_eq!(scope.get("count"), Some(Value::from(9)));

        // A child shadows locally and never reaches the provider.
        let child = scope.create_child([("x", Value::Null)]);
        child.set("count", Value::from(20));
        assert_eq!(*provider.count.borrow(), 9.0);
        assert_eq!(scope.get("count"), Some(Value::from(9)));
    }

    #[test]
    fn test_merge_later_wins_and_combine() {
        let a = Scope::from_pairs([("x", Value::from(1)), ("y", Value::from(2))]);
        let b = Scope::from_pairs([("y", Value::from(3))]);
        let combined = Scope::combine([&a, &b]);
        assert_eq!(combined.get("x"), Some(Value::from(1)));
        assert_eq!(combined.get("y"), Some(Value::from(3)));
        assert_eq!(combined.names(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_delete_and_from_json() {
        let scope = Scope::from_json(serde_json::json!({ "user": { "name": "Ada" }, "n": 2 }));
        assert!(scope.has("user"));
        assert!(scope.delete("user"));
        assert!(!scope.delete("user"));
        assert!(!scope.has("user"));

        let empty = Scope::from_json(serde_json::json!([1, 2]));
        assert!(empty.names().is_empty());
    }
}
