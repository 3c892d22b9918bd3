//! Static analyses over parsed snippets, run on the `oxc` AST before it is
//! lowered.

use std::collections::HashSet;

use lazy_static::lazy_static;
use oxc_ast::ast::{
    ArrowFunctionExpression, AwaitExpression, BindingIdentifier, Function, IdentifierReference,
    ReturnStatement, VariableDeclarator,
};
use oxc_ast_visit::{walk, Visit};
use oxc_syntax::scope::ScopeFlags;

lazy_static! {
    /// Names never treated as template dependencies.
    pub static ref RESERVED_NAMES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("undefined");

        // Built-in globals
        s.insert("Math");
        s.insert("JSON");
        s.insert("Object");
        s.insert("Array");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("console");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("NaN");
        s.insert("Infinity");

        // Injected by event bindings
        s.insert("event");
        s
    };
}

/// Collects free identifiers: names read by the snippet that are neither
/// reserved nor bound by an arrow parameter or a declaration.
pub struct FreeIdentifiers {
    bound: Vec<HashSet<String>>,
    seen: HashSet<String>,
    pub names: Vec<String>,
}

impl FreeIdentifiers {
    pub fn new() -> Self {
        Self {
            bound: vec![HashSet::new()],
            seen: HashSet::new(),
            names: Vec::new(),
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|frame| frame.contains(name))
    }
}

impl<'a> Visit<'a> for FreeIdentifiers {
    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        self.bound.push(HashSet::new());
        walk::walk_arrow_function_expression(self, arrow);
        self.bound.pop();
    }

    fn visit_variable_declarator(&mut self, decl: &VariableDeclarator<'a>) {
        // The initializer cannot see the name it initializes.
        if let Some(init) = &decl.init {
            self.visit_expression(init);
        }
        self.visit_binding_pattern(&decl.id);
    }

    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        if let Some(frame) = self.bound.last_mut() {
            frame.insert(ident.name.to_string());
        }
    }

    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        let name = ident.name.to_string();
        if RESERVED_NAMES.contains(name.as_str()) || self.is_bound(&name) {
            return;
        }
        if self.seen.insert(name.clone()) {
            self.names.push(name);
        }
    }
}

/// Detects `await` anywhere in the snippet.
#[derive(Default)]
pub struct AwaitFinder {
    pub found: bool,
}

impl<'a> Visit<'a> for AwaitFinder {
    fn visit_await_expression(&mut self, _expr: &AwaitExpression<'a>) {
        self.found = true;
    }
}

/// Detects a `return` belonging to the snippet itself (not to a nested
/// function).
#[derive(Default)]
pub struct ReturnFinder {
    pub found: bool,
}

impl<'a> Visit<'a> for ReturnFinder {
    fn visit_return_statement(&mut self, _stmt: &ReturnStatement<'a>) {
        self.found = true;
    }

    fn visit_arrow_function_expression(&mut self, _arrow: &ArrowFunctionExpression<'a>) {}

    fn visit_function(&mut self, _func: &Function<'a>, _flags: ScopeFlags) {}
}

#[cfg(test)]
mod tests {
    use crate::expr_lowerer::compile;

    fn free(source: &str) -> Vec<String> {
        compile(source).unwrap().identifiers
    }

    #[test]
    fn test_free_identifiers_skip_bindings_and_members() {
        assert_eq!(free("items.map(item => item.price * rate)"), vec!["items", "rate"]);
        assert_eq!(free("let total = a + b; return total"), vec!["a", "b"]);
        assert_eq!(free("Math.max(x, event.detail)"), vec!["x"]);
        assert_eq!(free("{ key: value }"), vec!["value"]);
        assert_eq!(free("n ?? undefined"), vec!["n"]);
    }

    #[test]
    fn test_assignment_targets_are_identifiers() {
        assert_eq!(free("count = count + step"), vec!["count", "step"]);
    }

    #[test]
    fn test_await_and_return_detection() {
        assert!(compile("await load(id)").unwrap().is_async);
        assert!(!compile("load(id)").unwrap().is_async);
        assert!(!compile("xs.map(x => { return x })").unwrap().has_return);
        assert!(compile("return 1").unwrap().has_return);
    }
}
