use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::expression::Expression;

/// Parsed expressions keyed by their source text.
///
/// Rebuilding a section re-evaluates the same snippets over and over, so the
/// engine parses each distinct source once and shares the result.
#[derive(Default)]
pub struct ExpressionCache {
    entries: RefCell<HashMap<String, Expression>>,
    hits: Cell<u64>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Expression {
        let source = source.trim();
        if let Some(expr) = self.entries.borrow().get(source) {
            self.hits.set(self.hits.get() + 1);
            return expr.clone();
        }

        let expr = Expression::new(source);
        self.entries
            .borrow_mut()
            .insert(source.to_string(), expr.clone());
        expr
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_source_parsed_once() {
        let cache = ExpressionCache::new();
        cache.get("a + b");
        cache.get(" a + b ");
        cache.get("a - b");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
