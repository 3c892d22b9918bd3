//! # Expression
//!
//! A code snippet from a directive, parsed once and executable any number of
//! times against different scopes.
//!
//! Construction never fails: a snippet that does not parse is kept with its
//! syntax error and evaluates to `undefined` (with a warning) like any other
//! failing expression.

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::noop_waker_ref;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::{EvalError, EvalResult};
use crate::eval::{run_program, run_sync};
use crate::expr_lowerer::{compile, Snippet};
use crate::observable::Observable;
use crate::scope::Scope;
use crate::value::Value;

/// Outcome of [`Expression::eval`].
pub enum Evaluation {
    Ready(Value),
    /// Waiting on an awaited value. The future logs failures and resolves to
    /// `undefined` for them.
    Pending(LocalBoxFuture<'static, Value>),
}

impl fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluation::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Evaluation::Pending(_) => f.write_str("Pending"),
        }
    }
}

#[derive(Clone)]
pub struct Expression {
    source: Rc<str>,
    compiled: Rc<Result<Snippet, EvalError>>,
}

impl Expression {
    pub fn new(source: &str) -> Self {
        let compiled = compile(source);

        if let Err(err) = &compiled {
            tracing::debug!(source, error = %err, "expression failed to parse");
        }

        Expression {
            source: Rc::from(source),
            compiled: Rc::new(compiled),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parse_error(&self) -> Option<&EvalError> {
        self.compiled.as_ref().as_ref().err()
    }

    /// Whether the snippet contains `await`.
    pub fn is_async(&self) -> bool {
        matches!(self.compiled.as_ref(), Ok(c) if c.is_async)
    }

    /// Whether the snippet is a statement body with an explicit `return`.
    pub fn has_return(&self) -> bool {
        matches!(self.compiled.as_ref(), Ok(c) if c.has_return)
    }

    /// Free identifiers in first-use order.
    pub fn identifiers(&self) -> &[String] {
        match self.compiled.as_ref() {
            Ok(c) => &c.identifiers,
            Err(_) => &[],
        }
    }

    fn context(scope: &Scope, extra: &[(&str, Value)]) -> Scope {
        // Locals always get their own scope so declarations stay isolated.
        scope.create_child(extra.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    /// Evaluate synchronously, surfacing failures.
    pub fn try_execute(&self, scope: &Scope, extra: &[(&str, Value)]) -> EvalResult<Value> {
        let compiled = self.compiled.as_ref().as_ref().map_err(Clone::clone)?;
        let context = Self::context(scope, extra);
        run_sync(run_program(&compiled.program, &context))
    }

    /// Evaluate synchronously. Failures are logged and yield `undefined`.
    pub fn execute(&self, scope: &Scope, extra: &[(&str, Value)]) -> Value {
        match self.try_execute(scope, extra) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(expression = %self.source, error = %err, "expression evaluation failed");
                Value::Undefined
            }
        }
    }

    /// Evaluate, completing synchronously when possible. Asynchronous
    /// snippets that are still waiting after one poll come back as
    /// [`Evaluation::Pending`].
    pub fn eval(&self, scope: &Scope, extra: &[(&str, Value)]) -> Evaluation {
        if !self.is_async() {
            return Evaluation::Ready(self.execute(scope, extra));
        }

        let compiled = Rc::clone(&self.compiled);
        let source = Rc::clone(&self.source);
        let context = Self::context(scope, extra);
        let mut future = async move {
            let result = match compiled.as_ref() {
                Ok(c) => run_program(&c.program, &context).await,
                Err(err) => Err(err.clone()),
            };
            result.unwrap_or_else(|err| {
                tracing::warn!(expression = %source, error = %err, "async expression evaluation failed");
                Value::Undefined
            })
        }
        .boxed_local();

        let mut cx = Context::from_waker(noop_waker_ref());
        match future.poll_unpin(&mut cx) {
            Poll::Ready(value) => Evaluation::Ready(value),
            Poll::Pending => Evaluation::Pending(future),
        }
    }

    /// Observables the snippet depends on: free identifiers bound to an
    /// observable in `scope`, deduplicated by identity.
    pub fn find_observables(&self, scope: &Scope) -> Vec<Observable<Value>> {
        let mut seen = HashSet::new();
        self.identifiers()
            .iter()
            .filter_map(|name| match scope.get(name) {
                Some(Value::Observable(obs)) => Some(obs),
                _ => None,
            })
            .filter(|obs| seen.insert(obs.id()))
            .collect()
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("is_async", &self.is_async())
            .field("has_return", &self.has_return())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Promise;

    #[test]
    fn test_static_detection() {
        assert!(Expression::new("await fetchUser(id)").is_async());
        assert!(!Expression::new("user.name").is_async());
        assert!(Expression::new("let a = 1; return a").has_return());
        assert!(!Expression::new("items.map(i => { return i })").has_return());
    }

    #[test]
    fn test_execute_swallows_errors() {
        let scope = Scope::new();
        assert_eq!(Expression::new("nope.x").execute(&scope, &[]), Value::Undefined);
        assert_eq!(Expression::new("1 +").execute(&scope, &[]), Value::Undefined);
        assert!(Expression::new("1 +").parse_error().is_some());
        assert!(Expression::new("nope").try_execute(&scope, &[]).is_err());
    }

    #[test]
    fn test_extra_vars_shadow_scope() {
        let scope = Scope::from_pairs([("x", Value::from(1))]);
        let expr = Expression::new("x + y");
        assert_eq!(expr.execute(&scope, &[("y", Value::from(2))]), Value::from(3));
        assert_eq!(expr.execute(&scope, &[("x", Value::from(10)), ("y", Value::from(2))]), Value::from(12));
        assert!(!scope.has("y"));
    }

    #[test]
    fn test_declarations_do_not_leak() {
        let scope = Scope::new();
        Expression::new("let temp = 5; return temp").execute(&scope, &[]);
        assert!(!scope.has("temp"));
    }

    #[test]
    fn test_find_observables() {
        let count = Observable::new(Value::from(0));
        let scope = Scope::from_pairs([
            ("count", Value::Observable(count.clone())),
            ("alias", Value::Observable(count.clone())),
            ("label", Value::from("n")),
            ("other", Value::observable("x")),
        ]);
        let expr = Expression::new("label + count + alias + items.map(other => other)");
        let found = expr.find_observables(&scope);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), count.id());
    }

    #[test]
    fn test_eval_pending_then_resolved() {
        let (promise, resolver) = Promise::deferred();
        let scope = Scope::from_pairs([("load", Value::Promise(promise))]);
        let expr = Expression::new("(await load) + '!'");

        let Evaluation::Pending(future) = expr.eval(&scope, &[]) else {
            panic!("expected pending evaluation");
        };
        resolver.resolve(Value::from("ok"));
        assert_eq!(futures_util::FutureExt::now_or_never(future), Some(Value::from("ok!")));

        assert!(matches!(Expression::new("1 + 1").eval(&scope, &[]), Evaluation::Ready(_)));
    }
}
