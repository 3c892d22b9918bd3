//! # Interpreter
//!
//! Tree-walking evaluator for the expression language.
//!
//! Evaluation is written once, as boxed local futures. Snippets without
//! `await` never suspend, so the synchronous entry points poll the future a
//! single time with a no-op waker ([`run_sync`]). Snippets with `await` are
//! driven by the caller's executor.
//!
//! Reads through observables are transparent: operators, truthiness and
//! member access see the current value, while the observable's own methods
//! (`read`, `set`, `update`, `subscribe`) stay reachable.

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::task::noop_waker_ref;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::ast::{
    ArrowBody, BinaryOp, Expr, LogicalOp, Program, PropertyKey, Stmt, TemplatePart,
    UnaryOp,
};
use crate::builtins;
use crate::error::{EvalError, EvalResult};
use crate::scope::Scope;
use crate::value::{format_number, Function, Value};

pub(crate) type EvalFuture<'a> = LocalBoxFuture<'a, EvalResult<Value>>;

enum Flow {
    Normal,
    Return(Value),
}

/// Drive `future` without an executor. Fails with [`EvalError::Suspended`]
/// when it is waiting on something that has not settled yet.
pub(crate) fn run_sync<T>(future: impl Future<Output = EvalResult<T>>) -> EvalResult<T> {
    futures_util::pin_mut!(future);
    let mut cx = Context::from_waker(noop_waker_ref());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(EvalError::Suspended(
            "an awaited value has not settled".to_string(),
        )),
    }
}

/// Call a function value synchronously (used by natives such as `map`).
pub fn call_sync(func: &Function, args: Vec<Value>) -> EvalResult<Value> {
    run_sync(call_function(func, args))
}

pub(crate) fn call_function(func: &Function, args: Vec<Value>) -> EvalFuture<'static> {
    match func {
        Function::Native { call, .. } => {
            let result = call(&args);
            async move { result }.boxed_local()
        }
        Function::Closure { func, env } => {
            let func = Rc::clone(func);
            let env = env.clone();
            async move {
                let local = env.child();
                for (i, param) in func.params.iter().enumerate() {
                    local.define(param, args.get(i).cloned().unwrap_or_default());
                }
                match &func.body {
                    ArrowBody::Expr(expr) => eval_expr(expr, &local).await,
                    ArrowBody::Block(body) => match exec_block(body, &local).await? {
                        Flow::Return(value) => Ok(value),
                        Flow::Normal => Ok(Value::Undefined),
                    },
                }
            }
            .boxed_local()
        }
    }
}

pub(crate) async fn run_program(program: &Program, scope: &Scope) -> EvalResult<Value> {
    match program {
        Program::Expression(expr) => eval_expr(expr, scope).await,
        Program::Statements(body) => match exec_block(body, scope).await? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
        },
    }
}

async fn exec_block(body: &[Stmt], scope: &Scope) -> EvalResult<Flow> {
    for stmt in body {
        match stmt {
            Stmt::Declare { name, init } => {
                let value = match init {
                    Some(init) => eval_expr(init, scope).await?,
                    None => Value::Undefined,
                };
                scope.define(name, value);
            }
            Stmt::Expr(expr) => {
                eval_expr(expr, scope).await?;
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => eval_expr(value, scope).await?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
        }
    }
    Ok(Flow::Normal)
}

fn lookup(name: &str, scope: &Scope) -> EvalResult<Value> {
    scope
        .get(name)
        .or_else(|| builtins::global(name))
        .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))
}

fn property_key(value: &Value) -> String {
    match value.unwrapped() {
        Value::Number(n) => format_number(n),
        other => other.to_string(),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", describe(object), property),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

pub(crate) fn eval_expr<'a>(expr: &'a Expr, scope: &'a Scope) -> EvalFuture<'a> {
    async move {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => lookup(name, scope),

            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(inner) => {
                            let value = eval_expr(inner, scope).await?;
                            out.push_str(&value.unwrapped().to_string());
                        }
                    }
                }
                Ok(Value::String(out))
            }

            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(eval_expr(item, scope).await?);
                }
                Ok(Value::array(values))
            }

            Expr::Object(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let key = match key {
                        PropertyKey::Static(name) => name.clone(),
                        PropertyKey::Computed(expr) => property_key(&eval_expr(expr, scope).await?),
                    };
                    map.insert(key, eval_expr(value, scope).await?);
                }
                Ok(Value::Object(Rc::new(map)))
            }

            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = eval_expr(object, scope).await?;
                if *optional && target.unwrapped().is_nullish() {
                    return Ok(Value::Undefined);
                }
                builtins::get_member(&target, property)
            }

            Expr::Index {
                object,
                index,
                optional,
            } => {
                let target = eval_expr(object, scope).await?;
                if *optional && target.unwrapped().is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = property_key(&eval_expr(index, scope).await?);
                builtins::get_member(&target, &key)
            }

            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let func = eval_expr(callee, scope).await?;
                if *optional && func.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(arg, scope).await?);
                }
                match func {
                    Value::Function(func) => call_function(&func, values).await,
                    _ => Err(EvalError::NotCallable(describe(callee))),
                }
            }

            Expr::Unary { op, operand } => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                    if !scope.has(name) && builtins::global(name).is_none() {
                        return Ok(Value::from("undefined"));
                    }
                }
                let value = eval_expr(operand, scope).await?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Minus => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::from(value.type_of()),
                })
            }

            Expr::Binary { op, left, right } => {
                let left = eval_expr(left, scope).await?;
                let right = eval_expr(right, scope).await?;
                binary(*op, &left, &right)
            }

            Expr::Logical { op, left, right } => {
                let left = eval_expr(left, scope).await?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.unwrapped().is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    eval_expr(right, scope).await
                }
            }

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if eval_expr(test, scope).await?.is_truthy() {
                    eval_expr(consequent, scope).await
                } else {
                    eval_expr(alternate, scope).await
                }
            }

            Expr::Assign { op, target, value } => {
                let mut value = eval_expr(value, scope).await?;
                if let Some(bin) = op.binary() {
                    let current = eval_expr(target, scope).await?;
                    value = binary(bin, &current, &value)?;
                }
                assign(target, value.clone(), scope).await?;
                Ok(value)
            }

            Expr::Arrow(arrow) => Ok(Value::Function(Function::Closure {
                func: Rc::clone(arrow),
                env: scope.clone(),
            })),

            Expr::Await(inner) => match eval_expr(inner, scope).await?.unwrapped() {
                Value::Promise(promise) => Ok(promise.wait().await),
                other => Ok(other),
            },
        }
    }
    .boxed_local()
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let left = left.unwrapped();
    let right = right.unwrapped();

    let numeric = |f: fn(f64, f64) -> f64| Ok(Value::Number(f(left.to_number(), right.to_number())));

    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| {
                matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_))
            };
            if stringy(&left) || stringy(&right) {
                Ok(Value::String(format!("{}{}", left, right)))
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(|a, b| a - b),
        BinaryOp::Mul => numeric(|a, b| a * b),
        BinaryOp::Div => numeric(|a, b| a / b),
        BinaryOp::Rem => numeric(|a, b| a % b),
        BinaryOp::Pow => numeric(f64::powf),
        BinaryOp::Eq => Ok(Value::Bool(left.loose_equals(&right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.loose_equals(&right))),
        BinaryOp::StrictEq => Ok(Value::Bool(left.strict_equals(&right))),
        BinaryOp::StrictNotEq => Ok(Value::Bool(!left.strict_equals(&right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => {
            let key = property_key(&left);
            match &right {
                Value::Object(map) => Ok(Value::Bool(map.contains_key(&key))),
                Value::Array(items) => Ok(Value::Bool(
                    key == "length" || key.parse::<usize>().is_ok_and(|i| i < items.len()),
                )),
                other => Err(EvalError::type_error(format!(
                    "cannot use 'in' to search for '{}' in {}",
                    key,
                    other.kind()
                ))),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ASSIGNMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Flatten `a.b[c].d` into its root identifier and key path.
async fn assignment_path(target: &Expr, scope: &Scope) -> EvalResult<(String, Vec<String>)> {
    let mut keys = Vec::new();
    let mut current = target;
    loop {
        match current {
            Expr::Ident(name) => {
                keys.reverse();
                return Ok((name.clone(), keys));
            }
            Expr::Member {
                object, property, ..
            } => {
                keys.push(property.clone());
                current = object.as_ref();
            }
            Expr::Index { object, index, .. } => {
                keys.push(property_key(&eval_expr(index, scope).await?));
                current = object.as_ref();
            }
            _ => return Err(EvalError::InvalidAssignment(describe(target))),
        }
    }
}

async fn assign(target: &Expr, value: Value, scope: &Scope) -> EvalResult<()> {
    let (root, keys) = assignment_path(target, scope).await?;
    let current = scope.get(&root);

    // Assigning to a name bound to an observable replaces its value.
    if let Some(Value::Observable(obs)) = &current {
        let next = if keys.is_empty() {
            value
        } else {
            set_path(obs.read(), &keys, value)?
        };
        obs.set(next);
        return Ok(());
    }

    if keys.is_empty() {
        scope.set(&root, value);
        return Ok(());
    }

    let base = current.ok_or_else(|| EvalError::UnknownIdentifier(root.clone()))?;
    let updated = set_path(base, &keys, value)?;
    scope.set(&root, updated);
    Ok(())
}

/// Copy-on-write update of a nested key path.
fn set_path(base: Value, keys: &[String], value: Value) -> EvalResult<Value> {
    let Some((key, rest)) = keys.split_first() else {
        return Ok(value);
    };

    match base {
        Value::Object(mut map) => {
            let child = map.get(key).cloned().unwrap_or_default();
            let next = set_path(child, rest, value)?;
            Rc::make_mut(&mut map).insert(key.clone(), next);
            Ok(Value::Object(map))
        }
        Value::Array(mut items) => {
            let index = key
                .parse::<usize>()
                .map_err(|_| EvalError::type_error(format!("invalid array index '{}'", key)))?;
            let child = items.get(index).cloned().unwrap_or_default();
            let next = set_path(child, rest, value)?;
            let items_mut = Rc::make_mut(&mut items);
            if index >= items_mut.len() {
                items_mut.resize(index + 1, Value::Undefined);
            }
            items_mut[index] = next;
            Ok(Value::Array(items))
        }
        Value::Observable(obs) => {
            let next = set_path(obs.read(), keys, value)?;
            obs.set(next);
            Ok(Value::Observable(obs))
        }
        other => Err(EvalError::type_error(format!(
            "cannot set property '{}' on {}",
            key,
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr_lowerer::compile;
    use crate::value::Promise;

    fn eval(source: &str, scope: &Scope) -> EvalResult<Value> {
        let snippet = compile(source)?;
        run_sync(run_program(&snippet.program, scope))
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        let scope = Scope::new();
        assert_eq!(eval("1 + 2 * 3", &scope).unwrap(), Value::from(7));
        assert_eq!(eval("'a' + 1", &scope).unwrap(), Value::from("a1"));
        assert_eq!(eval("7 % 4", &scope).unwrap(), Value::from(3));
        assert_eq!(eval("2 ** 10", &scope).unwrap(), Value::from(1024));
        assert_eq!(eval("'b' > 'a'", &scope).unwrap(), Value::from(true));
    }

    #[test]
    fn test_observable_reads_are_transparent() {
        let scope = Scope::from_pairs([
            ("count", Value::observable(4)),
            ("user", Value::observable(Value::object(vec![("name", Value::from("Ada"))]))),
        ]);
        assert_eq!(eval("count + 1", &scope).unwrap(), Value::from(5));
        assert_eq!(eval("user.name", &scope).unwrap(), Value::from("Ada"));
        assert_eq!(eval("count.read() * 2", &scope).unwrap(), Value::from(8));
        assert_eq!(eval("count > 3 ? 'big' : 'small'", &scope).unwrap(), Value::from("big"));
    }

    #[test]
    fn test_assignment_writes_observables_and_scope() {
        let count = Value::observable(1);
        let scope = Scope::from_pairs([("count", count.clone()), ("plain", Value::from(1))]);

        eval("count += 2", &scope).unwrap();
        eval("plain = plain + 10", &scope).unwrap();

        assert_eq!(count.as_observable().unwrap().read(), Value::from(3));
        assert_eq!(scope.get("plain"), Some(Value::from(11)));
    }

    #[test]
    fn test_nested_member_assignment_is_copy_on_write() {
        let original = Value::object(vec![("a", Value::object(vec![("b", Value::from(1))]))]);
        let scope = Scope::from_pairs([("data", original.clone())]);
        eval("data.a.b = 2", &scope).unwrap();

        assert_eq!(eval("data.a.b", &scope).unwrap(), Value::from(2));
        assert_eq!(original.property("a").unwrap().property("b"), Some(Value::from(1)));
    }

    #[test]
    fn test_closures_capture_scope() {
        let scope = Scope::from_pairs([("factor", Value::from(3))]);
        let result = eval("[1, 2].map(x => x * factor).join('-')", &scope).unwrap();
        assert_eq!(result, Value::from("3-6"));

        let result = eval("let add = (a, b) => { return a + b; }; return add(2, 5)", &scope).unwrap();
        assert_eq!(result, Value::from(7));
    }

    #[test]
    fn test_errors() {
        let scope = Scope::new();
        assert!(matches!(eval("missing + 1", &scope), Err(EvalError::UnknownIdentifier(_))));
        assert!(matches!(eval("(1)()", &scope), Err(EvalError::NotCallable(_))));
        assert!(matches!(eval("null.x", &scope), Err(EvalError::Type(_))));
        assert_eq!(eval("null?.x", &scope).unwrap(), Value::Undefined);
        assert_eq!(eval("typeof missing", &scope).unwrap(), Value::from("undefined"));
    }

    #[test]
    fn test_await_suspends_sync_path() {
        let (promise, resolver) = Promise::deferred();
        let scope = Scope::from_pairs([("load", Value::Promise(promise))]);
        assert!(matches!(eval("await load", &scope), Err(EvalError::Suspended(_))));

        resolver.resolve(Value::from("done"));
        assert_eq!(eval("await load", &scope).unwrap(), Value::from("done"));
    }

    #[test]
    fn test_logical_operators() {
        let scope = Scope::from_pairs([("name", Value::Null)]);
        assert_eq!(eval("name ?? 'anon'", &scope).unwrap(), Value::from("anon"));
        assert_eq!(eval("0 || 'x'", &scope).unwrap(), Value::from("x"));
        assert_eq!(eval("1 && 0", &scope).unwrap(), Value::from(0));
        assert_eq!(eval("'a' in { a: 1 }", &scope).unwrap(), Value::from(true));
    }
}
