//! # Runtime Values
//!
//! Dynamically typed values flowing through scopes and expressions. The
//! coercion helpers follow the host scripting language closely enough that
//! authored templates behave as their authors expect (`0` is falsy, `"3" == 3`,
//! `1 + "a"` concatenates).

use futures_channel::oneshot;
use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::ArrowFunction;
use crate::document::Node;
use crate::error::EvalResult;
use crate::observable::Observable;
use crate::scope::Scope;

static PROMISE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type Array = Rc<Vec<Value>>;
pub type Object = Rc<BTreeMap<String, Value>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Array),
    Object(Object),
    Function(Function),
    Observable(Observable<Value>),
    Promise(Promise),
    Node(Node),
}

// ═══════════════════════════════════════════════════════════════════════════════
// FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub type NativeCallback = dyn Fn(&[Value]) -> EvalResult<Value>;

#[derive(Clone)]
pub enum Function {
    /// Host-provided callable.
    Native {
        name: Rc<str>,
        call: Rc<NativeCallback>,
    },
    /// Arrow function written in a template expression, closed over the
    /// scope it was created in.
    Closure { func: Rc<ArrowFunction>, env: Scope },
}

impl Function {
    pub fn native(name: &str, call: impl Fn(&[Value]) -> EvalResult<Value> + 'static) -> Self {
        Function::Native {
            name: Rc::from(name),
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Function::Native { name, .. } => name,
            Function::Closure { .. } => "anonymous",
        }
    }

    fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Native { call: a, .. }, Function::Native { call: b, .. }) => {
                Rc::ptr_eq(a, b)
            }
            (Function::Closure { func: a, env: ea }, Function::Closure { func: b, env: eb }) => {
                Rc::ptr_eq(a, b) && ea.ptr_eq(eb)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native { name, .. } => write!(f, "[native {}]", name),
            Function::Closure { func, .. } => write!(f, "[closure/{}]", func.params.len()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROMISES
// ═══════════════════════════════════════════════════════════════════════════════

/// A shareable, single-threaded future resolving to a [`Value`]. Expressions
/// can `await` it any number of times.
#[derive(Clone)]
pub struct Promise {
    id: u64,
    future: Shared<LocalBoxFuture<'static, Value>>,
}

impl Promise {
    pub fn new(future: impl Future<Output = Value> + 'static) -> Self {
        Promise {
            id: PROMISE_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            future: future.boxed_local().shared(),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Promise::new(async move { value })
    }

    /// A promise settled later through the returned [`Resolver`]. Dropping the
    /// resolver settles it with `undefined`.
    pub fn deferred() -> (Promise, Resolver) {
        let (sender, receiver) = oneshot::channel::<Value>();
        let promise = Promise::new(async move { receiver.await.unwrap_or(Value::Undefined) });
        (promise, Resolver { sender })
    }

    /// The settled value, if the promise has already been driven to completion.
    pub fn peek(&self) -> Option<Value> {
        self.future.peek().cloned()
    }

    pub async fn wait(&self) -> Value {
        self.future.clone().await
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise#{}", self.id)
    }
}

pub struct Resolver {
    sender: oneshot::Sender<Value>,
}

impl Resolver {
    pub fn resolve(self, value: Value) {
        // The receiving side only disappears when every awaiting clone has
        // been dropped; nothing is left to notify then.
        let _ = self.sender.send(value);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

impl Value {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Object(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(Rc::new(items.into_iter().collect()))
    }

    pub fn observable(initial: impl Into<Value>) -> Value {
        Value::Observable(Observable::new(initial.into()))
    }

    pub fn function(name: &str, call: impl Fn(&[Value]) -> EvalResult<Value> + 'static) -> Value {
        Value::Function(Function::native(name, call))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }
}

impl From<Observable<Value>> for Value {
    fn from(obs: Observable<Value>) -> Self {
        Value::Observable(obs)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(node)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(Rc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Rc::new(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSPECTION & COERCION
// ═══════════════════════════════════════════════════════════════════════════════

impl Value {
    /// Short type label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Observable(_) => "observable",
            Value::Promise(_) => "promise",
            Value::Node(_) => "node",
        }
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Null
            | Value::Array(_)
            | Value::Object(_)
            | Value::Observable(_)
            | Value::Promise(_)
            | Value::Node(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Observable(obs) => obs.with(|v| v.is_truthy()),
            _ => true,
        }
    }

    /// Read through an observable; any other value is returned unchanged.
    pub fn unwrapped(&self) -> Value {
        match self {
            Value::Observable(obs) => obs.read().unwrapped(),
            other => other.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_observable(&self) -> Option<&Observable<Value>> {
        match self {
            Value::Observable(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Array(items) => match items.len() {
                0 => 0.0,
                1 => items[0].to_number(),
                _ => f64::NAN,
            },
            Value::Observable(obs) => obs.with(|v| v.to_number()),
            _ => f64::NAN,
        }
    }

    /// Property lookup on plain data (object keys, array/string indices and
    /// `length`). Method lookup lives in the interpreter.
    pub fn property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.get(key).cloned(),
            Value::Array(items) => {
                if key == "length" {
                    return Some(Value::from(items.len()));
                }
                key.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
            }
            Value::String(s) => {
                if key == "length" {
                    return Some(Value::from(s.chars().count()));
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
            }
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Function(_) | Value::Promise(_) | Value::Node(_) => {
                serde_json::Value::Null
            }
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Observable(obs) => obs.with(|v| v.to_json()),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Observable(a), Value::Observable(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.id == b.id,
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            if let Some(hex) = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                return i64::from_str_radix(hex, 16)
                    .map(|n| n as f64)
                    .unwrap_or(f64::NAN);
            }
            // Rust accepts "inf"/"nan" spellings the host language rejects.
            if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return f64::NAN;
            }
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
    }
}

/// Number-to-string conversion matching the host language for the common
/// cases (integers print without a fraction, `-0` prints as `0`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{:.0}", n);
    }
    format!("{}", n)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
            Value::Observable(obs) => obs.with(|v| write!(f, "{}", v)),
            Value::Promise(_) => f.write_str("[object Promise]"),
            Value::Node(node) => match node.tag_name() {
                Some(tag) => write!(f, "[object HTMLElement <{}>]", tag),
                None => f.write_str("[object Node]"),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Observable(obs) => write!(f, "{:?}", obs),
            Value::Promise(p) => write!(f, "{:?}", p),
            Value::Node(node) => write!(f, "{:?}", node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(!Value::observable(false).is_truthy());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert_eq!(Value::from("0x10").to_number(), 16.0);
        assert!(Value::from("inf").to_number().is_nan());
        assert!(Value::from("12px").to_number().is_nan());
    }

    #[test]
    fn test_equality() {
        assert!(Value::from(1).loose_equals(&Value::from("1")));
        assert!(!Value::from(1).strict_equals(&Value::from("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from(true).loose_equals(&Value::from(1)));

        let arr = Value::array(vec![Value::from(1)]);
        assert!(arr.strict_equals(&arr.clone()));
        assert!(!arr.strict_equals(&Value::array(vec![Value::from(1)])));
    }

    #[test]
    fn test_display() {
        let arr = Value::array(vec![Value::from(1), Value::Null, Value::from("x")]);
        assert_eq!(arr.to_string(), "1,,x");
        assert_eq!(Value::object(vec![("a", Value::from(1))]).to_string(), "[object Object]");
        assert_eq!(Value::observable(7).to_string(), "7");
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({ "name": "x", "tags": [1, 2], "nested": { "ok": true } });
        let value = Value::from(json.clone());
        assert_eq!(value.property("name").unwrap().as_str(), Some("x"));
        assert_eq!(value.property("tags").unwrap().property("length").unwrap().as_number(), Some(2.0));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_deferred_promise() {
        let (promise, resolver) = Promise::deferred();
        assert!(promise.peek().is_none());
        resolver.resolve(Value::from(5));
        let value = futures_util::FutureExt::now_or_never(promise.wait());
        assert_eq!(value, Some(Value::from(5)));
        assert_eq!(promise.peek(), Some(Value::from(5)));
    }
}
