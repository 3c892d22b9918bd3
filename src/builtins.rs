//! # Built-in Library
//!
//! The fixed allow-list of globals and methods callable from template
//! expressions. Methods are looked up by name and returned as native
//! functions bound to their receiver, so `items.map` is an ordinary value.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{EvalError, EvalResult};
use crate::eval::call_sync;
use crate::observable::Observable;
use crate::value::{format_number, Function, Value};

lazy_static! {
    static ref INT_PREFIX_RE: Regex = Regex::new(r"^\s*([+-]?)([0-9a-zA-Z]+)").unwrap();
    static ref FLOAT_PREFIX_RE: Regex =
        Regex::new(r"^\s*[+-]?(?:Infinity|\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)")
            .unwrap();
}

/// Longest string a built-in may produce, in bytes.
const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

thread_local! {
    static GLOBALS: HashMap<&'static str, Value> = build_globals();
}

/// Value of a built-in global, if `name` is one.
pub(crate) fn global(name: &str) -> Option<Value> {
    GLOBALS.with(|globals| globals.get(name).cloned())
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).map(Value::unwrapped).unwrap_or_default()
}

fn native(name: &str, f: impl Fn(&[Value]) -> EvalResult<Value> + 'static) -> Value {
    Value::Function(Function::native(name, f))
}

fn callback(args: &[Value], method: &str) -> EvalResult<Function> {
    match args.first() {
        Some(Value::Function(f)) => Ok(f.clone()),
        _ => Err(EvalError::type_error(format!("{} expects a function argument", method))),
    }
}

fn math(name: &'static str, f: fn(f64) -> f64) -> (String, Value) {
    (
        name.to_string(),
        native(name, move |args| Ok(Value::Number(f(arg(args, 0).to_number())))),
    )
}

fn build_globals() -> HashMap<&'static str, Value> {
    let mut globals = HashMap::new();

    let mut math_entries = vec![
        math("floor", f64::floor),
        math("ceil", f64::ceil),
        math("abs", f64::abs),
        math("sqrt", f64::sqrt),
        math("trunc", f64::trunc),
        // Half-way cases round towards +Infinity.
        math("round", |n| (n + 0.5).floor()),
        math("sign", |n| if n.is_nan() || n == 0.0 { n } else { n.signum() }),
        (
            "pow".to_string(),
            native("pow", |args| {
                Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
            }),
        ),
        (
            "min".to_string(),
            native("min", |args| {
                Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
                    if a.is_nan() || b.is_nan() {
                        f64::NAN
                    } else {
                        a.min(b)
                    }
                })))
            }),
        ),
        (
            "max".to_string(),
            native("max", |args| {
                Ok(Value::Number(args.iter().map(Value::to_number).fold(
                    f64::NEG_INFINITY,
                    |a, b| {
                        if a.is_nan() || b.is_nan() {
                            f64::NAN
                        } else {
                            a.max(b)
                        }
                    },
                )))
            }),
        ),
    ];
    math_entries.push(("PI".to_string(), Value::Number(std::f64::consts::PI)));
    math_entries.push(("E".to_string(), Value::Number(std::f64::consts::E)));
    globals.insert("Math", Value::object(math_entries));

    globals.insert(
        "JSON",
        Value::object(vec![
            (
                "stringify",
                native("stringify", |args| {
                    let json = arg(args, 0).to_json();
                    let pretty = !arg(args, 2).is_nullish();
                    let text = if pretty {
                        serde_json::to_string_pretty(&json)
                    } else {
                        serde_json::to_string(&json)
                    };
                    text.map(Value::String)
                        .map_err(|e| EvalError::Native(e.to_string()))
                }),
            ),
            (
                "parse",
                native("parse", |args| {
                    serde_json::from_str::<serde_json::Value>(&arg(args, 0).to_string())
                        .map(Value::from)
                        .map_err(|e| EvalError::Native(format!("JSON.parse: {}", e)))
                }),
            ),
        ]),
    );

    globals.insert(
        "Object",
        Value::object(vec![
            (
                "keys",
                native("keys", |args| {
                    Ok(Value::array(entries(&arg(args, 0)).into_iter().map(|(k, _)| Value::String(k))))
                }),
            ),
            (
                "values",
                native("values", |args| {
                    Ok(Value::array(entries(&arg(args, 0)).into_iter().map(|(_, v)| v)))
                }),
            ),
            (
                "entries",
                native("entries", |args| {
                    Ok(Value::array(
                        entries(&arg(args, 0))
                            .into_iter()
                            .map(|(k, v)| Value::array(vec![Value::String(k), v])),
                    ))
                }),
            ),
        ]),
    );

    globals.insert(
        "Array",
        Value::object(vec![(
            "isArray",
            native("isArray", |args| Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))),
        )]),
    );

    globals.insert(
        "String",
        native("String", |args| {
            Ok(Value::String(match args.first() {
                Some(v) => v.unwrapped().to_string(),
                None => String::new(),
            }))
        }),
    );
    globals.insert(
        "Number",
        native("Number", |args| {
            Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)))
        }),
    );
    globals.insert(
        "Boolean",
        native("Boolean", |args| Ok(Value::Bool(arg(args, 0).is_truthy()))),
    );
    globals.insert(
        "isNaN",
        native("isNaN", |args| Ok(Value::Bool(arg(args, 0).to_number().is_nan()))),
    );
    globals.insert(
        "parseInt",
        native("parseInt", |args| {
            let radix = match arg(args, 1) {
                Value::Undefined => 10,
                other => other.to_number() as u32,
            };
            Ok(Value::Number(parse_int(&arg(args, 0).to_string(), radix)))
        }),
    );
    globals.insert(
        "parseFloat",
        native("parseFloat", |args| {
            let text = arg(args, 0).to_string();
            Ok(Value::Number(match FLOAT_PREFIX_RE.find(&text) {
                Some(m) => m.as_str().trim().parse::<f64>().unwrap_or_else(|_| {
                    if m.as_str().trim().starts_with('-') {
                        f64::NEG_INFINITY
                    } else {
                        f64::INFINITY
                    }
                }),
                None => f64::NAN,
            }))
        }),
    );
    globals.insert("NaN", Value::Number(f64::NAN));
    globals.insert("Infinity", Value::Number(f64::INFINITY));

    globals.insert(
        "console",
        Value::object(vec![
            (
                "log",
                native("log", |args| {
                    tracing::info!(target: "template", "{}", join_display(args));
                    Ok(Value::Undefined)
                }),
            ),
            (
                "warn",
                native("warn", |args| {
                    tracing::warn!(target: "template", "{}", join_display(args));
                    Ok(Value::Undefined)
                }),
            ),
            (
                "error",
                native("error", |args| {
                    tracing::error!(target: "template", "{}", join_display(args));
                    Ok(Value::Undefined)
                }),
            ),
        ]),
    );

    globals
}

fn join_display(args: &[Value]) -> String {
    args.iter()
        .map(|v| v.unwrapped().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_int(text: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let Some(caps) = INT_PREFIX_RE.captures(text) else {
        return f64::NAN;
    };
    let negative = &caps[1] == "-";
    let digits: String = caps[2]
        .chars()
        .take_while(|c| c.is_digit(radix))
        .collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    if negative {
        -value
    } else {
        value
    }
}

/// Key/value pairs of objects (and index/value pairs of arrays).
pub(crate) fn entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Observable(obs) => entries(&obs.read()),
        _ => Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMBER LOOKUP
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn get_member(target: &Value, key: &str) -> EvalResult<Value> {
    match target {
        Value::Undefined | Value::Null => Err(EvalError::type_error(format!(
            "cannot read properties of {} (reading '{}')",
            target.kind(),
            key
        ))),
        Value::Observable(obs) => match observable_member(obs, key) {
            Some(method) => Ok(method),
            None => get_member(&obs.read(), key),
        },
        Value::Array(items) => Ok(array_member(items, key)
            .or_else(|| target.property(key))
            .unwrap_or_default()),
        Value::String(s) => Ok(string_member(s, key)
            .or_else(|| target.property(key))
            .unwrap_or_default()),
        Value::Number(n) => Ok(number_member(*n, key).unwrap_or_default()),
        Value::Object(_) => Ok(target.property(key).unwrap_or_default()),
        Value::Node(node) => Ok(node_member(node, key).unwrap_or_default()),
        Value::Bool(_) | Value::Function(_) | Value::Promise(_) => Ok(Value::Undefined),
    }
}

fn observable_member(obs: &Observable<Value>, key: &str) -> Option<Value> {
    let obs = obs.clone();
    let method = match key {
        "read" => native("read", move |_| Ok(obs.read())),
        "set" => native("set", move |args| {
            obs.set(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        }),
        "update" => native("update", move |args| {
            let f = callback(args, "update")?;
            let next = call_sync(&f, vec![obs.read()])?;
            obs.set(next);
            Ok(Value::Undefined)
        }),
        "subscribe" => native("subscribe", move |args| {
            let f = callback(args, "subscribe")?;
            let subscription = obs.subscribe(move |value| {
                if let Err(err) = call_sync(&f, vec![value.clone()]) {
                    tracing::warn!(error = %err, "observable subscriber failed");
                }
            });
            let subscription = Rc::new(subscription);
            Ok(native("unsubscribe", move |_| {
                Ok(Value::Bool(subscription.unsubscribe()))
            }))
        }),
        _ => return None,
    };
    Some(method)
}

/// Resolve a possibly negative relative index against `len`.
fn relative(value: &Value, len: usize, default: usize) -> usize {
    if value.is_nullish() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn array_member(items: &Rc<Vec<Value>>, key: &str) -> Option<Value> {
    let items = Rc::clone(items);
    let method = match key {
        "map" => native("map", move |args| {
            let f = callback(args, "map")?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(call_sync(&f, vec![item.clone(), Value::from(i)])?);
            }
            Ok(Value::array(out))
        }),
        "filter" => native("filter", move |args| {
            let f = callback(args, "filter")?;
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if call_sync(&f, vec![item.clone(), Value::from(i)])?.is_truthy() {
                    out.push(item.clone());
                }
            }
            Ok(Value::array(out))
        }),
        "find" | "findIndex" | "some" | "every" => {
            let name = key.to_string();
            native(key, move |args| {
                let f = callback(args, &name)?;
                for (i, item) in items.iter().enumerate() {
                    let hit = call_sync(&f, vec![item.clone(), Value::from(i)])?.is_truthy();
                    match (name.as_str(), hit) {
                        ("find", true) => return Ok(item.clone()),
                        ("findIndex", true) => return Ok(Value::from(i)),
                        ("some", true) => return Ok(Value::Bool(true)),
                        ("every", false) => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name.as_str() {
                    "findIndex" => Value::from(-1),
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::Undefined,
                })
            })
        }
        "forEach" => native("forEach", move |args| {
            let f = callback(args, "forEach")?;
            for (i, item) in items.iter().enumerate() {
                call_sync(&f, vec![item.clone(), Value::from(i)])?;
            }
            Ok(Value::Undefined)
        }),
        "reduce" => native("reduce", move |args| {
            let f = callback(args, "reduce")?;
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first.clone(),
                    None => {
                        return Err(EvalError::type_error(
                            "reduce of empty array with no initial value",
                        ))
                    }
                },
            };
            for (i, item) in iter {
                acc = call_sync(&f, vec![acc, item.clone(), Value::from(i)])?;
            }
            Ok(acc)
        }),
        "join" => native("join", move |args| {
            let sep = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_string(),
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.unwrapped().to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }),
        "includes" => native("includes", move |args| {
            let needle = arg(args, 0);
            Ok(Value::Bool(items.iter().any(|v| {
                v.strict_equals(&needle)
                    || matches!((v, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            })))
        }),
        "indexOf" => native("indexOf", move |args| {
            let needle = arg(args, 0);
            Ok(match items.iter().position(|v| v.strict_equals(&needle)) {
                Some(i) => Value::from(i),
                None => Value::from(-1),
            })
        }),
        "slice" => native("slice", move |args| {
            let len = items.len();
            let start = relative(&arg(args, 0), len, 0);
            let end = relative(&arg(args, 1), len, len);
            Ok(Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }),
        "concat" => native("concat", move |args| {
            let mut out: Vec<Value> = items.as_ref().clone();
            for extra in args {
                match extra.unwrapped() {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        }),
        "reverse" => native("reverse", move |_| {
            Ok(Value::array(items.iter().rev().cloned()))
        }),
        _ => return None,
    };
    Some(method)
}

fn string_member(s: &str, key: &str) -> Option<Value> {
    let s = s.to_string();
    let method = match key {
        "toUpperCase" => native("toUpperCase", move |_| Ok(Value::String(s.to_uppercase()))),
        "toLowerCase" => native("toLowerCase", move |_| Ok(Value::String(s.to_lowercase()))),
        "trim" => native("trim", move |_| Ok(Value::String(s.trim().to_string()))),
        "includes" => native("includes", move |args| {
            Ok(Value::Bool(s.contains(arg(args, 0).to_string().as_str())))
        }),
        "startsWith" => native("startsWith", move |args| {
            Ok(Value::Bool(s.starts_with(arg(args, 0).to_string().as_str())))
        }),
        "endsWith" => native("endsWith", move |args| {
            Ok(Value::Bool(s.ends_with(arg(args, 0).to_string().as_str())))
        }),
        "indexOf" => native("indexOf", move |args| {
            let needle = arg(args, 0).to_string();
            Ok(match s.find(&needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::from(-1),
            })
        }),
        "split" => native("split", move |args| {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::String(s.clone())],
                sep => {
                    let sep = sep.to_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Ok(Value::array(parts))
        }),
        "replace" | "replaceAll" => {
            let all = key == "replaceAll";
            native(key, move |args| {
                let from = arg(args, 0).to_string();
                let to = arg(args, 1).to_string();
                Ok(Value::String(if all {
                    s.replace(&from, &to)
                } else {
                    s.replacen(&from, &to, 1)
                }))
            })
        }
        "slice" => native("slice", move |args| {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let start = relative(&arg(args, 0), len, 0);
            let end = relative(&arg(args, 1), len, len);
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }),
        "padStart" | "padEnd" => {
            let at_start = key == "padStart";
            native(key, move |args| {
                let target = arg(args, 0).to_number().max(0.0);
                if target > MAX_STRING_LENGTH as f64 {
                    return Err(EvalError::type_error("invalid string length"));
                }
                let target = target as usize;
                let fill = match arg(args, 1) {
                    Value::Undefined => " ".to_string(),
                    other => other.to_string(),
                };
                let len = s.chars().count();
                if target <= len || fill.is_empty() {
                    return Ok(Value::String(s.clone()));
                }
                let padding: String = fill.chars().cycle().take(target - len).collect();
                Ok(Value::String(if at_start {
                    format!("{}{}", padding, s)
                } else {
                    format!("{}{}", s, padding)
                }))
            })
        }
        "repeat" => native("repeat", move |args| {
            let count = arg(args, 0).to_number();
            if count < 0.0 || count.is_infinite() {
                return Err(EvalError::type_error("invalid repeat count"));
            }
            let count = if count.is_nan() { 0 } else { count as usize };
            match s.len().checked_mul(count) {
                Some(0) => Ok(Value::String(String::new())),
                Some(total) if total <= MAX_STRING_LENGTH => Ok(Value::String(s.repeat(count))),
                _ => Err(EvalError::type_error("invalid string length")),
            }
        }),
        "charAt" => native("charAt", move |args| {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            if index < 0.0 {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(s.chars().nth(index as usize).map(String::from).unwrap_or_default()))
        }),
        _ => return None,
    };
    Some(method)
}

fn number_member(n: f64, key: &str) -> Option<Value> {
    let method = match key {
        "toFixed" => native("toFixed", move |args| {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Ok(Value::String(format!("{:.*}", digits, n)))
        }),
        "toString" => native("toString", move |_| Ok(Value::String(format_number(n)))),
        _ => return None,
    };
    Some(method)
}

fn node_member(node: &crate::document::Node, key: &str) -> Option<Value> {
    let node = node.clone();
    let value = match key {
        "tagName" => node
            .tag_name()
            .map(|t| Value::String(t.to_uppercase()))
            .unwrap_or_default(),
        "textContent" => Value::String(node.text_content()),
        "id" => node.get_attribute("id").map(Value::String).unwrap_or_default(),
        "value" => node.get_attribute("value").map(Value::String).unwrap_or_default(),
        "getAttribute" => native("getAttribute", move |args| {
            Ok(node
                .get_attribute(&arg(args, 0).to_string())
                .map(Value::String)
                .unwrap_or(Value::Null))
        }),
        "setAttribute" => native("setAttribute", move |args| {
            node.set_attribute(&arg(args, 0).to_string(), &arg(args, 1).to_string());
            Ok(Value::Undefined)
        }),
        "hasAttribute" => native("hasAttribute", move |args| {
            Ok(Value::Bool(node.has_attribute(&arg(args, 0).to_string())))
        }),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(value: &Value, args: Vec<Value>) -> Value {
        match value {
            Value::Function(f) => call_sync(f, args).unwrap(),
            other => panic!("not a function: {:?}", other),
        }
    }

    #[test]
    fn test_math_and_parsing() {
        let math = global("Math").unwrap();
        assert_eq!(call(&math.property("max").unwrap(), vec![Value::from(1), Value::from(9)]), Value::from(9));
        assert_eq!(call(&math.property("round").unwrap(), vec![Value::from(2.5)]), Value::from(3));
        assert_eq!(call(&math.property("round").unwrap(), vec![Value::from(-2.5)]), Value::from(-2));

        assert_eq!(call(&global("parseInt").unwrap(), vec![Value::from("42px")]), Value::from(42));
        assert_eq!(call(&global("parseInt").unwrap(), vec![Value::from("ff"), Value::from(16)]), Value::from(255));
        assert_eq!(call(&global("parseFloat").unwrap(), vec![Value::from("3.5em")]), Value::from(3.5));
        assert!(call(&global("parseInt").unwrap(), vec![Value::from("x")]).to_number().is_nan());
    }

    #[test]
    fn test_array_methods() {
        let items = Value::array(vec![Value::from(3), Value::from(1), Value::from(2)]);
        let join = get_member(&items, "join").unwrap();
        assert_eq!(call(&join, vec![]), Value::from("3,1,2"));

        let slice = get_member(&items, "slice").unwrap();
        assert_eq!(call(&slice, vec![Value::from(-2)]).to_string(), "1,2");

        let includes = get_member(&items, "includes").unwrap();
        assert_eq!(call(&includes, vec![Value::from(2)]), Value::from(true));

        assert_eq!(get_member(&items, "length").unwrap(), Value::from(3));
        assert_eq!(get_member(&items, "1").unwrap(), Value::from(1));
        assert_eq!(get_member(&items, "missing").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("  Hello  ");
        assert_eq!(call(&get_member(&s, "trim").unwrap(), vec![]), Value::from("Hello"));
        let word = Value::from("7");
        assert_eq!(
            call(&get_member(&word, "padStart").unwrap(), vec![Value::from(3), Value::from("0")]),
            Value::from("007")
        );
        let csv = Value::from("a,b");
        assert_eq!(call(&get_member(&csv, "split").unwrap(), vec![Value::from(",")]).to_string(), "a,b");
        assert_eq!(get_member(&csv, "length").unwrap(), Value::from(3));
    }

    #[test]
    fn test_oversized_strings_are_type_errors() {
        let call_err = |value: &Value, args: Vec<Value>| match value {
            Value::Function(f) => call_sync(f, args),
            other => panic!("not a function: {:?}", other),
        };
        let s = Value::from("ab");
        let repeat = get_member(&s, "repeat").unwrap();
        assert!(matches!(call_err(&repeat, vec![Value::from(1e19)]), Err(EvalError::Type(_))));
        assert!(matches!(call_err(&repeat, vec![Value::from(-1)]), Err(EvalError::Type(_))));
        assert_eq!(call(&repeat, vec![Value::from(3)]), Value::from("ababab"));
        assert_eq!(call(&repeat, vec![Value::from(f64::NAN)]), Value::from(""));

        let pad = get_member(&s, "padEnd").unwrap();
        assert!(matches!(call_err(&pad, vec![Value::from(1e12)]), Err(EvalError::Type(_))));

        let char_at = get_member(&s, "charAt").unwrap();
        assert_eq!(call(&char_at, vec![Value::from(-1)]), Value::from(""));
        assert_eq!(call(&char_at, vec![Value::from(1)]), Value::from("b"));
    }

    #[test]
    fn test_observable_methods() {
        let obs = Observable::new(Value::from(1));
        let value = Value::Observable(obs.clone());

        call(&get_member(&value, "set").unwrap(), vec![Value::from(4)]);
        assert_eq!(obs.read(), Value::from(4));
        assert_eq!(call(&get_member(&value, "read").unwrap(), vec![]), Value::from(4));

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let recorder = Value::function("record", move |args| {
            sink.borrow_mut().push(args[0].clone());
            Ok(Value::Undefined)
        });
        let unsubscribe = call(&get_member(&value, "subscribe").unwrap(), vec![recorder]);
        obs.set(Value::from(5));
        assert_eq!(call(&unsubscribe, vec![]), Value::from(true));
        obs.set(Value::from(6));
        assert_eq!(*seen.borrow(), vec![Value::from(5)]);
    }

    #[test]
    fn test_json_and_object_helpers() {
        let obj = Value::object(vec![("b", Value::from(2)), ("a", Value::from(1))]);
        let json = global("JSON").unwrap();
        assert_eq!(
            call(&json.property("stringify").unwrap(), vec![obj.clone()]),
            Value::from(r#"{"a":1,"b":2}"#)
        );
        let keys = call(&global("Object").unwrap().property("keys").unwrap(), vec![obj]);
        assert_eq!(keys.to_string(), "a,b");
    }

    #[test]
    fn test_member_of_nullish_is_type_error() {
        assert!(matches!(get_member(&Value::Undefined, "x"), Err(EvalError::Type(_))));
    }
}
