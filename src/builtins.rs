//! Built-in methods on sandboxed data and the native namespace calls
//!
//! Everything here runs on behalf of the interpreter: callbacks go back
//! through [`Interp::call_value`], fresh containers and tracked mutations go
//! through the monitor. Promise combinators settle sequentially, in order;
//! execution contexts are single-threaded and there is nothing to race.

use std::rc::Rc;

use crate::interp::{Interp, drive_promise, raw_prop, throw};
use crate::log::{LogLevel, emit};
use crate::natives::{self, NativeNamespace};
use crate::value::{Method, Thrown, VResult, Value};

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "concat", "reverse", "indexOf", "lastIndexOf",
    "includes", "join", "map", "filter", "reduce", "forEach", "find", "findIndex", "some",
    "every", "sort", "flat",
];

const STRING_METHODS: &[&str] = &[
    "split", "slice", "substring", "indexOf", "lastIndexOf", "includes", "startsWith",
    "endsWith", "toUpperCase", "toLowerCase", "trim", "charAt", "charCodeAt", "codePointAt",
    "repeat", "replace", "replaceAll", "concat", "padStart", "padEnd", "at",
];

// `toString` and friends live on the protected list, so they never reach
// method dispatch
const NUMBER_METHODS: &[&str] = &["toFixed"];

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Array(_) => ARRAY_METHODS.contains(&name),
        Value::Str(_) => STRING_METHODS.contains(&name),
        Value::Number(_) => NUMBER_METHODS.contains(&name),
        _ => false,
    }
}

pub(crate) fn method(receiver: Value, name: &str) -> Value {
    Value::Method(Rc::new(Method {
        receiver,
        name: name.to_string(),
    }))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn index_arg(args: &[Value], i: usize, default: f64, len: usize) -> usize {
    let n = match args.get(i) {
        Some(Value::Undefined) | None => default,
        Some(v) => v.to_number(),
    };
    let n = if n.is_nan() { 0.0 } else { n };
    let n = if n < 0.0 { n + len as f64 } else { n };
    n.clamp(0.0, len as f64) as usize
}

pub(crate) async fn call_method(
    interp: &Interp,
    receiver: Value,
    name: &str,
    args: Vec<Value>,
) -> VResult {
    match &receiver {
        Value::Array(_) => call_array_method(interp, &receiver, name, args).await,
        Value::Str(s) => call_string_method(interp, s, name, &args),
        Value::Number(n) => call_number_method(*n, name, &args),
        other => Err(not_a_function(other, name)),
    }
}

fn not_a_function(receiver: &Value, name: &str) -> Thrown {
    throw(
        "TypeError",
        format!("{}.{} is not a function", receiver.to_display(), name),
    )
}

// ===== Arrays =====

async fn call_array_method(
    interp: &Interp,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> VResult {
    let Value::Array(cell) = receiver else {
        return Err(not_a_function(receiver, name));
    };
    let term = |e| Thrown::Terminated(e);

    match name {
        "push" => {
            for item in &args {
                interp.monitor.alloc(item, None, Some(receiver)).map_err(term)?;
            }
            let mut data = cell.borrow_mut();
            data.elements.extend(args);
            Ok(Value::Number(data.elements.len() as f64))
        }
        "pop" => {
            let popped = cell.borrow_mut().elements.pop();
            match popped {
                Some(item) => {
                    interp
                        .monitor
                        .alloc(&Value::Undefined, Some(&item), Some(receiver))
                        .map_err(term)?;
                    Ok(item)
                }
                None => Ok(Value::Undefined),
            }
        }
        "shift" => {
            let is_empty = cell.borrow().elements.is_empty();
            if is_empty {
                return Ok(Value::Undefined);
            }
            let item = cell.borrow_mut().elements.remove(0);
            interp
                .monitor
                .alloc(&Value::Undefined, Some(&item), Some(receiver))
                .map_err(term)?;
            Ok(item)
        }
        "unshift" => {
            for item in &args {
                interp.monitor.alloc(item, None, Some(receiver)).map_err(term)?;
            }
            let mut data = cell.borrow_mut();
            for item in args.into_iter().rev() {
                data.elements.insert(0, item);
            }
            Ok(Value::Number(data.elements.len() as f64))
        }
        "slice" => {
            let elements = cell.borrow().elements.clone();
            let start = index_arg(&args, 0, 0.0, elements.len());
            let end = index_arg(&args, 1, elements.len() as f64, elements.len());
            let out = Value::array(elements[start..end.max(start)].to_vec());
            interp.monitor.alloc(&out, None, None).map_err(term)?;
            Ok(out)
        }
        "concat" => {
            let mut elements = cell.borrow().elements.clone();
            for item in args {
                match item {
                    Value::Array(other) => elements.extend(other.borrow().elements.clone()),
                    other => elements.push(other),
                }
            }
            let out = Value::array(elements);
            interp.monitor.alloc(&out, None, None).map_err(term)?;
            Ok(out)
        }
        "reverse" => {
            cell.borrow_mut().elements.reverse();
            Ok(receiver.clone())
        }
        "flat" => {
            let depth = match args.first() {
                Some(v) => v.to_number().max(0.0) as usize,
                None => 1,
            };
            let out = Value::array(flatten(&cell.borrow().elements, depth));
            interp.monitor.alloc(&out, None, None).map_err(term)?;
            Ok(out)
        }
        "indexOf" => {
            let target = arg(&args, 0);
            let found = cell
                .borrow()
                .elements
                .iter()
                .position(|v| v.strict_eq(&target));
            Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "lastIndexOf" => {
            let target = arg(&args, 0);
            let found = cell
                .borrow()
                .elements
                .iter()
                .rposition(|v| v.strict_eq(&target));
            Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "includes" => {
            let target = arg(&args, 0);
            let found = cell.borrow().elements.iter().any(|v| v.strict_eq(&target));
            Ok(Value::Bool(found))
        }
        "join" => {
            let separator = match args.first() {
                Some(Value::Undefined) | None => ",".to_string(),
                Some(v) => v.to_display(),
            };
            let parts: Vec<String> = cell
                .borrow()
                .elements
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display(),
                })
                .collect();
            Ok(Value::str(parts.join(&separator)))
        }
        "map" => {
            let callback = arg(&args, 0);
            let elements = cell.borrow().elements.clone();
            let mut out = Vec::with_capacity(elements.len());
            for (i, item) in elements.into_iter().enumerate() {
                let mapped = interp
                    .call_value(callback.clone(), vec![item, Value::Number(i as f64)])
                    .await?;
                out.push(interp.resolve(mapped).await?);
            }
            let out = Value::array(out);
            interp.monitor.alloc(&out, None, None).map_err(term)?;
            Ok(out)
        }
        "filter" => {
            let callback = arg(&args, 0);
            let elements = cell.borrow().elements.clone();
            let mut out = Vec::new();
            for (i, item) in elements.into_iter().enumerate() {
                let keep = interp
                    .call_value(callback.clone(), vec![item.clone(), Value::Number(i as f64)])
                    .await?;
                if interp.resolve(keep).await?.is_truthy() {
                    out.push(item);
                }
            }
            let out = Value::array(out);
            interp.monitor.alloc(&out, None, None).map_err(term)?;
            Ok(out)
        }
        "reduce" => {
            let callback = arg(&args, 0);
            let elements = cell.borrow().elements.clone();
            let mut iter = elements.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(seed) => seed.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(throw(
                            "TypeError",
                            "Reduce of empty array with no initial value",
                        ));
                    }
                },
            };
            for (i, item) in iter {
                let next = interp
                    .call_value(
                        callback.clone(),
                        vec![acc, item, Value::Number(i as f64)],
                    )
                    .await?;
                acc = interp.resolve(next).await?;
            }
            Ok(acc)
        }
        "forEach" => {
            let callback = arg(&args, 0);
            let elements = cell.borrow().elements.clone();
            for (i, item) in elements.into_iter().enumerate() {
                let r = interp
                    .call_value(callback.clone(), vec![item, Value::Number(i as f64)])
                    .await?;
                interp.resolve(r).await?;
            }
            Ok(Value::Undefined)
        }
        "find" | "findIndex" | "some" | "every" => {
            let callback = arg(&args, 0);
            let elements = cell.borrow().elements.clone();
            for (i, item) in elements.into_iter().enumerate() {
                let r = interp
                    .call_value(callback.clone(), vec![item.clone(), Value::Number(i as f64)])
                    .await?;
                let truthy = interp.resolve(r).await?.is_truthy();
                match name {
                    "find" if truthy => return Ok(item),
                    "findIndex" if truthy => return Ok(Value::Number(i as f64)),
                    "some" if truthy => return Ok(Value::Bool(true)),
                    "every" if !truthy => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            Ok(match name {
                "find" => Value::Undefined,
                "findIndex" => Value::Number(-1.0),
                "some" => Value::Bool(false),
                _ => Value::Bool(true),
            })
        }
        "sort" => {
            let comparator = args.first().cloned();
            let mut elements = cell.borrow().elements.clone();
            // insertion sort; comparators can suspend, so no sort_by here
            for i in 1..elements.len() {
                let mut j = i;
                while j > 0 {
                    let out_of_order = match &comparator {
                        Some(cmp) => {
                            let r = interp
                                .call_value(
                                    cmp.clone(),
                                    vec![elements[j - 1].clone(), elements[j].clone()],
                                )
                                .await?;
                            interp.resolve(r).await?.to_number() > 0.0
                        }
                        None => elements[j - 1].to_display() > elements[j].to_display(),
                    };
                    if !out_of_order {
                        break;
                    }
                    elements.swap(j - 1, j);
                    j -= 1;
                }
            }
            cell.borrow_mut().elements = elements;
            Ok(receiver.clone())
        }
        _ => Err(not_a_function(receiver, name)),
    }
}

fn flatten(elements: &[Value], depth: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(elements.len());
    for item in elements {
        match item {
            Value::Array(inner) if depth > 0 => {
                out.extend(flatten(&inner.borrow().elements, depth - 1));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

// ===== Strings =====

fn call_string_method(interp: &Interp, s: &Rc<str>, name: &str, args: &[Value]) -> VResult {
    let chars: Vec<char> = s.chars().collect();
    match name {
        "split" => {
            let parts: Vec<Value> = match args.first() {
                Some(Value::Undefined) | None => vec![Value::Str(Rc::clone(s))],
                Some(sep) => {
                    let sep = sep.to_display();
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            let out = Value::array(parts);
            interp
                .monitor
                .alloc(&out, None, None)
                .map_err(Thrown::Terminated)?;
            Ok(out)
        }
        "slice" | "substring" => {
            let start = index_arg(args, 0, 0.0, chars.len());
            let end = index_arg(args, 1, chars.len() as f64, chars.len());
            let (start, end) = if name == "substring" && end < start {
                (end, start)
            } else {
                (start, end.max(start))
            };
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        }
        "indexOf" => {
            let needle = arg(args, 0).to_display();
            Ok(Value::Number(match s.find(&needle) {
                Some(byte) => s[..byte].chars().count() as f64,
                None => -1.0,
            }))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0).to_display();
            Ok(Value::Number(match s.rfind(&needle) {
                Some(byte) => s[..byte].chars().count() as f64,
                None => -1.0,
            }))
        }
        "includes" => Ok(Value::Bool(s.contains(&arg(args, 0).to_display()))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&arg(args, 0).to_display()))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&arg(args, 0).to_display()))),
        "toUpperCase" => Ok(Value::str(s.to_uppercase())),
        "toLowerCase" => Ok(Value::str(s.to_lowercase())),
        "trim" => Ok(Value::str(s.trim())),
        "charAt" => {
            let index = arg(args, 0).to_number();
            let c = if index >= 0.0 {
                chars.get(index as usize)
            } else {
                None
            };
            Ok(Value::str(c.map(|c| c.to_string()).unwrap_or_default()))
        }
        "at" => {
            let index = arg(args, 0).to_number();
            let index = if index < 0.0 { index + chars.len() as f64 } else { index };
            match chars.get(index.max(0.0) as usize) {
                Some(c) if index >= 0.0 => Ok(Value::str(c.to_string())),
                _ => Ok(Value::Undefined),
            }
        }
        "charCodeAt" | "codePointAt" => {
            let index = arg(args, 0).to_number().max(0.0) as usize;
            match chars.get(index) {
                Some(c) => Ok(Value::Number(*c as u32 as f64)),
                None if name == "charCodeAt" => Ok(Value::Number(f64::NAN)),
                None => Ok(Value::Undefined),
            }
        }
        "repeat" => {
            let count = arg(args, 0).to_number();
            if count < 0.0 || !count.is_finite() {
                return Err(throw("RangeError", "Invalid count value"));
            }
            Ok(Value::str(s.repeat(count as usize)))
        }
        "replace" => {
            let pattern = arg(args, 0).to_display();
            let replacement = arg(args, 1).to_display();
            Ok(Value::str(s.replacen(&pattern, &replacement, 1)))
        }
        "replaceAll" => {
            let pattern = arg(args, 0).to_display();
            let replacement = arg(args, 1).to_display();
            Ok(Value::str(s.replace(&pattern, &replacement)))
        }
        "concat" => {
            let mut out = s.to_string();
            for item in args {
                out.push_str(&item.to_display());
            }
            Ok(Value::str(out))
        }
        "padStart" | "padEnd" => {
            let target = arg(args, 0).to_number().max(0.0) as usize;
            let pad = match args.get(1) {
                Some(Value::Undefined) | None => " ".to_string(),
                Some(v) => v.to_display(),
            };
            if chars.len() >= target || pad.is_empty() {
                return Ok(Value::Str(Rc::clone(s)));
            }
            let fill: String = pad.chars().cycle().take(target - chars.len()).collect();
            Ok(Value::str(if name == "padStart" {
                format!("{}{}", fill, s)
            } else {
                format!("{}{}", s, fill)
            }))
        }
        _ => Err(not_a_function(&Value::Str(Rc::clone(s)), name)),
    }
}

// ===== Numbers =====

fn call_number_method(n: f64, name: &str, args: &[Value]) -> VResult {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            if !(0.0..=100.0).contains(&digits) {
                return Err(throw("RangeError", "toFixed() digits argument out of range"));
            }
            Ok(Value::str(format!("{:.*}", digits as usize, n)))
        }
        _ => Err(not_a_function(&Value::Number(n), name)),
    }
}

// ===== Native namespaces =====

pub(crate) async fn call_native(
    interp: &Interp,
    ns: &'static NativeNamespace,
    member: &str,
    args: Vec<Value>,
) -> VResult {
    match ns.name {
        "console" => {
            let message = args
                .iter()
                .map(|v| v.to_display())
                .collect::<Vec<_>>()
                .join(" ");
            emit(&interp.log_tx, LogLevel::from_str(member), message);
            Ok(Value::Undefined)
        }
        "Object" => call_object_native(interp, member, args),
        "Promise" => call_promise_native(interp, member, args).await,
        "Date" => Ok(match member {
            "now" => Value::Number(natives::date_now()),
            "parse" => Value::Number(natives::date_parse(&arg(&args, 0).to_display())),
            _ => {
                let numbers: Vec<f64> = args.iter().map(|v| v.to_number()).collect();
                Value::Number(natives::date_utc(&numbers))
            }
        }),
        "Array" => call_array_native(interp, member, args).await,
        "Number" => call_number_native(member, &args),
        "String" => call_string_native(member, &args),
        _ => Err(throw(
            "TypeError",
            format!("{}.{} is not a function", ns.name, member),
        )),
    }
}

fn tracked(interp: &Interp, value: Value) -> VResult {
    interp
        .monitor
        .alloc(&value, None, None)
        .map_err(Thrown::Terminated)?;
    Ok(value)
}

fn call_object_native(interp: &Interp, member: &str, args: Vec<Value>) -> VResult {
    let subject = arg(&args, 0);
    match member {
        "keys" | "values" => {
            let pairs = own_entries(&subject);
            let out = Value::array(
                pairs
                    .into_iter()
                    .map(|(k, v)| if member == "keys" { Value::str(k) } else { v })
                    .collect(),
            );
            tracked(interp, out)
        }
        "hasOwnProperty" => {
            let key = arg(&args, 1).to_display();
            let found = own_entries(&subject).iter().any(|(k, _)| *k == key);
            Ok(Value::Bool(found))
        }
        "fromEntries" => {
            let Value::Array(cell) = &subject else {
                return Err(throw("TypeError", "argument is not iterable"));
            };
            let mut entries = Vec::new();
            for pair in cell.borrow().elements.iter() {
                let key = raw_prop(pair, "0").to_display();
                let value = raw_prop(pair, "1");
                if value.is_function() {
                    return Err(throw("Error", "Object does not accept function"));
                }
                entries.push((key, value));
            }
            tracked(interp, Value::object(entries))
        }
        "assign" => {
            let target = subject;
            for source in args.iter().skip(1) {
                for (key, value) in own_entries(source) {
                    interp.set_prop(target.clone(), &key, value, crate::ast::AssignOp::Assign)?;
                }
            }
            Ok(target)
        }
        "create" => tracked(interp, Value::object(vec![])),
        _ => Err(throw(
            "TypeError",
            format!("Object.{} is not a function", member),
        )),
    }
}

fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(cell) => cell.borrow().entries.clone(),
        Value::Array(cell) => cell
            .borrow()
            .elements
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => vec![],
    }
}

async fn call_promise_native(interp: &Interp, member: &str, args: Vec<Value>) -> VResult {
    match member {
        "resolve" => Ok(Value::resolved(arg(&args, 0))),
        "reject" => Ok(Value::rejected(arg(&args, 0))),
        "all" | "race" | "allSettled" => {
            let Value::Array(cell) = arg(&args, 0) else {
                return Err(throw("TypeError", "argument is not iterable"));
            };
            let items = cell.borrow().elements.clone();
            let mut settled = Vec::with_capacity(items.len());
            for item in items {
                let outcome = match item {
                    Value::Promise(p) => drive_promise(p).await,
                    concrete => Ok(concrete),
                };
                match outcome {
                    Ok(value) => {
                        if member == "race" {
                            return Ok(Value::resolved(value));
                        }
                        settled.push(Ok(value));
                    }
                    Err(Thrown::Value(reason)) => {
                        if member != "allSettled" {
                            return Ok(Value::rejected(reason));
                        }
                        settled.push(Err(reason));
                    }
                    Err(terminated) => return Err(terminated),
                }
            }
            let out = match member {
                "all" => Value::array(settled.into_iter().map(|r| r.unwrap_or_default()).collect()),
                "race" => Value::resolved(Value::Undefined),
                _ => Value::array(
                    settled
                        .into_iter()
                        .map(|r| match r {
                            Ok(value) => Value::object(vec![
                                ("status".to_string(), Value::str("fulfilled")),
                                ("value".to_string(), value),
                            ]),
                            Err(reason) => Value::object(vec![
                                ("status".to_string(), Value::str("rejected")),
                                ("reason".to_string(), reason),
                            ]),
                        })
                        .collect(),
                ),
            };
            if matches!(out, Value::Array(_)) {
                let out = tracked(interp, out)?;
                return Ok(Value::resolved(out));
            }
            Ok(out)
        }
        _ => Err(throw(
            "TypeError",
            format!("Promise.{} is not a function", member),
        )),
    }
}

async fn call_array_native(interp: &Interp, member: &str, args: Vec<Value>) -> VResult {
    match member {
        "isArray" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
        "of" => tracked(interp, Value::array(args)),
        "from" => {
            let items = match arg(&args, 0) {
                Value::Array(cell) => cell.borrow().elements.clone(),
                Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                Value::Object(cell) => {
                    // array-like: { length, 0.., }
                    let data = cell.borrow();
                    let length = data
                        .get("length")
                        .map(|v| v.to_number().max(0.0) as usize)
                        .unwrap_or(0);
                    (0..length)
                        .map(|i| data.get(&i.to_string()).unwrap_or(Value::Undefined))
                        .collect()
                }
                other => {
                    return Err(throw(
                        "TypeError",
                        format!("{} is not iterable", other.to_display()),
                    ));
                }
            };
            let items = match args.get(1) {
                Some(mapper) if mapper.is_function() => {
                    let mut mapped = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        let r = interp
                            .call_value(mapper.clone(), vec![item, Value::Number(i as f64)])
                            .await?;
                        mapped.push(interp.resolve(r).await?);
                    }
                    mapped
                }
                _ => items,
            };
            tracked(interp, Value::array(items))
        }
        _ => Err(throw(
            "TypeError",
            format!("Array.{} is not a function", member),
        )),
    }
}

fn call_number_native(member: &str, args: &[Value]) -> VResult {
    let subject = arg(args, 0);
    match member {
        "isFinite" => Ok(Value::Bool(
            matches!(subject, Value::Number(n) if n.is_finite()),
        )),
        "isNaN" => Ok(Value::Bool(matches!(subject, Value::Number(n) if n.is_nan()))),
        "isInteger" => Ok(Value::Bool(
            matches!(subject, Value::Number(n) if n.is_finite() && n.fract() == 0.0),
        )),
        "isSafeInteger" => Ok(Value::Bool(matches!(
            subject,
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() <= 9007199254740991.0
        ))),
        "parseFloat" => Ok(Value::Number(parse_float(&subject.to_display()))),
        "parseInt" => {
            let radix = match args.get(1) {
                Some(Value::Undefined) | None => 10,
                Some(v) => v.to_number() as u32,
            };
            Ok(Value::Number(parse_int(&subject.to_display(), radix)))
        }
        _ => Err(throw(
            "TypeError",
            format!("Number.{} is not a function", member),
        )),
    }
}

/// Longest numeric prefix, JS `parseFloat` style
fn parse_float(input: &str) -> f64 {
    let s = input.trim_start();
    let mut end = 0;
    let bytes = s.as_bytes();
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        let ok = c.is_ascii_digit()
            || ((c == '+' || c == '-')
                && (end == 0 || bytes[end - 1] == b'e' || bytes[end - 1] == b'E'))
            || (c == '.' && !seen_dot && !seen_exp)
            || ((c == 'e' || c == 'E') && !seen_exp && end > 0);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        seen_exp |= c == 'e' || c == 'E';
        end += 1;
    }
    while end > 0 {
        if let Ok(n) = s[..end].parse::<f64>() {
            return n;
        }
        end -= 1;
    }
    f64::NAN
}

/// JS `parseInt`: longest valid digit prefix for the given radix
fn parse_int(input: &str, radix: u32) -> f64 {
    let mut s = input.trim();
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let negative = match s.as_bytes().first() {
        Some(b'-') => {
            s = &s[1..];
            true
        }
        Some(b'+') => {
            s = &s[1..];
            false
        }
        _ => false,
    };
    if radix == 16 {
        s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    }
    let mut value: f64 = 0.0;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return f64::NAN;
    }
    if negative { -value } else { value }
}

fn call_string_native(member: &str, args: &[Value]) -> VResult {
    match member {
        "fromCharCode" | "fromCodePoint" => {
            let mut out = String::new();
            for item in args {
                let code = item.to_number();
                if member == "fromCodePoint" && (code < 0.0 || code > 0x10FFFF as f64) {
                    return Err(throw(
                        "RangeError",
                        format!("Invalid code point {}", item.to_display()),
                    ));
                }
                match char::from_u32(code as u32) {
                    Some(c) => out.push(c),
                    None => out.push('\u{FFFD}'),
                }
            }
            Ok(Value::str(out))
        }
        "raw" => {
            // String.raw({ raw: [...] }, ...substitutions)
            let raw = raw_prop(&arg(args, 0), "raw");
            let Value::Array(cell) = raw else {
                return Err(throw("TypeError", "Cannot convert undefined to object"));
            };
            let parts = cell.borrow().elements.clone();
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                out.push_str(&part.to_display());
                if i + 1 < parts.len() {
                    if let Some(sub) = args.get(i + 1) {
                        out.push_str(&sub.to_display());
                    }
                }
            }
            Ok(Value::str(out))
        }
        _ => Err(throw(
            "TypeError",
            format!("String.{} is not a function", member),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;
    use crate::limits::SandboxLimits;
    use crate::monitor::Monitor;
    use crate::value::Scope;

    fn interp() -> Interp {
        Interp::new(
            Rc::new(Monitor::new(SandboxLimits::default())),
            None,
            "query.js".to_string(),
        )
    }

    async fn eval(src: &str) -> Value {
        let program = crate::parser::parse(src).unwrap();
        let it = interp();
        let scope = Scope::root();
        for ns in crate::natives::ALL {
            scope.declare(ns.name, Value::Native(ns), false);
        }
        let entry = it.eval_program(&program, &scope).await.unwrap();
        let result = it.call_value(entry, vec![]).await.unwrap();
        it.resolve(result).await.unwrap()
    }

    #[tokio::test]
    async fn array_transforms() {
        let v = eval("async () => [1, 2, 3, 4].filter((n) => n % 2 === 0).map((n) => n * 10).join('-')").await;
        assert_eq!(v.to_display(), "20-40");
    }

    #[tokio::test]
    async fn reduce_with_and_without_seed() {
        assert_eq!(
            eval("async () => [1, 2, 3].reduce((a, b) => a + b, 10)").await.to_number(),
            16.0
        );
        assert_eq!(
            eval("async () => [1, 2, 3].reduce((a, b) => a + b)").await.to_number(),
            6.0
        );
    }

    #[tokio::test]
    async fn push_accounts_against_the_array() {
        let it = interp();
        let array = Value::array(vec![]);
        it.monitor.alloc(&array, None, None).unwrap();
        let before = it.monitor.allocated();
        call_method(&it, array, "push", vec![Value::Number(1.0)])
            .await
            .unwrap();
        assert_eq!(it.monitor.allocated(), before + 10);
    }

    #[tokio::test]
    async fn string_methods() {
        assert_eq!(eval("async () => ' ab '.trim().toUpperCase()").await.to_display(), "AB");
        assert_eq!(eval("async () => 'a,b,c'.split(',').length").await.to_number(), 3.0);
        assert_eq!(eval("async () => 'hello'.slice(1, 3)").await.to_display(), "el");
        assert_eq!(eval("async () => 'abc'.indexOf('c')").await.to_number(), 2.0);
        assert_eq!(eval("async () => '5'.padStart(3, '0')").await.to_display(), "005");
    }

    #[tokio::test]
    async fn number_methods_and_statics() {
        assert_eq!(eval("async () => (1.005).toFixed(2)").await.to_display(), "1.00");
        assert_eq!(eval("async () => Number.parseInt('2f', 16)").await.to_number(), 47.0);
        assert_eq!(eval("async () => Number.parseFloat('3.5rest')").await.to_number(), 3.5);
        assert_eq!(eval("async () => Number.isInteger(4)").await.to_display(), "true");
        assert!(eval("async () => Number.parseInt('zz')").await.to_number().is_nan());
    }

    #[tokio::test]
    async fn object_statics() {
        assert_eq!(
            eval("async () => Object.keys({ a: 1, b: 2 }).join(',')").await.to_display(),
            "a,b"
        );
        assert_eq!(
            eval("async () => Object.values({ a: 1 })[0]").await.to_number(),
            1.0
        );
        let v = eval("async () => { const o = Object.assign({}, { x: 7 }); return o.x; }").await;
        assert_eq!(v.to_number(), 7.0);
        assert_eq!(
            eval("async () => Object.fromEntries([['k', 9]]).k").await.to_number(),
            9.0
        );
    }

    #[tokio::test]
    async fn promise_combinators_settle_in_order() {
        let v = eval(
            "async () => {
                const double = async (n) => n * 2;
                const all = await Promise.all([double(1), 4, double(3)]);
                return all.join(',');
            }",
        )
        .await;
        assert_eq!(v.to_display(), "2,4,6");
    }

    #[tokio::test]
    async fn promise_all_rejects_on_first_failure() {
        let v = eval(
            "async () => {
                const boom = async () => { throw new Error('nope'); };
                try { await Promise.all([boom()]); } catch (e) { return e.message; }
            }",
        )
        .await;
        assert_eq!(v.to_display(), "nope");
    }

    #[tokio::test]
    async fn all_settled_reports_both_outcomes() {
        let v = eval(
            "async () => {
                const boom = async () => { throw new Error('x') };
                const settled = await Promise.allSettled([1, boom()]);
                return settled[0].status + ',' + settled[1].status;
            }",
        )
        .await;
        assert_eq!(v.to_display(), "fulfilled,rejected");
    }

    #[tokio::test]
    async fn array_statics() {
        assert_eq!(eval("async () => Array.isArray([])").await.to_display(), "true");
        assert_eq!(eval("async () => Array.from('abc').join('.')").await.to_display(), "a.b.c");
        assert_eq!(eval("async () => Array.of(1, 2).length").await.to_number(), 2.0);
    }

    #[tokio::test]
    async fn console_goes_to_the_log_channel() {
        let (tx, rx) = std::sync::mpsc::channel();
        let it = Interp::new(
            Rc::new(Monitor::new(SandboxLimits::default())),
            Some(tx),
            "query.js".to_string(),
        );
        call_native(
            &it,
            crate::natives::lookup("console").unwrap(),
            "warn",
            vec![Value::str("careful"), Value::Number(7.0)],
        )
        .await
        .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, LogLevel::Warn);
        assert_eq!(event.message, "careful 7");
    }
}
