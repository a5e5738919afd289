//! Runtime value representation
//!
//! Values are single-threaded by construction (`Rc`/`RefCell`); execution
//! contexts live on one thread and are never shared, the same property the
//! worker unit relies on when it pins a runtime to a dedicated thread.
//! Arrays and objects carry their own cached-size slot so the monitor can
//! memoize worst-case estimates by identity without an external map.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::ast::ArrowFunction;
use crate::error::RunError;
use crate::natives::NativeNamespace;
use crate::parser::format_number;

/// Non-local exit of an evaluation
#[derive(Debug)]
pub enum Thrown {
    /// A sandbox-level `throw`, catchable by sandboxed `try`
    Value(Value),
    /// A budget trip; terminates the execution and is not catchable
    Terminated(RunError),
}

pub type VResult = Result<Value, Thrown>;

/// Boxed evaluation future; deliberately not `Send`
pub type ValueFuture = Pin<Box<dyn Future<Output = VResult>>>;

/// Caller-supplied async native function
pub struct HostFn {
    pub name: String,
    pub body: Rc<dyn Fn(Vec<Value>) -> ValueFuture>,
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn({})", self.name)
    }
}

#[derive(Debug, Default)]
pub struct ArrayData {
    pub elements: Vec<Value>,
    /// Memoized worst-case size; invalidated by the monitor on writes
    pub cached_size: Option<u64>,
}

/// Insertion-ordered string-keyed entries, the observable object model
#[derive(Debug, Default)]
pub struct ObjectData {
    pub entries: Vec<(String, Value)>,
    pub cached_size: Option<u64>,
}

impl ObjectData {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }
}

/// A user function together with its defining environment
#[derive(Debug)]
pub struct Closure {
    pub func: Rc<ArrowFunction>,
    pub env: Rc<Scope>,
}

/// A builtin method extracted from its receiver (`const p = arr.slice`)
#[derive(Debug)]
pub struct Method {
    pub receiver: Value,
    pub name: String,
}

/// Deferred computation observed by `await`
pub enum PromiseState {
    Pending(ValueFuture),
    Resolved(Value),
    Rejected(Value),
}

impl fmt::Debug for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(_) => write!(f, "Pending"),
            Self::Resolved(v) => write!(f, "Resolved({:?})", v),
            Self::Rejected(v) => write!(f, "Rejected({:?})", v),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<ArrayData>>),
    Object(Rc<RefCell<ObjectData>>),
    Closure(Rc<Closure>),
    Method(Rc<Method>),
    Native(&'static NativeNamespace),
    HostFn(Rc<HostFn>),
    Promise(Rc<RefCell<PromiseState>>),
    /// A callable read out of tracked data; invoking it re-applies capture
    /// accounting to its result
    Captured(Rc<Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::from(s.into().into_boxed_str()))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(ArrayData { elements, cached_size: None })))
    }

    pub fn object(entries: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(ObjectData { entries, cached_size: None })))
    }

    pub fn resolved(value: Value) -> Self {
        Value::Promise(Rc::new(RefCell::new(PromiseState::Resolved(value))))
    }

    pub fn rejected(value: Value) -> Self {
        Value::Promise(Rc::new(RefCell::new(PromiseState::Rejected(value))))
    }

    pub fn pending(future: ValueFuture) -> Self {
        Value::Promise(Rc::new(RefCell::new(PromiseState::Pending(future))))
    }

    /// Result of the `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Promise(_) => "object",
            Value::Closure(_) | Value::Method(_) | Value::HostFn(_) | Value::Captured(_) => {
                "function"
            }
            Value::Native(_) => "object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Method(_) | Value::HostFn(_) | Value::Captured(_)
        )
    }

    /// `String(value)` semantics, also used for string concatenation
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => js_number_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(a) => {
                let data = a.borrow();
                data.elements
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_display(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(o) => {
                // error-shaped objects stringify like JS errors do
                let data = o.borrow();
                match (data.get("name"), data.get("message")) {
                    (Some(Value::Str(name)), Some(Value::Str(message))) => {
                        format!("{}: {}", name, message)
                    }
                    _ => "[object Object]".to_string(),
                }
            }
            Value::Closure(_) | Value::Method(_) | Value::HostFn(_) | Value::Captured(_) => {
                "function".to_string()
            }
            Value::Native(ns) => format!("[object {}]", ns.name),
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }

    /// Coercion used by arithmetic and comparison operators
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
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(a) => {
                let data = a.borrow();
                match data.elements.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `===`
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::HostFn(a), Value::HostFn(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => std::ptr::eq(*a, *b),
            (Value::Captured(a), Value::Captured(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`, covering the coercions the subset can reach
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Number(_), Value::Number(_))
            | (Value::Str(_), Value::Str(_))
            | (Value::Bool(_), Value::Bool(_)) => self.strict_eq(other),
            (Value::Number(a), Value::Str(_)) => *a == other.to_number(),
            (Value::Str(_), Value::Number(b)) => self.to_number() == *b,
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_eq(other),
            (_, Value::Bool(_)) => self.loose_eq(&Value::Number(other.to_number())),
            (Value::Str(s), Value::Array(_)) => s.as_ref() == other.to_display(),
            (Value::Array(_), Value::Str(s)) => self.to_display() == s.as_ref(),
            _ => self.strict_eq(other),
        }
    }

    // ===== JSON bridge =====

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Data projection; functions, promises and natives have no JSON form
    /// and collapse to null, like `JSON.stringify` would drop them
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => {
                let data = a.borrow();
                serde_json::Value::Array(data.elements.iter().map(Value::to_json).collect())
            }
            Value::Object(o) => {
                let data = o.borrow();
                serde_json::Value::Object(
                    data.entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                )
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// Render a number the way JS does
pub fn js_number_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        format_number(n)
    }
}

// ===== Lexical scopes =====

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScopeError {
    NotFound,
    ConstAssignment,
}

/// A lexical scope frame; closures keep their defining frame alive
#[derive(Debug)]
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref()?.get(name)
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), ScopeError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(ScopeError::ConstAssignment);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(ScopeError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_js() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("0").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn strict_eq_is_identity_for_containers() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        assert!(!a.strict_eq(&b));
        assert!(a.strict_eq(&a.clone()));
    }

    #[test]
    fn loose_eq_coerces_numbers_and_strings() {
        assert!(Value::Number(1.0).loose_eq(&Value::str("1")));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn display_follows_js_stringification() {
        assert_eq!(Value::Number(1.5).to_display(), "1.5");
        assert_eq!(Value::Number(f64::NAN).to_display(), "NaN");
        assert_eq!(
            Value::array(vec![Value::Number(1.0), Value::Null, Value::str("x")]).to_display(),
            "1,,x"
        );
        assert_eq!(Value::object(vec![]).to_display(), "[object Object]");
    }

    #[test]
    fn json_round_trip_preserves_data() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, "two", null], "b": true}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn const_bindings_reject_assignment() {
        let root = Scope::root();
        root.declare("x", Value::Number(1.0), false);
        assert_eq!(
            root.assign("x", Value::Number(2.0)),
            Err(ScopeError::ConstAssignment)
        );
        let child = Scope::child(&root);
        assert_eq!(
            child.assign("x", Value::Number(2.0)),
            Err(ScopeError::ConstAssignment)
        );
        assert_eq!(
            child.assign("y", Value::Number(2.0)),
            Err(ScopeError::NotFound)
        );
    }

    #[test]
    fn child_scopes_shadow() {
        let root = Scope::root();
        root.declare("x", Value::Number(1.0), true);
        let child = Scope::child(&root);
        child.declare("x", Value::Number(2.0), true);
        assert_eq!(child.get("x").unwrap().to_number(), 2.0);
        assert_eq!(root.get("x").unwrap().to_number(), 1.0);
    }
}
