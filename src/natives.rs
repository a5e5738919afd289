//! Read-only native bindings
//!
//! Each namespace exposes exactly its member allow-list; any other member
//! reads as undefined and writes are rejected upstream by the monitor. The
//! member dispatch itself lives in the interpreter; this module owns the
//! namespace table, the constant members and the date arithmetic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::value::Value;

/// A read-only native namespace visible to sandboxed code
#[derive(Debug)]
pub struct NativeNamespace {
    pub name: &'static str,
    pub members: &'static [&'static str],
    /// Callable with `new`, producing an error-shaped object
    pub error_ctor: bool,
}

macro_rules! namespace {
    ($ident:ident, $name:literal, [$($member:literal),* $(,)?]) => {
        pub static $ident: NativeNamespace = NativeNamespace {
            name: $name,
            members: &[$($member),*],
            error_ctor: false,
        };
    };
}

namespace!(CONSOLE, "console", ["log", "error", "warn"]);
namespace!(OBJECT, "Object", [
    "keys", "values", "hasOwnProperty", "fromEntries", "assign", "create",
]);
namespace!(PROMISE, "Promise", ["all", "race", "resolve", "reject", "allSettled"]);
namespace!(DATE, "Date", ["now", "parse", "UTC"]);
namespace!(ARRAY, "Array", ["isArray", "from", "of"]);
namespace!(NUMBER, "Number", [
    "isFinite",
    "isInteger",
    "isNaN",
    "isSafeInteger",
    "parseFloat",
    "parseInt",
    "MAX_VALUE",
    "MIN_VALUE",
    "NaN",
    "NEGATIVE_INFINITY",
    "POSITIVE_INFINITY",
    "MAX_SAFE_INTEGER",
    "MIN_SAFE_INTEGER",
    "EPSILON",
]);
namespace!(STRING, "String", ["fromCharCode", "fromCodePoint", "raw"]);

macro_rules! error_ctor {
    ($ident:ident, $name:literal) => {
        pub static $ident: NativeNamespace = NativeNamespace {
            name: $name,
            members: &[],
            error_ctor: true,
        };
    };
}

error_ctor!(ERROR, "Error");
error_ctor!(EVAL_ERROR, "EvalError");
error_ctor!(RANGE_ERROR, "RangeError");
error_ctor!(REFERENCE_ERROR, "ReferenceError");
error_ctor!(SYNTAX_ERROR, "SyntaxError");
error_ctor!(TYPE_ERROR, "TypeError");
error_ctor!(URI_ERROR, "URIError");

/// All namespaces, in binding order
pub static ALL: [&NativeNamespace; 14] = [
    &CONSOLE,
    &OBJECT,
    &PROMISE,
    &DATE,
    &ARRAY,
    &NUMBER,
    &STRING,
    &ERROR,
    &EVAL_ERROR,
    &RANGE_ERROR,
    &REFERENCE_ERROR,
    &SYNTAX_ERROR,
    &TYPE_ERROR,
    &URI_ERROR,
];

pub fn lookup(name: &str) -> Option<&'static NativeNamespace> {
    ALL.iter().copied().find(|ns| ns.name == name)
}

impl NativeNamespace {
    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains(&name)
    }

    /// Constant (non-callable) members; everything else dispatches as a call
    pub fn constant(&self, member: &str) -> Option<Value> {
        if !std::ptr::eq(self, &NUMBER) {
            return None;
        }
        let n = match member {
            "MAX_VALUE" => f64::MAX,
            "MIN_VALUE" => f64::MIN_POSITIVE,
            "NaN" => f64::NAN,
            "NEGATIVE_INFINITY" => f64::NEG_INFINITY,
            "POSITIVE_INFINITY" => f64::INFINITY,
            "MAX_SAFE_INTEGER" => 9007199254740991.0,
            "MIN_SAFE_INTEGER" => -9007199254740991.0,
            "EPSILON" => f64::EPSILON,
            _ => return None,
        };
        Some(Value::Number(n))
    }
}

/// An error-shaped object: `{ name, message, stack }`
pub fn make_error(name: &str, message: &str) -> Value {
    Value::object(vec![
        ("name".to_string(), Value::str(name)),
        ("message".to_string(), Value::str(message)),
        ("stack".to_string(), Value::str(format!("{}: {}", name, message))),
    ])
}

// ===== Date =====

pub fn date_now() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// `Date.parse`: RFC 3339 / ISO 8601 and the date-only short form
pub fn date_parse(input: &str) -> f64 {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return dt.timestamp_millis() as f64;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.and_utc().timestamp_millis() as f64;
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return dt.and_utc().timestamp_millis() as f64;
        }
    }
    f64::NAN
}

/// `Date.UTC(year, month, day, hour, minute, second, ms)`; month is 0-based
pub fn date_utc(args: &[f64]) -> f64 {
    let get = |i: usize, default: f64| args.get(i).copied().unwrap_or(default);
    let year = get(0, f64::NAN);
    if year.is_nan() {
        return f64::NAN;
    }
    let month = get(1, 0.0) as u32 + 1;
    let day = get(2, 1.0) as u32;
    let hour = get(3, 0.0) as u32;
    let minute = get(4, 0.0) as u32;
    let second = get(5, 0.0) as u32;
    let millis = get(6, 0.0);
    match Utc
        .with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
    {
        Some(dt) => dt.timestamp_millis() as f64 + millis,
        None => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_resolve_by_name() {
        assert!(lookup("console").is_some());
        assert!(lookup("TypeError").unwrap().error_ctor);
        assert!(lookup("Math").is_none());
    }

    #[test]
    fn member_allow_lists_are_exact() {
        let object = lookup("Object").unwrap();
        assert!(object.has_member("keys"));
        assert!(!object.has_member("entries"));
        assert!(!object.has_member("defineProperty"));
        assert!(!object.has_member("__proto__"));

        let string = lookup("String").unwrap();
        assert!(string.has_member("raw"));
    }

    #[test]
    fn number_constants() {
        let number = lookup("Number").unwrap();
        assert_eq!(
            number.constant("MAX_SAFE_INTEGER").unwrap().to_number(),
            9007199254740991.0
        );
        assert!(number.constant("isNaN").is_none());
        assert!(lookup("Date").unwrap().constant("now").is_none());
    }

    #[test]
    fn date_parse_iso_forms() {
        assert_eq!(date_parse("1970-01-01T00:00:00Z"), 0.0);
        assert_eq!(date_parse("1970-01-02"), 86_400_000.0);
        assert!(date_parse("not a date").is_nan());
    }

    #[test]
    fn date_utc_is_zero_based_for_months() {
        assert_eq!(date_utc(&[1970.0, 0.0, 1.0]), 0.0);
        assert_eq!(date_utc(&[1970.0, 1.0, 1.0]), 31.0 * 86_400_000.0);
        assert!(date_utc(&[]).is_nan());
    }

    #[test]
    fn error_objects_are_error_shaped() {
        let err = make_error("TypeError", "boom");
        let Value::Object(obj) = &err else { panic!() };
        let data = obj.borrow();
        assert_eq!(data.get("name").unwrap().to_display(), "TypeError");
        assert_eq!(err.to_display(), "TypeError: boom");
    }
}
