//! Runtime monitor
//!
//! One monitor per execution, never reused and never shared across threads.
//! Once a budget trips the stored error is sticky: every later check
//! re-raises the same error, so a caught-and-swallowed trip resurfaces at
//! the next injected check.
//!
//! Synchronous code has no natural suspension point, so injected sync checks
//! bound total synchronous run length with the clock. Classifying checks as
//! Sync or Async keeps the slice measurement honest: only two consecutive
//! sync checks can trip the slice, and every async check resets it.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use crate::error::RunError;
use crate::limits::SandboxLimits;
use crate::value::Value;

/// Property names resolved through the base object prototype, plus the
/// literal name `prototype`. Reads resolve to undefined, writes are no-ops.
const PROTECTED: [&str; 13] = [
    "constructor",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "toLocaleString",
    "toString",
    "valueOf",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "prototype",
];

pub fn is_protected(name: &str) -> bool {
    PROTECTED.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckKind {
    Sync,
    Async,
}

#[derive(Debug)]
struct MonitorState {
    begin: Instant,
    last_async: Instant,
    last_kind: CheckKind,
    tripped: Option<RunError>,
    allocated: u64,
}

/// Budget enforcement for a single execution
#[derive(Debug)]
pub struct Monitor {
    limits: SandboxLimits,
    state: RefCell<MonitorState>,
}

impl Monitor {
    pub fn new(limits: SandboxLimits) -> Self {
        let now = Instant::now();
        Self {
            limits,
            state: RefCell::new(MonitorState {
                begin: now,
                last_async: now,
                last_kind: CheckKind::Async,
                tripped: None,
                allocated: 0,
            }),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Estimated bytes currently accounted to this execution
    pub fn allocated(&self) -> u64 {
        self.state.borrow().allocated
    }

    /// The sticky error, if the monitor has tripped
    pub fn tripped(&self) -> Option<RunError> {
        self.state.borrow().tripped.clone()
    }

    fn trip(&self, err: RunError) -> RunError {
        let mut state = self.state.borrow_mut();
        state.tripped.get_or_insert(err).clone()
    }

    /// Injected before synchronous re-entry points (loop bodies, sync
    /// function entries, handler entries)
    pub fn check_sync(&self) -> Result<(), RunError> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(err) = &state.tripped {
                return Err(err.clone());
            }
            let now = Instant::now();
            if state.last_kind == CheckKind::Sync {
                let slice = now.duration_since(state.last_async)
                    > Duration::from_millis(self.limits.sync_slice_ms);
                let total = now.duration_since(state.begin)
                    > Duration::from_millis(self.limits.timeout_ms);
                if slice || total {
                    drop(state);
                    return Err(self.trip(RunError::Timeout));
                }
            }
            state.last_kind = CheckKind::Sync;
        }
        Ok(())
    }

    /// Injected before async re-entry points; suspends once so concurrent
    /// work can interleave
    pub async fn check_async(&self) -> Result<(), RunError> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(err) = &state.tripped {
                return Err(err.clone());
            }
            let now = Instant::now();
            if now.duration_since(state.begin) > Duration::from_millis(self.limits.timeout_ms) {
                drop(state);
                return Err(self.trip(RunError::Timeout));
            }
            state.last_async = now;
            state.last_kind = CheckKind::Async;
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Worst-case byte estimate, memoized by identity for containers
    pub fn size_of(&self, value: &Value) -> u64 {
        match value {
            Value::Undefined | Value::Null => 8,
            Value::Bool(_) | Value::Number(_) => 10,
            Value::Str(s) => 2 + 2 * s.chars().count() as u64,
            Value::Array(cell) => {
                if let Some(n) = cell.borrow().cached_size {
                    return n;
                }
                // in-progress marker doubles as a cycle guard
                cell.borrow_mut().cached_size = Some(0);
                let elements = cell.borrow().elements.clone();
                let mut total = 2 + 64;
                for element in &elements {
                    total += self.size_of(element);
                }
                cell.borrow_mut().cached_size = Some(total);
                total
            }
            Value::Object(cell) => {
                if let Some(n) = cell.borrow().cached_size {
                    return n;
                }
                cell.borrow_mut().cached_size = Some(0);
                let entries = cell.borrow().entries.clone();
                let mut total = 2 + 64;
                for (key, entry) in &entries {
                    total += 2 + 2 * key.chars().count() as u64;
                    total += self.size_of(entry);
                }
                cell.borrow_mut().cached_size = Some(total);
                total
            }
            // functions cost their source text
            Value::Closure(closure) => 2 + 2 * closure.func.src_len as u64,
            Value::Captured(inner) => self.size_of(inner),
            Value::Method(_) | Value::Native(_) | Value::HostFn(_) | Value::Promise(_) => 10,
        }
    }

    /// Account a size delta between `old` and `new`, patching the
    /// container's memoized size so later estimates stay consistent
    pub fn alloc(
        &self,
        new: &Value,
        old: Option<&Value>,
        container: Option<&Value>,
    ) -> Result<(), RunError> {
        if let Some(err) = self.tripped() {
            return Err(err);
        }
        let new_size = self.size_of(new) as i64;
        let old_size = old.map(|v| self.size_of(v) as i64).unwrap_or(0);
        let delta = new_size - old_size;
        if delta != 0 {
            match container {
                Some(Value::Array(cell)) => {
                    let mut data = cell.borrow_mut();
                    if let Some(n) = data.cached_size {
                        data.cached_size = Some((n as i64 + delta).max(0) as u64);
                    }
                }
                Some(Value::Object(cell)) => {
                    let mut data = cell.borrow_mut();
                    if let Some(n) = data.cached_size {
                        data.cached_size = Some((n as i64 + delta).max(0) as u64);
                    }
                }
                _ => {}
            }
        }
        let reached = {
            let mut state = self.state.borrow_mut();
            state.allocated = (state.allocated as i64 + delta).max(0) as u64;
            state.allocated
        };
        if reached > self.limits.memory_limit_bytes {
            return Err(self.trip(RunError::MemoryLimit {
                limit: self.limits.memory_limit_bytes,
                reached,
            }));
        }
        Ok(())
    }

    /// Capture accounting for a value read out of host or tracked data:
    /// callables are wrapped so invoking them re-applies capture to their
    /// result; concrete values are accounted immediately. Promise chaining
    /// happens at the await site, where the resolution value flows through
    /// here again.
    pub fn capture(&self, value: Value) -> Result<Value, RunError> {
        if value.is_function() {
            if let Value::Captured(_) = value {
                return Ok(value);
            }
            return Ok(Value::Captured(std::rc::Rc::new(value)));
        }
        if let Value::Promise(_) = value {
            return Ok(value);
        }
        self.alloc(&value, None, None)?;
        Ok(value)
    }

    /// Guard for computed property keys: protected names dissolve to
    /// undefined before they can reach an accessor
    pub fn computed_prop(&self, key: Value) -> Value {
        let name = key.to_display();
        if is_protected(&name) {
            Value::Undefined
        } else {
            Value::str(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn monitor(limits: SandboxLimits) -> Monitor {
        Monitor::new(limits)
    }

    fn tiny_memory(limit: u64) -> SandboxLimits {
        SandboxLimits {
            memory_limit_bytes: limit,
            ..SandboxLimits::default()
        }
    }

    #[test]
    fn protected_names_cover_the_object_prototype() {
        assert!(is_protected("__proto__"));
        assert!(is_protected("constructor"));
        assert!(is_protected("prototype"));
        assert!(!is_protected("length"));
    }

    #[test]
    fn consecutive_sync_checks_trip_the_slice() {
        let m = monitor(SandboxLimits {
            sync_slice_ms: 0,
            ..SandboxLimits::default()
        });
        m.check_sync().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(m.check_sync().unwrap_err(), RunError::Timeout);
    }

    #[tokio::test]
    async fn async_checks_reset_the_sync_slice() {
        let m = monitor(SandboxLimits {
            sync_slice_ms: 0,
            ..SandboxLimits::default()
        });
        m.check_sync().unwrap();
        m.check_async().await.unwrap();
        // previous check was Async, so the slice cannot trip
        std::thread::sleep(Duration::from_millis(2));
        m.check_sync().unwrap();
    }

    #[tokio::test]
    async fn async_check_trips_on_total_budget() {
        let m = monitor(SandboxLimits {
            timeout_ms: 0,
            ..SandboxLimits::default()
        });
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(m.check_async().await.unwrap_err(), RunError::Timeout);
    }

    #[tokio::test]
    async fn tripped_monitor_re_raises_the_same_error() {
        let m = monitor(tiny_memory(10));
        let big = Value::str("xxxxxxxxxx");
        let err = m.alloc(&big, None, None).unwrap_err();
        assert!(matches!(err, RunError::MemoryLimit { .. }));
        // later checks re-raise the memory error, not a timeout
        assert_eq!(m.check_sync().unwrap_err(), err);
        assert_eq!(m.check_async().await.unwrap_err(), err);
    }

    #[test]
    fn size_estimates_match_the_model() {
        let m = monitor(SandboxLimits::default());
        assert_eq!(m.size_of(&Value::Undefined), 8);
        assert_eq!(m.size_of(&Value::Number(1.0)), 10);
        assert_eq!(m.size_of(&Value::str("ab")), 6);
        // container base 66 plus one number entry
        assert_eq!(m.size_of(&Value::array(vec![Value::Number(0.0)])), 76);
        // key "a" costs 4, value costs 10
        let obj = Value::object(vec![("a".to_string(), Value::Number(1.0))]);
        assert_eq!(m.size_of(&obj), 80);
    }

    #[test]
    fn container_sizes_are_memoized_and_patched() {
        let m = monitor(SandboxLimits::default());
        let arr = Value::array(vec![Value::Number(0.0)]);
        let before = m.size_of(&arr);
        let Value::Array(cell) = &arr else { panic!() };
        assert_eq!(cell.borrow().cached_size, Some(before));

        cell.borrow_mut().elements.push(Value::Number(1.0));
        m.alloc(&Value::Number(1.0), None, Some(&arr)).unwrap();
        assert_eq!(m.size_of(&arr), before + 10);
    }

    #[test]
    fn cyclic_containers_do_not_hang() {
        let m = monitor(SandboxLimits::default());
        let obj = Value::object(vec![]);
        if let Value::Object(cell) = &obj {
            let clone = obj.clone();
            cell.borrow_mut().entries.push(("self".to_string(), clone));
        }
        // base 66 plus key "self" (10) plus the in-progress marker (0)
        assert_eq!(m.size_of(&obj), 76);
    }

    #[test]
    fn memory_trip_reports_limit_and_reached() {
        let m = monitor(tiny_memory(100));
        // each number allocation costs 10
        for _ in 0..10 {
            m.alloc(&Value::Number(0.0), None, None).unwrap();
        }
        let err = m.alloc(&Value::Number(0.0), None, None).unwrap_err();
        let RunError::MemoryLimit { limit, reached } = err else { panic!() };
        assert_eq!(limit, 100);
        assert!(reached > 100);
        assert!(reached - limit <= 10);
    }

    #[test]
    fn capture_wraps_callables_and_accounts_data() {
        let m = monitor(SandboxLimits::default());
        let captured = m.capture(Value::str("abc")).unwrap();
        assert_eq!(m.allocated(), 8);
        assert!(matches!(captured, Value::Str(_)));

        let f = Value::Captured(Rc::new(Value::Undefined));
        let again = m.capture(f.clone()).unwrap();
        assert!(again.strict_eq(&f));
    }

    #[test]
    fn computed_prop_guards_protected_names() {
        let m = monitor(SandboxLimits::default());
        assert!(matches!(m.computed_prop(Value::str("__proto__")), Value::Undefined));
        assert_eq!(m.computed_prop(Value::str("a")).to_display(), "a");
        assert_eq!(m.computed_prop(Value::Number(0.0)).to_display(), "0");
    }
}
