//! Execution host
//!
//! A [`Sandbox`] is one compiled query function plus its budget
//! configuration. Compilation happens once at construction and is permanent
//! per source; every [`Sandbox::run`] builds a fresh monitor and a fresh
//! global scope, so concurrent runs of a shared sandbox never observe each
//! other's globals.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::compiler::{CompiledUnit, compile};
use crate::error::{CompileError, RunError};
use crate::interp::Interp;
use crate::limits::SandboxLimits;
use crate::log::LogSender;
use crate::monitor::Monitor;
use crate::natives;
use crate::value::{Scope, Value};

/// Names owned by the instrumented runtime; caller globals may not shadow
/// them
const RESERVED_GLOBALS: [&str; 2] = ["createRuntime", "__globals"];

/// Execution host configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Query function source text
    pub source: String,
    /// Filename reported in sandboxed stack traces
    pub filename: String,
    /// Caller-declared global names the source may reference
    pub global_names: Vec<String>,
    pub limits: SandboxLimits,
    /// Sink for sandboxed `console` output; stderr when absent
    pub log_tx: Option<LogSender>,
}

impl SandboxConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: "query.js".to_string(),
            global_names: Vec::new(),
            limits: SandboxLimits::default(),
            log_tx: None,
        }
    }

    pub fn with_globals(mut self, names: &[&str]) -> Self {
        self.global_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A compiled query function ready for repeated execution
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    unit: CompiledUnit,
}

impl Sandbox {
    /// Validate the configuration and compile the source.
    ///
    /// Compile failures are permanent for a given source and safe to cache
    /// as such.
    pub fn new(config: SandboxConfig) -> Result<Self, CompileError> {
        let mut known: HashSet<String> = HashSet::new();
        for name in &config.global_names {
            if !is_valid_identifier(name) {
                return Err(CompileError::new(
                    format!("Invalid global name `{}`", name),
                    0,
                    0,
                ));
            }
            if RESERVED_GLOBALS.contains(&name.as_str()) {
                return Err(CompileError::new(
                    format!("Reserved global name `{}`", name),
                    0,
                    0,
                ));
            }
            known.insert(name.clone());
        }
        for ns in natives::ALL {
            known.insert(ns.name.to_string());
        }
        let unit = compile(&config.source, &known)?;
        Ok(Self { config, unit })
    }

    pub fn source(&self) -> &str {
        &self.unit.source_text
    }

    /// Rendered instrumented source
    pub fn code(&self) -> &str {
        &self.unit.code
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.config.limits
    }

    /// Execute the query function against one set of caller globals.
    ///
    /// Declared names bind fresh from `globals` at entry; later mutation of
    /// the caller's map cannot affect a running execution. The returned
    /// future is not `Send`; drive it on a current-thread runtime.
    pub async fn run(
        &self,
        args: Vec<Value>,
        globals: HashMap<String, Value>,
    ) -> Result<Value, RunError> {
        let monitor = Rc::new(Monitor::new(self.config.limits.clone()));
        let interp = Interp::new(
            Rc::clone(&monitor),
            self.config.log_tx.clone(),
            self.config.filename.clone(),
        );
        let scope = Scope::root();
        for ns in natives::ALL {
            scope.declare(ns.name, Value::Native(ns), false);
        }
        // caller values win on collision; declared-but-unsupplied names
        // bind undefined, like destructuring an incomplete globals object
        for name in &self.config.global_names {
            let value = globals.get(name).cloned().unwrap_or(Value::Undefined);
            scope.declare(name, value, false);
        }
        for (name, value) in &globals {
            scope.declare(name, value.clone(), false);
        }

        let outcome = async {
            let entry = interp.eval_program(&self.unit.program, &scope).await?;
            let result = interp.call_value(entry, args).await?;
            interp.resolve(result).await
        }
        .await;
        outcome.map_err(|thrown| interp.thrown_to_run_error(thrown))
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(source: &str) -> Sandbox {
        Sandbox::new(SandboxConfig::new(source)).unwrap()
    }

    async fn run(source: &str) -> Result<Value, RunError> {
        sandbox(source).run(vec![], HashMap::new()).await
    }

    #[tokio::test]
    async fn evaluates_a_minimal_query() {
        let value = run("async () => 1 + 1").await.unwrap();
        assert_eq!(value.to_number(), 2.0);
    }

    #[tokio::test]
    async fn passes_arguments_to_the_entry_function() {
        let sb = sandbox("async (a, b) => a * b");
        let value = sb
            .run(vec![Value::Number(6.0), Value::Number(7.0)], HashMap::new())
            .await
            .unwrap();
        assert_eq!(value.to_number(), 42.0);
    }

    #[tokio::test]
    async fn rejects_invalid_global_names() {
        let config = SandboxConfig::new("async () => 1").with_globals(&["not valid"]);
        let err = Sandbox::new(config).unwrap_err();
        assert!(err.message.contains("Invalid global name"));

        let config = SandboxConfig::new("async () => 1").with_globals(&["createRuntime"]);
        let err = Sandbox::new(config).unwrap_err();
        assert!(err.message.contains("Reserved global name"));
    }

    #[tokio::test]
    async fn globals_bind_fresh_per_run() {
        let config = SandboxConfig::new("async () => n + 1").with_globals(&["n"]);
        let sb = Sandbox::new(config).unwrap();

        let mut globals = HashMap::new();
        globals.insert("n".to_string(), Value::Number(1.0));
        assert_eq!(sb.run(vec![], globals).await.unwrap().to_number(), 2.0);

        let mut globals = HashMap::new();
        globals.insert("n".to_string(), Value::Number(10.0));
        assert_eq!(sb.run(vec![], globals).await.unwrap().to_number(), 11.0);
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_share_globals() {
        let config = SandboxConfig::new(
            "async () => { let acc = 0; for (let i = 0; i < 100; i++) { acc += n; } return acc; }",
        )
        .with_globals(&["n"]);
        let sb = Sandbox::new(config).unwrap();

        let mut a = HashMap::new();
        a.insert("n".to_string(), Value::Number(1.0));
        let mut b = HashMap::new();
        b.insert("n".to_string(), Value::Number(2.0));

        let (ra, rb) = tokio::join!(sb.run(vec![], a), sb.run(vec![], b));
        assert_eq!(ra.unwrap().to_number(), 100.0);
        assert_eq!(rb.unwrap().to_number(), 200.0);
    }

    #[tokio::test]
    async fn unsupplied_declared_globals_bind_undefined() {
        let config = SandboxConfig::new("async () => typeof missing").with_globals(&["missing"]);
        let sb = Sandbox::new(config).unwrap();
        let value = sb.run(vec![], HashMap::new()).await.unwrap();
        assert_eq!(value.to_display(), "undefined");
    }

    #[tokio::test]
    async fn tight_sync_loops_trip_the_timeout() {
        let mut config = SandboxConfig::new("async () => { while (true) {} }");
        config.limits = SandboxLimits {
            timeout_ms: 10,
            ..SandboxLimits::default()
        };
        let started = std::time::Instant::now();
        let err = Sandbox::new(config)
            .unwrap()
            .run(vec![], HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, RunError::Timeout);
        // bounded overshoot of the 10ms budget
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unbounded_allocation_trips_the_memory_limit() {
        let mut config =
            SandboxConfig::new("async () => { const arr = []; while (true) arr.push(0); }");
        config.limits = SandboxLimits {
            memory_limit_bytes: 100,
            ..SandboxLimits::default()
        };
        let err = Sandbox::new(config)
            .unwrap()
            .run(vec![], HashMap::new())
            .await
            .unwrap_err();
        let RunError::MemoryLimit { limit, reached } = &err else {
            panic!("expected a memory limit error, got {:?}", err);
        };
        assert_eq!(*limit, 100);
        // overshoot stays under one allocation's estimated size
        assert!(*reached > 100 && reached - 100 < 80);
    }

    #[tokio::test]
    async fn uncaught_exceptions_surface_with_kind_and_stack() {
        let err = run("async () => { throw new TypeError('bad input'); }")
            .await
            .unwrap_err();
        let RunError::Exception { message, stack } = &err else {
            panic!("expected an exception, got {:?}", err);
        };
        assert_eq!(message, "TypeError: bad input");
        assert!(stack.contains("query.js"));
        assert_eq!(err.kind(), "RuntimeError");
    }

    #[tokio::test]
    async fn budget_trips_are_not_catchable_in_the_sandbox() {
        let mut config = SandboxConfig::new(
            "async () => { try { while (true) {} } catch (e) { return 'caught'; } }",
        );
        config.limits = SandboxLimits {
            timeout_ms: 10,
            ..SandboxLimits::default()
        };
        let err = Sandbox::new(config)
            .unwrap()
            .run(vec![], HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, RunError::Timeout);
    }

    #[tokio::test]
    async fn host_functions_complete_as_promises() {
        use crate::value::HostFn;

        let config = SandboxConfig::new("async () => (await fetchTotal()) + 1")
            .with_globals(&["fetchTotal"]);
        let sb = Sandbox::new(config).unwrap();
        let host = Value::HostFn(Rc::new(HostFn {
            name: "fetchTotal".to_string(),
            body: Rc::new(|_args| Box::pin(async { Ok(Value::Number(41.0)) })),
        }));
        let mut globals = HashMap::new();
        globals.insert("fetchTotal".to_string(), host);
        let value = sb.run(vec![], globals).await.unwrap();
        assert_eq!(value.to_number(), 42.0);
    }

    #[tokio::test]
    async fn caller_globals_win_over_natives() {
        let config = SandboxConfig::new("async () => custom.answer").with_globals(&["custom"]);
        let sb = Sandbox::new(config).unwrap();
        let mut globals = HashMap::new();
        globals.insert(
            "custom".to_string(),
            Value::object(vec![("answer".to_string(), Value::Number(42.0))]),
        );
        assert_eq!(sb.run(vec![], globals).await.unwrap().to_number(), 42.0);
    }

    #[tokio::test]
    async fn compile_errors_fail_construction() {
        let err = Sandbox::new(SandboxConfig::new("const x = 1")).unwrap_err();
        assert_eq!(err.message, "Expected AsyncArrowFunctionExpression");
    }
}
