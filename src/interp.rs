//! Async tree-walking interpreter over the instrumented program
//!
//! Evaluation futures are boxed and deliberately not `Send`; an execution
//! context lives on one thread for its whole life. Budget trips travel as
//! [`Thrown::Terminated`] and are not catchable by sandboxed `try`, which
//! keeps the monitor's sticky invariant intact from inside the sandbox.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::ast::*;
use crate::builtins;
use crate::error::RunError;
use crate::log::LogSender;
use crate::monitor::{Monitor, is_protected};
use crate::natives::make_error;
use crate::value::{Closure, PromiseState, Scope, ScopeError, Thrown, VResult, Value};

pub(crate) type EvalFuture<'a> = Pin<Box<dyn Future<Output = VResult> + 'a>>;
type FlowFuture<'a> = Pin<Box<dyn Future<Output = Result<Flow, Thrown>> + 'a>>;
type BindFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Thrown>> + 'a>>;

/// Statement completion
#[derive(Debug)]
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub(crate) fn throw(name: &str, message: impl AsRef<str>) -> Thrown {
    Thrown::Value(make_error(name, message.as_ref()))
}

fn term(err: RunError) -> Thrown {
    Thrown::Terminated(err)
}

/// One execution context: a monitor, a log sink and an evaluation engine
pub struct Interp {
    pub(crate) monitor: Rc<Monitor>,
    pub(crate) log_tx: Option<LogSender>,
    pub(crate) filename: String,
}

impl Interp {
    pub fn new(monitor: Rc<Monitor>, log_tx: Option<LogSender>, filename: String) -> Self {
        Self { monitor, log_tx, filename }
    }

    /// Evaluate the program body and return the value of its final
    /// expression statement (the entry closure)
    pub async fn eval_program(&self, program: &Program, scope: &Rc<Scope>) -> VResult {
        let mut last = Value::Undefined;
        for stmt in &program.body {
            match stmt {
                Stmt::MonitorInit => {}
                Stmt::Expression { expr, .. } => last = self.eval_expr(expr, scope).await?,
                other => {
                    if let Flow::Return(v) = self.exec_stmt(other, scope).await? {
                        return Ok(v);
                    }
                }
            }
        }
        Ok(last)
    }

    /// Convert a non-local exit into the host-visible error
    pub fn thrown_to_run_error(&self, thrown: Thrown) -> RunError {
        match thrown {
            Thrown::Terminated(err) => err,
            Thrown::Value(value) => {
                let message = value.to_display();
                let stack = match &value {
                    Value::Object(cell) => match cell.borrow().get("stack") {
                        Some(Value::Str(s)) => s.to_string(),
                        _ => format!("{}\n    at {}", message, self.filename),
                    },
                    _ => format!("{}\n    at {}", message, self.filename),
                };
                RunError::exception(message, stack)
            }
        }
    }

    // ===== Statements =====

    fn exec_stmt<'a>(&'a self, stmt: &'a Stmt, scope: &'a Rc<Scope>) -> FlowFuture<'a> {
        Box::pin(async move {
            match stmt {
                Stmt::MonitorInit => Ok(Flow::Normal),
                Stmt::Expression { expr, .. } => {
                    self.eval_expr(expr, scope).await?;
                    Ok(Flow::Normal)
                }
                Stmt::VarDecl { kind, declarators, .. } => {
                    let mutable = *kind == VarKind::Let;
                    for d in declarators {
                        let value = match &d.init {
                            Some(init) => self.eval_expr(init, scope).await?,
                            None => Value::Undefined,
                        };
                        self.bind_pattern(&d.pattern, value, scope, mutable).await?;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Block(block) => {
                    let inner = Scope::child(scope);
                    self.exec_block(block, &inner).await
                }
                Stmt::Return { arg, .. } => {
                    let value = match arg {
                        Some(arg) => self.eval_expr(arg, scope).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::If { test, consequent, alternate, .. } => {
                    if self.eval_expr(test, scope).await?.is_truthy() {
                        self.exec_stmt(consequent, scope).await
                    } else if let Some(alt) = alternate {
                        self.exec_stmt(alt, scope).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                Stmt::For { init, test, update, body, .. } => {
                    let loop_scope = Scope::child(scope);
                    match init {
                        Some(ForInit::VarDecl { kind, declarators, .. }) => {
                            let mutable = *kind == VarKind::Let;
                            for d in declarators {
                                let value = match &d.init {
                                    Some(init) => self.eval_expr(init, &loop_scope).await?,
                                    None => Value::Undefined,
                                };
                                self.bind_pattern(&d.pattern, value, &loop_scope, mutable)
                                    .await?;
                            }
                        }
                        Some(ForInit::Expr(expr)) => {
                            self.eval_expr(expr, &loop_scope).await?;
                        }
                        None => {}
                    }
                    loop {
                        if let Some(test) = test {
                            if !self.eval_expr(test, &loop_scope).await?.is_truthy() {
                                break;
                            }
                        }
                        match self.exec_stmt(body, &loop_scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        if let Some(update) = update {
                            self.eval_expr(update, &loop_scope).await?;
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::ForOf { kind, pattern, iterable, body, .. } => {
                    let iterable = self.eval_expr(iterable, scope).await?;
                    let items = self.iterable_items(&iterable)?;
                    let mutable = *kind == VarKind::Let;
                    for item in items {
                        let iter_scope = Scope::child(scope);
                        self.bind_pattern(pattern, item, &iter_scope, mutable).await?;
                        match self.exec_stmt(body, &iter_scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::While { test, body, .. } => {
                    while self.eval_expr(test, scope).await?.is_truthy() {
                        match self.exec_stmt(body, scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::DoWhile { body, test, .. } => {
                    loop {
                        match self.exec_stmt(body, scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        if !self.eval_expr(test, scope).await?.is_truthy() {
                            break;
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Break { .. } => Ok(Flow::Break),
                Stmt::Continue { .. } => Ok(Flow::Continue),
                Stmt::Try { block, handler, finalizer, .. } => {
                    let inner = Scope::child(scope);
                    let mut outcome = self.exec_block(block, &inner).await;

                    if let Err(Thrown::Value(exception)) = outcome {
                        outcome = match handler {
                            Some(handler) => {
                                let catch_scope = Scope::child(scope);
                                if let Some(param) = &handler.param {
                                    self.bind_pattern(param, exception, &catch_scope, true)
                                        .await?;
                                }
                                self.exec_block(&handler.body, &catch_scope).await
                            }
                            None => Err(Thrown::Value(exception)),
                        };
                    }

                    // termination bypasses the finalizer; anything else runs it
                    if matches!(outcome, Err(Thrown::Terminated(_))) {
                        return outcome;
                    }
                    if let Some(finalizer) = finalizer {
                        let final_scope = Scope::child(scope);
                        match self.exec_block(finalizer, &final_scope).await? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                    outcome
                }
                Stmt::Throw { arg, .. } => {
                    let value = self.eval_expr(arg, scope).await?;
                    Err(Thrown::Value(value))
                }
            }
        })
    }

    async fn exec_block(&self, block: &Block, scope: &Rc<Scope>) -> Result<Flow, Thrown> {
        for stmt in &block.body {
            match self.exec_stmt(stmt, scope).await? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    // ===== Patterns =====

    fn bind_pattern<'a>(
        &'a self,
        pattern: &'a Pattern,
        value: Value,
        scope: &'a Rc<Scope>,
        mutable: bool,
    ) -> BindFuture<'a> {
        Box::pin(async move {
            match pattern {
                Pattern::Ident { name, .. } => {
                    scope.declare(name, value, mutable);
                    Ok(())
                }
                Pattern::Object { props, .. } => {
                    if value.is_nullish() {
                        return Err(throw(
                            "TypeError",
                            format!("Cannot destructure `{}`", value.to_display()),
                        ));
                    }
                    for prop in props {
                        let key = match &prop.key {
                            PropKey::Ident(name) | PropKey::Str(name) => name.clone(),
                            PropKey::Computed(expr) => {
                                self.eval_expr(expr, scope).await?.to_display()
                            }
                        };
                        let entry = if is_protected(&key) {
                            Value::Undefined
                        } else {
                            raw_prop(&value, &key)
                        };
                        self.bind_pattern(&prop.value, entry, scope, mutable).await?;
                    }
                    Ok(())
                }
                Pattern::Array { elements, .. } => {
                    let items = self.iterable_items(&value)?;
                    for (i, element) in elements.iter().enumerate() {
                        if let Some(element) = element {
                            let item = items.get(i).cloned().unwrap_or(Value::Undefined);
                            self.bind_pattern(element, item, scope, mutable).await?;
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    fn iterable_items(&self, value: &Value) -> Result<Vec<Value>, Thrown> {
        match value {
            Value::Array(cell) => Ok(cell.borrow().elements.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(throw(
                "TypeError",
                format!("{} is not iterable", other.to_display()),
            )),
        }
    }

    // ===== Expressions =====

    pub(crate) fn eval_expr<'a>(&'a self, expr: &'a Expr, scope: &'a Rc<Scope>) -> EvalFuture<'a> {
        Box::pin(async move {
            match expr {
                Expr::Ident { name, .. } => scope.get(name).ok_or_else(|| {
                    throw("ReferenceError", format!("{} is not defined", name))
                }),
                Expr::Number { value, .. } => Ok(Value::Number(*value)),
                Expr::Str { value, .. } => Ok(Value::str(value.clone())),
                Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
                Expr::Null { .. } => Ok(Value::Null),
                Expr::This { .. } => Ok(Value::Undefined),
                Expr::Array { elements, .. } => {
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        items.push(self.eval_expr(element, scope).await?);
                    }
                    Ok(Value::array(items))
                }
                Expr::Object { props, .. } => {
                    let mut entries = Vec::with_capacity(props.len());
                    for prop in props {
                        let key = match &prop.key {
                            PropKey::Ident(name) | PropKey::Str(name) => name.clone(),
                            PropKey::Computed(expr) => {
                                let key = self.eval_expr(expr, scope).await?;
                                if matches!(key, Value::Undefined) {
                                    // guarded-away computed key
                                    continue;
                                }
                                key.to_display()
                            }
                        };
                        let value = self.eval_expr(&prop.value, scope).await?;
                        entries.push((key, value));
                    }
                    Ok(Value::object(entries))
                }
                Expr::Arrow(arrow) => Ok(Value::Closure(Rc::new(Closure {
                    func: Rc::new((**arrow).clone()),
                    env: Rc::clone(scope),
                }))),
                Expr::Function { .. } => Err(throw(
                    "TypeError",
                    "function expressions are not supported",
                )),
                Expr::Call { callee, args, .. } => {
                    let callee = self.eval_expr(callee, scope).await?;
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval_expr(arg, scope).await?);
                    }
                    self.call_value(callee, arg_values).await
                }
                Expr::New { callee, args, .. } => {
                    let callee = self.eval_expr(callee, scope).await?;
                    let mut arg_values = Vec::with_capacity(args.len());
                    for arg in args {
                        arg_values.push(self.eval_expr(arg, scope).await?);
                    }
                    self.construct(callee, arg_values)
                }
                Expr::Member { object, property, .. } => {
                    let object = self.eval_expr(object, scope).await?;
                    let name = match property.as_ref() {
                        PropAccess::Static(name) => name.clone(),
                        PropAccess::Computed(key) => {
                            self.eval_expr(key, scope).await?.to_display()
                        }
                    };
                    self.get_prop(object, &name)
                }
                Expr::Assign { op, target, value, .. } => {
                    let value = self.eval_expr(value, scope).await?;
                    match target.as_ref() {
                        AssignTarget::Ident { name, .. } => {
                            let final_value = if *op == AssignOp::Assign {
                                value
                            } else {
                                let old = scope.get(name).ok_or_else(|| {
                                    throw("ReferenceError", format!("{} is not defined", name))
                                })?;
                                apply_compound(*op, &old, &value)
                            };
                            assign_scoped(scope, name, final_value.clone())?;
                            Ok(final_value)
                        }
                        AssignTarget::Member { object, property, .. } => {
                            let object = self.eval_expr(object, scope).await?;
                            let name = match property {
                                PropAccess::Static(name) => name.clone(),
                                PropAccess::Computed(key) => {
                                    self.eval_expr(key, scope).await?.to_display()
                                }
                            };
                            self.set_prop(object, &name, value, *op)
                        }
                    }
                }
                Expr::Binary { op, left, right, .. } => {
                    let left = self.eval_expr(left, scope).await?;
                    let right = self.eval_expr(right, scope).await?;
                    Ok(apply_binop(*op, &left, &right))
                }
                Expr::Logical { op, left, right, .. } => {
                    let left = self.eval_expr(left, scope).await?;
                    let take_right = match op {
                        LogicalOp::And => left.is_truthy(),
                        LogicalOp::Or => !left.is_truthy(),
                        LogicalOp::Nullish => left.is_nullish(),
                    };
                    if take_right {
                        self.eval_expr(right, scope).await
                    } else {
                        Ok(left)
                    }
                }
                Expr::Unary { op, arg, .. } => {
                    let value = self.eval_expr(arg, scope).await?;
                    Ok(match op {
                        UnaryOp::Minus => Value::Number(-value.to_number()),
                        UnaryOp::Not => Value::Bool(!value.is_truthy()),
                        UnaryOp::TypeOf => Value::str(value.type_of()),
                    })
                }
                Expr::Update { op, prefix, name, .. } => {
                    let old = scope
                        .get(name)
                        .ok_or_else(|| {
                            throw("ReferenceError", format!("{} is not defined", name))
                        })?
                        .to_number();
                    let new = match op {
                        UpdateOp::Inc => old + 1.0,
                        UpdateOp::Dec => old - 1.0,
                    };
                    assign_scoped(scope, name, Value::Number(new))?;
                    Ok(Value::Number(if *prefix { new } else { old }))
                }
                Expr::Conditional { test, consequent, alternate, .. } => {
                    if self.eval_expr(test, scope).await?.is_truthy() {
                        self.eval_expr(consequent, scope).await
                    } else {
                        self.eval_expr(alternate, scope).await
                    }
                }
                Expr::Await { arg, .. } => {
                    let value = self.eval_expr(arg, scope).await?;
                    self.resolve(value).await
                }
                Expr::Runtime(call) => self.runtime_call(call, scope).await,
            }
        })
    }

    // ===== Runtime-monitor dispatch =====

    async fn runtime_call(&self, call: &RuntimeCall, scope: &Rc<Scope>) -> VResult {
        match call {
            RuntimeCall::CheckSync => {
                self.monitor.check_sync().map_err(term)?;
                Ok(Value::Undefined)
            }
            RuntimeCall::CheckAsync => {
                self.monitor.check_async().await.map_err(term)?;
                Ok(Value::Undefined)
            }
            RuntimeCall::CreateObj(inner) | RuntimeCall::CreateArr(inner) => {
                let value = self.eval_expr(inner, scope).await?;
                self.monitor.alloc(&value, None, None).map_err(term)?;
                Ok(value)
            }
            RuntimeCall::GetProp { object, prop } => {
                let object = self.eval_expr(object, scope).await?;
                let prop = self.eval_expr(prop, scope).await?;
                if matches!(prop, Value::Undefined) {
                    return Ok(Value::Undefined);
                }
                self.get_prop(object, &prop.to_display())
            }
            RuntimeCall::SetProp { object, prop, value, op } => {
                let object = self.eval_expr(object, scope).await?;
                let prop = self.eval_expr(prop, scope).await?;
                let value = self.eval_expr(value, scope).await?;
                if matches!(prop, Value::Undefined) {
                    return Ok(value);
                }
                self.set_prop(object, &prop.to_display(), value, *op)
            }
            RuntimeCall::CallProp { object, prop, args } => {
                let object = self.eval_expr(object, scope).await?;
                let prop = self.eval_expr(prop, scope).await?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval_expr(arg, scope).await?);
                }
                let name = match &prop {
                    Value::Undefined => {
                        return Err(throw(
                            "TypeError",
                            format!("{}.<protected> is not a function", object.to_display()),
                        ));
                    }
                    other => other.to_display(),
                };
                self.call_prop(object, &name, arg_values).await
            }
            RuntimeCall::ComputedProp(inner) => {
                let key = self.eval_expr(inner, scope).await?;
                Ok(self.monitor.computed_prop(key))
            }
        }
    }

    // ===== Property access =====

    /// Monitored property read: protected names dissolve, everything read
    /// out of tracked data flows through capture accounting
    pub(crate) fn get_prop(&self, object: Value, name: &str) -> VResult {
        if is_protected(name) {
            return Ok(Value::Undefined);
        }
        if object.is_nullish() {
            return Err(throw(
                "TypeError",
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_display(),
                    name
                ),
            ));
        }
        if let Value::Native(ns) = &object {
            if !ns.has_member(name) {
                return Ok(Value::Undefined);
            }
            if let Some(constant) = ns.constant(name) {
                return Ok(constant);
            }
            return Ok(builtins::method(object.clone(), name));
        }

        let raw = raw_prop(&object, name);
        if matches!(raw, Value::Undefined) && builtins::has_method(&object, name) {
            return Ok(builtins::method(object, name));
        }
        if let Value::Promise(cell) = &raw {
            // chain capture onto resolution
            let monitor = Rc::clone(&self.monitor);
            let inner = Rc::clone(cell);
            return Ok(Value::pending(Box::pin(async move {
                let value = drive_promise(inner).await?;
                monitor.capture(value).map_err(term)
            })));
        }
        self.monitor.capture(raw).map_err(term)
    }

    /// Monitored property write with allocation accounting
    pub(crate) fn set_prop(
        &self,
        object: Value,
        name: &str,
        value: Value,
        op: AssignOp,
    ) -> VResult {
        if value.is_function() {
            return Err(throw("Error", "Object does not accept function"));
        }
        if is_protected(name) {
            return Ok(value);
        }
        let final_value = if op == AssignOp::Assign {
            value
        } else {
            let old = raw_prop(&object, name);
            apply_compound(op, &old, &value)
        };
        match &object {
            Value::Array(cell) => {
                if let Ok(index) = name.parse::<usize>() {
                    let old = cell
                        .borrow()
                        .elements
                        .get(index)
                        .cloned()
                        .unwrap_or(Value::Undefined);
                    self.monitor
                        .alloc(&final_value, Some(&old), Some(&object))
                        .map_err(term)?;
                    let mut data = cell.borrow_mut();
                    if index >= data.elements.len() {
                        data.elements.resize(index + 1, Value::Undefined);
                    }
                    data.elements[index] = final_value.clone();
                }
                // writes to `length` and named props are absorbed
            }
            Value::Object(cell) => {
                let previous = cell.borrow().get(name);
                let old = previous.clone().unwrap_or(Value::Undefined);
                self.monitor
                    .alloc(&final_value, Some(&old), Some(&object))
                    .map_err(term)?;
                if previous.is_none() {
                    // fresh entries also pay for their key
                    self.monitor
                        .alloc(&Value::str(name), None, Some(&object))
                        .map_err(term)?;
                }
                cell.borrow_mut().set(name, final_value.clone());
            }
            // natives and primitives absorb writes
            _ => {}
        }
        Ok(final_value)
    }

    /// Monitored method call: invoked directly, the result flows through
    /// the call site's own handling
    pub(crate) async fn call_prop(&self, object: Value, name: &str, args: Vec<Value>) -> VResult {
        if is_protected(name) {
            return Err(throw(
                "TypeError",
                format!("{}.{} is not a function", object.to_display(), name),
            ));
        }
        if object.is_nullish() {
            return Err(throw(
                "TypeError",
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_display(),
                    name
                ),
            ));
        }
        if let Value::Native(ns) = &object {
            if !ns.has_member(name) || ns.constant(name).is_some() {
                return Err(throw(
                    "TypeError",
                    format!("{}.{} is not a function", ns.name, name),
                ));
            }
            return builtins::call_native(self, *ns, name, args).await;
        }
        if builtins::has_method(&object, name) {
            return builtins::call_method(self, object, name, args).await;
        }
        let member = raw_prop(&object, name);
        if member.is_function() {
            return self.call_value(member, args).await;
        }
        Err(throw(
            "TypeError",
            format!("{}.{} is not a function", object.to_display(), name),
        ))
    }

    // ===== Calls =====

    pub(crate) fn call_value<'a>(&'a self, callee: Value, args: Vec<Value>) -> EvalFuture<'a> {
        Box::pin(async move {
            match callee {
                Value::Closure(closure) => self.call_closure(&closure, args).await,
                Value::Method(method) => {
                    builtins::call_method(self, method.receiver.clone(), &method.name, args).await
                }
                Value::HostFn(host) => {
                    // host calls complete as promises, observed at await
                    Ok(Value::pending((host.body)(args)))
                }
                Value::Captured(inner) => {
                    let result = self.call_value((*inner).clone(), args).await?;
                    if let Value::Promise(cell) = &result {
                        let monitor = Rc::clone(&self.monitor);
                        let inner = Rc::clone(cell);
                        return Ok(Value::pending(Box::pin(async move {
                            let value = drive_promise(inner).await?;
                            monitor.capture(value).map_err(term)
                        })));
                    }
                    self.monitor.capture(result).map_err(term)
                }
                Value::Native(ns) if ns.error_ctor => Ok(error_from_args(ns.name, &args, self)),
                other => Err(throw(
                    "TypeError",
                    format!("{} is not a function", other.to_display()),
                )),
            }
        })
    }

    async fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> VResult {
        let scope = Scope::child(&closure.env);
        for (i, param) in closure.func.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or(Value::Undefined);
            self.bind_pattern(param, value, &scope, true).await?;
        }
        let outcome = match &closure.func.body {
            ArrowBody::Block(block) => self.exec_block(block, &scope).await,
            ArrowBody::Expr(expr) => {
                let value = self.eval_expr(expr, &scope).await?;
                Ok(Flow::Return(value))
            }
        };
        let result = match outcome {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::Undefined),
            Err(thrown) => Err(thrown),
        };
        if closure.func.is_async {
            // async calls always complete as promises; rejections stay
            // catchable at the await site
            match result {
                Ok(value) => Ok(Value::resolved(value)),
                Err(Thrown::Value(value)) => Ok(Value::rejected(value)),
                Err(terminated) => Err(terminated),
            }
        } else {
            result
        }
    }

    fn construct(&self, callee: Value, args: Vec<Value>) -> VResult {
        match callee {
            Value::Native(ns) if ns.error_ctor => Ok(error_from_args(ns.name, &args, self)),
            other => Err(throw(
                "TypeError",
                format!("{} is not a constructor", other.to_display()),
            )),
        }
    }

    /// Settle a value: promises are driven to completion, anything else
    /// passes through (JS `await` semantics)
    pub(crate) async fn resolve(&self, value: Value) -> VResult {
        match value {
            Value::Promise(cell) => drive_promise(cell).await,
            other => Ok(other),
        }
    }
}

/// Drive a promise cell to a settled state and report it
pub(crate) async fn drive_promise(cell: Rc<RefCell<PromiseState>>) -> VResult {
    // take the pending future out before awaiting; the cell must never be
    // borrowed across a suspension point
    let pending = {
        let mut state = cell.borrow_mut();
        match &mut *state {
            PromiseState::Resolved(value) => return Ok(value.clone()),
            PromiseState::Rejected(value) => return Err(Thrown::Value(value.clone())),
            PromiseState::Pending(_) => {
                match std::mem::replace(&mut *state, PromiseState::Resolved(Value::Undefined)) {
                    PromiseState::Pending(future) => future,
                    _ => unreachable!(),
                }
            }
        }
    };
    match pending.await {
        Ok(value) => {
            *cell.borrow_mut() = PromiseState::Resolved(value.clone());
            Ok(value)
        }
        Err(Thrown::Value(value)) => {
            *cell.borrow_mut() = PromiseState::Rejected(value.clone());
            Err(Thrown::Value(value))
        }
        Err(terminated) => {
            *cell.borrow_mut() =
                PromiseState::Rejected(make_error("Error", "execution terminated"));
            Err(terminated)
        }
    }
}

fn error_from_args(name: &str, args: &[Value], interp: &Interp) -> Value {
    let message = args.first().map(|v| v.to_display()).unwrap_or_default();
    let error = make_error(name, &message);
    if let Value::Object(cell) = &error {
        let stack = format!("{}: {}\n    at {}", name, message, interp.filename);
        cell.borrow_mut().set("stack", Value::str(stack));
    }
    error
}

fn assign_scoped(scope: &Rc<Scope>, name: &str, value: Value) -> Result<(), Thrown> {
    scope.assign(name, value).map_err(|err| match err {
        ScopeError::ConstAssignment => throw(
            "TypeError",
            format!("Assignment to constant variable `{}`", name),
        ),
        ScopeError::NotFound => throw("ReferenceError", format!("{} is not defined", name)),
    })
}

/// Unmonitored data read used by destructuring and compound assignment
pub(crate) fn raw_prop(value: &Value, name: &str) -> Value {
    match value {
        Value::Array(cell) => {
            let data = cell.borrow();
            if name == "length" {
                return Value::Number(data.elements.len() as f64);
            }
            match name.parse::<usize>() {
                Ok(index) => data.elements.get(index).cloned().unwrap_or(Value::Undefined),
                Err(_) => Value::Undefined,
            }
        }
        Value::Object(cell) => cell.borrow().get(name).unwrap_or(Value::Undefined),
        Value::Str(s) => {
            if name == "length" {
                return Value::Number(s.chars().count() as f64);
            }
            match name.parse::<usize>() {
                Ok(index) => s
                    .chars()
                    .nth(index)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined),
                Err(_) => Value::Undefined,
            }
        }
        _ => Value::Undefined,
    }
}

fn apply_compound(op: AssignOp, old: &Value, value: &Value) -> Value {
    let bin = match op {
        AssignOp::Add => BinOp::Add,
        AssignOp::Sub => BinOp::Sub,
        AssignOp::Mul => BinOp::Mul,
        AssignOp::Div => BinOp::Div,
        AssignOp::Mod => BinOp::Mod,
        AssignOp::Assign => return value.clone(),
    };
    apply_binop(bin, old, value)
}

pub(crate) fn apply_binop(op: BinOp, left: &Value, right: &Value) -> Value {
    match op {
        BinOp::Add => {
            let left_str = matches!(left, Value::Str(_) | Value::Array(_) | Value::Object(_));
            let right_str = matches!(right, Value::Str(_) | Value::Array(_) | Value::Object(_));
            if left_str || right_str {
                Value::str(format!("{}{}", left.to_display(), right.to_display()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinOp::Mod => Value::Number(left.to_number() % right.to_number()),
        BinOp::EqEq => Value::Bool(left.loose_eq(right)),
        BinOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            if let (Value::Str(a), Value::Str(b)) = (left, right) {
                let ord = a.as_ref().cmp(b.as_ref());
                Value::Bool(match op {
                    BinOp::Lt => ord.is_lt(),
                    BinOp::LtEq => ord.is_le(),
                    BinOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                })
            } else {
                let (a, b) = (left.to_number(), right.to_number());
                if a.is_nan() || b.is_nan() {
                    return Value::Bool(false);
                }
                Value::Bool(match op {
                    BinOp::Lt => a < b,
                    BinOp::LtEq => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::SandboxLimits;

    fn interp() -> Interp {
        Interp::new(
            Rc::new(Monitor::new(SandboxLimits::default())),
            None,
            "query.js".to_string(),
        )
    }

    async fn eval(src: &str) -> VResult {
        let program = crate::parser::parse(src).unwrap();
        let it = interp();
        let scope = Scope::root();
        for ns in crate::natives::ALL {
            scope.declare(ns.name, Value::Native(ns), false);
        }
        let entry = it.eval_program(&program, &scope).await?;
        let result = it.call_value(entry, vec![]).await?;
        it.resolve(result).await
    }

    fn num(result: VResult) -> f64 {
        result.unwrap().to_number()
    }

    #[tokio::test]
    async fn arithmetic_and_closures() {
        assert_eq!(num(eval("async () => 1 + 2 * 3").await), 7.0);
        assert_eq!(
            num(eval("async () => { const add = (a, b) => a + b; return add(2, 3); }").await),
            5.0
        );
    }

    #[tokio::test]
    async fn string_concat_follows_js() {
        let v = eval("async () => 'n=' + 1").await.unwrap();
        assert_eq!(v.to_display(), "n=1");
    }

    #[tokio::test]
    async fn loops_and_updates() {
        let src = "async () => { let n = 0; for (let i = 0; i < 5; i++) { n += i; } return n; }";
        assert_eq!(num(eval(src).await), 10.0);
    }

    #[tokio::test]
    async fn for_of_and_destructuring() {
        let src = "async () => {
            let total = 0;
            for (const [a, b] of [[1, 2], [3, 4]]) { total += a * b; }
            return total;
        }";
        assert_eq!(num(eval(src).await), 14.0);
    }

    #[tokio::test]
    async fn try_catch_catches_thrown_values() {
        let src = "async () => { try { throw new Error('boom'); } catch (e) { return e.message; } }";
        assert_eq!(eval(src).await.unwrap().to_display(), "boom");
    }

    #[tokio::test]
    async fn finally_runs_and_can_override() {
        let src = "async () => { try { return 1; } finally { } }";
        assert_eq!(num(eval(src).await), 1.0);
        let src = "async () => { try { return 1; } finally { return 2; } }";
        assert_eq!(num(eval(src).await), 2.0);
    }

    #[tokio::test]
    async fn const_reassignment_throws() {
        let src = "async () => { const x = 1; x = 2; }";
        let Err(Thrown::Value(err)) = eval(src).await else {
            panic!("expected a type error");
        };
        assert!(err.to_display().contains("constant"));
    }

    #[tokio::test]
    async fn nullish_and_ternary() {
        assert_eq!(num(eval("async () => (null ?? 3) + (0 ?? 5)").await), 3.0);
        assert_eq!(num(eval("async () => 0 ? 1 : 2").await), 2.0);
    }

    #[tokio::test]
    async fn await_unwraps_nested_results() {
        let src = "async () => { const f = async () => 21; return (await f()) * 2; }";
        assert_eq!(num(eval(src).await), 42.0);
    }

    #[tokio::test]
    async fn rejected_async_calls_are_catchable_at_await() {
        let src = "async () => {
            const f = async () => { throw new Error('inner'); };
            try { await f(); } catch (e) { return e.message; }
        }";
        assert_eq!(eval(src).await.unwrap().to_display(), "inner");
    }

    #[tokio::test]
    async fn typeof_operator() {
        let src = "async () => typeof 1 + ':' + typeof 'a' + ':' + typeof {} + ':' + typeof undefined";
        // `undefined` parses as null, which is typeof object
        assert_eq!(eval(src).await.unwrap().to_display(), "number:string:object:object");
    }

    #[tokio::test]
    async fn protected_reads_dissolve_to_undefined() {
        let it = interp();
        let obj = Value::object(vec![("a".to_string(), Value::Number(1.0))]);
        let v = it.get_prop(obj.clone(), "__proto__").unwrap();
        assert!(matches!(v, Value::Undefined));
        assert_eq!(it.get_prop(obj, "a").unwrap().to_number(), 1.0);
    }

    #[tokio::test]
    async fn set_prop_rejects_functions_and_applies_operators() {
        let it = interp();
        let obj = Value::object(vec![("n".to_string(), Value::Number(40.0))]);
        let updated = it
            .set_prop(obj.clone(), "n", Value::Number(2.0), AssignOp::Add)
            .unwrap();
        assert_eq!(updated.to_number(), 42.0);
        assert_eq!(raw_prop(&obj, "n").to_number(), 42.0);

        let f = Value::Captured(Rc::new(Value::Undefined));
        let err = it.set_prop(obj, "f", f, AssignOp::Assign).unwrap_err();
        let Thrown::Value(err) = err else { panic!() };
        assert!(err.to_display().contains("does not accept function"));
    }

    #[tokio::test]
    async fn protected_writes_are_no_ops() {
        let it = interp();
        let obj = Value::object(vec![]);
        it.set_prop(obj.clone(), "__proto__", Value::Number(1.0), AssignOp::Assign)
            .unwrap();
        assert!(matches!(raw_prop(&obj, "__proto__"), Value::Undefined));
    }
}
