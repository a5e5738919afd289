//! Language-subset and free-identifier validation
//!
//! The set of permitted node kinds is not written out by hand. A fixed
//! sample program exercising every allowed construct is parsed once and the
//! kinds observed in it become the allow-list, so the grammar the parser
//! accepts and the grammar the checker permits cannot drift apart silently.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::ast::*;
use crate::error::CompileError;
use crate::parser::parse;

// Exercises every construct the sandbox accepts, nothing else.
const SUBSET_SAMPLE: &str = r#"
async (a, b) => {
    const { x } = a;
    const [y] = b;
    let n = 0;
    const obj = { k: 1, ['c' + 'k']: 2 };
    const arr = [1, 'two', true, null];
    n = n + 1;
    n += arr[0];
    n++;
    if (n > 0 && n < 10 || !x) {
        n = x ? 1 : 2;
    }
    for (let i = 0; i < 3; i++) {
        continue;
    }
    for (const item of arr) {
        break;
    }
    while (n === 0) {
        n = -n;
    }
    do {
        n = n % 2;
    } while (n !== 0 == false);
    try {
        throw new Error(typeof x);
    } catch (err) {
        obj.report(err ?? y);
    } finally {
        n = 0;
    }
    const f = (v) => v;
    return await f(n);
}
"#;

/// Node kinds permitted in sandboxed programs
pub fn allowed_kinds() -> &'static HashSet<NodeKind> {
    static KINDS: OnceLock<HashSet<NodeKind>> = OnceLock::new();
    KINDS.get_or_init(|| {
        let program = parse(SUBSET_SAMPLE).expect("subset sample must parse");
        let mut kinds = HashSet::new();
        walk_program(&program, &mut |kind, _| {
            kinds.insert(kind);
        });
        kinds
    })
}

/// Reject any node kind outside the allowed subset
pub fn check_subset(program: &Program) -> Result<(), CompileError> {
    let allowed = allowed_kinds();
    let mut violation: Option<(NodeKind, Pos)> = None;
    walk_program(program, &mut |kind, pos| {
        if violation.is_none() && !allowed.contains(&kind) {
            violation = Some((kind, pos));
        }
    });
    match violation {
        Some((kind, pos)) => Err(CompileError::new(
            format!("`{}` not allowed", kind),
            pos.line,
            pos.column,
        )),
        None => Ok(()),
    }
}

/// Reject free identifiers that are not declared globals
///
/// Every identifier reference must resolve to a binding introduced by the
/// program itself or to a name in `globals`.
pub fn check_globals(program: &Program, globals: &HashSet<String>) -> Result<(), CompileError> {
    let mut scopes = Scopes { stack: vec![HashSet::new()] };
    hoist(&mut scopes, &program.body);
    for stmt in &program.body {
        check_stmt(stmt, &mut scopes, globals)?;
    }
    Ok(())
}

// ===== Generic kind walker =====

/// Visit every node of the program, reporting its kind and position
pub fn walk_program(program: &Program, f: &mut impl FnMut(NodeKind, Pos)) {
    f(NodeKind::Program, Pos::default());
    for stmt in &program.body {
        walk_stmt(stmt, f);
    }
}

fn walk_stmt(stmt: &Stmt, f: &mut impl FnMut(NodeKind, Pos)) {
    match stmt {
        Stmt::Expression { expr, pos } => {
            f(NodeKind::ExpressionStatement, *pos);
            walk_expr(expr, f);
        }
        Stmt::VarDecl { declarators, pos, .. } => {
            f(NodeKind::VariableDeclaration, *pos);
            for d in declarators {
                walk_pattern(&d.pattern, f);
                if let Some(init) = &d.init {
                    walk_expr(init, f);
                }
            }
        }
        Stmt::Block(block) => walk_block(block, f),
        Stmt::Return { arg, pos } => {
            f(NodeKind::ReturnStatement, *pos);
            if let Some(arg) = arg {
                walk_expr(arg, f);
            }
        }
        Stmt::If { test, consequent, alternate, pos } => {
            f(NodeKind::IfStatement, *pos);
            walk_expr(test, f);
            walk_stmt(consequent, f);
            if let Some(alt) = alternate {
                walk_stmt(alt, f);
            }
        }
        Stmt::For { init, test, update, body, pos } => {
            f(NodeKind::ForStatement, *pos);
            match init {
                Some(ForInit::VarDecl { declarators, pos, .. }) => {
                    f(NodeKind::VariableDeclaration, *pos);
                    for d in declarators {
                        walk_pattern(&d.pattern, f);
                        if let Some(init) = &d.init {
                            walk_expr(init, f);
                        }
                    }
                }
                Some(ForInit::Expr(expr)) => walk_expr(expr, f),
                None => {}
            }
            if let Some(test) = test {
                walk_expr(test, f);
            }
            if let Some(update) = update {
                walk_expr(update, f);
            }
            walk_stmt(body, f);
        }
        Stmt::ForOf { pattern, iterable, body, pos, .. } => {
            f(NodeKind::ForOfStatement, *pos);
            walk_pattern(pattern, f);
            walk_expr(iterable, f);
            walk_stmt(body, f);
        }
        Stmt::While { test, body, pos } => {
            f(NodeKind::WhileStatement, *pos);
            walk_expr(test, f);
            walk_stmt(body, f);
        }
        Stmt::DoWhile { body, test, pos } => {
            f(NodeKind::DoWhileStatement, *pos);
            walk_stmt(body, f);
            walk_expr(test, f);
        }
        Stmt::Break { pos } => f(NodeKind::BreakStatement, *pos),
        Stmt::Continue { pos } => f(NodeKind::ContinueStatement, *pos),
        Stmt::Try { block, handler, finalizer, pos } => {
            f(NodeKind::TryStatement, *pos);
            walk_block(block, f);
            if let Some(handler) = handler {
                f(NodeKind::CatchClause, handler.pos);
                if let Some(param) = &handler.param {
                    walk_pattern(param, f);
                }
                walk_block(&handler.body, f);
            }
            if let Some(finalizer) = finalizer {
                walk_block(finalizer, f);
            }
        }
        Stmt::Throw { arg, pos } => {
            f(NodeKind::ThrowStatement, *pos);
            walk_expr(arg, f);
        }
        Stmt::MonitorInit => {}
    }
}

fn walk_block(block: &Block, f: &mut impl FnMut(NodeKind, Pos)) {
    f(NodeKind::BlockStatement, block.pos);
    for stmt in &block.body {
        walk_stmt(stmt, f);
    }
}

fn walk_pattern(pattern: &Pattern, f: &mut impl FnMut(NodeKind, Pos)) {
    f(pattern.kind(), pattern.pos());
    match pattern {
        Pattern::Ident { .. } => {}
        Pattern::Object { props, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &prop.key {
                    walk_expr(key, f);
                }
                walk_pattern(&prop.value, f);
            }
        }
        Pattern::Array { elements, .. } => {
            for element in elements.iter().flatten() {
                walk_pattern(element, f);
            }
        }
    }
}

fn walk_expr(expr: &Expr, f: &mut impl FnMut(NodeKind, Pos)) {
    f(expr.kind(), expr.pos());
    match expr {
        Expr::Ident { .. }
        | Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::This { .. }
        | Expr::Update { .. } => {}
        Expr::Array { elements, .. } => {
            for element in elements {
                walk_expr(element, f);
            }
        }
        Expr::Object { props, .. } => {
            for prop in props {
                f(NodeKind::ObjectProperty, prop.pos);
                if let PropKey::Computed(key) = &prop.key {
                    walk_expr(key, f);
                }
                walk_expr(&prop.value, f);
            }
        }
        Expr::Arrow(arrow) => {
            for param in &arrow.params {
                walk_pattern(param, f);
            }
            match &arrow.body {
                ArrowBody::Block(block) => walk_block(block, f),
                ArrowBody::Expr(expr) => walk_expr(expr, f),
            }
        }
        Expr::Function { params, body, .. } => {
            for param in params {
                walk_pattern(param, f);
            }
            walk_block(body, f);
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            walk_expr(callee, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        Expr::Member { object, property, .. } => {
            walk_expr(object, f);
            if let PropAccess::Computed(key) = property.as_ref() {
                walk_expr(key, f);
            }
        }
        Expr::Assign { target, value, .. } => {
            match target.as_ref() {
                AssignTarget::Ident { pos, .. } => f(NodeKind::Identifier, *pos),
                AssignTarget::Member { object, property, pos } => {
                    f(NodeKind::MemberExpression, *pos);
                    walk_expr(object, f);
                    if let PropAccess::Computed(key) = property {
                        walk_expr(key, f);
                    }
                }
            }
            walk_expr(value, f);
        }
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::Unary { arg, .. } | Expr::Await { arg, .. } => walk_expr(arg, f),
        Expr::Conditional { test, consequent, alternate, .. } => {
            walk_expr(test, f);
            walk_expr(consequent, f);
            walk_expr(alternate, f);
        }
        Expr::Runtime(call) => match call.as_ref() {
            RuntimeCall::CheckSync | RuntimeCall::CheckAsync => {}
            RuntimeCall::CreateObj(expr)
            | RuntimeCall::CreateArr(expr)
            | RuntimeCall::ComputedProp(expr) => walk_expr(expr, f),
            RuntimeCall::GetProp { object, prop } => {
                walk_expr(object, f);
                walk_expr(prop, f);
            }
            RuntimeCall::SetProp { object, prop, value, .. } => {
                walk_expr(object, f);
                walk_expr(prop, f);
                walk_expr(value, f);
            }
            RuntimeCall::CallProp { object, prop, args } => {
                walk_expr(object, f);
                walk_expr(prop, f);
                for arg in args {
                    walk_expr(arg, f);
                }
            }
        },
    }
}

// ===== Free identifier analysis =====

struct Scopes {
    stack: Vec<HashSet<String>>,
}

impl Scopes {
    fn push(&mut self) {
        self.stack.push(HashSet::new());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.insert(name.to_string());
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.stack.iter().rev().any(|scope| scope.contains(name))
    }
}

fn declare_pattern(scopes: &mut Scopes, pattern: &Pattern) {
    match pattern {
        Pattern::Ident { name, .. } => scopes.declare(name),
        Pattern::Object { props, .. } => {
            for prop in props {
                declare_pattern(scopes, &prop.value);
            }
        }
        Pattern::Array { elements, .. } => {
            for element in elements.iter().flatten() {
                declare_pattern(scopes, element);
            }
        }
    }
}

// Bindings are block-scoped, so references appearing before the declaring
// statement in the same block still resolve.
fn hoist(scopes: &mut Scopes, body: &[Stmt]) {
    for stmt in body {
        if let Stmt::VarDecl { declarators, .. } = stmt {
            for d in declarators {
                declare_pattern(scopes, &d.pattern);
            }
        }
    }
}

fn unknown(name: &str, pos: Pos) -> CompileError {
    CompileError::new(format!("Unknown `{}`", name), pos.line, pos.column)
}

fn check_ref(
    name: &str,
    pos: Pos,
    scopes: &Scopes,
    globals: &HashSet<String>,
) -> Result<(), CompileError> {
    if scopes.is_bound(name) || globals.contains(name) {
        Ok(())
    } else {
        Err(unknown(name, pos))
    }
}

fn check_stmt(
    stmt: &Stmt,
    scopes: &mut Scopes,
    globals: &HashSet<String>,
) -> Result<(), CompileError> {
    match stmt {
        Stmt::Expression { expr, .. } | Stmt::Throw { arg: expr, .. } => {
            check_expr(expr, scopes, globals)
        }
        Stmt::VarDecl { declarators, .. } => {
            for d in declarators {
                if let Some(init) = &d.init {
                    check_expr(init, scopes, globals)?;
                }
            }
            Ok(())
        }
        Stmt::Block(block) => check_block(block, scopes, globals),
        Stmt::Return { arg, .. } => match arg {
            Some(arg) => check_expr(arg, scopes, globals),
            None => Ok(()),
        },
        Stmt::If { test, consequent, alternate, .. } => {
            check_expr(test, scopes, globals)?;
            check_stmt(consequent, scopes, globals)?;
            if let Some(alt) = alternate {
                check_stmt(alt, scopes, globals)?;
            }
            Ok(())
        }
        Stmt::For { init, test, update, body, .. } => {
            scopes.push();
            match init {
                Some(ForInit::VarDecl { declarators, .. }) => {
                    for d in declarators {
                        declare_pattern(scopes, &d.pattern);
                    }
                    for d in declarators {
                        if let Some(init) = &d.init {
                            check_expr(init, scopes, globals)?;
                        }
                    }
                }
                Some(ForInit::Expr(expr)) => check_expr(expr, scopes, globals)?,
                None => {}
            }
            if let Some(test) = test {
                check_expr(test, scopes, globals)?;
            }
            if let Some(update) = update {
                check_expr(update, scopes, globals)?;
            }
            check_stmt(body, scopes, globals)?;
            scopes.pop();
            Ok(())
        }
        Stmt::ForOf { pattern, iterable, body, .. } => {
            check_expr(iterable, scopes, globals)?;
            scopes.push();
            declare_pattern(scopes, pattern);
            check_stmt(body, scopes, globals)?;
            scopes.pop();
            Ok(())
        }
        Stmt::While { test, body, .. } => {
            check_expr(test, scopes, globals)?;
            check_stmt(body, scopes, globals)
        }
        Stmt::DoWhile { body, test, .. } => {
            check_stmt(body, scopes, globals)?;
            check_expr(test, scopes, globals)
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::MonitorInit => Ok(()),
        Stmt::Try { block, handler, finalizer, .. } => {
            check_block(block, scopes, globals)?;
            if let Some(handler) = handler {
                scopes.push();
                if let Some(param) = &handler.param {
                    declare_pattern(scopes, param);
                }
                hoist(scopes, &handler.body.body);
                for stmt in &handler.body.body {
                    check_stmt(stmt, scopes, globals)?;
                }
                scopes.pop();
            }
            if let Some(finalizer) = finalizer {
                check_block(finalizer, scopes, globals)?;
            }
            Ok(())
        }
    }
}

fn check_block(
    block: &Block,
    scopes: &mut Scopes,
    globals: &HashSet<String>,
) -> Result<(), CompileError> {
    scopes.push();
    hoist(scopes, &block.body);
    for stmt in &block.body {
        check_stmt(stmt, scopes, globals)?;
    }
    scopes.pop();
    Ok(())
}

fn check_expr(
    expr: &Expr,
    scopes: &mut Scopes,
    globals: &HashSet<String>,
) -> Result<(), CompileError> {
    match expr {
        Expr::Ident { name, pos } => check_ref(name, *pos, scopes, globals),
        Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::This { .. } => Ok(()),
        Expr::Array { elements, .. } => {
            for element in elements {
                check_expr(element, scopes, globals)?;
            }
            Ok(())
        }
        Expr::Object { props, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &prop.key {
                    check_expr(key, scopes, globals)?;
                }
                check_expr(&prop.value, scopes, globals)?;
            }
            Ok(())
        }
        Expr::Arrow(arrow) => {
            scopes.push();
            for param in &arrow.params {
                declare_pattern(scopes, param);
            }
            match &arrow.body {
                ArrowBody::Block(block) => {
                    hoist(scopes, &block.body);
                    for stmt in &block.body {
                        check_stmt(stmt, scopes, globals)?;
                    }
                }
                ArrowBody::Expr(expr) => check_expr(expr, scopes, globals)?,
            }
            scopes.pop();
            Ok(())
        }
        Expr::Function { params, body, .. } => {
            scopes.push();
            for param in params {
                declare_pattern(scopes, param);
            }
            hoist(scopes, &body.body);
            for stmt in &body.body {
                check_stmt(stmt, scopes, globals)?;
            }
            scopes.pop();
            Ok(())
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            check_expr(callee, scopes, globals)?;
            for arg in args {
                check_expr(arg, scopes, globals)?;
            }
            Ok(())
        }
        Expr::Member { object, property, .. } => {
            check_expr(object, scopes, globals)?;
            if let PropAccess::Computed(key) = property.as_ref() {
                check_expr(key, scopes, globals)?;
            }
            Ok(())
        }
        Expr::Assign { target, value, .. } => {
            match target.as_ref() {
                AssignTarget::Ident { name, pos } => check_ref(name, *pos, scopes, globals)?,
                AssignTarget::Member { object, property, .. } => {
                    check_expr(object, scopes, globals)?;
                    if let PropAccess::Computed(key) = property {
                        check_expr(key, scopes, globals)?;
                    }
                }
            }
            check_expr(value, scopes, globals)
        }
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            check_expr(left, scopes, globals)?;
            check_expr(right, scopes, globals)
        }
        Expr::Unary { arg, .. } | Expr::Await { arg, .. } => check_expr(arg, scopes, globals),
        Expr::Update { name, pos, .. } => check_ref(name, *pos, scopes, globals),
        Expr::Conditional { test, consequent, alternate, .. } => {
            check_expr(test, scopes, globals)?;
            check_expr(consequent, scopes, globals)?;
            check_expr(alternate, scopes, globals)
        }
        Expr::Runtime(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sample_covers_the_allowed_grammar() {
        let kinds = allowed_kinds();
        assert!(kinds.contains(&NodeKind::ArrowFunctionExpression));
        assert!(kinds.contains(&NodeKind::ForOfStatement));
        assert!(kinds.contains(&NodeKind::AwaitExpression));
        assert!(!kinds.contains(&NodeKind::FunctionExpression));
        assert!(!kinds.contains(&NodeKind::ThisExpression));
    }

    #[test]
    fn rejects_function_expressions() {
        let program = parse("async () => { const f = function () { return 1 }; }").unwrap();
        let err = check_subset(&program).unwrap_err();
        assert_eq!(err.message, "`FunctionExpression` not allowed");
    }

    #[test]
    fn rejects_this() {
        let program = parse("async () => this").unwrap();
        let err = check_subset(&program).unwrap_err();
        assert_eq!(err.message, "`ThisExpression` not allowed");
    }

    #[test]
    fn accepts_the_allowed_grammar() {
        let program = parse(SUBSET_SAMPLE).unwrap();
        check_subset(&program).unwrap();
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let program = parse("async () => fetch('x')").unwrap();
        let err = check_globals(&program, &globals(&[])).unwrap_err();
        assert_eq!(err.message, "Unknown `fetch`");
    }

    #[test]
    fn declared_names_resolve() {
        let program = parse(
            "async (input) => { const n = input.length; const f = (x) => x + n; return f(helper); }",
        )
        .unwrap();
        check_globals(&program, &globals(&["helper"])).unwrap();
    }

    #[test]
    fn later_declarations_in_the_same_block_resolve() {
        let program = parse("async () => { const a = () => b; const b = 1; return a(); }").unwrap();
        check_globals(&program, &globals(&[])).unwrap();
    }

    #[test]
    fn catch_param_is_scoped_to_the_handler() {
        let program = parse("async () => { try { } catch (e) { return e; } return e; }").unwrap();
        let err = check_globals(&program, &globals(&[])).unwrap_err();
        assert_eq!(err.message, "Unknown `e`");
    }
}
