//! Instrumentation pass
//!
//! Rewrites a checked program so that every observable allocation and every
//! property access goes through the runtime monitor, and so that loops,
//! handlers and function bodies re-enter the budget checks. The pass inserts
//! explicit [`RuntimeCall`] nodes; it never synthesizes member syntax that
//! could collide with user identifiers. A fresh monitor identifier is chosen
//! per program for the rendered form.

use std::collections::HashSet;

use crate::ast::*;

/// Instrument the program in place and pick its monitor identifier
pub fn instrument(program: &mut Program) {
    let ident = fresh_monitor_ident(program);
    let mut ctx = Ctx { async_stack: vec![false] };
    let body = std::mem::take(&mut program.body);
    let mut body: Vec<Stmt> = body
        .into_iter()
        .map(|stmt| match stmt {
            // the host drives the entry function itself; only nested
            // functions re-enter the budget checks
            Stmt::Expression { expr: Expr::Arrow(arrow), pos } => Stmt::Expression {
                expr: rewrite_arrow(arrow, &mut ctx, false),
                pos,
            },
            other => rewrite_stmt(other, &mut ctx),
        })
        .collect();
    body.insert(0, Stmt::MonitorInit);
    program.body = body;
    program.monitor_ident = Some(ident);
}

struct Ctx {
    // asyncness of the innermost enclosing function
    async_stack: Vec<bool>,
}

impl Ctx {
    fn in_async(&self) -> bool {
        *self.async_stack.last().unwrap_or(&false)
    }

    fn check_stmt(&self) -> Stmt {
        let call = if self.in_async() {
            RuntimeCall::CheckAsync
        } else {
            RuntimeCall::CheckSync
        };
        Stmt::Expression {
            expr: Expr::Runtime(Box::new(call)),
            pos: Pos::default(),
        }
    }
}

/// Pick `_r<n>` such that the name appears nowhere in the program
fn fresh_monitor_ident(program: &Program) -> String {
    let mut used = HashSet::new();
    for stmt in &program.body {
        collect_stmt_idents(stmt, &mut used);
    }
    let mut n = 0usize;
    loop {
        let candidate = format!("_r{}", n);
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn collect_pattern_idents(pattern: &Pattern, out: &mut HashSet<String>) {
    match pattern {
        Pattern::Ident { name, .. } => {
            out.insert(name.clone());
        }
        Pattern::Object { props, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &prop.key {
                    collect_expr_idents(key, out);
                }
                collect_pattern_idents(&prop.value, out);
            }
        }
        Pattern::Array { elements, .. } => {
            for element in elements.iter().flatten() {
                collect_pattern_idents(element, out);
            }
        }
    }
}

fn collect_stmt_idents(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Expression { expr, .. } | Stmt::Throw { arg: expr, .. } => {
            collect_expr_idents(expr, out)
        }
        Stmt::VarDecl { declarators, .. } => {
            for d in declarators {
                collect_pattern_idents(&d.pattern, out);
                if let Some(init) = &d.init {
                    collect_expr_idents(init, out);
                }
            }
        }
        Stmt::Block(block) => {
            for stmt in &block.body {
                collect_stmt_idents(stmt, out);
            }
        }
        Stmt::Return { arg, .. } => {
            if let Some(arg) = arg {
                collect_expr_idents(arg, out);
            }
        }
        Stmt::If { test, consequent, alternate, .. } => {
            collect_expr_idents(test, out);
            collect_stmt_idents(consequent, out);
            if let Some(alt) = alternate {
                collect_stmt_idents(alt, out);
            }
        }
        Stmt::For { init, test, update, body, .. } => {
            match init {
                Some(ForInit::VarDecl { declarators, .. }) => {
                    for d in declarators {
                        collect_pattern_idents(&d.pattern, out);
                        if let Some(init) = &d.init {
                            collect_expr_idents(init, out);
                        }
                    }
                }
                Some(ForInit::Expr(expr)) => collect_expr_idents(expr, out),
                None => {}
            }
            if let Some(test) = test {
                collect_expr_idents(test, out);
            }
            if let Some(update) = update {
                collect_expr_idents(update, out);
            }
            collect_stmt_idents(body, out);
        }
        Stmt::ForOf { pattern, iterable, body, .. } => {
            collect_pattern_idents(pattern, out);
            collect_expr_idents(iterable, out);
            collect_stmt_idents(body, out);
        }
        Stmt::While { test, body, .. } | Stmt::DoWhile { body, test, .. } => {
            collect_expr_idents(test, out);
            collect_stmt_idents(body, out);
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::MonitorInit => {}
        Stmt::Try { block, handler, finalizer, .. } => {
            for stmt in &block.body {
                collect_stmt_idents(stmt, out);
            }
            if let Some(handler) = handler {
                if let Some(param) = &handler.param {
                    collect_pattern_idents(param, out);
                }
                for stmt in &handler.body.body {
                    collect_stmt_idents(stmt, out);
                }
            }
            if let Some(finalizer) = finalizer {
                for stmt in &finalizer.body {
                    collect_stmt_idents(stmt, out);
                }
            }
        }
    }
}

fn collect_expr_idents(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident { name, .. } | Expr::Update { name, .. } => {
            out.insert(name.clone());
        }
        Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::This { .. } => {}
        Expr::Array { elements, .. } => {
            for element in elements {
                collect_expr_idents(element, out);
            }
        }
        Expr::Object { props, .. } => {
            for prop in props {
                if let PropKey::Computed(key) = &prop.key {
                    collect_expr_idents(key, out);
                }
                collect_expr_idents(&prop.value, out);
            }
        }
        Expr::Arrow(arrow) => {
            for param in &arrow.params {
                collect_pattern_idents(param, out);
            }
            match &arrow.body {
                ArrowBody::Block(block) => {
                    for stmt in &block.body {
                        collect_stmt_idents(stmt, out);
                    }
                }
                ArrowBody::Expr(expr) => collect_expr_idents(expr, out),
            }
        }
        Expr::Function { params, body, .. } => {
            for param in params {
                collect_pattern_idents(param, out);
            }
            for stmt in &body.body {
                collect_stmt_idents(stmt, out);
            }
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            collect_expr_idents(callee, out);
            for arg in args {
                collect_expr_idents(arg, out);
            }
        }
        Expr::Member { object, property, .. } => {
            collect_expr_idents(object, out);
            if let PropAccess::Computed(key) = property.as_ref() {
                collect_expr_idents(key, out);
            }
        }
        Expr::Assign { target, value, .. } => {
            match target.as_ref() {
                AssignTarget::Ident { name, .. } => {
                    out.insert(name.clone());
                }
                AssignTarget::Member { object, property, .. } => {
                    collect_expr_idents(object, out);
                    if let PropAccess::Computed(key) = property {
                        collect_expr_idents(key, out);
                    }
                }
            }
            collect_expr_idents(value, out);
        }
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_expr_idents(left, out);
            collect_expr_idents(right, out);
        }
        Expr::Unary { arg, .. } | Expr::Await { arg, .. } => collect_expr_idents(arg, out),
        Expr::Conditional { test, consequent, alternate, .. } => {
            collect_expr_idents(test, out);
            collect_expr_idents(consequent, out);
            collect_expr_idents(alternate, out);
        }
        Expr::Runtime(_) => {}
    }
}

// ===== Rewriting =====

fn rewrite_stmt(stmt: Stmt, ctx: &mut Ctx) -> Stmt {
    match stmt {
        Stmt::Expression { expr, pos } => Stmt::Expression { expr: rewrite_expr(expr, ctx), pos },
        Stmt::VarDecl { kind, declarators, pos } => Stmt::VarDecl {
            kind,
            declarators: declarators.into_iter().map(|d| rewrite_declarator(d, ctx)).collect(),
            pos,
        },
        Stmt::Block(block) => Stmt::Block(rewrite_block(block, ctx)),
        Stmt::Return { arg, pos } => Stmt::Return {
            arg: arg.map(|a| rewrite_expr(a, ctx)),
            pos,
        },
        Stmt::If { test, consequent, alternate, pos } => Stmt::If {
            test: rewrite_expr(test, ctx),
            consequent: Box::new(rewrite_stmt(*consequent, ctx)),
            alternate: alternate.map(|a| Box::new(rewrite_stmt(*a, ctx))),
            pos,
        },
        Stmt::For { init, test, update, body, pos } => {
            let init = init.map(|init| match init {
                ForInit::VarDecl { kind, declarators, pos } => ForInit::VarDecl {
                    kind,
                    declarators: declarators
                        .into_iter()
                        .map(|d| rewrite_declarator(d, ctx))
                        .collect(),
                    pos,
                },
                ForInit::Expr(expr) => ForInit::Expr(rewrite_expr(expr, ctx)),
            });
            Stmt::For {
                init,
                test: test.map(|t| rewrite_expr(t, ctx)),
                update: update.map(|u| rewrite_expr(u, ctx)),
                body: Box::new(guard_loop_body(*body, ctx)),
                pos,
            }
        }
        Stmt::ForOf { kind, pattern, iterable, body, pos } => Stmt::ForOf {
            kind,
            pattern: rewrite_pattern(pattern, ctx),
            iterable: rewrite_expr(iterable, ctx),
            body: Box::new(guard_loop_body(*body, ctx)),
            pos,
        },
        Stmt::While { test, body, pos } => Stmt::While {
            test: rewrite_expr(test, ctx),
            body: Box::new(guard_loop_body(*body, ctx)),
            pos,
        },
        Stmt::DoWhile { body, test, pos } => Stmt::DoWhile {
            body: Box::new(guard_loop_body(*body, ctx)),
            test: rewrite_expr(test, ctx),
            pos,
        },
        Stmt::Break { pos } => Stmt::Break { pos },
        Stmt::Continue { pos } => Stmt::Continue { pos },
        Stmt::Try { block, handler, finalizer, pos } => {
            let block = rewrite_block(block, ctx);
            // handler and finalizer each re-enter the budget check, since a
            // trip raised in the guarded block lands here first
            let handler = handler.map(|h| {
                let mut body = rewrite_block(h.body, ctx);
                body.body.insert(0, ctx.check_stmt());
                CatchClause { param: h.param.map(|p| rewrite_pattern(p, ctx)), body, pos: h.pos }
            });
            let finalizer = finalizer.map(|f| {
                let mut body = rewrite_block(f, ctx);
                body.body.insert(0, ctx.check_stmt());
                body
            });
            Stmt::Try { block, handler, finalizer, pos }
        }
        Stmt::Throw { arg, pos } => Stmt::Throw { arg: rewrite_expr(arg, ctx), pos },
        Stmt::MonitorInit => Stmt::MonitorInit,
    }
}

fn rewrite_declarator(d: VarDeclarator, ctx: &mut Ctx) -> VarDeclarator {
    VarDeclarator {
        pattern: rewrite_pattern(d.pattern, ctx),
        init: d.init.map(|i| rewrite_expr(i, ctx)),
        pos: d.pos,
    }
}

fn rewrite_pattern(pattern: Pattern, ctx: &mut Ctx) -> Pattern {
    match pattern {
        Pattern::Ident { name, pos } => Pattern::Ident { name, pos },
        Pattern::Object { props, pos } => Pattern::Object {
            props: props
                .into_iter()
                .map(|p| ObjectPatternProp {
                    key: rewrite_prop_key(p.key, ctx),
                    value: rewrite_pattern(p.value, ctx),
                    pos: p.pos,
                })
                .collect(),
            pos,
        },
        Pattern::Array { elements, pos } => Pattern::Array {
            elements: elements
                .into_iter()
                .map(|e| e.map(|p| rewrite_pattern(p, ctx)))
                .collect(),
            pos,
        },
    }
}

fn rewrite_prop_key(key: PropKey, ctx: &mut Ctx) -> PropKey {
    match key {
        PropKey::Computed(expr) => PropKey::Computed(Box::new(Expr::Runtime(Box::new(
            RuntimeCall::ComputedProp(rewrite_expr(*expr, ctx)),
        )))),
        other => other,
    }
}

fn rewrite_block(block: Block, ctx: &mut Ctx) -> Block {
    Block {
        body: block.body.into_iter().map(|s| rewrite_stmt(s, ctx)).collect(),
        pos: block.pos,
    }
}

fn guard_loop_body(body: Stmt, ctx: &mut Ctx) -> Stmt {
    let body = rewrite_stmt(body, ctx);
    let check = ctx.check_stmt();
    match body {
        Stmt::Block(mut block) => {
            block.body.insert(0, check);
            Stmt::Block(block)
        }
        other => Stmt::Block(Block {
            pos: other.pos(),
            body: vec![check, other],
        }),
    }
}

/// Property accessor as a monitor argument
fn prop_expr(access: PropAccess, ctx: &mut Ctx) -> Expr {
    match access {
        PropAccess::Static(name) => Expr::Str { value: name, pos: Pos::default() },
        PropAccess::Computed(expr) => Expr::Runtime(Box::new(RuntimeCall::ComputedProp(
            rewrite_expr(expr, ctx),
        ))),
    }
}

fn rewrite_arrow(arrow: Box<ArrowFunction>, ctx: &mut Ctx, entry_check: bool) -> Expr {
    ctx.async_stack.push(arrow.is_async);
    let params = arrow.params.into_iter().map(|p| rewrite_pattern(p, ctx)).collect();
    let mut block = match arrow.body {
        ArrowBody::Block(block) => rewrite_block(block, ctx),
        // expression bodies are normalized to a block either way
        ArrowBody::Expr(expr) => {
            let pos = expr.pos();
            Block {
                body: vec![Stmt::Return { arg: Some(rewrite_expr(*expr, ctx)), pos }],
                pos,
            }
        }
    };
    if entry_check {
        block.body.insert(0, ctx.check_stmt());
    }
    ctx.async_stack.pop();
    Expr::Arrow(Box::new(ArrowFunction {
        is_async: arrow.is_async,
        params,
        body: ArrowBody::Block(block),
        src_len: arrow.src_len,
        pos: arrow.pos,
    }))
}

fn rewrite_expr(expr: Expr, ctx: &mut Ctx) -> Expr {
    match expr {
        Expr::Ident { .. }
        | Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::This { .. }
        | Expr::Update { .. }
        | Expr::Runtime(_) => expr,
        Expr::Array { elements, pos } => {
            let elements = elements.into_iter().map(|e| rewrite_expr(e, ctx)).collect();
            Expr::Runtime(Box::new(RuntimeCall::CreateArr(Expr::Array { elements, pos })))
        }
        Expr::Object { props, pos } => {
            let props = props
                .into_iter()
                .map(|p| ObjectProp {
                    key: rewrite_prop_key(p.key, ctx),
                    value: rewrite_expr(p.value, ctx),
                    pos: p.pos,
                })
                .collect();
            Expr::Runtime(Box::new(RuntimeCall::CreateObj(Expr::Object { props, pos })))
        }
        Expr::New { callee, args, pos } => {
            let callee = Box::new(rewrite_expr(*callee, ctx));
            let args = args.into_iter().map(|a| rewrite_expr(a, ctx)).collect();
            Expr::Runtime(Box::new(RuntimeCall::CreateObj(Expr::New { callee, args, pos })))
        }
        Expr::Member { object, property, .. } => Expr::Runtime(Box::new(RuntimeCall::GetProp {
            object: rewrite_expr(*object, ctx),
            prop: prop_expr(*property, ctx),
        })),
        Expr::Call { callee, args, pos } => {
            // arguments are rewritten in every case, including when the
            // callee is a member expression and the call turns into a
            // guarded property call
            let args: Vec<Expr> = args.into_iter().map(|a| rewrite_expr(a, ctx)).collect();
            match *callee {
                Expr::Member { object, property, .. } => {
                    Expr::Runtime(Box::new(RuntimeCall::CallProp {
                        object: rewrite_expr(*object, ctx),
                        prop: prop_expr(*property, ctx),
                        args,
                    }))
                }
                callee => Expr::Call { callee: Box::new(rewrite_expr(callee, ctx)), args, pos },
            }
        }
        Expr::Assign { op, target, value, pos } => {
            let value = Box::new(rewrite_expr(*value, ctx));
            match *target {
                AssignTarget::Member { object, property, .. } => {
                    Expr::Runtime(Box::new(RuntimeCall::SetProp {
                        object: rewrite_expr(object, ctx),
                        prop: prop_expr(property, ctx),
                        value: *value,
                        op,
                    }))
                }
                target @ AssignTarget::Ident { .. } => Expr::Assign {
                    op,
                    target: Box::new(target),
                    value,
                    pos,
                },
            }
        }
        Expr::Arrow(arrow) => rewrite_arrow(arrow, ctx, true),
        Expr::Function { is_async, params, body, pos } => {
            ctx.async_stack.push(is_async);
            let params = params.into_iter().map(|p| rewrite_pattern(p, ctx)).collect();
            let body = rewrite_block(body, ctx);
            ctx.async_stack.pop();
            Expr::Function { is_async, params, body, pos }
        }
        Expr::Binary { op, left, right, pos } => Expr::Binary {
            op,
            left: Box::new(rewrite_expr(*left, ctx)),
            right: Box::new(rewrite_expr(*right, ctx)),
            pos,
        },
        Expr::Logical { op, left, right, pos } => Expr::Logical {
            op,
            left: Box::new(rewrite_expr(*left, ctx)),
            right: Box::new(rewrite_expr(*right, ctx)),
            pos,
        },
        Expr::Unary { op, arg, pos } => Expr::Unary {
            op,
            arg: Box::new(rewrite_expr(*arg, ctx)),
            pos,
        },
        Expr::Conditional { test, consequent, alternate, pos } => Expr::Conditional {
            test: Box::new(rewrite_expr(*test, ctx)),
            consequent: Box::new(rewrite_expr(*consequent, ctx)),
            alternate: Box::new(rewrite_expr(*alternate, ctx)),
            pos,
        },
        Expr::Await { arg, pos } => Expr::Await {
            arg: Box::new(rewrite_expr(*arg, ctx)),
            pos,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn instrumented(src: &str) -> Program {
        let mut program = parse(src).unwrap();
        instrument(&mut program);
        program
    }

    fn top_arrow(program: &Program) -> &ArrowFunction {
        let Stmt::Expression { expr: Expr::Arrow(arrow), .. } = &program.body[1] else {
            panic!("expected arrow after monitor init");
        };
        arrow
    }

    #[test]
    fn monitor_init_is_prepended() {
        let program = instrumented("async () => 1");
        assert!(matches!(program.body[0], Stmt::MonitorInit));
        assert_eq!(program.monitor_ident.as_deref(), Some("_r0"));
    }

    #[test]
    fn monitor_ident_avoids_collisions() {
        let program = instrumented("async (_r0) => _r0");
        assert_eq!(program.monitor_ident.as_deref(), Some("_r1"));
    }

    #[test]
    fn entry_function_body_is_not_check_guarded() {
        let program = instrumented("async () => 1");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        assert_eq!(block.body.len(), 1);
        assert!(matches!(block.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn nested_async_arrow_gets_async_check() {
        let program = instrumented("async () => { const f = async () => 1; return f(); }");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::VarDecl { declarators, .. } = &block.body[0] else { panic!() };
        let Some(Expr::Arrow(inner)) = &declarators[0].init else { panic!() };
        let ArrowBody::Block(inner_block) = &inner.body else { panic!() };
        let Stmt::Expression { expr: Expr::Runtime(call), .. } = &inner_block.body[0] else {
            panic!("expected entry check");
        };
        assert!(matches!(call.as_ref(), RuntimeCall::CheckAsync));
        assert!(matches!(inner_block.body[1], Stmt::Return { .. }));
    }

    #[test]
    fn nested_sync_arrow_gets_sync_check() {
        let program = instrumented("async () => { const f = () => 1; return f(); }");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::VarDecl { declarators, .. } = &block.body[0] else { panic!() };
        let Some(Expr::Arrow(inner)) = &declarators[0].init else { panic!() };
        let ArrowBody::Block(inner_block) = &inner.body else { panic!() };
        let Stmt::Expression { expr: Expr::Runtime(call), .. } = &inner_block.body[0] else {
            panic!("expected entry check");
        };
        assert!(matches!(call.as_ref(), RuntimeCall::CheckSync));
    }

    #[test]
    fn loop_bodies_are_guarded() {
        let program = instrumented("async () => { while (true) { } }");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::While { body, .. } = &block.body[0] else { panic!() };
        let Stmt::Block(loop_block) = body.as_ref() else { panic!() };
        let Stmt::Expression { expr: Expr::Runtime(call), .. } = &loop_block.body[0] else {
            panic!("expected loop check");
        };
        assert!(matches!(call.as_ref(), RuntimeCall::CheckAsync));
    }

    #[test]
    fn member_calls_rewrite_their_arguments() {
        let program = instrumented("async () => a.f(b.c)");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::Return { arg: Some(Expr::Runtime(call)), .. } = &block.body[0] else {
            panic!()
        };
        let RuntimeCall::CallProp { args, .. } = call.as_ref() else { panic!() };
        let Expr::Runtime(arg) = &args[0] else {
            panic!("argument member access must be guarded");
        };
        assert!(matches!(arg.as_ref(), RuntimeCall::GetProp { .. }));
    }

    #[test]
    fn literals_become_tracked_allocations() {
        let program = instrumented("async () => [{ a: 1 }]");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::Return { arg: Some(Expr::Runtime(call)), .. } = &block.body[0] else {
            panic!()
        };
        let RuntimeCall::CreateArr(Expr::Array { elements, .. }) = call.as_ref() else {
            panic!()
        };
        let Expr::Runtime(inner) = &elements[0] else { panic!() };
        assert!(matches!(inner.as_ref(), RuntimeCall::CreateObj(_)));
    }

    #[test]
    fn member_assignment_becomes_set_prop() {
        let program = instrumented("async () => { a.b += 1; }");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::Expression { expr: Expr::Runtime(call), .. } = &block.body[0] else {
            panic!()
        };
        let RuntimeCall::SetProp { op, .. } = call.as_ref() else { panic!() };
        assert_eq!(*op, AssignOp::Add);
    }

    #[test]
    fn catch_and_finally_re_enter_checks() {
        let program = instrumented("async () => { try { } catch (e) { } finally { } }");
        let arrow = top_arrow(&program);
        let ArrowBody::Block(block) = &arrow.body else { panic!() };
        let Stmt::Try { handler, finalizer, .. } = &block.body[0] else { panic!() };
        let handler = handler.as_ref().unwrap();
        assert!(matches!(
            handler.body.body[0],
            Stmt::Expression { expr: Expr::Runtime(_), .. }
        ));
        assert!(matches!(
            finalizer.as_ref().unwrap().body[0],
            Stmt::Expression { expr: Expr::Runtime(_), .. }
        ));
    }
}
