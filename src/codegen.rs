//! Renders an instrumented program back to source text
//!
//! The rendered form is what gets reported alongside compile output and what
//! worst-case memory estimates for closures are based on. Execution itself
//! walks the tree, so the generator only has to be precise, not pretty.

use crate::ast::*;
use crate::parser::format_number;

/// Render the program, routing monitor calls through its chosen identifier
pub fn generate(program: &Program) -> String {
    let monitor = program.monitor_ident.as_deref().unwrap_or("_r0");
    let mut g = Generator { out: String::new(), indent: 0, monitor };
    for stmt in &program.body {
        g.stmt(stmt);
    }
    g.out
}

// Precedence levels, higher binds tighter.
const PREC_ASSIGN: u8 = 1;
const PREC_COND: u8 = 2;
const PREC_OR: u8 = 3;
const PREC_AND: u8 = 4;
const PREC_EQ: u8 = 5;
const PREC_REL: u8 = 6;
const PREC_ADD: u8 = 7;
const PREC_MUL: u8 = 8;
const PREC_UNARY: u8 = 9;
const PREC_POSTFIX: u8 = 10;
const PREC_CALL: u8 = 11;
const PREC_PRIMARY: u8 = 12;

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Ident { .. }
        | Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::This { .. }
        | Expr::Array { .. }
        | Expr::Object { .. } => PREC_PRIMARY,
        Expr::Member { .. } | Expr::Call { .. } | Expr::New { .. } | Expr::Runtime(_) => PREC_CALL,
        Expr::Update { prefix, .. } => {
            if *prefix {
                PREC_UNARY
            } else {
                PREC_POSTFIX
            }
        }
        Expr::Unary { .. } | Expr::Await { .. } => PREC_UNARY,
        Expr::Binary { op, .. } => match op {
            BinOp::Mul | BinOp::Div | BinOp::Mod => PREC_MUL,
            BinOp::Add | BinOp::Sub => PREC_ADD,
            BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => PREC_REL,
            _ => PREC_EQ,
        },
        Expr::Logical { op, .. } => match op {
            LogicalOp::And => PREC_AND,
            LogicalOp::Or | LogicalOp::Nullish => PREC_OR,
        },
        Expr::Conditional { .. } => PREC_COND,
        Expr::Assign { .. } | Expr::Arrow(_) | Expr::Function { .. } => PREC_ASSIGN,
    }
}

/// Quote a string as a single-quoted JS literal
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

struct Generator<'a> {
    out: String,
    indent: usize,
    monitor: &'a str,
}

impl Generator<'_> {
    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.line_start();
        self.stmt_inline(stmt);
        self.out.push('\n');
    }

    // statement text without leading indent or trailing newline
    fn stmt_inline(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::MonitorInit => {
                self.out.push_str("const ");
                self.out.push_str(self.monitor);
                self.out.push_str(" = createRuntime();");
            }
            Stmt::Expression { expr, .. } => {
                self.expr(expr, PREC_ASSIGN);
                self.out.push(';');
            }
            Stmt::VarDecl { kind, declarators, .. } => {
                self.var_decl(*kind, declarators);
                self.out.push(';');
            }
            Stmt::Block(block) => self.block(block),
            Stmt::Return { arg, .. } => {
                self.out.push_str("return");
                if let Some(arg) = arg {
                    self.out.push(' ');
                    self.expr(arg, PREC_ASSIGN);
                }
                self.out.push(';');
            }
            Stmt::If { test, consequent, alternate, .. } => {
                self.out.push_str("if (");
                self.expr(test, PREC_ASSIGN);
                self.out.push_str(") ");
                self.nested_stmt(consequent);
                if let Some(alt) = alternate {
                    self.out.push_str(" else ");
                    self.nested_stmt(alt);
                }
            }
            Stmt::For { init, test, update, body, .. } => {
                self.out.push_str("for (");
                match init {
                    Some(ForInit::VarDecl { kind, declarators, .. }) => {
                        self.var_decl(*kind, declarators)
                    }
                    Some(ForInit::Expr(expr)) => self.expr(expr, PREC_ASSIGN),
                    None => {}
                }
                self.out.push_str("; ");
                if let Some(test) = test {
                    self.expr(test, PREC_ASSIGN);
                }
                self.out.push_str("; ");
                if let Some(update) = update {
                    self.expr(update, PREC_ASSIGN);
                }
                self.out.push_str(") ");
                self.nested_stmt(body);
            }
            Stmt::ForOf { kind, pattern, iterable, body, .. } => {
                self.out.push_str("for (");
                self.out.push_str(kind.as_str());
                self.out.push(' ');
                self.pattern(pattern);
                self.out.push_str(" of ");
                self.expr(iterable, PREC_ASSIGN);
                self.out.push_str(") ");
                self.nested_stmt(body);
            }
            Stmt::While { test, body, .. } => {
                self.out.push_str("while (");
                self.expr(test, PREC_ASSIGN);
                self.out.push_str(") ");
                self.nested_stmt(body);
            }
            Stmt::DoWhile { body, test, .. } => {
                self.out.push_str("do ");
                self.nested_stmt(body);
                self.out.push_str(" while (");
                self.expr(test, PREC_ASSIGN);
                self.out.push_str(");");
            }
            Stmt::Break { .. } => self.out.push_str("break;"),
            Stmt::Continue { .. } => self.out.push_str("continue;"),
            Stmt::Try { block, handler, finalizer, .. } => {
                self.out.push_str("try ");
                self.block(block);
                if let Some(handler) = handler {
                    self.out.push_str(" catch ");
                    if let Some(param) = &handler.param {
                        self.out.push('(');
                        self.pattern(param);
                        self.out.push_str(") ");
                    }
                    self.block(&handler.body);
                }
                if let Some(finalizer) = finalizer {
                    self.out.push_str(" finally ");
                    self.block(finalizer);
                }
            }
            Stmt::Throw { arg, .. } => {
                self.out.push_str("throw ");
                self.expr(arg, PREC_ASSIGN);
                self.out.push(';');
            }
        }
    }

    // loop and branch bodies: blocks stay inline, single statements too
    fn nested_stmt(&mut self, stmt: &Stmt) {
        self.stmt_inline(stmt);
    }

    fn block(&mut self, block: &Block) {
        self.out.push_str("{\n");
        self.indent += 1;
        for stmt in &block.body {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line_start();
        self.out.push('}');
    }

    fn var_decl(&mut self, kind: VarKind, declarators: &[VarDeclarator]) {
        self.out.push_str(kind.as_str());
        self.out.push(' ');
        for (i, d) in declarators.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.pattern(&d.pattern);
            if let Some(init) = &d.init {
                self.out.push_str(" = ");
                self.expr(init, PREC_ASSIGN);
            }
        }
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Ident { name, .. } => self.out.push_str(name),
            Pattern::Object { props, .. } => {
                self.out.push_str("{ ");
                for (i, prop) in props.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.prop_key(&prop.key);
                    if let (PropKey::Ident(key), Pattern::Ident { name, .. }) =
                        (&prop.key, &prop.value)
                    {
                        if key == name {
                            continue;
                        }
                    }
                    self.out.push_str(": ");
                    self.pattern(&prop.value);
                }
                self.out.push_str(" }");
            }
            Pattern::Array { elements, .. } => {
                self.out.push('[');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    if let Some(element) = element {
                        self.pattern(element);
                    }
                }
                self.out.push(']');
            }
        }
    }

    fn prop_key(&mut self, key: &PropKey) {
        match key {
            PropKey::Ident(name) => self.out.push_str(name),
            PropKey::Str(value) => self.out.push_str(&quote(value)),
            PropKey::Computed(expr) => {
                self.out.push('[');
                self.expr(expr, PREC_ASSIGN);
                self.out.push(']');
            }
        }
    }

    fn expr(&mut self, expr: &Expr, min_prec: u8) {
        let needs_parens = prec(expr) < min_prec;
        if needs_parens {
            self.out.push('(');
        }
        self.expr_bare(expr);
        if needs_parens {
            self.out.push(')');
        }
    }

    fn expr_bare(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident { name, .. } => self.out.push_str(name),
            Expr::Number { value, .. } => self.out.push_str(&format_number(*value)),
            Expr::Str { value, .. } => self.out.push_str(&quote(value)),
            Expr::Bool { value, .. } => {
                self.out.push_str(if *value { "true" } else { "false" })
            }
            Expr::Null { .. } => self.out.push_str("null"),
            Expr::This { .. } => self.out.push_str("this"),
            Expr::Array { elements, .. } => {
                self.out.push('[');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(element, PREC_ASSIGN);
                }
                self.out.push(']');
            }
            Expr::Object { props, .. } => {
                if props.is_empty() {
                    self.out.push_str("{}");
                    return;
                }
                self.out.push_str("{ ");
                for (i, prop) in props.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.prop_key(&prop.key);
                    self.out.push_str(": ");
                    self.expr(&prop.value, PREC_ASSIGN);
                }
                self.out.push_str(" }");
            }
            Expr::Arrow(arrow) => {
                if arrow.is_async {
                    self.out.push_str("async ");
                }
                self.out.push('(');
                for (i, param) in arrow.params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.pattern(param);
                }
                self.out.push_str(") => ");
                match &arrow.body {
                    ArrowBody::Block(block) => self.block(block),
                    ArrowBody::Expr(expr) => {
                        // an object literal body would parse as a block
                        let parens = matches!(expr.as_ref(), Expr::Object { .. });
                        if parens {
                            self.out.push('(');
                        }
                        self.expr(expr, PREC_ASSIGN);
                        if parens {
                            self.out.push(')');
                        }
                    }
                }
            }
            Expr::Function { is_async, params, body, .. } => {
                if *is_async {
                    self.out.push_str("async ");
                }
                self.out.push_str("function (");
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.pattern(param);
                }
                self.out.push_str(") ");
                self.block(body);
            }
            Expr::Call { callee, args, .. } => {
                self.expr(callee, PREC_CALL);
                self.args(args);
            }
            Expr::New { callee, args, .. } => {
                self.out.push_str("new ");
                self.expr(callee, PREC_CALL);
                self.args(args);
            }
            Expr::Member { object, property, .. } => {
                self.expr(object, PREC_CALL);
                match property.as_ref() {
                    PropAccess::Static(name) => {
                        self.out.push('.');
                        self.out.push_str(name);
                    }
                    PropAccess::Computed(key) => {
                        self.out.push('[');
                        self.expr(key, PREC_ASSIGN);
                        self.out.push(']');
                    }
                }
            }
            Expr::Assign { op, target, value, .. } => {
                match target.as_ref() {
                    AssignTarget::Ident { name, .. } => self.out.push_str(name),
                    AssignTarget::Member { object, property, .. } => {
                        self.expr(object, PREC_CALL);
                        match property {
                            PropAccess::Static(name) => {
                                self.out.push('.');
                                self.out.push_str(name);
                            }
                            PropAccess::Computed(key) => {
                                self.out.push('[');
                                self.expr(key, PREC_ASSIGN);
                                self.out.push(']');
                            }
                        }
                    }
                }
                self.out.push(' ');
                self.out.push_str(op.as_str());
                self.out.push(' ');
                self.expr(value, PREC_ASSIGN);
            }
            Expr::Binary { op, left, right, .. } => {
                let level = prec(expr);
                self.expr(left, level);
                self.out.push(' ');
                self.out.push_str(op.as_str());
                self.out.push(' ');
                self.expr(right, level + 1);
            }
            Expr::Logical { op, left, right, .. } => {
                let level = prec(expr);
                self.expr(left, level);
                self.out.push(' ');
                self.out.push_str(op.as_str());
                self.out.push(' ');
                self.expr(right, level + 1);
            }
            Expr::Unary { op, arg, .. } => {
                self.out.push_str(op.as_str());
                if matches!(op, UnaryOp::TypeOf) {
                    self.out.push(' ');
                }
                self.expr(arg, PREC_UNARY);
            }
            Expr::Update { op, prefix, name, .. } => {
                if *prefix {
                    self.out.push_str(op.as_str());
                    self.out.push_str(name);
                } else {
                    self.out.push_str(name);
                    self.out.push_str(op.as_str());
                }
            }
            Expr::Conditional { test, consequent, alternate, .. } => {
                self.expr(test, PREC_OR);
                self.out.push_str(" ? ");
                self.expr(consequent, PREC_ASSIGN);
                self.out.push_str(" : ");
                self.expr(alternate, PREC_ASSIGN);
            }
            Expr::Await { arg, .. } => {
                self.out.push_str("await ");
                self.expr(arg, PREC_UNARY);
            }
            Expr::Runtime(call) => self.runtime_call(call),
        }
    }

    fn args(&mut self, args: &[Expr]) {
        self.out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg, PREC_ASSIGN);
        }
        self.out.push(')');
    }

    fn monitor_call(&mut self, method: &str, args: &[&Expr]) {
        self.out.push_str(self.monitor);
        self.out.push('.');
        self.out.push_str(method);
        self.out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg, PREC_ASSIGN);
        }
        self.out.push(')');
    }

    fn runtime_call(&mut self, call: &RuntimeCall) {
        match call {
            RuntimeCall::CheckSync => self.monitor_call("checkSync", &[]),
            RuntimeCall::CheckAsync => {
                self.out.push_str("await ");
                self.monitor_call("checkAsync", &[]);
            }
            RuntimeCall::CreateObj(expr) => self.monitor_call("createObj", &[expr]),
            RuntimeCall::CreateArr(expr) => self.monitor_call("createArr", &[expr]),
            RuntimeCall::GetProp { object, prop } => self.monitor_call("getProp", &[object, prop]),
            RuntimeCall::SetProp { object, prop, value, op } => {
                let op_expr = Expr::Str { value: op.as_str().to_string(), pos: Pos::default() };
                self.out.push_str(self.monitor);
                self.out.push_str(".setProp(");
                self.expr(object, PREC_ASSIGN);
                self.out.push_str(", ");
                self.expr(prop, PREC_ASSIGN);
                self.out.push_str(", ");
                self.expr(value, PREC_ASSIGN);
                self.out.push_str(", ");
                self.expr(&op_expr, PREC_ASSIGN);
                self.out.push(')');
            }
            RuntimeCall::CallProp { object, prop, args } => {
                self.out.push_str(self.monitor);
                self.out.push_str(".callProp(");
                self.expr(object, PREC_ASSIGN);
                self.out.push_str(", ");
                self.expr(prop, PREC_ASSIGN);
                for arg in args {
                    self.out.push_str(", ");
                    self.expr(arg, PREC_ASSIGN);
                }
                self.out.push(')');
            }
            RuntimeCall::ComputedProp(expr) => self.monitor_call("computedProp", &[expr]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::instrument;
    use crate::parser::parse;

    fn render(src: &str) -> String {
        let mut program = parse(src).unwrap();
        instrument(&mut program);
        generate(&program)
    }

    #[test]
    fn renders_monitor_init_first() {
        let code = render("async () => 1");
        assert!(code.starts_with("const _r0 = createRuntime();"));
    }

    #[test]
    fn renders_checks_and_accessors() {
        let code = render("async () => { while (true) { } const o = { a: 1 }; return o.a; }");
        assert!(code.contains("await _r0.checkAsync();"));
        assert!(code.contains("_r0.createObj({ a: 1 })"));
        assert!(code.contains("_r0.getProp(o, 'a')"));
    }

    #[test]
    fn renders_guarded_member_calls() {
        let code = render("async () => a.f(b.c)");
        assert!(code.contains("_r0.callProp(a, 'f', _r0.getProp(b, 'c'))"));
    }

    #[test]
    fn renders_set_prop_with_operator() {
        let code = render("async () => { a.b += 1; }");
        assert!(code.contains("_r0.setProp(a, 'b', 1, '+=')"));
    }

    #[test]
    fn parenthesizes_by_precedence() {
        let mut program = parse("async () => (1 + 2) * 3").unwrap();
        instrument(&mut program);
        let code = generate(&program);
        assert!(code.contains("(1 + 2) * 3"));
    }

    #[test]
    fn rendered_output_reparses() {
        let code = render("async (a) => { for (let i = 0; i < 3; i++) { a.push(i); } }");
        parse(&code).unwrap();
    }
}
