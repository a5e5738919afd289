//! Compilation pipeline
//!
//! parse, shape check, subset check, free-identifier check, instrumentation,
//! render. The result carries both the instrumented tree (what execution
//! walks) and its rendered text (what size estimates and diagnostics use).

use std::collections::HashSet;

use crate::ast::{ArrowFunction, Expr, Program, Stmt};
use crate::codegen::generate;
use crate::error::CompileError;
use crate::instrument::instrument;
use crate::parser::parse;
use crate::subset::{check_globals, check_subset};

/// A validated and instrumented query function
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// The source text as submitted
    pub source_text: String,
    /// Rendered instrumented source
    pub code: String,
    /// Instrumented program, entry arrow included
    pub program: Program,
    /// Global names the source was checked against, sorted
    pub declared_global_names: Vec<String>,
}

impl CompiledUnit {
    /// The instrumented entry arrow
    pub fn entry(&self) -> &ArrowFunction {
        for stmt in &self.program.body {
            if let Stmt::Expression { expr: Expr::Arrow(arrow), .. } = stmt {
                return arrow;
            }
        }
        unreachable!("compiled programs always contain the entry arrow")
    }
}

/// Compile a query function source against a set of known global names
pub fn compile(source: &str, globals: &HashSet<String>) -> Result<CompiledUnit, CompileError> {
    let mut program = parse(source)?;
    check_shape(&program)?;
    check_subset(&program)?;
    check_globals(&program, globals)?;
    instrument(&mut program);
    let code = generate(&program);
    let mut declared_global_names: Vec<String> = globals.iter().cloned().collect();
    declared_global_names.sort();
    Ok(CompiledUnit {
        source_text: source.to_string(),
        code,
        program,
        declared_global_names,
    })
}

// A program is exactly one expression statement holding an async arrow.
fn check_shape(program: &Program) -> Result<(), CompileError> {
    let arrow = match program.body.as_slice() {
        [Stmt::Expression { expr: Expr::Arrow(arrow), .. }] => Some(arrow),
        _ => None,
    };
    match arrow {
        Some(arrow) if arrow.is_async => Ok(()),
        _ => {
            let pos = program.body.first().map(|s| s.pos()).unwrap_or_default();
            Err(CompileError::new(
                "Expected AsyncArrowFunctionExpression",
                pos.line,
                pos.column,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn compiles_a_minimal_query() {
        let unit = compile("async () => 1 + 1", &globals(&[])).unwrap();
        assert!(unit.code.contains("createRuntime()"));
        assert!(unit.entry().is_async);
    }

    #[test]
    fn rejects_non_arrow_programs() {
        let err = compile("const x = 1", &globals(&[])).unwrap_err();
        assert_eq!(err.message, "Expected AsyncArrowFunctionExpression");
    }

    #[test]
    fn rejects_sync_arrows() {
        let err = compile("() => 1", &globals(&[])).unwrap_err();
        assert_eq!(err.message, "Expected AsyncArrowFunctionExpression");
    }

    #[test]
    fn rejects_multiple_statements() {
        let err = compile("async () => 1; 2", &globals(&[])).unwrap_err();
        assert_eq!(err.message, "Expected AsyncArrowFunctionExpression");
    }

    #[test]
    fn rejects_disallowed_syntax() {
        let err = compile("async () => { const f = function () {}; }", &globals(&[])).unwrap_err();
        assert_eq!(err.message, "`FunctionExpression` not allowed");
    }

    #[test]
    fn rejects_unknown_globals() {
        let err = compile("async () => missing", &globals(&["present"])).unwrap_err();
        assert_eq!(err.message, "Unknown `missing`");
    }

    #[test]
    fn accepts_known_globals() {
        compile("async () => present(1)", &globals(&["present"])).unwrap();
    }
}
