//! A Common Expression Language compiler and evaluator: parse, expand
//! macros, type-check, validate, plan, and evaluate CEL expressions against
//! a host-supplied environment.
//!
//! The pipeline mirrors the external contract exactly:
//! [`compile`] → [`run_validators`] → [`plan`] → [`eval`], with [`unparse`]
//! available at any point after parsing for round-tripping an AST back to
//! source.

pub mod ast;
pub mod checker;
pub mod diagnostics;
pub mod env;
pub mod interp;
pub mod lexer;
pub mod macros;
pub mod navigable;
pub mod parser;
pub mod plan;
pub mod serialize;
pub mod source;
pub mod stdlib;
pub mod tracer;
pub mod types;
pub mod unparser;
pub mod value;
pub mod validators;

pub use ast::{Ast, ExprId};
pub use checker::CheckedAst;
pub use diagnostics::{CelIssue, EvalError};
pub use env::{CelOptions, Env};
pub use interp::{Activation, Interpreter, MapActivation};
pub use plan::Program;
pub use source::Source;
pub use types::CelType;
pub use value::Value;

/// The full front end in one call: parse, expand macros, type-check.
/// Returns every diagnostic accumulated along the way on failure, matching
/// the external contract's "report everything, don't stop at the first
/// error" behavior.
pub fn compile(source: &Source, env: &Env) -> Result<CheckedAst, Vec<CelIssue>> {
    let parsed = parser::parse(source, &env.options.parser)?;
    let expanded = macros::expand_macros(parsed, env)?;
    checker::check(expanded, env)
}

/// Runs the standard structural validators (property V1) over a checked
/// AST, using the `validator` limits carried in `env.options`.
#[must_use]
pub fn run_validators(checked: &CheckedAst, env: &Env) -> Vec<CelIssue> {
    let validator_list = validators::standard_validators(
        env.options.validator.max_ast_depth.unwrap_or(usize::MAX),
        env.options.validator.max_comprehension_nesting.unwrap_or(usize::MAX),
    );
    validators::run_validators(checked, &validator_list)
}

/// Lowers a checked AST into an evaluation plan (property P5).
#[must_use]
pub fn plan(checked: &CheckedAst) -> Program {
    plan::plan(checked)
}

/// Evaluates a planned program against an activation and environment.
pub fn eval(program: &Program, env: &Env, activation: &dyn Activation) -> Result<Value, EvalError> {
    Interpreter::new(env, &env.options.eval).eval(program, activation)
}

/// Renders a checked (or raw) AST back to CEL source text (property U1).
#[must_use]
pub fn unparse(ast: &Ast) -> String {
    unparser::unparse(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::standard_env;

    #[test]
    fn end_to_end_compile_plan_eval() {
        let env = standard_env();
        let source = Source::new("1 + 2 * 3 == 7", "<input>");
        let checked = compile(&source, &env).unwrap();
        assert!(run_validators(&checked, &env).is_empty());
        let program = plan(&checked);
        let result = eval(&program, &env, &MapActivation::new()).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn compile_reports_multiple_issues_at_once() {
        let env = standard_env();
        let source = Source::new("x + y", "<input>");
        let issues = compile(&source, &env).unwrap_err();
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn unparse_roundtrips_through_compile() {
        let env = standard_env();
        let source = Source::new("has(x.y) && x.y > 0", "<input>");
        let mut declared = env;
        declared.declare_variable("x", CelType::Dyn);
        let checked = compile(&source, &declared).unwrap();
        assert_eq!(unparse(&checked.ast), "has(x.y) && x.y > 0");
    }
}
