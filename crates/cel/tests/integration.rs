//! Crate-level pipeline tests: compile → check → validate → plan → eval,
//! exercised end to end across the standard library and macro family rather
//! than unit-by-unit.

use pretty_assertions::assert_eq;

use cel::{compile, eval, plan, run_validators, CelType, MapActivation, Source, Value};

fn run(src: &str) -> Value {
    let env = cel::stdlib::standard_env();
    let source = Source::new(src, "<test>");
    let checked = compile(&source, &env).unwrap_or_else(|issues| panic!("compile failed for {src:?}: {issues:?}"));
    assert!(run_validators(&checked, &env).is_empty(), "validators flagged {src:?}");
    let program = plan(&checked);
    eval(&program, &env, &MapActivation::new()).unwrap_or_else(|err| panic!("eval failed for {src:?}: {err:?}"))
}

fn run_with(src: &str, declare: impl FnOnce(&mut cel::Env), bind: MapActivation) -> Value {
    let mut env = cel::stdlib::standard_env();
    declare(&mut env);
    let source = Source::new(src, "<test>");
    let checked = compile(&source, &env).unwrap_or_else(|issues| panic!("compile failed for {src:?}: {issues:?}"));
    let program = plan(&checked);
    eval(&program, &env, &bind).unwrap_or_else(|err| panic!("eval failed for {src:?}: {err:?}"))
}

#[test]
fn filter_macro_keeps_matching_elements() {
    assert_eq!(run("[1, 2, 3, 4].filter(x, x % 2 == 0)"), Value::list(vec![Value::Int(2), Value::Int(4)]));
}

#[test]
fn map_macro_projects_elements() {
    assert_eq!(run("[1, 2, 3].map(x, x * 10)"), Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]));
}

#[test]
fn two_arg_map_filters_then_projects() {
    assert_eq!(run("[1, 2, 3, 4].map(x, x % 2 == 0, x * 10)"), Value::list(vec![Value::Int(20), Value::Int(40)]));
}

#[test]
fn all_macro_requires_every_element_to_match() {
    assert_eq!(run("[2, 4, 6].all(x, x % 2 == 0)"), Value::Bool(true));
    assert_eq!(run("[2, 4, 5].all(x, x % 2 == 0)"), Value::Bool(false));
}

#[test]
fn exists_macro_short_circuits_on_first_match() {
    assert_eq!(run("[1, 3, 4, 5].exists(x, x % 2 == 0)"), Value::Bool(true));
    assert_eq!(run("[1, 3, 5].exists(x, x % 2 == 0)"), Value::Bool(false));
}

#[test]
fn exists_one_counts_exact_matches() {
    assert_eq!(run("[1, 2, 3].exists_one(x, x == 2)"), Value::Bool(true));
    assert_eq!(run("[1, 2, 2].existsOne(x, x == 2)"), Value::Bool(false));
}

#[test]
fn all_macro_iterates_map_keys() {
    assert_eq!(run("{'a': 1, 'b': 2}.all(k, k in ['a', 'b', 'c'])"), Value::Bool(true));
}

#[test]
fn has_macro_tests_field_presence_on_a_map() {
    assert_eq!(run("has({'a': 1}.a)"), Value::Bool(true));
    assert_eq!(run("has({'a': 1}.b)"), Value::Bool(false));
}

#[test]
fn optional_chaining_falls_back_when_field_is_missing() {
    assert_eq!(run("{'a': 1}.?a.orValue(0)"), Value::Int(1));
    assert_eq!(run("{'a': 1}.?b.orValue(0)"), Value::Int(0));
}

#[test]
fn string_builtins_cover_contains_and_case_affixes() {
    assert_eq!(run("'hello world'.contains('wor')"), Value::Bool(true));
    assert_eq!(run("'hello world'.startsWith('hello')"), Value::Bool(true));
    assert_eq!(run("'hello world'.endsWith('world')"), Value::Bool(true));
    assert_eq!(run("'hello'.size()"), Value::Int(5));
}

#[test]
fn ternary_only_evaluates_the_taken_branch() {
    assert_eq!(run("true ? 1 : 1 / 0"), Value::Int(1));
    assert_eq!(run("false ? 1 / 0 : 2"), Value::Int(2));
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(run("false && (1 / 0 == 0)"), Value::Bool(false));
    assert_eq!(run("true || (1 / 0 == 0)"), Value::Bool(true));
}

#[test]
fn timestamp_and_duration_arithmetic_round_trips() {
    assert_eq!(run("timestamp('2024-01-01T00:00:00Z') + duration('24h') == timestamp('2024-01-02T00:00:00Z')"), Value::Bool(true));
}

#[test]
fn conversions_parse_and_reject_malformed_input() {
    assert_eq!(run("int('42')"), Value::Int(42));
    assert_eq!(run("string(42)"), Value::String("42".into()));
}

#[test]
fn integer_division_by_zero_is_a_typed_error_not_a_panic() {
    let env = cel::stdlib::standard_env();
    let source = Source::new("1 / 0", "<test>");
    let checked = compile(&source, &env).unwrap();
    let program = plan(&checked);
    let err = eval(&program, &env, &MapActivation::new()).unwrap_err();
    assert_eq!(err.kind, cel::diagnostics::EvalErrorKind::DivideByZero);
}

#[test]
fn compile_errors_report_source_location() {
    let env = cel::stdlib::standard_env();
    let source = Source::new("x + y", "bad.cel");
    let issues = compile(&source, &env).unwrap_err();
    assert_eq!(issues.len(), 2);
    for issue in &issues {
        assert!(issue.render(&source).starts_with("ERROR: bad.cel:"));
    }
}

#[test]
fn declared_variables_are_visible_to_the_expression() {
    let value = run_with(
        "name == 'alice' && age >= 18",
        |env| {
            env.declare_variable("name", CelType::String);
            env.declare_variable("age", CelType::Int);
        },
        MapActivation::new().with("name", Value::String("alice".into())).with("age", Value::Int(21)),
    );
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn comprehension_iteration_budget_is_enforced() {
    let mut env = cel::stdlib::standard_env();
    env.options.eval.comprehension_max_iterations = Some(2);
    let source = Source::new("[1, 2, 3].all(x, x > 0)", "<test>");
    let checked = compile(&source, &env).unwrap();
    let program = plan(&checked);
    let err = eval(&program, &env, &MapActivation::new()).unwrap_err();
    assert_eq!(err.kind, cel::diagnostics::EvalErrorKind::IterationBudgetExceeded);
}

#[test]
fn unparse_preserves_macro_shorthand_and_operator_precedence() {
    let env = cel::stdlib::standard_env();
    let source = Source::new("(1 + 2) * 3 == 9 && [1, 2].exists(x, x == 2)", "<test>");
    let checked = compile(&source, &env).unwrap();
    assert_eq!(cel::unparse(&checked.ast), "(1 + 2) * 3 == 9 && [1, 2].exists(x, x == 2)");
}
