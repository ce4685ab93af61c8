//! Property test covering arithmetic totality (P6): for any pair of `i64`s
//! and any of the four arithmetic operators, evaluation never panics and
//! always resolves to either a concrete value or a typed `Overflow` /
//! `DivideByZero` error.

use proptest::prelude::*;

use cel::diagnostics::EvalErrorKind;
use cel::{compile, eval, plan, CelType, MapActivation, Source, Value};

fn eval_binary_op(op: &str, a: i64, b: i64) -> Result<Value, cel::EvalError> {
    let mut env = cel::stdlib::standard_env();
    env.declare_variable("a", CelType::Int);
    env.declare_variable("b", CelType::Int);
    let source = Source::new(format!("a {op} b"), "<proptest>");
    let checked = compile(&source, &env).unwrap_or_else(|issues| panic!("compile failed: {issues:?}"));
    let program = plan(&checked);
    let activation = MapActivation::new().with("a", Value::Int(a)).with("b", Value::Int(b));
    eval(&program, &env, &activation)
}

proptest! {
    #[test]
    fn addition_is_total(a: i64, b: i64) {
        match eval_binary_op("+", a, b) {
            Ok(Value::Int(sum)) => prop_assert_eq!(i128::from(sum), i128::from(a) + i128::from(b)),
            Ok(other) => prop_assert!(false, "expected an int, got {other:?}"),
            Err(err) => prop_assert_eq!(err.kind, EvalErrorKind::Overflow),
        }
    }

    #[test]
    fn subtraction_is_total(a: i64, b: i64) {
        match eval_binary_op("-", a, b) {
            Ok(Value::Int(diff)) => prop_assert_eq!(i128::from(diff), i128::from(a) - i128::from(b)),
            Ok(other) => prop_assert!(false, "expected an int, got {other:?}"),
            Err(err) => prop_assert_eq!(err.kind, EvalErrorKind::Overflow),
        }
    }

    #[test]
    fn multiplication_is_total(a: i64, b: i64) {
        match eval_binary_op("*", a, b) {
            Ok(Value::Int(product)) => prop_assert_eq!(i128::from(product), i128::from(a) * i128::from(b)),
            Ok(other) => prop_assert!(false, "expected an int, got {other:?}"),
            Err(err) => prop_assert_eq!(err.kind, EvalErrorKind::Overflow),
        }
    }

    #[test]
    fn division_is_total(a: i64, b: i64) {
        match eval_binary_op("/", a, b) {
            Ok(Value::Int(_)) => {}
            Ok(other) => prop_assert!(false, "expected an int, got {other:?}"),
            Err(err) => prop_assert!(matches!(err.kind, EvalErrorKind::Overflow | EvalErrorKind::DivideByZero)),
        }
    }

    #[test]
    fn modulo_is_total(a: i64, b: i64) {
        match eval_binary_op("%", a, b) {
            Ok(Value::Int(_)) => {}
            Ok(other) => prop_assert!(false, "expected an int, got {other:?}"),
            Err(err) => prop_assert!(matches!(err.kind, EvalErrorKind::Overflow | EvalErrorKind::DivideByZero)),
        }
    }
}
