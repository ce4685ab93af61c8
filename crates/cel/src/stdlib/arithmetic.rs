//! Checked arithmetic: every operator is total (never panics) and reports
//! `DivideByZero`/`Overflow` as ordinary [`EvalError`]s instead (property
//! P6). Runtime type dispatch happens inside each native, since a native is
//! registered once per operator name regardless of how many typed overloads
//! the checker recognizes for it.

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::parser::ops;
use crate::types::CelType;
use crate::value::{Duration, Timestamp, Value};

use super::native;

pub fn register(env: &mut Env) {
    let dyn2 = || Overload::global("", vec![CelType::Dyn, CelType::Dyn], CelType::Dyn);
    env.declare_function(ops::ADD, Overload { id: ops::ADD.into(), ..dyn2() }, Some(native(add)));
    env.declare_function(ops::SUB, Overload { id: ops::SUB.into(), ..dyn2() }, Some(native(sub)));
    env.declare_function(ops::MUL, Overload { id: ops::MUL.into(), ..dyn2() }, Some(native(mul)));
    env.declare_function(ops::DIV, Overload { id: ops::DIV.into(), ..dyn2() }, Some(native(div)));
    env.declare_function(ops::MOD, Overload { id: ops::MOD.into(), ..dyn2() }, Some(native(rem)));
    env.declare_function(
        ops::NEG,
        Overload::global(ops::NEG, vec![CelType::Dyn], CelType::Dyn),
        Some(native(neg)),
    );
}

fn no_overload(name: &str, args: &[Value]) -> EvalError {
    let tys: Vec<String> = args.iter().map(|v| v.type_of().to_string()).collect();
    EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("no matching overload for '{name}'({})", tys.join(", ")))
}

fn overflow(name: &str) -> EvalError {
    EvalError::anonymous(EvalErrorKind::Overflow, format!("integer overflow in '{name}'"))
}

fn divide_by_zero(name: &str) -> EvalError {
    EvalError::anonymous(EvalErrorKind::DivideByZero, format!("division by zero in '{name}'"))
}

fn add(args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow(ops::ADD)),
        (Value::UInt(a), Value::UInt(b)) => a.checked_add(*b).map(Value::UInt).ok_or_else(|| overflow(ops::ADD)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}").into())),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes(a.iter().chain(b.iter()).copied().collect::<Vec<u8>>().into())),
        (Value::List(a), Value::List(b)) => Ok(Value::list(a.iter().chain(b.iter()).cloned().collect())),
        (Value::Timestamp(t), Value::Duration(d)) => add_duration_to_timestamp(*t, *d).map(Value::Timestamp),
        (Value::Duration(d), Value::Timestamp(t)) => add_duration_to_timestamp(*t, *d).map(Value::Timestamp),
        (Value::Duration(a), Value::Duration(b)) => a.nanos.checked_add(b.nanos).map(|nanos| Value::Duration(Duration { nanos })).ok_or_else(|| overflow(ops::ADD)),
        _ => Err(no_overload(ops::ADD, args)),
    }
}

fn add_duration_to_timestamp(t: Timestamp, d: Duration) -> Result<Timestamp, EvalError> {
    let total_nanos = i128::from(t.seconds) * 1_000_000_000 + i128::from(t.nanos) + d.nanos;
    let seconds = i64::try_from(total_nanos.div_euclid(1_000_000_000)).map_err(|_| overflow(ops::ADD))?;
    let nanos = i32::try_from(total_nanos.rem_euclid(1_000_000_000)).map_err(|_| overflow(ops::ADD))?;
    Ok(Timestamp { seconds, nanos })
}

fn sub(args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(|| overflow(ops::SUB)),
        (Value::UInt(a), Value::UInt(b)) => a.checked_sub(*b).map(Value::UInt).ok_or_else(|| overflow(ops::SUB)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a - b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => {
            let nanos = (i128::from(a.seconds) * 1_000_000_000 + i128::from(a.nanos)) - (i128::from(b.seconds) * 1_000_000_000 + i128::from(b.nanos));
            Ok(Value::Duration(Duration { nanos }))
        }
        (Value::Timestamp(t), Value::Duration(d)) => add_duration_to_timestamp(*t, Duration { nanos: -d.nanos }).map(Value::Timestamp),
        (Value::Duration(a), Value::Duration(b)) => a.nanos.checked_sub(b.nanos).map(|nanos| Value::Duration(Duration { nanos })).ok_or_else(|| overflow(ops::SUB)),
        _ => Err(no_overload(ops::SUB, args)),
    }
}

fn mul(args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(|| overflow(ops::MUL)),
        (Value::UInt(a), Value::UInt(b)) => a.checked_mul(*b).map(Value::UInt).ok_or_else(|| overflow(ops::MUL)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a * b)),
        _ => Err(no_overload(ops::MUL, args)),
    }
}

fn div(args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => Err(divide_by_zero(ops::DIV)),
        (Value::Int(a), Value::Int(b)) => a.checked_div(*b).map(Value::Int).ok_or_else(|| overflow(ops::DIV)),
        (Value::UInt(_), Value::UInt(0)) => Err(divide_by_zero(ops::DIV)),
        (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a / b)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        _ => Err(no_overload(ops::DIV, args)),
    }
}

fn rem(args: &[Value]) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => Err(divide_by_zero(ops::MOD)),
        (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(|| overflow(ops::MOD)),
        (Value::UInt(_), Value::UInt(0)) => Err(divide_by_zero(ops::MOD)),
        (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a % b)),
        _ => Err(no_overload(ops::MOD, args)),
    }
}

fn neg(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int(a) => a.checked_neg().map(Value::Int).ok_or_else(|| overflow(ops::NEG)),
        Value::Double(a) => Ok(Value::Double(-a)),
        _ => Err(no_overload(ops::NEG, args)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_add_overflow_is_an_error_not_a_panic() {
        let err = add(&[Value::Int(i64::MAX), Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Overflow);
    }

    #[test]
    fn int_division_by_zero_is_an_error() {
        let err = div(&[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DivideByZero);
    }

    #[test]
    fn double_division_by_zero_is_infinite_not_an_error() {
        let result = div(&[Value::Double(1.0), Value::Double(0.0)]).unwrap();
        assert!(matches!(result, Value::Double(d) if d.is_infinite()));
    }

    #[test]
    fn string_concatenation() {
        let result = add(&[Value::String("a".into()), Value::String("b".into())]).unwrap();
        assert_eq!(result, Value::String("ab".into()));
    }
}
