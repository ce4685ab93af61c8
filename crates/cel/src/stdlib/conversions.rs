//! Explicit type-conversion builtins (`int()`, `string()`, `type()`, …).

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::types::CelType;
use crate::value::Value;

use super::native;

pub fn register(env: &mut Env) {
    env.declare_function("int", Overload::global("int", vec![CelType::Dyn], CelType::Int), Some(native(to_int)));
    env.declare_function("uint", Overload::global("uint", vec![CelType::Dyn], CelType::UInt), Some(native(to_uint)));
    env.declare_function("double", Overload::global("double", vec![CelType::Dyn], CelType::Double), Some(native(to_double)));
    env.declare_function("string", Overload::global("string", vec![CelType::Dyn], CelType::String), Some(native(to_string_value)));
    env.declare_function("bytes", Overload::global("bytes", vec![CelType::Dyn], CelType::Bytes), Some(native(to_bytes)));
    env.declare_function("bool", Overload::global("bool", vec![CelType::Dyn], CelType::Bool), Some(native(to_bool)));
    env.declare_function("type", Overload::global("type", vec![CelType::Dyn], CelType::TypeOf(Box::new(CelType::Dyn))), Some(native(type_of)));
}

fn bad_format(function: &str, value: &Value) -> EvalError {
    EvalError::anonymous(EvalErrorKind::BadFormat, format!("cannot convert '{}' to {function}()", value.type_of()))
}

fn to_int(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::UInt(u) => i64::try_from(*u).map(Value::Int).map_err(|_| EvalError::anonymous(EvalErrorKind::Overflow, "uint value out of int range")),
        // `i64::MAX as f64` rounds up to 2^63 (f64 can't represent `i64::MAX`
        // exactly), so an inclusive upper bound would accept a double that
        // truncates out of range; the strict `<` rejects exactly that value.
        Value::Double(d) if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 => Ok(Value::Int(*d as i64)),
        Value::Double(_) => Err(EvalError::anonymous(EvalErrorKind::Overflow, "double value out of int range")),
        Value::String(s) => s.parse::<i64>().map(Value::Int).map_err(|_| bad_format("int", &args[0])),
        other => Err(bad_format("int", other)),
    }
}

fn to_uint(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::UInt(u) => Ok(Value::UInt(*u)),
        Value::Int(i) => u64::try_from(*i).map(Value::UInt).map_err(|_| EvalError::anonymous(EvalErrorKind::Overflow, "int value out of uint range")),
        // Same rounding hazard as `to_int`: `u64::MAX as f64` rounds up to 2^64.
        Value::Double(d) if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 => Ok(Value::UInt(*d as u64)),
        Value::Double(_) => Err(EvalError::anonymous(EvalErrorKind::Overflow, "double value out of uint range")),
        Value::String(s) => s.parse::<u64>().map(Value::UInt).map_err(|_| bad_format("uint", &args[0])),
        other => Err(bad_format("uint", other)),
    }
}

fn to_double(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Double(d) => Ok(Value::Double(*d)),
        Value::Int(i) => Ok(Value::Double(*i as f64)),
        Value::UInt(u) => Ok(Value::Double(*u as f64)),
        Value::String(s) => s.parse::<f64>().map(Value::Double).map_err(|_| bad_format("double", &args[0])),
        other => Err(bad_format("double", other)),
    }
}

fn to_string_value(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Int(i) => Ok(Value::String(i.to_string().into())),
        Value::UInt(u) => Ok(Value::String(u.to_string().into())),
        Value::Double(d) => Ok(Value::String(d.to_string().into())),
        Value::Bool(b) => Ok(Value::String(b.to_string().into())),
        Value::Bytes(b) => String::from_utf8(b.to_vec()).map(|s| Value::String(s.into())).map_err(|_| bad_format("string", &args[0])),
        other => Err(bad_format("string", other)),
    }
}

fn to_bytes(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
        Value::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec().into())),
        other => Err(bad_format("bytes", other)),
    }
}

fn to_bool(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => match s.as_ref() {
            "true" | "True" | "TRUE" => Ok(Value::Bool(true)),
            "false" | "False" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(bad_format("bool", &args[0])),
        },
        other => Err(bad_format("bool", other)),
    }
}

fn type_of(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Type(args[0].type_of()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_string_to_int() {
        assert_eq!(to_int(&[Value::String("42".into())]).unwrap(), Value::Int(42));
    }

    #[test]
    fn rejects_malformed_numeric_string() {
        assert!(to_int(&[Value::String("nope".into())]).is_err());
    }

    #[test]
    fn type_of_reports_the_dynamic_type() {
        assert_eq!(type_of(&[Value::Int(1)]).unwrap(), Value::Type(CelType::Int));
    }

    #[test]
    fn rejects_double_that_rounds_up_to_int_max_plus_one() {
        assert!(to_int(&[Value::Double(i64::MAX as f64)]).is_err());
    }

    #[test]
    fn rejects_double_that_rounds_up_to_uint_max_plus_one() {
        assert!(to_uint(&[Value::Double(u64::MAX as f64)]).is_err());
    }
}
