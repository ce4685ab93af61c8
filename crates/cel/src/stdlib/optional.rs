//! The `optional<T>` helper functions: construction and unwrapping.

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::types::CelType;
use crate::value::Value;

use super::native;

pub fn register(env: &mut Env) {
    env.declare_function(
        "hasValue",
        Overload::instance("hasValue", vec![CelType::Optional(Box::new(CelType::Dyn))], CelType::Bool),
        Some(native(has_value)),
    );
    env.declare_function(
        "value",
        Overload::instance("value", vec![CelType::Optional(Box::new(CelType::Dyn))], CelType::Dyn),
        Some(native(unwrap_value)),
    );
    env.declare_function(
        "orValue",
        Overload::instance("orValue", vec![CelType::Optional(Box::new(CelType::Dyn)), CelType::Dyn], CelType::Dyn),
        Some(native(or_value)),
    );
    env.declare_function(
        "_?._",
        Overload::global("_?._", vec![CelType::Dyn, CelType::String], CelType::Optional(Box::new(CelType::Dyn))),
        Some(native(optional_select)),
    );
}

/// `a.?b`: an optional-chaining field select that turns a missing field or
/// non-message/map operand into `optional.none()` instead of an error.
fn optional_select(args: &[Value]) -> Result<Value, EvalError> {
    let Value::String(field) = &args[1] else {
        return Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "'_?._' requires a string field name"));
    };
    match &args[0] {
        Value::Message(msg) => Ok(msg.fields.get(field.as_ref()).map_or_else(Value::optional_none, |v| Value::optional_some(v.clone()))),
        Value::Map(m) => Ok(m
            .get(&crate::value::MapKey::String(field.clone()))
            .map_or_else(Value::optional_none, |v| Value::optional_some(v.clone()))),
        _ => Ok(Value::optional_none()),
    }
}

fn has_value(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Optional(v) => Ok(Value::Bool(v.is_some())),
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'hasValue' not defined for '{}'", other.type_of()))),
    }
}

fn unwrap_value(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Optional(Some(v)) => Ok((**v).clone()),
        Value::Optional(None) => Err(EvalError::anonymous(EvalErrorKind::NoSuchField, "optional.none() has no value")),
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'value' not defined for '{}'", other.type_of()))),
    }
}

fn or_value(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Optional(Some(v)) => Ok((**v).clone()),
        Value::Optional(None) => Ok(args[1].clone()),
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'orValue' not defined for '{}'", other.type_of()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_value_falls_back_on_none() {
        assert_eq!(or_value(&[Value::optional_none(), Value::Int(5)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn unwrap_value_errors_on_none() {
        assert!(unwrap_value(&[Value::optional_none()]).is_err());
    }
}
