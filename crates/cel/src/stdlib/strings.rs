//! String, bytes, and size-related builtins.

use regex::Regex;

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::types::CelType;
use crate::value::Value;

use super::native;

pub fn register(env: &mut Env) {
    env.declare_function("size", Overload::global("size", vec![CelType::Dyn], CelType::Int), Some(native(size)));
    env.declare_function("size", Overload::instance("size", vec![CelType::Dyn], CelType::Int), None);
    env.declare_function(
        "contains",
        Overload::instance("contains", vec![CelType::String, CelType::String], CelType::Bool),
        Some(native(contains)),
    );
    env.declare_function(
        "startsWith",
        Overload::instance("startsWith", vec![CelType::String, CelType::String], CelType::Bool),
        Some(native(starts_with)),
    );
    env.declare_function(
        "endsWith",
        Overload::instance("endsWith", vec![CelType::String, CelType::String], CelType::Bool),
        Some(native(ends_with)),
    );
    env.declare_function(
        "matches",
        Overload::instance("matches", vec![CelType::String, CelType::String], CelType::Bool),
        Some(native(matches)),
    );
}

fn type_error(function: &str, value: &Value) -> EvalError {
    EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'{function}' not defined for '{}'", value.type_of()))
}

fn size(args: &[Value]) -> Result<Value, EvalError> {
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.len(),
        Value::Map(m) => m.len(),
        other => return Err(type_error("size", other)),
    };
    Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

fn as_strings<'a>(function: &str, args: &'a [Value]) -> Result<(&'a str, &'a str), EvalError> {
    match (&args[0], &args[1]) {
        (Value::String(a), Value::String(b)) => Ok((a, b)),
        (other, _) => Err(type_error(function, other)),
    }
}

fn contains(args: &[Value]) -> Result<Value, EvalError> {
    let (haystack, needle) = as_strings("contains", args)?;
    Ok(Value::Bool(haystack.contains(needle)))
}

fn starts_with(args: &[Value]) -> Result<Value, EvalError> {
    let (s, prefix) = as_strings("startsWith", args)?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

fn ends_with(args: &[Value]) -> Result<Value, EvalError> {
    let (s, suffix) = as_strings("endsWith", args)?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

fn matches(args: &[Value]) -> Result<Value, EvalError> {
    let (s, pattern) = as_strings("matches", args)?;
    let re = Regex::new(pattern).map_err(|e| EvalError::anonymous(EvalErrorKind::BadFormat, format!("invalid regular expression: {e}")))?;
    Ok(Value::Bool(re.is_match(s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_unicode_scalars_not_bytes() {
        assert_eq!(size(&[Value::String("héllo".into())]).unwrap(), Value::Int(5));
    }

    #[test]
    fn matches_applies_regex() {
        assert_eq!(matches(&[Value::String("abc123".into()), Value::String(r"\d+".into())]).unwrap(), Value::Bool(true));
    }
}
