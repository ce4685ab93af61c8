//! Equality, ordering, and membership operators.

use std::rc::Rc;

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::parser::ops;
use crate::types::CelType;
use crate::value::{partial_cmp_numeric, MapKey, Value};

use super::native;

pub fn register(env: &mut Env) {
    let dyn2 = || Overload::global("", vec![CelType::Dyn, CelType::Dyn], CelType::Bool);
    // Ordering natives are dispatched by function name (`Interpreter::eval_call`
    // looks them up in `env.natives`, not by re-resolving an overload), so
    // this entry exists to plug the native in. Its param types still feed
    // `resolve_overload` for concrete operand types, though, so it must not
    // use `Dyn` here: `Dyn` unifies with anything, which would let any two
    // mismatched concrete types type-check regardless of
    // `enable_heterogeneous_numeric_comparisons` — the hardcoded numeric
    // pairs in `checker::builtin_overloads` are what actually gate that.
    // A same-type-parameter pair still lets genuinely `dyn`-typed operands
    // through (`Dyn` binds to anything in `Substitution::bind`).
    let same_type_pair = || Overload::global("", vec![CelType::Param(Rc::from("A")), CelType::Param(Rc::from("A"))], CelType::Bool);
    env.declare_function(ops::LT, Overload { id: ops::LT.into(), ..same_type_pair() }, Some(native(lt)));
    env.declare_function(ops::LE, Overload { id: ops::LE.into(), ..same_type_pair() }, Some(native(le)));
    env.declare_function(ops::GT, Overload { id: ops::GT.into(), ..same_type_pair() }, Some(native(gt)));
    env.declare_function(ops::GE, Overload { id: ops::GE.into(), ..same_type_pair() }, Some(native(ge)));
    env.declare_function(ops::EQ, Overload { id: ops::EQ.into(), ..dyn2() }, Some(native(|a| Ok(Value::Bool(a[0] == a[1])))));
    env.declare_function(ops::NE, Overload { id: ops::NE.into(), ..dyn2() }, Some(native(|a| Ok(Value::Bool(a[0] != a[1])))));
    env.declare_function(ops::NOT, Overload::global(ops::NOT, vec![CelType::Bool], CelType::Bool), Some(native(not)));
    env.declare_function(ops::IN, Overload { id: ops::IN.into(), ..dyn2() }, Some(native(contains)));
    env.declare_function(
        "@not_strictly_false",
        Overload::global("@not_strictly_false", vec![CelType::Bool], CelType::Bool),
        Some(native(not_strictly_false)),
    );
}

fn ordering_error(name: &str, a: &Value, b: &Value) -> EvalError {
    EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'{name}' not defined between '{}' and '{}'", a.type_of(), b.type_of()))
}

fn lt(args: &[Value]) -> Result<Value, EvalError> {
    partial_cmp_numeric(&args[0], &args[1]).map(|o| Value::Bool(o.is_lt())).ok_or_else(|| ordering_error(ops::LT, &args[0], &args[1]))
}

fn le(args: &[Value]) -> Result<Value, EvalError> {
    partial_cmp_numeric(&args[0], &args[1]).map(|o| Value::Bool(o.is_le())).ok_or_else(|| ordering_error(ops::LE, &args[0], &args[1]))
}

fn gt(args: &[Value]) -> Result<Value, EvalError> {
    partial_cmp_numeric(&args[0], &args[1]).map(|o| Value::Bool(o.is_gt())).ok_or_else(|| ordering_error(ops::GT, &args[0], &args[1]))
}

fn ge(args: &[Value]) -> Result<Value, EvalError> {
    partial_cmp_numeric(&args[0], &args[1]).map(|o| Value::Bool(o.is_ge())).ok_or_else(|| ordering_error(ops::GE, &args[0], &args[1]))
}

fn not(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'!_' not defined for '{}'", other.type_of()))),
    }
}

fn contains(args: &[Value]) -> Result<Value, EvalError> {
    match &args[1] {
        Value::List(items) => Ok(Value::Bool(items.iter().any(|v| v == &args[0]))),
        Value::Map(m) => match MapKey::from_value(&args[0]) {
            Some(key) => Ok(Value::Bool(m.contains_key(&key))),
            None => Ok(Value::Bool(false)),
        },
        Value::String(haystack) => match &args[0] {
            Value::String(needle) => Ok(Value::Bool(haystack.contains(needle.as_ref()))),
            _ => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "'in' requires a string needle for a string haystack")),
        },
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'in' not defined for '{}'", other.type_of()))),
    }
}

/// `@not_strictly_false(x)`: true unless `x` is the literal boolean `false`,
/// matching `all()`'s loop-condition semantics (an error/unknown keeps the
/// accumulator running rather than short-circuiting).
fn not_strictly_false(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(!matches!(&args[0], Value::Bool(false))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heterogeneous_ordering() {
        assert_eq!(lt(&[Value::Int(1), Value::Double(1.5)]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn list_membership() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(contains(&[Value::Int(2), list]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn not_strictly_false_treats_true_and_error_shaped_input_as_continue() {
        assert_eq!(not_strictly_false(&[Value::Bool(true)]).unwrap(), Value::Bool(true));
        assert_eq!(not_strictly_false(&[Value::Bool(false)]).unwrap(), Value::Bool(false));
    }
}
