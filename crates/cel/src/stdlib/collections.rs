//! List/map indexing and the macro-expansion helper `__append__`.

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::parser::ops;
use crate::types::CelType;
use crate::value::{MapKey, Value};

use super::native;

pub fn register(env: &mut Env) {
    let dyn2 = |result| Overload::global("", vec![CelType::Dyn, CelType::Dyn], result);
    env.declare_function(ops::INDEX, Overload { id: ops::INDEX.into(), ..dyn2(CelType::Dyn) }, Some(native(index)));
    env.declare_function(ops::OPT_INDEX, Overload { id: ops::OPT_INDEX.into(), ..dyn2(CelType::Optional(Box::new(CelType::Dyn))) }, Some(native(opt_index)));
    env.declare_function(
        "__append__",
        Overload::global("__append__", vec![CelType::Dyn, CelType::Dyn], CelType::Dyn),
        Some(native(append)),
    );
}

fn index(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::List(items) => {
            let Value::Int(i) = &args[1] else {
                return Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "list index must be an int"));
            };
            usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned().ok_or_else(|| {
                EvalError::anonymous(EvalErrorKind::IndexOutOfBounds, format!("index {i} out of bounds for list of length {}", items.len()))
            })
        }
        Value::Map(m) => {
            let key = MapKey::from_value(&args[1])
                .ok_or_else(|| EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "map key must be bool, int, uint, or string"))?;
            m.get(&key).cloned().ok_or_else(|| EvalError::anonymous(EvalErrorKind::NoSuchKey, format!("no such key: {}", args[1])))
        }
        other => Err(EvalError::anonymous(EvalErrorKind::NoSuchField, format!("'{}' does not support indexing", other.type_of()))),
    }
}

fn opt_index(args: &[Value]) -> Result<Value, EvalError> {
    match index(args) {
        Ok(v) => Ok(Value::optional_some(v)),
        Err(e) if matches!(e.kind, EvalErrorKind::IndexOutOfBounds | EvalErrorKind::NoSuchKey) => Ok(Value::optional_none()),
        Err(e) => Err(e),
    }
}

fn append(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::List(items) => {
            let mut out = (**items).clone();
            out.push(args[1].clone());
            Ok(Value::list(out))
        }
        other => Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'__append__' not defined for '{}'", other.type_of()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_index_out_of_bounds_is_an_error() {
        let list = Value::list(vec![Value::Int(1)]);
        let err = index(&[list, Value::Int(5)]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::IndexOutOfBounds);
    }

    #[test]
    fn optional_index_turns_missing_key_into_none() {
        let list = Value::list(vec![Value::Int(1)]);
        assert_eq!(opt_index(&[list, Value::Int(5)]).unwrap(), Value::optional_none());
    }

    #[test]
    fn append_grows_a_new_list_without_mutating_the_original() {
        let original = Value::list(vec![Value::Int(1)]);
        let grown = append(&[original.clone(), Value::Int(2)]).unwrap();
        assert_eq!(grown, Value::list(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(original, Value::list(vec![Value::Int(1)]));
    }
}
