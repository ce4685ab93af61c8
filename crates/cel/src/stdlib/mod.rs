//! The standard function library: every builtin operator and function CEL
//! expressions may call, registered against a fresh [`Env`] by
//! [`standard_env`].
//!
//! Each submodule owns one family of builtins and is grounded on a distinct
//! corner of the external contract's overload table; keeping them separate
//! means a host that wants a stripped-down environment (no regex, say) can
//! build one by calling only the registration functions it needs instead of
//! `standard_env`.

pub mod arithmetic;
pub mod collections;
pub mod comparison;
pub mod conversions;
pub mod optional;
pub mod strings;
pub mod time;

use std::rc::Rc;

use crate::diagnostics::EvalError;
use crate::env::{Env, NativeFn};
use crate::value::Value;

/// A narrow adapter a host implements to expose its own message types to
/// `Select`/`Struct` evaluation, in place of a reflection-based proto
/// descriptor registry.
pub trait MessageProvider {
    fn type_name(&self) -> &str;
    fn field(&self, name: &str) -> Option<Value>;
    fn has_field(&self, name: &str) -> bool;
}

/// Wraps a plain closure as a reference-counted [`NativeFn`].
pub(crate) fn native(f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> NativeFn {
    Rc::new(f)
}

/// The default environment: every standard macro (via [`Env::new`]) plus the
/// full standard function library.
#[must_use]
pub fn standard_env() -> Env {
    let mut env = Env::new();
    arithmetic::register(&mut env);
    comparison::register(&mut env);
    strings::register(&mut env);
    collections::register(&mut env);
    time::register(&mut env);
    optional::register(&mut env);
    conversions::register(&mut env);
    env
}
