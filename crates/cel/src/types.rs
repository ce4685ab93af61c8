//! The CEL type system: a tagged set of types plus assignability,
//! unification, and substitution over type parameters.

use std::collections::HashMap;
use std::rc::Rc;

/// A type-parameter identifier (`A`, `B`, …), introduced by a generic
/// overload and resolved per call site during checking.
pub type TypeParamId = Rc<str>;

/// The tagged CEL type variant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CelType {
    // primitives
    Null,
    Bool,
    Int,
    UInt,
    Double,
    String,
    Bytes,
    Timestamp,
    Duration,
    // abstract
    Dyn,
    Error,
    /// `type(T)` — the type of a type expression, e.g. the result of `type(x)`.
    TypeOf(Box<CelType>),
    // parameterized
    List(Box<CelType>),
    Map(Box<CelType>, Box<CelType>),
    Optional(Box<CelType>),
    // type parameter, unifies by first use within one overload resolution
    Param(TypeParamId),
    // nominal message type, named by fully qualified name
    Message(Rc<str>),
}

impl std::fmt::Display for CelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// A set of bindings from type parameter to concrete type, built
/// incrementally during overload unification.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: HashMap<TypeParamId, CelType>,
}

impl Substitution {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, param: &str) -> Option<&CelType> {
        self.bindings.get(param)
    }

    fn bind(&mut self, param: TypeParamId, ty: CelType) -> bool {
        match self.bindings.get(&param) {
            Some(existing) => existing == &ty || matches!(existing, CelType::Dyn) || matches!(ty, CelType::Dyn),
            None => {
                self.bindings.insert(param, ty);
                true
            }
        }
    }

    fn merge(&mut self, other: Substitution) -> bool {
        for (k, v) in other.bindings {
            if !self.bind(k, v) {
                return false;
            }
        }
        true
    }
}

impl CelType {
    /// Deterministic textual form used in diagnostics, matching the
    /// conventional CEL type names (`list<int>`, `map<string, dyn>`, …).
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::Null => "null_type".to_owned(),
            Self::Bool => "bool".to_owned(),
            Self::Int => "int".to_owned(),
            Self::UInt => "uint".to_owned(),
            Self::Double => "double".to_owned(),
            Self::String => "string".to_owned(),
            Self::Bytes => "bytes".to_owned(),
            Self::Timestamp => "timestamp".to_owned(),
            Self::Duration => "duration".to_owned(),
            Self::Dyn => "dyn".to_owned(),
            Self::Error => "error".to_owned(),
            Self::TypeOf(inner) => format!("type({})", inner.format()),
            Self::List(elem) => format!("list<{}>", elem.format()),
            Self::Map(k, v) => format!("map<{}, {}>", k.format(), v.format()),
            Self::Optional(inner) => format!("optional<{}>", inner.format()),
            Self::Param(name) => name.to_string(),
            Self::Message(name) => name.to_string(),
        }
    }

    /// Whether a value of type `other` may be used where `self` is expected.
    ///
    /// `dyn` is assignable both ways, `error` absorbs into any expectation,
    /// and parameterized types unify by structural decomposition. `optional<T>`
    /// is invariant in `T`.
    #[must_use]
    pub fn assignable_from(&self, other: &CelType) -> bool {
        match (self, other) {
            (Self::Dyn, _) | (_, Self::Dyn) | (Self::Error, _) | (_, Self::Error) => true,
            (Self::List(a), Self::List(b)) => a.assignable_from(b),
            (Self::Map(ak, av), Self::Map(bk, bv)) => ak.assignable_from(bk) && av.assignable_from(bv),
            (Self::Optional(a), Self::Optional(b)) => a == b,
            (Self::TypeOf(a), Self::TypeOf(b)) => a.assignable_from(b),
            (a, b) => a == b,
        }
    }

    /// Attempts to unify `self` (the declared parameter type, possibly
    /// containing type parameters) against `actual` (the argument's
    /// inferred type), extending `subst`. Returns `false` on a structural
    /// mismatch rather than panicking, so overload resolution can simply try
    /// the next candidate.
    #[must_use]
    pub fn unify(&self, actual: &CelType, subst: &mut Substitution) -> bool {
        match (self, actual) {
            (Self::Dyn, _) | (_, Self::Dyn) | (Self::Error, _) | (_, Self::Error) => true,
            (Self::Param(p), other) => subst.bind(p.clone(), other.clone()),
            (Self::List(a), Self::List(b)) => a.unify(b, subst),
            (Self::Map(ak, av), Self::Map(bk, bv)) => ak.unify(bk, subst) && av.unify(bv, subst),
            (Self::Optional(a), Self::Optional(b)) => a.unify(b, subst),
            (Self::TypeOf(a), Self::TypeOf(b)) => a.unify(b, subst),
            (a, b) => a == b,
        }
    }

    /// Replaces every type parameter in `self` using `bindings`, leaving
    /// unresolved parameters untouched (the caller should already have
    /// checked completeness if that's required).
    #[must_use]
    pub fn substitute(&self, bindings: &Substitution) -> CelType {
        match self {
            Self::Param(p) => bindings.get(p).cloned().unwrap_or_else(|| self.clone()),
            Self::List(elem) => Self::List(Box::new(elem.substitute(bindings))),
            Self::Map(k, v) => Self::Map(Box::new(k.substitute(bindings)), Box::new(v.substitute(bindings))),
            Self::Optional(inner) => Self::Optional(Box::new(inner.substitute(bindings))),
            Self::TypeOf(inner) => Self::TypeOf(Box::new(inner.substitute(bindings))),
            other => other.clone(),
        }
    }

    /// The least upper bound of two candidate result types, used when
    /// dynamic dispatch must pick a static annotation for a call whose
    /// overload can't be resolved until runtime. Falls back to `dyn` when
    /// the two disagree.
    #[must_use]
    pub fn least_upper_bound(&self, other: &CelType) -> CelType {
        if self == other {
            self.clone()
        } else {
            CelType::Dyn
        }
    }
}

/// Combines two independently-built substitutions, failing if they disagree
/// on a shared parameter.
#[must_use]
pub fn merge_substitutions(mut a: Substitution, b: Substitution) -> Option<Substitution> {
    if a.merge(b) { Some(a) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyn_is_assignable_both_ways() {
        assert!(CelType::Dyn.assignable_from(&CelType::Int));
        assert!(CelType::Int.assignable_from(&CelType::Dyn));
    }

    #[test]
    fn list_assignability_is_structural() {
        let list_dyn = CelType::List(Box::new(CelType::Dyn));
        let list_int = CelType::List(Box::new(CelType::Int));
        assert!(list_dyn.assignable_from(&list_int));
        assert!(!CelType::List(Box::new(CelType::String)).assignable_from(&list_int));
    }

    #[test]
    fn optional_is_invariant() {
        let opt_int = CelType::Optional(Box::new(CelType::Int));
        let opt_dyn = CelType::Optional(Box::new(CelType::Dyn));
        assert!(!opt_int.assignable_from(&opt_dyn));
    }

    #[test]
    fn unify_binds_param_on_first_use() {
        let mut subst = Substitution::new();
        let param = CelType::Param(Rc::from("A"));
        assert!(param.unify(&CelType::Int, &mut subst));
        assert!(!param.unify(&CelType::String, &mut subst));
        assert_eq!(param.substitute(&subst), CelType::Int);
    }

    #[test]
    fn format_matches_conventional_cel_names() {
        let t = CelType::Map(Box::new(CelType::String), Box::new(CelType::Dyn));
        assert_eq!(t.format(), "map<string, dyn>");
    }
}
