//! The checking/evaluation environment: container namespace, variable and
//! function declarations, message type provider, and the options bundle
//! threaded through `compile`/`check`/`plan`/`eval`.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::parser::ParserOptions;
use crate::types::CelType;
use crate::value::Value;

/// A dotted namespace prefix with optional single-segment abbreviations,
/// used to resolve unqualified identifiers against declared names.
#[derive(Debug, Clone, Default)]
pub struct Container {
    name: String,
    abbrevs: HashMap<String, String>,
}

impl Container {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), abbrevs: HashMap::new() }
    }

    /// Registers `alias` (a single identifier) as shorthand for the fully
    /// qualified `target`, e.g. `add_abbrev("Duration", "google.protobuf.Duration")`.
    pub fn add_abbrev(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.abbrevs.insert(alias.into(), target.into());
    }

    /// Candidate fully-qualified names for an unqualified (or partially
    /// qualified) identifier, most specific first:
    /// `a.b.c.X → a.b.X → a.X → X`, with the container's abbreviations
    /// checked before any dotted-prefix expansion.
    #[must_use]
    pub fn resolve_candidates(&self, name: &str) -> Vec<String> {
        if let Some(name) = name.strip_prefix('.') {
            return vec![name.to_owned()];
        }
        let first_segment = name.split('.').next().unwrap_or(name);
        if let Some(target) = self.abbrevs.get(first_segment) {
            let rest = &name[first_segment.len()..];
            return vec![format!("{target}{rest}")];
        }

        let mut candidates = Vec::new();
        if self.name.is_empty() {
            candidates.push(name.to_owned());
            return candidates;
        }
        let prefix_segments: Vec<&str> = self.name.split('.').collect();
        for i in (0..=prefix_segments.len()).rev() {
            let prefix = prefix_segments[..i].join(".");
            if prefix.is_empty() {
                candidates.push(name.to_owned());
            } else {
                candidates.push(format!("{prefix}.{name}"));
            }
        }
        candidates
    }
}

/// One typed signature of a function, grouped under a user-visible name.
#[derive(Debug, Clone)]
pub struct Overload {
    pub id: Rc<str>,
    pub is_instance: bool,
    pub param_types: Vec<CelType>,
    pub result_type: CelType,
}

impl Overload {
    #[must_use]
    pub fn global(id: &str, param_types: Vec<CelType>, result_type: CelType) -> Self {
        Self { id: Rc::from(id), is_instance: false, param_types, result_type }
    }

    #[must_use]
    pub fn instance(id: &str, param_types: Vec<CelType>, result_type: CelType) -> Self {
        Self { id: Rc::from(id), is_instance: true, param_types, result_type }
    }
}

/// Native implementation of one overload, invoked by the interpreter with
/// the receiver (if instance-style) prepended to the argument list.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, crate::diagnostics::EvalError>>;

/// A declared message type: field name → declared type, used by the checker
/// when validating `Select` and `Struct` construction. This is the narrow
/// adapter the design notes call for in place of reflection: callers plug in
/// their own descriptor source by populating an [`Env`]'s message types.
#[derive(Debug, Clone, Default)]
pub struct MessageType {
    pub fields: IndexMap<Rc<str>, CelType>,
}

/// Macro dispatch key: function name, fixed argument count (`None` for
/// variadic), and whether the macro is written in receiver style
/// (`c.all(x, p)`) versus global style (`has(e.f)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacroKey {
    pub name: Rc<str>,
    pub arg_count: Option<usize>,
    pub is_receiver_style: bool,
}

/// Checker options affecting overload/comparison semantics.
#[derive(Debug, Clone, Default)]
pub struct CheckerOptions {
    pub enable_heterogeneous_numeric_comparisons: bool,
}

/// AST-validator limits, applied after checking and before planning.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub max_ast_depth: Option<usize>,
    pub max_comprehension_nesting: Option<usize>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self { max_ast_depth: Some(250), max_comprehension_nesting: Some(64) }
    }
}

/// Evaluation-time options.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub comprehension_max_iterations: Option<u64>,
    pub enable_unknown_tracking: bool,
    pub enable_timestamp_epoch: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            comprehension_max_iterations: Some(1_000_000),
            enable_unknown_tracking: false,
            enable_timestamp_epoch: false,
        }
    }
}

/// The full options bundle threaded through `compile`/`check`/`plan`/`eval`.
#[derive(Debug, Clone, Default)]
pub struct CelOptions {
    pub parser: ParserOptions,
    pub checker: CheckerOptions,
    pub validator: ValidatorOptions,
    pub eval: EvalOptions,
}

/// An error raised while building an [`Env`] (as opposed to while compiling
/// an expression against one).
#[derive(Debug, Clone)]
pub enum EnvError {
    MacroCollision { key: String },
}

impl std::fmt::Display for EnvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MacroCollision { key } => write!(f, "macro '{key}' collides with a standard macro of the same key"),
        }
    }
}

impl std::error::Error for EnvError {}

/// Variable and function declarations, the container namespace, message
/// types, macro registry, and options — the full input to `compile`.
pub struct Env {
    pub container: Container,
    pub variables: HashMap<String, CelType>,
    pub functions: HashMap<String, Vec<Overload>>,
    pub natives: HashMap<Rc<str>, NativeFn>,
    pub message_types: HashMap<Rc<str>, MessageType>,
    pub macros: std::collections::HashSet<MacroKey>,
    pub options: CelOptions,
}

impl Env {
    /// An environment with no declarations, the standard macros registered,
    /// and default options. Most callers start from [`crate::stdlib::standard_env`]
    /// instead, which also populates the standard function library.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Self {
            container: Container::default(),
            variables: HashMap::new(),
            functions: HashMap::new(),
            natives: HashMap::new(),
            message_types: HashMap::new(),
            macros: std::collections::HashSet::new(),
            options: CelOptions::default(),
        };
        for key in crate::macros::standard_macro_keys() {
            env.macros.insert(key);
        }
        env
    }

    pub fn declare_variable(&mut self, name: impl Into<String>, ty: CelType) {
        self.variables.insert(name.into(), ty);
    }

    pub fn declare_function(&mut self, name: impl Into<String>, overload: Overload, native: Option<NativeFn>) {
        if let Some(f) = native {
            self.natives.insert(overload.id.clone(), f);
        }
        self.functions.entry(name.into()).or_default().push(overload);
    }

    pub fn declare_message_type(&mut self, name: impl Into<Rc<str>>, ty: MessageType) {
        self.message_types.insert(name.into(), ty);
    }

    /// Registers a custom macro key, rejecting it if it collides with one
    /// already present (standard or previously registered custom).
    pub fn declare_macro(&mut self, key: MacroKey) -> Result<(), EnvError> {
        if self.macros.contains(&key) {
            return Err(EnvError::MacroCollision {
                key: format!("{}/{:?}/{}", key.name, key.arg_count, key.is_receiver_style),
            });
        }
        self.macros.insert(key);
        Ok(())
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_resolves_most_specific_first() {
        let c = Container::new("a.b.c");
        assert_eq!(c.resolve_candidates("X"), vec!["a.b.c.X", "a.b.X", "a.X", "X"]);
    }

    #[test]
    fn leading_dot_forces_absolute_lookup() {
        let c = Container::new("a.b.c");
        assert_eq!(c.resolve_candidates(".X"), vec!["X"]);
    }

    #[test]
    fn abbreviation_short_circuits_prefix_chain() {
        let mut c = Container::new("a.b.c");
        c.add_abbrev("Dur", "google.protobuf.Duration");
        assert_eq!(c.resolve_candidates("Dur"), vec!["google.protobuf.Duration"]);
    }

    #[test]
    fn duplicate_macro_registration_is_rejected() {
        let mut env = Env::new();
        let key = MacroKey { name: Rc::from("has"), arg_count: Some(1), is_receiver_style: false };
        assert!(env.declare_macro(key).is_err());
    }
}
