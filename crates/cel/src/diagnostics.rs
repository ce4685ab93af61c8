//! Diagnostic and error taxonomy shared by the parser, checker, validators,
//! and interpreter.
//!
//! Compile-time problems accumulate into a `Vec<CelIssue>` instead of
//! unwinding (see [`crate::checker`]); runtime problems propagate as a single
//! [`EvalError`] that short-circuits the enclosing operator per the rules in
//! [`crate::interp`].

use strum::{Display, EnumString};

use crate::ast::ExprId;
use crate::source::{Location, Source};

/// Severity of a [`CelIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// The taxonomy of problems the compiler and validators can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum IssueKind {
    /// Ill-formed source; size or recursion-depth limit exceeded.
    Syntax,
    /// No overload, unassignable type, or unknown reference.
    TypeCheck,
}

/// A single compile-time diagnostic: parser, checker, or validator output.
#[derive(Debug, Clone)]
pub struct CelIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub location: Location,
    pub message: String,
}

impl CelIssue {
    #[must_use]
    pub fn error(kind: IssueKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            location,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(kind: IssueKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            location,
            message: message.into(),
        }
    }

    /// Renders `ERROR: <source-name>:<line>:<col>: <message>`, the wire
    /// format pinned by the external interface contract.
    #[must_use]
    pub fn render(&self, source: &Source) -> String {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        format!(
            "{tag}: {}:{}:{}: {}",
            source.name(),
            self.location.line,
            self.location.column,
            self.message
        )
    }

    /// [`Self::render`] followed by a caret-underlined source snippet.
    #[must_use]
    pub fn render_with_snippet(&self, source: &Source) -> String {
        let header = self.render(source);
        if self.location.is_unknown() {
            return header;
        }
        let line = source.snippet(self.location.line);
        let caret_pos = self.location.column.saturating_sub(1) as usize;
        let caret_line = format!("{}{}", " ".repeat(caret_pos), "^");
        format!("{header}\n | {line}\n | {caret_line}")
    }
}

/// The taxonomy of problems the planner and interpreter can raise during
/// `eval`. Variant names match the contract's error-kind table exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum EvalErrorKind {
    /// Dynamic dispatch failed: no overload matched the runtime argument types.
    NoMatchingOverload,
    /// Missing message field, or field/index access on a non-aggregate.
    NoSuchField,
    /// Missing map key.
    NoSuchKey,
    /// List index negative or >= length.
    IndexOutOfBounds,
    /// Integer/uint/double division or modulo by zero.
    DivideByZero,
    /// Arithmetic or conversion overflow.
    Overflow,
    /// Malformed timestamp/duration/regex/number literal.
    BadFormat,
    /// Comprehension iteration counter exhausted.
    IterationBudgetExceeded,
    /// Reserved; never emitted by this crate.
    Cancelled,
    /// A value was used where its type made the operation meaningless
    /// (e.g. selecting a field on a non-message, non-map value).
    TypeError,
}

/// A runtime error produced while evaluating a [`crate::plan::Program`].
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub node_id: Option<ExprId>,
    pub location: Location,
    pub message: String,
}

impl EvalError {
    #[must_use]
    pub fn new(kind: EvalErrorKind, node_id: ExprId, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node_id),
            location: Location::UNKNOWN,
            message: message.into(),
        }
    }

    /// Builds an error with no node attached yet — what a [`crate::env::NativeFn`]
    /// raises, since it has no view of the call site. [`Self::with_node_id`]
    /// fills it in once the interpreter catches the error at the call node.
    #[must_use]
    pub fn anonymous(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: None,
            location: Location::UNKNOWN,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_node_id(mut self, node_id: ExprId) -> Self {
        self.node_id = Some(node_id);
        self
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EvalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_diagnostic_wire_format() {
        let src = Source::new("1 + 'a'", "policy.cel");
        let issue = CelIssue::error(IssueKind::TypeCheck, Location { line: 1, column: 5 }, "no matching overload");
        assert_eq!(issue.render(&src), "ERROR: policy.cel:1:5: no matching overload");
    }
}
