//! The immutable expression tree produced by the parser.
//!
//! Every node carries a stable, non-zero [`ExprId`] assigned by the parser
//! and preserved by macro expansion, checking, and planning. IDs are never
//! reused within a tree (P1).

use std::rc::Rc;

use crate::source::Source;

/// A non-zero, tree-unique node identifier assigned during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ExprId(pub(crate) u64);

impl ExprId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic ID allocator bound to a single parse (and any macro expansions
/// that happen afterward against the same tree).
///
/// Threaded explicitly through parsing instead of living behind a
/// thread-local, so two parses never race over IDs and tests are
/// deterministic.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> ExprId {
        let id = ExprId(self.next);
        self.next += 1;
        id
    }
}

/// A literal scalar value embedded directly in source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
}

/// One `key: value` entry of a map literal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MapEntry {
    pub id: ExprId,
    pub key: Expr,
    pub value: Expr,
    pub optional: bool,
}

/// One `field: value` entry of a message-struct literal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StructEntry {
    pub id: ExprId,
    pub field: Rc<str>,
    pub value: Expr,
    pub optional: bool,
}

/// The canonical iterative form that every standard macro lowers to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Comprehension {
    pub iter_var: Rc<str>,
    pub iter_range: Box<Expr>,
    pub accu_var: Rc<str>,
    pub accu_init: Box<Expr>,
    pub loop_condition: Box<Expr>,
    pub loop_step: Box<Expr>,
    pub result: Box<Expr>,
}

/// The tagged payload of an [`Expr`]. Exactly one variant per node, matched
/// uniformly by every pass instead of double dispatch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Constant(Constant),
    Ident(Rc<str>),
    Select {
        operand: Box<Expr>,
        field: Rc<str>,
        test_only: bool,
    },
    Call {
        target: Option<Box<Expr>>,
        function: Rc<str>,
        args: Vec<Expr>,
    },
    List {
        elements: Vec<Expr>,
        optional_indices: Vec<u32>,
    },
    Map {
        entries: Vec<MapEntry>,
    },
    Struct {
        message_name: Rc<str>,
        entries: Vec<StructEntry>,
    },
    Comprehension(Comprehension),
}

/// One node of the expression tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(id: ExprId, kind: ExprKind) -> Self {
        Self { id, kind }
    }
}

/// A reference back to the macro call a comprehension (or presence test) was
/// expanded from, keyed by the *expanded* node's ID — a side table, never a
/// back-pointer embedded in the tree, so the AST stays acyclic.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MacroCall {
    pub function: Rc<str>,
    pub target: Option<Box<Expr>>,
    pub args: Vec<Expr>,
}

/// The complete output of parsing (and, later, macro expansion): a root
/// expression plus the source it was parsed from and the macro-source side
/// table needed for lossless unparsing.
#[derive(Debug, Clone)]
pub struct Ast {
    pub root: Expr,
    pub source: Source,
    pub macro_calls: std::collections::HashMap<ExprId, MacroCall>,
    /// Next unused ID, so later passes (macro expansion) can keep allocating
    /// from the same monotonic sequence the parser used.
    pub next_id: u64,
}

impl Ast {
    #[must_use]
    pub fn new(root: Expr, source: Source, next_id: u64) -> Self {
        Self {
            root,
            source,
            macro_calls: std::collections::HashMap::new(),
            next_id,
        }
    }

    pub fn id_generator(&self) -> IdGenerator {
        IdGenerator { next: self.next_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_nonzero() {
        let mut gen = IdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert!(a.get() > 0);
        assert!(b.get() > a.get());
    }
}
