//! Wire format for a checked AST: every node flattened into a pool keyed by
//! [`ExprId`], with children referenced by ID instead of nested inline, plus
//! the `node_id -> CelType` side table checking produced. This bounds
//! `postcard`'s recursion to the shape of [`SerKind`] itself rather than the
//! depth of the tree being encoded, and lets a consumer patch or inspect one
//! node without touching the rest.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{Ast, Comprehension, Constant, Expr, ExprId, ExprKind, MacroCall, MapEntry, StructEntry};
use crate::checker::CheckedAst;
use crate::source::Source;
use crate::types::CelType;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerMapEntry {
    id: ExprId,
    key: ExprId,
    value: ExprId,
    optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerStructEntry {
    id: ExprId,
    field: Rc<str>,
    value: ExprId,
    optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerComprehension {
    iter_var: Rc<str>,
    iter_range: ExprId,
    accu_var: Rc<str>,
    accu_init: ExprId,
    loop_condition: ExprId,
    loop_step: ExprId,
    result: ExprId,
}

/// [`ExprKind`] with every nested `Expr` replaced by its [`ExprId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerKind {
    Constant(Constant),
    Ident(Rc<str>),
    Select { operand: ExprId, field: Rc<str>, test_only: bool },
    Call { target: Option<ExprId>, function: Rc<str>, args: Vec<ExprId> },
    List { elements: Vec<ExprId>, optional_indices: Vec<u32> },
    Map(Vec<SerMapEntry>),
    Struct { message_name: Rc<str>, entries: Vec<SerStructEntry> },
    Comprehension(SerComprehension),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerMacroCall {
    function: Rc<str>,
    target: Option<ExprId>,
    args: Vec<ExprId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedSource {
    name: String,
    text: String,
}

/// An error reconstructing a [`CheckedAst`] from serialized bytes.
#[derive(Debug)]
pub enum DeserializeError {
    /// `postcard` couldn't decode the bytes as a [`SerializedCheckedAst`] at all.
    Postcard(postcard::Error),
    /// The payload decoded, but a node referenced an [`ExprId`] that isn't in
    /// the pool — a truncated or otherwise malformed payload.
    MissingNode(ExprId),
}

impl From<postcard::Error> for DeserializeError {
    fn from(err: postcard::Error) -> Self {
        Self::Postcard(err)
    }
}

impl std::fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postcard(err) => write!(f, "malformed postcard payload: {err}"),
            Self::MissingNode(id) => write!(f, "serialized AST missing referenced node {id}"),
        }
    }
}

impl std::error::Error for DeserializeError {}

/// A [`CheckedAst`] flattened for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedCheckedAst {
    source: SerializedSource,
    next_id: u64,
    root_id: ExprId,
    nodes: Vec<(ExprId, SerKind)>,
    macro_calls: Vec<(ExprId, SerMacroCall)>,
    types: Vec<(ExprId, CelType)>,
}

impl CheckedAst {
    /// Serializes this checked AST to `postcard`'s compact binary format.
    ///
    /// # Errors
    /// Returns an error if `postcard` fails to encode the flattened
    /// representation.
    pub fn to_postcard(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.to_serialized())
    }

    /// Reconstructs a [`CheckedAst`] from bytes produced by [`Self::to_postcard`].
    ///
    /// # Errors
    /// Returns an error if `bytes` isn't a valid encoding of a
    /// [`SerializedCheckedAst`], or if it references a node ID that isn't in
    /// the pool (a malformed or truncated payload).
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, DeserializeError> {
        let serialized: SerializedCheckedAst = postcard::from_bytes(bytes)?;
        serialized.into_checked_ast()
    }

    fn to_serialized(&self) -> SerializedCheckedAst {
        let mut nodes = Vec::new();
        flatten(&self.ast.root, &mut nodes);
        let macro_calls = self
            .ast
            .macro_calls
            .iter()
            .map(|(id, call)| {
                let target = call.target.as_ref().map(|t| flatten(t, &mut nodes));
                let args = call.args.iter().map(|a| flatten(a, &mut nodes)).collect();
                (*id, SerMacroCall { function: call.function.clone(), target, args })
            })
            .collect();
        SerializedCheckedAst {
            source: SerializedSource { name: self.ast.source.name().to_owned(), text: self.ast.source.text().to_owned() },
            next_id: self.ast.next_id,
            root_id: self.ast.root.id,
            nodes,
            macro_calls,
            types: self.types.iter().map(|(id, ty)| (*id, ty.clone())).collect(),
        }
    }
}

impl SerializedCheckedAst {
    fn into_checked_ast(self) -> Result<CheckedAst, DeserializeError> {
        let source = Source::new(self.source.text, self.source.name);
        let pool: HashMap<ExprId, SerKind> = self.nodes.into_iter().collect();
        let root = rebuild(self.root_id, &pool)?;
        let mut ast = Ast::new(root, source, self.next_id);
        ast.macro_calls = self
            .macro_calls
            .into_iter()
            .map(|(id, call)| {
                let target = call.target.map(|t| rebuild(t, &pool).map(Box::new)).transpose()?;
                let args = call.args.into_iter().map(|a| rebuild(a, &pool)).collect::<Result<_, _>>()?;
                Ok((id, MacroCall { function: call.function, target, args }))
            })
            .collect::<Result<_, DeserializeError>>()?;
        Ok(CheckedAst { ast, types: self.types.into_iter().collect() })
    }
}

/// Flattens `expr` (and every descendant) into `pool`, returning its ID so
/// the caller can record a reference to it.
fn flatten(expr: &Expr, pool: &mut Vec<(ExprId, SerKind)>) -> ExprId {
    let kind = match &expr.kind {
        ExprKind::Constant(c) => SerKind::Constant(c.clone()),
        ExprKind::Ident(name) => SerKind::Ident(name.clone()),
        ExprKind::Select { operand, field, test_only } => {
            SerKind::Select { operand: flatten(operand, pool), field: field.clone(), test_only: *test_only }
        }
        ExprKind::Call { target, function, args } => SerKind::Call {
            target: target.as_ref().map(|t| flatten(t, pool)),
            function: function.clone(),
            args: args.iter().map(|a| flatten(a, pool)).collect(),
        },
        ExprKind::List { elements, optional_indices } => {
            SerKind::List { elements: elements.iter().map(|e| flatten(e, pool)).collect(), optional_indices: optional_indices.clone() }
        }
        ExprKind::Map { entries } => SerKind::Map(
            entries
                .iter()
                .map(|e| SerMapEntry { id: e.id, key: flatten(&e.key, pool), value: flatten(&e.value, pool), optional: e.optional })
                .collect(),
        ),
        ExprKind::Struct { message_name, entries } => SerKind::Struct {
            message_name: message_name.clone(),
            entries: entries
                .iter()
                .map(|e| SerStructEntry { id: e.id, field: e.field.clone(), value: flatten(&e.value, pool), optional: e.optional })
                .collect(),
        },
        ExprKind::Comprehension(c) => SerKind::Comprehension(SerComprehension {
            iter_var: c.iter_var.clone(),
            iter_range: flatten(&c.iter_range, pool),
            accu_var: c.accu_var.clone(),
            accu_init: flatten(&c.accu_init, pool),
            loop_condition: flatten(&c.loop_condition, pool),
            loop_step: flatten(&c.loop_step, pool),
            result: flatten(&c.result, pool),
        }),
    };
    pool.push((expr.id, kind));
    expr.id
}

/// Rebuilds the `Expr` rooted at `id` from the flat pool.
fn rebuild(id: ExprId, pool: &HashMap<ExprId, SerKind>) -> Result<Expr, DeserializeError> {
    let kind = pool.get(&id).ok_or(DeserializeError::MissingNode(id))?;
    let kind = match kind {
        SerKind::Constant(c) => ExprKind::Constant(c.clone()),
        SerKind::Ident(name) => ExprKind::Ident(name.clone()),
        SerKind::Select { operand, field, test_only } => {
            ExprKind::Select { operand: Box::new(rebuild(*operand, pool)?), field: field.clone(), test_only: *test_only }
        }
        SerKind::Call { target, function, args } => ExprKind::Call {
            target: target.map(|t| rebuild(t, pool).map(Box::new)).transpose()?,
            function: function.clone(),
            args: args.iter().map(|a| rebuild(*a, pool)).collect::<Result<_, _>>()?,
        },
        SerKind::List { elements, optional_indices } => ExprKind::List {
            elements: elements.iter().map(|e| rebuild(*e, pool)).collect::<Result<_, _>>()?,
            optional_indices: optional_indices.clone(),
        },
        SerKind::Map(entries) => ExprKind::Map {
            entries: entries
                .iter()
                .map(|e| Ok(MapEntry { id: e.id, key: rebuild(e.key, pool)?, value: rebuild(e.value, pool)?, optional: e.optional }))
                .collect::<Result<_, DeserializeError>>()?,
        },
        SerKind::Struct { message_name, entries } => ExprKind::Struct {
            message_name: message_name.clone(),
            entries: entries
                .iter()
                .map(|e| Ok(StructEntry { id: e.id, field: e.field.clone(), value: rebuild(e.value, pool)?, optional: e.optional }))
                .collect::<Result<_, DeserializeError>>()?,
        },
        SerKind::Comprehension(c) => ExprKind::Comprehension(Comprehension {
            iter_var: c.iter_var.clone(),
            iter_range: Box::new(rebuild(c.iter_range, pool)?),
            accu_var: c.accu_var.clone(),
            accu_init: Box::new(rebuild(c.accu_init, pool)?),
            loop_condition: Box::new(rebuild(c.loop_condition, pool)?),
            loop_step: Box::new(rebuild(c.loop_step, pool)?),
            result: Box::new(rebuild(c.result, pool)?),
        }),
    };
    Ok(Expr::new(id, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};

    fn checked(src: &str) -> CheckedAst {
        let mut env = Env::new();
        env.declare_variable("x", CelType::Dyn);
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        let ast = expand_macros(ast, &env).unwrap();
        crate::checker::check(ast, &env).unwrap()
    }

    #[test]
    fn postcard_round_trips_a_checked_expression() {
        let original = checked("x + 1");
        let bytes = original.to_postcard().unwrap();
        let restored = CheckedAst::from_postcard(&bytes).unwrap();
        assert_eq!(restored.ast.source.text(), original.ast.source.text());
        assert_eq!(restored.type_of(original.ast.root.id), original.type_of(original.ast.root.id));
        assert_eq!(crate::unparser::unparse(&restored.ast), crate::unparser::unparse(&original.ast));
    }

    #[test]
    fn postcard_round_trips_macro_call_side_table() {
        let original = checked("has(x.y) || true");
        let bytes = original.to_postcard().unwrap();
        let restored = CheckedAst::from_postcard(&bytes).unwrap();
        assert_eq!(restored.ast.macro_calls.len(), original.ast.macro_calls.len());
        assert_eq!(crate::unparser::unparse(&restored.ast), "has(x.y) || true");
    }

    #[test]
    fn dangling_node_reference_is_a_typed_error_not_a_panic() {
        let serialized = SerializedCheckedAst {
            source: SerializedSource { name: "<input>".to_owned(), text: "x".to_owned() },
            next_id: 1,
            root_id: ExprId(0),
            nodes: Vec::new(),
            macro_calls: Vec::new(),
            types: Vec::new(),
        };
        let err = serialized.into_checked_ast().unwrap_err();
        assert!(matches!(err, DeserializeError::MissingNode(id) if id == ExprId(0)));
    }
}
