//! A parent/child traversal view over an immutable [`Ast`], built without
//! mutating the tree itself.
//!
//! The parent index is computed lazily on first traversal and cached for the
//! lifetime of the view, the same compute-once-reuse approach used for
//! other derived indices in this codebase.

use std::cell::OnceCell;
use std::collections::HashMap;

use crate::ast::{Ast, Expr, ExprId, ExprKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Pre,
    Post,
}

/// Read-only traversal over an [`Ast`]'s nodes by reference.
pub struct NavigableAst<'a> {
    ast: &'a Ast,
    index: OnceCell<Index<'a>>,
}

struct Index<'a> {
    by_id: HashMap<ExprId, &'a Expr>,
    parent: HashMap<ExprId, ExprId>,
}

impl<'a> NavigableAst<'a> {
    #[must_use]
    pub fn new(ast: &'a Ast) -> Self {
        Self {
            ast,
            index: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &'a Expr {
        &self.ast.root
    }

    fn index(&self) -> &Index<'a> {
        self.index.get_or_init(|| {
            let mut by_id = HashMap::new();
            let mut parent = HashMap::new();
            build_index(&self.ast.root, None, &mut by_id, &mut parent);
            Index { by_id, parent }
        })
    }

    #[must_use]
    pub fn find(&self, id: ExprId) -> Option<&'a Expr> {
        self.index().by_id.get(&id).copied()
    }

    #[must_use]
    pub fn parent(&self, id: ExprId) -> Option<&'a Expr> {
        let parent_id = *self.index().parent.get(&id)?;
        self.find(parent_id)
    }

    /// Direct children of `expr`, in source order.
    #[must_use]
    pub fn children<'b>(&self, expr: &'b Expr) -> Vec<&'b Expr> {
        children_of(expr)
    }

    #[must_use]
    pub fn descendants<'b>(&self, expr: &'b Expr) -> Vec<&'b Expr> {
        let mut out = Vec::new();
        collect_descendants(expr, &mut out);
        out
    }

    /// All nodes of the tree in the requested traversal order, rooted at the
    /// AST's root expression.
    #[must_use]
    pub fn all_nodes(&self, order: Order) -> Vec<&'a Expr> {
        let mut out = Vec::new();
        walk(&self.ast.root, order, &mut out);
        out
    }

    /// Height of the tree (a leaf node has height 1).
    #[must_use]
    pub fn height(&self) -> usize {
        expr_height(&self.ast.root)
    }
}

pub(crate) fn children_of(expr: &Expr) -> Vec<&Expr> {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Ident(_) => vec![],
        ExprKind::Select { operand, .. } => vec![operand.as_ref()],
        ExprKind::Call { target, args, .. } => target.iter().map(AsRef::as_ref).chain(args.iter()).collect(),
        ExprKind::List { elements, .. } => elements.iter().collect(),
        ExprKind::Map { entries } => entries.iter().flat_map(|e| [&e.key, &e.value]).collect(),
        ExprKind::Struct { entries, .. } => entries.iter().map(|e| &e.value).collect(),
        ExprKind::Comprehension(c) => vec![
            c.iter_range.as_ref(),
            c.accu_init.as_ref(),
            c.loop_condition.as_ref(),
            c.loop_step.as_ref(),
            c.result.as_ref(),
        ],
    }
}

fn build_index<'a>(
    expr: &'a Expr,
    parent_id: Option<ExprId>,
    by_id: &mut HashMap<ExprId, &'a Expr>,
    parent: &mut HashMap<ExprId, ExprId>,
) {
    by_id.insert(expr.id, expr);
    if let Some(p) = parent_id {
        parent.insert(expr.id, p);
    }
    for child in children_of(expr) {
        build_index(child, Some(expr.id), by_id, parent);
    }
}

fn collect_descendants<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    for child in children_of(expr) {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn walk<'a>(expr: &'a Expr, order: Order, out: &mut Vec<&'a Expr>) {
    match order {
        Order::Pre => {
            out.push(expr);
            for child in children_of(expr) {
                walk(child, order, out);
            }
        }
        Order::Post => {
            for child in children_of(expr) {
                walk(child, order, out);
            }
            out.push(expr);
        }
    }
}

fn expr_height(expr: &Expr) -> usize {
    1 + children_of(expr).into_iter().map(expr_height).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::source::Source;

    #[test]
    fn finds_parent_and_children() {
        let ast = parse(&Source::new("1 + 2", "<input>"), &Default::default()).unwrap();
        let nav = NavigableAst::new(&ast);
        let all = nav.all_nodes(Order::Pre);
        assert_eq!(all.len(), 3);
        let call = all[0];
        let lhs = all[1];
        assert_eq!(nav.parent(lhs.id).unwrap().id, call.id);
        assert!(nav.parent(call.id).is_none());
    }

    #[test]
    fn height_counts_leaf_as_one() {
        let ast = parse(&Source::new("1", "<input>"), &Default::default()).unwrap();
        let nav = NavigableAst::new(&ast);
        assert_eq!(nav.height(), 1);
    }
}
