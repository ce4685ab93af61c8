//! Lowers a [`CheckedAst`] into a [`Program`]: a tree that mirrors the
//! expression shape but has already decided, per call node, whether
//! dispatch can be resolved once (every operand's static type is concrete)
//! or must be resolved again against runtime values on every evaluation
//! (property P5). Planning never fails — the checker has already ruled out
//! unresolvable calls — so [`plan`] returns a [`Program`] directly.

use std::rc::Rc;

use crate::ast::{Comprehension, Constant, Expr, ExprId, ExprKind};
use crate::checker::CheckedAst;
use crate::source::Source;
use crate::types::CelType;
use crate::value::Value;

/// Whether a call's overload was pinned down during checking or must be
/// re-resolved at runtime because an operand's static type was `dyn`/`error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Static,
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct PlanMapEntry {
    pub key: PlanExpr,
    pub value: PlanExpr,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct PlanStructEntry {
    pub field: Rc<str>,
    pub value: PlanExpr,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct PlanComprehension {
    pub iter_var: Rc<str>,
    pub iter_range: Box<PlanExpr>,
    pub accu_var: Rc<str>,
    pub accu_init: Box<PlanExpr>,
    pub loop_condition: Box<PlanExpr>,
    pub loop_step: Box<PlanExpr>,
    pub result: Box<PlanExpr>,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    Constant(Value),
    Ident(Rc<str>),
    Select { operand: Box<PlanExpr>, field: Rc<str>, test_only: bool, field_type: CelType },
    Call { target: Option<Box<PlanExpr>>, function: Rc<str>, args: Vec<PlanExpr>, dispatch: Dispatch },
    List { elements: Vec<PlanExpr>, optional_indices: Vec<u32> },
    Map(Vec<PlanMapEntry>),
    Struct { message_name: Rc<str>, entries: Vec<PlanStructEntry> },
    Comprehension(PlanComprehension),
}

/// One planned node, keeping the original [`ExprId`] for tracer/error
/// reporting.
#[derive(Debug, Clone)]
pub struct PlanExpr {
    pub id: ExprId,
    pub node: PlanNode,
}

/// A fully planned program: ready for repeated evaluation against different
/// activations.
#[derive(Debug, Clone)]
pub struct Program {
    pub root: PlanExpr,
    pub source: Source,
}

#[must_use]
pub fn plan(checked: &CheckedAst) -> Program {
    Program {
        root: plan_expr(&checked.ast.root, checked),
        source: checked.ast.source.clone(),
    }
}

fn plan_expr(expr: &Expr, checked: &CheckedAst) -> PlanExpr {
    let node = match &expr.kind {
        ExprKind::Constant(c) => PlanNode::Constant(constant_to_value(c)),
        ExprKind::Ident(name) => PlanNode::Ident(name.clone()),
        ExprKind::Select { operand, field, test_only } => PlanNode::Select {
            operand: Box::new(plan_expr(operand, checked)),
            field: field.clone(),
            test_only: *test_only,
            field_type: checked.type_of(expr.id),
        },
        ExprKind::Call { target, function, args } => {
            let dispatch = if dispatch_is_static(target.as_deref(), args, checked) { Dispatch::Static } else { Dispatch::Dynamic };
            PlanNode::Call {
                target: target.as_ref().map(|t| Box::new(plan_expr(t, checked))),
                function: function.clone(),
                args: args.iter().map(|a| plan_expr(a, checked)).collect(),
                dispatch,
            }
        }
        ExprKind::List { elements, optional_indices } => PlanNode::List {
            elements: elements.iter().map(|e| plan_expr(e, checked)).collect(),
            optional_indices: optional_indices.clone(),
        },
        ExprKind::Map { entries } => PlanNode::Map(
            entries
                .iter()
                .map(|e| PlanMapEntry { key: plan_expr(&e.key, checked), value: plan_expr(&e.value, checked), optional: e.optional })
                .collect(),
        ),
        ExprKind::Struct { message_name, entries } => PlanNode::Struct {
            message_name: message_name.clone(),
            entries: entries
                .iter()
                .map(|e| PlanStructEntry { field: e.field.clone(), value: plan_expr(&e.value, checked), optional: e.optional })
                .collect(),
        },
        ExprKind::Comprehension(c) => PlanNode::Comprehension(plan_comprehension(c, checked)),
    };
    PlanExpr { id: expr.id, node }
}

fn plan_comprehension(c: &Comprehension, checked: &CheckedAst) -> PlanComprehension {
    PlanComprehension {
        iter_var: c.iter_var.clone(),
        iter_range: Box::new(plan_expr(&c.iter_range, checked)),
        accu_var: c.accu_var.clone(),
        accu_init: Box::new(plan_expr(&c.accu_init, checked)),
        loop_condition: Box::new(plan_expr(&c.loop_condition, checked)),
        loop_step: Box::new(plan_expr(&c.loop_step, checked)),
        result: Box::new(plan_expr(&c.result, checked)),
    }
}

fn dispatch_is_static(target: Option<&Expr>, args: &[Expr], checked: &CheckedAst) -> bool {
    let operand_is_concrete = |e: &Expr| !matches!(checked.type_of(e.id), CelType::Dyn | CelType::Error);
    target.map_or(true, operand_is_concrete) && args.iter().all(operand_is_concrete)
}

fn constant_to_value(c: &Constant) -> Value {
    match c {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::UInt(u) => Value::UInt(*u),
        Constant::Double(d) => Value::Double(*d),
        Constant::String(s) => Value::String(s.clone()),
        Constant::Bytes(b) => Value::Bytes(b.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check;
    use crate::env::Env;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};
    use crate::source::Source;

    fn plan_src(src: &str, env: &Env) -> Program {
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        let ast = expand_macros(ast, env).unwrap();
        let checked = check(ast, env).unwrap();
        plan(&checked)
    }

    #[test]
    fn known_numeric_types_plan_to_static_dispatch() {
        let program = plan_src("1 + 2", &Env::new());
        match program.root.node {
            PlanNode::Call { dispatch, .. } => assert_eq!(dispatch, Dispatch::Static),
            other => panic!("expected call node, got {other:?}"),
        }
    }

    #[test]
    fn dyn_operand_plans_to_dynamic_dispatch() {
        let mut env = Env::new();
        env.declare_variable("x", CelType::Dyn);
        let program = plan_src("x + 1", &env);
        match program.root.node {
            PlanNode::Call { dispatch, .. } => assert_eq!(dispatch, Dispatch::Dynamic),
            other => panic!("expected call node, got {other:?}"),
        }
    }
}
