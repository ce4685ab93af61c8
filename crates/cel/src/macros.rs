//! Standard macro family: a post-parse tree rewrite from shorthand call
//! syntax into canonical comprehension nodes.
//!
//! Expansion is keyed by `(function name, argument count, receiver style)`
//! against the [`crate::env::Env`]'s macro registry built at construction
//! time, so a custom macro colliding with a standard one is caught early
//! (`Env::declare_macro`) rather than silently shadowed here.

use std::rc::Rc;

use crate::ast::{Ast, Comprehension, Constant, Expr, ExprId, ExprKind, IdGenerator, MacroCall};
use crate::diagnostics::{CelIssue, IssueKind};
use crate::env::{Env, MacroKey};
use crate::parser::{make_comprehension, make_presence_test};
use crate::source::Location;

const ACCU_VAR: &str = "__result__";

/// The standard macro keys every [`Env`] registers by default.
#[must_use]
pub fn standard_macro_keys() -> Vec<MacroKey> {
    let receiver = |name: &str, count: Option<usize>| MacroKey { name: Rc::from(name), arg_count: count, is_receiver_style: true };
    vec![
        MacroKey { name: Rc::from("has"), arg_count: Some(1), is_receiver_style: false },
        receiver("all", Some(2)),
        receiver("exists", Some(2)),
        receiver("exists_one", Some(2)),
        receiver("existsOne", Some(2)),
        receiver("map", Some(2)),
        receiver("map", Some(3)),
        receiver("filter", Some(2)),
    ]
}

/// Expands every macro-shaped call in `ast` into its canonical comprehension
/// (or presence-test) form, consuming `ast` and returning the rewritten
/// tree. New node IDs continue `ast`'s monotonic sequence.
pub fn expand_macros(ast: Ast, env: &Env) -> Result<Ast, Vec<CelIssue>> {
    let mut ids = ast.id_generator();
    let mut macro_calls = ast.macro_calls;
    let mut errors = Vec::new();
    let root = expand(ast.root, env, &mut ids, &mut macro_calls, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }
    let next_id = ids.next_id().get();
    let mut out = Ast::new(root, ast.source, next_id);
    out.macro_calls = macro_calls;
    Ok(out)
}

fn expand(
    expr: Expr,
    env: &Env,
    ids: &mut IdGenerator,
    macro_calls: &mut std::collections::HashMap<ExprId, MacroCall>,
    errors: &mut Vec<CelIssue>,
) -> Expr {
    let expr = expand_children(expr, env, ids, macro_calls, errors);
    try_expand_call(expr, env, ids, macro_calls, errors)
}

fn expand_children(
    expr: Expr,
    env: &Env,
    ids: &mut IdGenerator,
    macro_calls: &mut std::collections::HashMap<ExprId, MacroCall>,
    errors: &mut Vec<CelIssue>,
) -> Expr {
    let Expr { id, kind } = expr;
    let kind = match kind {
        ExprKind::Select { operand, field, test_only } => ExprKind::Select {
            operand: Box::new(expand(*operand, env, ids, macro_calls, errors)),
            field,
            test_only,
        },
        ExprKind::Call { target, function, args } => ExprKind::Call {
            target: target.map(|t| Box::new(expand(*t, env, ids, macro_calls, errors))),
            function,
            args: args.into_iter().map(|a| expand(a, env, ids, macro_calls, errors)).collect(),
        },
        ExprKind::List { elements, optional_indices } => ExprKind::List {
            elements: elements.into_iter().map(|e| expand(e, env, ids, macro_calls, errors)).collect(),
            optional_indices,
        },
        ExprKind::Map { entries } => ExprKind::Map {
            entries: entries
                .into_iter()
                .map(|mut e| {
                    e.key = expand(e.key, env, ids, macro_calls, errors);
                    e.value = expand(e.value, env, ids, macro_calls, errors);
                    e
                })
                .collect(),
        },
        ExprKind::Struct { message_name, entries } => ExprKind::Struct {
            message_name,
            entries: entries
                .into_iter()
                .map(|mut e| {
                    e.value = expand(e.value, env, ids, macro_calls, errors);
                    e
                })
                .collect(),
        },
        other @ (ExprKind::Constant(_) | ExprKind::Ident(_) | ExprKind::Comprehension(_)) => other,
    };
    Expr::new(id, kind)
}

fn try_expand_call(
    expr: Expr,
    env: &Env,
    ids: &mut IdGenerator,
    macro_calls: &mut std::collections::HashMap<ExprId, MacroCall>,
    errors: &mut Vec<CelIssue>,
) -> Expr {
    let ExprKind::Call { target, function, args } = &expr.kind else {
        return expr;
    };

    let is_receiver = target.is_some();
    let key = MacroKey { name: function.clone(), arg_count: Some(args.len()), is_receiver_style: is_receiver };
    if !env.macros.contains(&key) {
        return expr;
    }

    let id = expr.id;
    let record_source = |macro_calls: &mut std::collections::HashMap<ExprId, MacroCall>, new_id: ExprId| {
        macro_calls.insert(
            new_id,
            MacroCall { function: function.clone(), target: target.clone(), args: args.clone() },
        );
    };

    match (&**function, is_receiver, args.len()) {
        ("has", false, 1) => match &args[0].kind {
            ExprKind::Select { operand, field, test_only: false } => {
                let node = make_presence_test(operand.clone(), field.clone(), id);
                record_source(macro_calls, node.id);
                node
            }
            _ => {
                errors.push(CelIssue::error(
                    IssueKind::Syntax,
                    Location::UNKNOWN,
                    "has() requires a field selection argument, e.g. has(e.f)",
                ));
                expr
            }
        },
        ("all", true, 2) | ("exists", true, 2) | ("exists_one" | "existsOne", true, 2) => {
            let target = target.clone().unwrap();
            let Some(iter_var) = ident_name(&args[0]) else {
                errors.push(CelIssue::error(IssueKind::Syntax, Location::UNKNOWN, "expected an identifier as the loop variable"));
                return expr;
            };
            let predicate = args[1].clone();
            let node = match &**function {
                "all" => {
                    let accu_init = bool_const(ids.next_id(), true);
                    let step = and_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), predicate);
                    let condition = not_strictly_false(ids.next_id(), ident(ids.next_id(), ACCU_VAR));
                    let result = ident(ids.next_id(), ACCU_VAR);
                    comprehension(id, iter_var, *target, ACCU_VAR.into(), accu_init, condition, step, result)
                }
                "exists" => {
                    let accu_init = bool_const(ids.next_id(), false);
                    let step = or_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), predicate);
                    let condition = not_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR));
                    let result = ident(ids.next_id(), ACCU_VAR);
                    comprehension(id, iter_var, *target, ACCU_VAR.into(), accu_init, condition, step, result)
                }
                _ => {
                    let accu_init = int_const(ids.next_id(), 0);
                    let increment = add_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), int_const(ids.next_id(), 1));
                    let step = ternary(ids.next_id(), predicate, increment, ident(ids.next_id(), ACCU_VAR));
                    let condition = bool_const(ids.next_id(), true);
                    let result = eq_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), int_const(ids.next_id(), 1));
                    comprehension(id, iter_var, *target, ACCU_VAR.into(), accu_init, condition, step, result)
                }
            };
            record_source(macro_calls, node.id);
            node
        }
        ("map", true, 2) | ("map", true, 3) | ("filter", true, 2) => {
            let target = target.clone().unwrap();
            let Some(iter_var) = ident_name(&args[0]) else {
                errors.push(CelIssue::error(IssueKind::Syntax, Location::UNKNOWN, "expected an identifier as the loop variable"));
                return expr;
            };
            let accu_init = empty_list(ids.next_id());
            let condition = bool_const(ids.next_id(), true);
            let (projection, predicate) = if args.len() == 3 { (args[2].clone(), Some(args[1].clone())) } else { (args[1].clone(), None) };
            let step = if &**function == "filter" {
                let appended = append_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), ident(ids.next_id(), &iter_var));
                ternary(ids.next_id(), args[1].clone(), appended, ident(ids.next_id(), ACCU_VAR))
            } else {
                let appended = append_call(ids.next_id(), ident(ids.next_id(), ACCU_VAR), projection);
                match predicate {
                    Some(p) => ternary(ids.next_id(), p, appended, ident(ids.next_id(), ACCU_VAR)),
                    None => appended,
                }
            };
            let result = ident(ids.next_id(), ACCU_VAR);
            let node = comprehension(id, iter_var, *target, ACCU_VAR.into(), accu_init, condition, step, result);
            record_source(macro_calls, node.id);
            node
        }
        _ => expr,
    }
}

fn ident_name(expr: &Expr) -> Option<Rc<str>> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        _ => None,
    }
}

fn ident(id: ExprId, name: &str) -> Expr {
    Expr::new(id, ExprKind::Ident(Rc::from(name)))
}

fn bool_const(id: ExprId, v: bool) -> Expr {
    Expr::new(id, ExprKind::Constant(Constant::Bool(v)))
}

fn int_const(id: ExprId, v: i64) -> Expr {
    Expr::new(id, ExprKind::Constant(Constant::Int(v)))
}

fn empty_list(id: ExprId) -> Expr {
    Expr::new(id, ExprKind::List { elements: vec![], optional_indices: vec![] })
}

fn call(id: ExprId, function: &str, args: Vec<Expr>) -> Expr {
    Expr::new(id, ExprKind::Call { target: None, function: Rc::from(function), args })
}

fn and_call(id: ExprId, a: Expr, b: Expr) -> Expr {
    call(id, crate::parser::ops::AND, vec![a, b])
}

fn or_call(id: ExprId, a: Expr, b: Expr) -> Expr {
    call(id, crate::parser::ops::OR, vec![a, b])
}

fn not_call(id: ExprId, a: Expr) -> Expr {
    call(id, crate::parser::ops::NOT, vec![a])
}

fn add_call(id: ExprId, a: Expr, b: Expr) -> Expr {
    call(id, crate::parser::ops::ADD, vec![a, b])
}

fn eq_call(id: ExprId, a: Expr, b: Expr) -> Expr {
    call(id, crate::parser::ops::EQ, vec![a, b])
}

fn ternary(id: ExprId, cond: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    call(id, crate::parser::ops::TERNARY, vec![cond, then_branch, else_branch])
}

fn append_call(id: ExprId, list: Expr, item: Expr) -> Expr {
    call(id, "__append__", vec![list, item])
}

/// `@not_strictly_false(e)`: true unless `e` evaluated to the literal
/// `false`; an error or unknown leaves the accumulator running, matching the
/// reference semantics of `all()`'s loop condition.
fn not_strictly_false(id: ExprId, e: Expr) -> Expr {
    call(id, "@not_strictly_false", vec![e])
}

#[allow(clippy::too_many_arguments)]
fn comprehension(
    id: ExprId,
    iter_var: Rc<str>,
    iter_range: Expr,
    accu_var: Rc<str>,
    accu_init: Expr,
    loop_condition: Expr,
    loop_step: Expr,
    result: Expr,
) -> Expr {
    make_comprehension(
        id,
        Comprehension {
            iter_var,
            iter_range: Box::new(iter_range),
            accu_var,
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, ParserOptions};
    use crate::source::Source;

    fn expand_src(src: &str) -> Ast {
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        expand_macros(ast, &Env::new()).unwrap()
    }

    #[test]
    fn has_lowers_to_presence_test_select() {
        let ast = expand_src("has(x.y)");
        assert!(matches!(ast.root.kind, ExprKind::Select { test_only: true, .. }));
    }

    #[test]
    fn has_rejects_non_selector_argument() {
        let ast = parse(&Source::new("has(x)", "<input>"), &ParserOptions::default()).unwrap();
        assert!(expand_macros(ast, &Env::new()).is_err());
    }

    #[test]
    fn all_lowers_to_comprehension_with_and_step() {
        let ast = expand_src("[1,2,3].all(x, x > 0)");
        match &ast.root.kind {
            ExprKind::Comprehension(c) => {
                assert_eq!(&*c.iter_var, "x");
                assert!(matches!(c.accu_init.kind, ExprKind::Constant(Constant::Bool(true))));
            }
            other => panic!("expected comprehension, got {other:?}"),
        }
    }

    #[test]
    fn macro_source_is_recorded_for_unparsing() {
        let ast = expand_src("has(x.y)");
        assert_eq!(ast.macro_calls.len(), 1);
    }
}
