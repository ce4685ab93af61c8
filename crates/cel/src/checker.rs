//! Static type checking over a parsed (and macro-expanded) [`Ast`].
//!
//! Problems accumulate into a `Vec<CelIssue>` instead of aborting on the
//! first failure, so a single `compile` call reports everything wrong with
//! an expression at once. Every node's inferred type is recorded in a side
//! table keyed by [`ExprId`] rather than written back into the tree, so the
//! checked result can still be unparsed or re-checked under different
//! options without cloning the whole AST.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Ast, Expr, ExprId, ExprKind};
use crate::diagnostics::{CelIssue, IssueKind};
use crate::env::{CheckerOptions, Env};
use crate::parser::ops;
use crate::source::Location;
use crate::types::{CelType, Substitution};

/// An [`Ast`] with every node's statically inferred type recorded.
#[derive(Debug, Clone)]
pub struct CheckedAst {
    pub ast: Ast,
    pub types: HashMap<ExprId, CelType>,
}

impl CheckedAst {
    #[must_use]
    pub fn type_of(&self, id: ExprId) -> CelType {
        self.types.get(&id).cloned().unwrap_or(CelType::Dyn)
    }
}

struct Scope<'a> {
    env: &'a Env,
    locals: Vec<HashMap<Rc<str>, CelType>>,
    types: HashMap<ExprId, CelType>,
    issues: Vec<CelIssue>,
}

impl<'a> Scope<'a> {
    fn lookup_local(&self, name: &str) -> Option<CelType> {
        self.locals.iter().rev().find_map(|frame| frame.get(name).cloned())
    }

    fn push_frame(&mut self) {
        self.locals.push(HashMap::new());
    }

    fn pop_frame(&mut self) {
        self.locals.pop();
    }

    fn bind(&mut self, name: Rc<str>, ty: CelType) {
        self.locals.last_mut().expect("at least one frame").insert(name, ty);
    }

    fn record(&mut self, id: ExprId, ty: CelType) -> CelType {
        self.types.insert(id, ty.clone());
        ty
    }

    fn error(&mut self, message: impl Into<String>) -> CelType {
        self.issues.push(CelIssue::error(IssueKind::TypeCheck, Location::UNKNOWN, message));
        CelType::Error
    }
}

/// Checks `ast` against `env`, returning the annotated tree or the full set
/// of problems found. A checked AST that contains `error`-typed nodes due to
/// diagnosed problems never reaches this `Ok` path — any [`CelIssue`] of
/// [`crate::diagnostics::Severity::Error`] routes the whole call to `Err`.
pub fn check(ast: Ast, env: &Env) -> Result<CheckedAst, Vec<CelIssue>> {
    let mut scope = Scope { env, locals: vec![HashMap::new()], types: HashMap::new(), issues: Vec::new() };
    check_expr(&mut scope, &ast.root);
    if scope.issues.iter().any(|i| i.severity == crate::diagnostics::Severity::Error) {
        return Err(scope.issues);
    }
    Ok(CheckedAst { ast, types: scope.types })
}

fn check_expr(scope: &mut Scope, expr: &Expr) -> CelType {
    let ty = match &expr.kind {
        ExprKind::Constant(c) => constant_type(c),
        ExprKind::Ident(name) => check_ident(scope, name),
        ExprKind::Select { operand, field, test_only } => check_select(scope, operand, field, *test_only),
        ExprKind::Call { target, function, args } => check_call(scope, target.as_deref(), function, args),
        ExprKind::List { elements, .. } => check_list(scope, elements),
        ExprKind::Map { entries } => check_map(scope, entries),
        ExprKind::Struct { message_name, entries } => check_struct(scope, message_name, entries),
        ExprKind::Comprehension(c) => check_comprehension(scope, c),
    };
    scope.record(expr.id, ty)
}

fn constant_type(c: &crate::ast::Constant) -> CelType {
    use crate::ast::Constant;
    match c {
        Constant::Null => CelType::Null,
        Constant::Bool(_) => CelType::Bool,
        Constant::Int(_) => CelType::Int,
        Constant::UInt(_) => CelType::UInt,
        Constant::Double(_) => CelType::Double,
        Constant::String(_) => CelType::String,
        Constant::Bytes(_) => CelType::Bytes,
    }
}

fn check_ident(scope: &mut Scope, name: &str) -> CelType {
    if let Some(ty) = scope.lookup_local(name) {
        return ty;
    }
    for candidate in scope.env.container.resolve_candidates(name) {
        if let Some(ty) = scope.env.variables.get(&candidate) {
            return ty.clone();
        }
        if scope.env.message_types.contains_key(candidate.as_str()) {
            return CelType::TypeOf(Box::new(CelType::Message(Rc::from(candidate.as_str()))));
        }
    }
    scope.error(format!("undeclared reference to '{name}'"))
}

fn check_select(scope: &mut Scope, operand: &Expr, field: &str, test_only: bool) -> CelType {
    let operand_ty = check_expr(scope, operand);
    if test_only {
        match &operand_ty {
            CelType::Dyn | CelType::Error | CelType::Message(_) | CelType::Map(..) => {}
            _ => {
                scope.error(format!("has() requires a message or map operand, found '{operand_ty}'"));
            }
        }
        return CelType::Bool;
    }
    match &operand_ty {
        CelType::Dyn | CelType::Error => CelType::Dyn,
        CelType::Map(_, v) => (**v).clone(),
        CelType::Message(name) => match scope.env.message_types.get(name) {
            Some(msg) => match msg.fields.get(field) {
                Some(ty) => ty.clone(),
                None => scope.error(format!("undefined field '{field}' for message '{name}'")),
            },
            None => scope.error(format!("unknown message type '{name}'")),
        },
        other => scope.error(format!("type '{other}' does not support field selection")),
    }
}

fn check_list(scope: &mut Scope, elements: &[Expr]) -> CelType {
    let mut elem_ty: Option<CelType> = None;
    for e in elements {
        let t = check_expr(scope, e);
        elem_ty = Some(match elem_ty {
            None => t,
            Some(prev) => prev.least_upper_bound(&t),
        });
    }
    CelType::List(Box::new(elem_ty.unwrap_or(CelType::Dyn)))
}

fn check_map(scope: &mut Scope, entries: &[crate::ast::MapEntry]) -> CelType {
    let mut key_ty = None;
    let mut val_ty = None;
    for entry in entries {
        let k = check_expr(scope, &entry.key);
        let v = check_expr(scope, &entry.value);
        key_ty = Some(key_ty.map_or(k.clone(), |prev: CelType| prev.least_upper_bound(&k)));
        val_ty = Some(val_ty.map_or(v.clone(), |prev: CelType| prev.least_upper_bound(&v)));
    }
    CelType::Map(Box::new(key_ty.unwrap_or(CelType::Dyn)), Box::new(val_ty.unwrap_or(CelType::Dyn)))
}

fn check_struct(scope: &mut Scope, message_name: &str, entries: &[crate::ast::StructEntry]) -> CelType {
    let fields = scope.env.message_types.get(message_name).map(|m| m.fields.clone());
    let Some(fields) = fields else {
        for entry in entries {
            check_expr(scope, &entry.value);
        }
        return scope.error(format!("unknown message type '{message_name}'"));
    };
    for entry in entries {
        let value_ty = check_expr(scope, &entry.value);
        match fields.get(entry.field.as_ref()) {
            Some(declared) if !declared.assignable_from(&value_ty) => {
                scope.error(format!(
                    "field '{}' of message '{message_name}' expects '{declared}', found '{value_ty}'",
                    entry.field
                ));
            }
            Some(_) => {}
            None => {
                scope.error(format!("message '{message_name}' has no field '{}'", entry.field));
            }
        }
    }
    CelType::Message(Rc::from(message_name))
}

fn check_comprehension(scope: &mut Scope, c: &crate::ast::Comprehension) -> CelType {
    let range_ty = check_expr(scope, &c.iter_range);
    let iter_ty = match &range_ty {
        CelType::List(elem) => (**elem).clone(),
        CelType::Map(k, _) => (**k).clone(),
        CelType::Dyn | CelType::Error => CelType::Dyn,
        other => {
            scope.error(format!("comprehension range must be a list or map, found '{other}'"));
            CelType::Dyn
        }
    };

    scope.push_frame();
    scope.bind(c.iter_var.clone(), iter_ty);
    let accu_ty = check_expr(scope, &c.accu_init);
    scope.bind(c.accu_var.clone(), accu_ty.clone());

    let cond_ty = check_expr(scope, &c.loop_condition);
    if !matches!(cond_ty, CelType::Bool | CelType::Dyn | CelType::Error) {
        scope.error(format!("comprehension loop condition must be bool, found '{cond_ty}'"));
    }
    let step_ty = check_expr(scope, &c.loop_step);
    if !accu_ty.assignable_from(&step_ty) {
        scope.error(format!("comprehension loop step produces '{step_ty}', incompatible with accumulator type '{accu_ty}'"));
    }
    let result_ty = check_expr(scope, &c.result);
    scope.pop_frame();
    result_ty
}

fn check_call(scope: &mut Scope, target: Option<&Expr>, function: &str, args: &[Expr]) -> CelType {
    if target.is_none() && (function == ops::AND || function == ops::OR) {
        for a in args {
            let t = check_expr(scope, a);
            if !matches!(t, CelType::Bool | CelType::Dyn | CelType::Error) {
                scope.error(format!("operand of '{function}' must be bool, found '{t}'"));
            }
        }
        return CelType::Bool;
    }
    if target.is_none() && function == ops::TERNARY {
        let cond_ty = check_expr(scope, &args[0]);
        if !matches!(cond_ty, CelType::Bool | CelType::Dyn | CelType::Error) {
            scope.error(format!("ternary condition must be bool, found '{cond_ty}'"));
        }
        let then_ty = check_expr(scope, &args[1]);
        let else_ty = check_expr(scope, &args[2]);
        return then_ty.least_upper_bound(&else_ty);
    }

    let target_ty = target.map(|t| check_expr(scope, t));
    let arg_tys: Vec<CelType> = args.iter().map(|a| check_expr(scope, a)).collect();

    let candidate_tys: Vec<CelType> = target_ty.iter().cloned().chain(arg_tys.iter().cloned()).collect();
    if candidate_tys.iter().any(|t| matches!(t, CelType::Dyn | CelType::Error)) {
        // Deferred dispatch: at least one operand's static type can't rule
        // out a match, so resolution moves to runtime (P5) and the checker
        // reports `dyn` rather than guessing.
        if resolve_overload(scope.env, function, target.is_some(), &candidate_tys).is_none()
            && !has_any_overload(scope.env, function, target.is_some(), candidate_tys.len())
        {
            return scope.error(format!("no known overload for '{function}'"));
        }
        return CelType::Dyn;
    }

    match resolve_overload(scope.env, function, target.is_some(), &candidate_tys) {
        Some(result_ty) => result_ty,
        None => scope.error(format!("no matching overload for '{function}'({})", describe(&candidate_tys))),
    }
}

fn describe(tys: &[CelType]) -> String {
    tys.iter().map(CelType::format).collect::<Vec<_>>().join(", ")
}

fn has_any_overload(env: &Env, function: &str, is_instance: bool, arity: usize) -> bool {
    builtin_overloads(function, &env.options.checker).iter().any(|o| o.is_instance == is_instance && o.param_types.len() == arity)
        || env.functions.get(function).is_some_and(|os| os.iter().any(|o| o.is_instance == is_instance && o.param_types.len() == arity))
}

fn resolve_overload(env: &Env, function: &str, is_instance: bool, arg_tys: &[CelType]) -> Option<CelType> {
    let builtins = builtin_overloads(function, &env.options.checker);
    let user = env.functions.get(function).cloned().unwrap_or_default();
    for overload in builtins.iter().chain(user.iter()) {
        if overload.is_instance != is_instance || overload.param_types.len() != arg_tys.len() {
            continue;
        }
        let mut subst = Substitution::new();
        if overload.param_types.iter().zip(arg_tys).all(|(p, a)| p.unify(a, &mut subst)) {
            return Some(overload.result_type.substitute(&subst));
        }
    }
    None
}

/// Operator overloads every checker understands without consulting the
/// environment's function table — `+ - * / % < <= > >= == != !_ -_ @in
/// _[_] _[?_]` plus `_?._`, the optional-chaining select lowering.
fn builtin_overloads(function: &str, options: &CheckerOptions) -> Vec<crate::env::Overload> {
    use crate::env::Overload;
    let num_pairs: &[(CelType, CelType)] =
        &[(CelType::Int, CelType::Int), (CelType::UInt, CelType::UInt), (CelType::Double, CelType::Double)];

    match function {
        f if f == ops::ADD => {
            let mut overloads: Vec<Overload> = num_pairs.iter().map(|(a, b)| Overload::global(f, vec![a.clone(), b.clone()], a.clone())).collect();
            overloads.push(Overload::global(f, vec![CelType::String, CelType::String], CelType::String));
            overloads.push(Overload::global(f, vec![CelType::Bytes, CelType::Bytes], CelType::Bytes));
            overloads.push(Overload::global(
                f,
                vec![CelType::List(Box::new(CelType::Param(Rc::from("A")))), CelType::List(Box::new(CelType::Param(Rc::from("A"))))],
                CelType::List(Box::new(CelType::Param(Rc::from("A")))),
            ));
            overloads.push(Overload::global(f, vec![CelType::Timestamp, CelType::Duration], CelType::Timestamp));
            overloads.push(Overload::global(f, vec![CelType::Duration, CelType::Duration], CelType::Duration));
            overloads
        }
        f if f == ops::SUB => {
            let mut overloads: Vec<Overload> = num_pairs.iter().map(|(a, b)| Overload::global(f, vec![a.clone(), b.clone()], a.clone())).collect();
            overloads.push(Overload::global(f, vec![CelType::Timestamp, CelType::Timestamp], CelType::Duration));
            overloads.push(Overload::global(f, vec![CelType::Timestamp, CelType::Duration], CelType::Timestamp));
            overloads.push(Overload::global(f, vec![CelType::Duration, CelType::Duration], CelType::Duration));
            overloads
        }
        f if f == ops::MUL || f == ops::DIV || f == ops::MOD => {
            num_pairs.iter().map(|(a, b)| Overload::global(f, vec![a.clone(), b.clone()], a.clone())).collect()
        }
        f if f == ops::NEG => vec![Overload::global(f, vec![CelType::Int], CelType::Int), Overload::global(f, vec![CelType::Double], CelType::Double)],
        f if f == ops::NOT => vec![Overload::global(f, vec![CelType::Bool], CelType::Bool)],
        f if [ops::LT, ops::LE, ops::GT, ops::GE].contains(&f) => {
            let mut overloads: Vec<Overload> = num_pairs.iter().map(|(a, b)| Overload::global(f, vec![a.clone(), b.clone()], CelType::Bool)).collect();
            if options.enable_heterogeneous_numeric_comparisons {
                for (a, b) in [(CelType::Int, CelType::UInt), (CelType::Int, CelType::Double), (CelType::UInt, CelType::Double)] {
                    overloads.push(Overload::global(f, vec![a.clone(), b.clone()], CelType::Bool));
                    overloads.push(Overload::global(f, vec![b, a], CelType::Bool));
                }
            }
            overloads.push(Overload::global(f, vec![CelType::String, CelType::String], CelType::Bool));
            overloads.push(Overload::global(f, vec![CelType::Bytes, CelType::Bytes], CelType::Bool));
            overloads.push(Overload::global(f, vec![CelType::Timestamp, CelType::Timestamp], CelType::Bool));
            overloads.push(Overload::global(f, vec![CelType::Duration, CelType::Duration], CelType::Bool));
            overloads
        }
        f if f == ops::EQ || f == ops::NE => {
            vec![Overload::global(f, vec![CelType::Param(Rc::from("A")), CelType::Param(Rc::from("A"))], CelType::Bool)]
        }
        f if f == ops::IN => vec![
            Overload::global(f, vec![CelType::Param(Rc::from("A")), CelType::List(Box::new(CelType::Param(Rc::from("A"))))], CelType::Bool),
            Overload::global(f, vec![CelType::Param(Rc::from("A")), CelType::Map(Box::new(CelType::Param(Rc::from("A"))), Box::new(CelType::Dyn))], CelType::Bool),
        ],
        f if f == ops::INDEX => vec![
            Overload::global(f, vec![CelType::List(Box::new(CelType::Param(Rc::from("A")))), CelType::Int], CelType::Param(Rc::from("A"))),
            Overload::global(f, vec![CelType::Map(Box::new(CelType::Param(Rc::from("K"))), Box::new(CelType::Param(Rc::from("V")))), CelType::Param(Rc::from("K"))], CelType::Param(Rc::from("V"))),
        ],
        f if f == ops::OPT_INDEX => vec![
            Overload::global(f, vec![CelType::List(Box::new(CelType::Param(Rc::from("A")))), CelType::Int], CelType::Optional(Box::new(CelType::Param(Rc::from("A"))))),
            Overload::global(f, vec![CelType::Map(Box::new(CelType::Param(Rc::from("K"))), Box::new(CelType::Param(Rc::from("V")))), CelType::Param(Rc::from("K"))], CelType::Optional(Box::new(CelType::Param(Rc::from("V"))))),
        ],
        "_?._" => vec![Overload::global("_?._", vec![CelType::Dyn, CelType::String], CelType::Optional(Box::new(CelType::Dyn)))],
        "__append__" => vec![Overload::global(
            "__append__",
            vec![CelType::List(Box::new(CelType::Param(Rc::from("A")))), CelType::Param(Rc::from("A"))],
            CelType::List(Box::new(CelType::Param(Rc::from("A")))),
        )],
        "@not_strictly_false" => vec![Overload::global("@not_strictly_false", vec![CelType::Bool], CelType::Bool)],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};
    use crate::source::Source;

    fn check_src(src: &str, env: &Env) -> Result<CheckedAst, Vec<CelIssue>> {
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        let ast = expand_macros(ast, env).unwrap();
        check(ast, env)
    }

    #[test]
    fn infers_arithmetic_result_type() {
        let checked = check_src("1 + 2", &Env::new()).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Int);
    }

    #[test]
    fn rejects_mismatched_operand_types() {
        let err = check_src("1 + 'a'", &Env::new()).unwrap_err();
        assert!(err.iter().any(|i| i.message.contains("no matching overload")));
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let err = check_src("x + 1", &Env::new()).unwrap_err();
        assert!(err.iter().any(|i| i.message.contains("undeclared reference")));
    }

    #[test]
    fn resolves_declared_variable_and_select() {
        let mut env = Env::new();
        env.declare_variable("x", CelType::Map(Box::new(CelType::String), Box::new(CelType::Int)));
        let checked = check_src("x.y", &env).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Int);
    }

    #[test]
    fn comprehension_binds_loop_variable_type() {
        let checked = check_src("[1, 2, 3].all(x, x > 0)", &Env::new()).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Bool);
    }

    #[test]
    fn dyn_operand_defers_to_runtime_dispatch() {
        let mut env = Env::new();
        env.declare_variable("x", CelType::Dyn);
        let checked = check_src("x + 1", &env).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Dyn);
    }

    #[test]
    fn heterogeneous_numeric_comparison_is_gated_by_option() {
        let err = check_src("1 < 2u", &Env::new()).unwrap_err();
        assert!(err.iter().any(|i| i.message.contains("no matching overload")));

        let mut env = Env::new();
        env.options.checker.enable_heterogeneous_numeric_comparisons = true;
        let checked = check_src("1 < 2u", &env).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Bool);
    }

    /// The stdlib's `<`/`<=`/`>`/`>=` registrations exist only to plug in
    /// their natives (dispatch is by function name, not overload), so the
    /// option must still gate them once the standard environment's own
    /// overloads are in the mix, not just the checker's built-in table.
    #[test]
    fn heterogeneous_numeric_comparison_is_gated_by_option_in_standard_env() {
        let err = check_src("1 < 2u", &crate::stdlib::standard_env()).unwrap_err();
        assert!(err.iter().any(|i| i.message.contains("no matching overload")));

        let mut env = crate::stdlib::standard_env();
        env.options.checker.enable_heterogeneous_numeric_comparisons = true;
        let checked = check_src("1 < 2u", &env).unwrap();
        assert_eq!(checked.type_of(checked.ast.root.id), CelType::Bool);
    }
}
