//! Renders an [`Ast`] back to CEL source text.
//!
//! Binary/unary operators are reconstructed from their conventional `Call`
//! function names rather than walked as dedicated node kinds, mirroring how
//! the parser builds them in the first place. Macro-expanded comprehensions
//! consult the AST's macro-source side table and print the original
//! shorthand instead of the expanded loop (property U1).

use std::fmt::Write as _;

use crate::ast::{Ast, Constant, Expr, ExprKind};
use crate::parser::ops;

/// Unparses `ast` to source text, preferring macro shorthand over the
/// expanded comprehension form wherever the side table has an entry.
#[must_use]
pub fn unparse(ast: &Ast) -> String {
    let mut out = String::new();
    write_expr(&mut out, ast, &ast.root, 0);
    out
}

/// Binding power of an emitted expression, used to decide when a child needs
/// parentheses. Higher binds tighter.
fn precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Call { target: None, function, .. } => match &**function {
            f if f == ops::TERNARY => 1,
            f if f == ops::OR => 2,
            f if f == ops::AND => 3,
            f if [ops::LT, ops::LE, ops::GT, ops::GE, ops::EQ, ops::NE, ops::IN].contains(&f) => 4,
            f if f == ops::ADD || f == ops::SUB => 5,
            f if f == ops::MUL || f == ops::DIV || f == ops::MOD => 6,
            f if f == ops::NOT || f == ops::NEG => 7,
            _ => 9,
        },
        _ => 9,
    }
}

fn write_child(out: &mut String, ast: &Ast, parent: &Expr, child: &Expr, parent_prec: u8) {
    let child_prec = precedence_for_macro_or_expr(ast, child);
    if child_prec < parent_prec || (child_prec == parent_prec && is_right_associative_parent(parent)) {
        out.push('(');
        write_expr(out, ast, child, 0);
        out.push(')');
    } else {
        write_expr(out, ast, child, parent_prec);
    }
}

fn precedence_for_macro_or_expr(ast: &Ast, expr: &Expr) -> u8 {
    if ast.macro_calls.contains_key(&expr.id) {
        return 9;
    }
    precedence(expr)
}

fn is_right_associative_parent(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Call { target: None, function, .. } if &**function == ops::TERNARY)
}

fn write_expr(out: &mut String, ast: &Ast, expr: &Expr, parent_prec: u8) {
    if let Some(macro_call) = ast.macro_calls.get(&expr.id) {
        write_macro_call(out, ast, macro_call);
        return;
    }

    match &expr.kind {
        ExprKind::Constant(c) => write_constant(out, c),
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::Select { operand, field, test_only } => {
            if *test_only {
                let _ = write!(out, "has(");
                write_expr(out, ast, operand, 0);
                let _ = write!(out, ".{field})");
            } else {
                write_child(out, ast, expr, operand, 8);
                let _ = write!(out, ".{field}");
            }
        }
        ExprKind::Call { target, function, args } => write_call(out, ast, expr, target.as_deref(), function, args, parent_prec),
        ExprKind::List { elements, optional_indices } => {
            out.push('[');
            for (i, e) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if optional_indices.contains(&u32::try_from(i).unwrap_or(u32::MAX)) {
                    out.push('?');
                }
                write_expr(out, ast, e, 0);
            }
            out.push(']');
        }
        ExprKind::Map { entries } => {
            out.push('{');
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if entry.optional {
                    out.push('?');
                }
                write_expr(out, ast, &entry.key, 0);
                out.push_str(": ");
                write_expr(out, ast, &entry.value, 0);
            }
            out.push('}');
        }
        ExprKind::Struct { message_name, entries } => {
            out.push_str(message_name);
            out.push('{');
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if entry.optional {
                    out.push('?');
                }
                out.push_str(&entry.field);
                out.push_str(": ");
                write_expr(out, ast, &entry.value, 0);
            }
            out.push('}');
        }
        ExprKind::Comprehension(c) => {
            // No macro-source entry: emit the canonical loop form directly.
            let _ = write!(out, "__comprehension__(");
            out.push_str(&c.iter_var);
            out.push_str(", ");
            write_expr(out, ast, &c.iter_range, 0);
            out.push_str(", ");
            out.push_str(&c.accu_var);
            out.push_str(", ");
            write_expr(out, ast, &c.accu_init, 0);
            out.push_str(", ");
            write_expr(out, ast, &c.loop_condition, 0);
            out.push_str(", ");
            write_expr(out, ast, &c.loop_step, 0);
            out.push_str(", ");
            write_expr(out, ast, &c.result, 0);
            out.push(')');
        }
    }
}

fn write_macro_call(out: &mut String, ast: &Ast, macro_call: &crate::ast::MacroCall) {
    if let Some(target) = &macro_call.target {
        write_child(out, ast, target, target, 8);
        out.push('.');
    }
    out.push_str(&macro_call.function);
    out.push('(');
    for (i, a) in macro_call.args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, ast, a, 0);
    }
    out.push(')');
}

#[allow(clippy::too_many_arguments)]
fn write_call(out: &mut String, ast: &Ast, expr: &Expr, target: Option<&Expr>, function: &str, args: &[Expr], parent_prec: u8) {
    let prec = precedence(expr);
    match (target, function, args) {
        (None, f, [a]) if f == ops::NOT || f == ops::NEG => {
            out.push_str(if f == ops::NOT { "!" } else { "-" });
            write_child(out, ast, expr, a, prec);
        }
        (None, f, [a, b]) if is_binary_op(f) => {
            write_child(out, ast, expr, a, prec);
            let _ = write!(out, " {} ", symbol_for(f));
            let right_prec = if f == ops::SUB || f == ops::DIV || f == ops::MOD { prec + 1 } else { prec };
            write_child(out, ast, expr, b, right_prec);
        }
        (None, f, [cond, then_b, else_b]) if f == ops::TERNARY => {
            let needs_parens = parent_prec > prec;
            if needs_parens {
                out.push('(');
            }
            write_child(out, ast, expr, cond, 2);
            out.push_str(" ? ");
            write_expr(out, ast, then_b, 1);
            out.push_str(" : ");
            write_expr(out, ast, else_b, 1);
            if needs_parens {
                out.push(')');
            }
        }
        (None, f, [a, b]) if f == ops::INDEX || f == ops::OPT_INDEX => {
            write_child(out, ast, expr, a, 8);
            out.push_str(if f == ops::OPT_INDEX { "[?" } else { "[" });
            write_expr(out, ast, b, 0);
            out.push(']');
        }
        (Some(recv), f, rest) => {
            write_child(out, ast, expr, recv, 8);
            let _ = write!(out, ".{f}(");
            for (i, a) in rest.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, ast, a, 0);
            }
            out.push(')');
        }
        (None, f, rest) => {
            out.push_str(f);
            out.push('(');
            for (i, a) in rest.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, ast, a, 0);
            }
            out.push(')');
        }
    }
}

fn is_binary_op(f: &str) -> bool {
    [ops::ADD, ops::SUB, ops::MUL, ops::DIV, ops::MOD, ops::LT, ops::LE, ops::GT, ops::GE, ops::EQ, ops::NE, ops::AND, ops::OR, ops::IN]
        .contains(&f)
}

fn symbol_for(f: &str) -> &'static str {
    match f {
        f if f == ops::ADD => "+",
        f if f == ops::SUB => "-",
        f if f == ops::MUL => "*",
        f if f == ops::DIV => "/",
        f if f == ops::MOD => "%",
        f if f == ops::LT => "<",
        f if f == ops::LE => "<=",
        f if f == ops::GT => ">",
        f if f == ops::GE => ">=",
        f if f == ops::EQ => "==",
        f if f == ops::NE => "!=",
        f if f == ops::AND => "&&",
        f if f == ops::OR => "||",
        f if f == ops::IN => "in",
        _ => unreachable!("not a binary operator"),
    }
}

fn write_constant(out: &mut String, c: &Constant) {
    match c {
        Constant::Null => out.push_str("null"),
        Constant::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Constant::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Constant::UInt(u) => {
            let _ = write!(out, "{u}u");
        }
        Constant::Double(d) => {
            let _ = write!(out, "{d}");
        }
        Constant::String(s) => {
            let _ = write!(out, "{s:?}");
        }
        Constant::Bytes(b) => {
            let _ = write!(out, "b{:?}", String::from_utf8_lossy(b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};
    use crate::source::Source;

    fn roundtrip(src: &str) -> String {
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        unparse(&ast)
    }

    #[test]
    fn preserves_arithmetic_precedence() {
        assert_eq!(roundtrip("1 + 2 * 3"), "1 + 2 * 3");
        assert_eq!(roundtrip("(1 + 2) * 3"), "(1 + 2) * 3");
    }

    #[test]
    fn preserves_right_associative_subtraction_grouping() {
        assert_eq!(roundtrip("1 - (2 - 3)"), "1 - (2 - 3)");
        assert_eq!(roundtrip("(1 - 2) - 3"), "1 - 2 - 3");
    }

    #[test]
    fn macro_shorthand_survives_roundtrip() {
        let ast = parse(&Source::new("has(x.y)", "<input>"), &ParserOptions::default()).unwrap();
        let expanded = expand_macros(ast, &Env::new()).unwrap();
        assert_eq!(unparse(&expanded), "has(x.y)");
    }

    #[test]
    fn all_macro_shorthand_survives_roundtrip() {
        let ast = parse(&Source::new("[1,2].all(x, x > 0)", "<input>"), &ParserOptions::default()).unwrap();
        let expanded = expand_macros(ast, &Env::new()).unwrap();
        assert_eq!(unparse(&expanded), "[1, 2].all(x, x > 0)");
    }
}
