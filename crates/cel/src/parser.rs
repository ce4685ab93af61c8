//! Recursive-descent parser over the token stream produced by [`crate::lexer`].
//!
//! CEL's grammar is precedence-driven rather than deeply structured, so a
//! hand-written Pratt-style expression parser (a generated parser like
//! `lalrpop` earns its keep on much larger grammars, not this one) maps
//! directly onto the operator table in the external contract.

use std::rc::Rc;

use crate::ast::{Ast, Comprehension, Constant, Expr, ExprId, ExprKind, IdGenerator, MapEntry, StructEntry};
use crate::diagnostics::{CelIssue, IssueKind};
use crate::lexer::{self, LexOptions, Token, TokenKind};
use crate::source::{Location, Source};

/// Options controlling the parser's accepted surface syntax and resource
/// limits, matching the external `Options set` contract.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    pub max_code_point_count: Option<usize>,
    pub max_recursion_depth: Option<u32>,
    pub enable_optional_syntax: bool,
    pub enable_quoted_identifier_syntax: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_code_point_count: Some(100_000),
            max_recursion_depth: Some(250),
            enable_optional_syntax: true,
            enable_quoted_identifier_syntax: false,
        }
    }
}

/// Operator function names, matching conventional CEL call-node encodings
/// (binary/unary operators are ordinary global `Call` nodes, not a distinct
/// AST variant, so the checker and planner only ever need to special-case
/// `&&`/`||`/`?:` by function name rather than by node kind).
pub mod ops {
    pub const ADD: &str = "_+_";
    pub const SUB: &str = "_-_";
    pub const NEG: &str = "-_";
    pub const MUL: &str = "_*_";
    pub const DIV: &str = "_/_";
    pub const MOD: &str = "_%_";
    pub const NOT: &str = "!_";
    pub const LT: &str = "_<_";
    pub const LE: &str = "_<=_";
    pub const GT: &str = "_>_";
    pub const GE: &str = "_>=_";
    pub const EQ: &str = "_==_";
    pub const NE: &str = "_!=_";
    pub const AND: &str = "_&&_";
    pub const OR: &str = "_||_";
    pub const TERNARY: &str = "_?_:_";
    pub const IN: &str = "@in";
    pub const INDEX: &str = "_[_]";
    pub const OPT_INDEX: &str = "_[?_]";
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a Source,
    ids: IdGenerator,
    options: &'a ParserOptions,
    depth: u32,
    errors: Vec<CelIssue>,
}

type PResult<T> = Result<T, ()>;

/// Parses `source` into an unexpanded AST (macros are not yet lowered — see
/// [`crate::macros::expand_macros`]).
pub fn parse(source: &Source, options: &ParserOptions) -> Result<Ast, Vec<CelIssue>> {
    if let Some(max) = options.max_code_point_count {
        if source.code_point_count() > max {
            return Err(vec![CelIssue::error(
                IssueKind::Syntax,
                Location::UNKNOWN,
                format!("expression exceeds maximum size of {max} code points"),
            )]);
        }
    }

    let tokens = lexer::lex(
        source.text(),
        &LexOptions {
            enable_quoted_identifier_syntax: options.enable_quoted_identifier_syntax,
        },
    )
    .map_err(|(offset, msg)| vec![CelIssue::error(IssueKind::Syntax, source.offset_to_location(offset), msg)])?;

    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
        ids: IdGenerator::new(),
        options,
        depth: 0,
        errors: Vec::new(),
    };

    let root = match parser.parse_conditional() {
        Ok(expr) => expr,
        Err(()) => return Err(parser.errors),
    };

    if !matches!(parser.peek().kind, TokenKind::Eof) {
        parser.error_at_current("unexpected trailing input");
        return Err(parser.errors);
    }

    if !parser.errors.is_empty() {
        return Err(parser.errors);
    }

    Ok(Ast::new(root, source.clone(), parser.ids.next_id().get()))
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn location_here(&self) -> Location {
        self.source.offset_to_location(self.peek().byte_offset)
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        self.errors.push(CelIssue::error(IssueKind::Syntax, self.location_here(), message.into()));
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if let Some(max) = self.options.max_recursion_depth {
            if self.depth > max {
                self.error_at_current(format!("expression nested too deeply (limit is {max})"));
                return Err(());
            }
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn next_id(&mut self) -> ExprId {
        self.ids.next_id()
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else {
            self.error_at_current(format!("expected {what}"));
            Err(())
        }
    }

    // conditional := or ('?' conditional ':' conditional)?
    fn parse_conditional(&mut self) -> PResult<Expr> {
        self.enter()?;
        let cond = self.parse_or()?;
        let result = if matches!(self.peek().kind, TokenKind::Question) {
            let id = self.next_id();
            self.advance();
            let then_branch = self.parse_conditional()?;
            self.expect(&TokenKind::Colon, "':' in conditional expression")?;
            let else_branch = self.parse_conditional()?;
            Expr::new(
                id,
                ExprKind::Call {
                    target: None,
                    function: Rc::from(ops::TERNARY),
                    args: vec![cond, then_branch, else_branch],
                },
            )
        } else {
            cond
        };
        self.leave();
        Ok(result)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        while matches!(self.peek().kind, TokenKind::OrOr) {
            let id = self.next_id();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(ops::OR), args: vec![lhs, rhs] });
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_relation()?;
        while matches!(self.peek().kind, TokenKind::AndAnd) {
            let id = self.next_id();
            self.advance();
            let rhs = self.parse_relation()?;
            lhs = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(ops::AND), args: vec![lhs, rhs] });
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_relation(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => ops::LT,
                TokenKind::Le => ops::LE,
                TokenKind::Gt => ops::GT,
                TokenKind::Ge => ops::GE,
                TokenKind::EqEq => ops::EQ,
                TokenKind::NotEq => ops::NE,
                TokenKind::In => ops::IN,
                _ => break,
            };
            let id = self.next_id();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(op), args: vec![lhs, rhs] });
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => ops::ADD,
                TokenKind::Minus => ops::SUB,
                _ => break,
            };
            let id = self.next_id();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(op), args: vec![lhs, rhs] });
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => ops::MUL,
                TokenKind::Slash => ops::DIV,
                TokenKind::Percent => ops::MOD,
                _ => break,
            };
            let id = self.next_id();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(op), args: vec![lhs, rhs] });
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = match self.peek().kind {
            TokenKind::Bang => {
                let id = self.next_id();
                self.advance();
                let operand = self.parse_unary()?;
                Expr::new(id, ExprKind::Call { target: None, function: Rc::from(ops::NOT), args: vec![operand] })
            }
            TokenKind::Minus => {
                let id = self.next_id();
                self.advance();
                let operand = self.parse_unary()?;
                Expr::new(id, ExprKind::Call { target: None, function: Rc::from(ops::NEG), args: vec![operand] })
            }
            _ => self.parse_postfix()?,
        };
        self.leave();
        Ok(result)
    }

    // postfix := primary ( '.' ident call-args? | '[' expr ']' )*
    fn parse_postfix(&mut self) -> PResult<Expr> {
        self.enter()?;
        let mut expr = self.parse_primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let optional = self.options.enable_optional_syntax && matches!(self.peek().kind, TokenKind::Question);
                    if optional {
                        self.advance();
                    }
                    let field = self.parse_field_name()?;
                    if matches!(self.peek().kind, TokenKind::LParen) {
                        let id = self.next_id();
                        let args = self.parse_call_args()?;
                        expr = Expr::new(id, ExprKind::Call { target: Some(Box::new(expr)), function: field, args });
                    } else if !optional && matches!(self.peek().kind, TokenKind::LBrace) && pure_dotted_name(&expr).is_some() {
                        let id = self.next_id();
                        let message_name = format!("{}.{field}", pure_dotted_name(&expr).unwrap());
                        expr = self.parse_struct_body(id, Rc::from(message_name.as_str()))?;
                    } else {
                        let id = self.next_id();
                        if optional {
                            expr = Expr::new(
                                id,
                                ExprKind::Call {
                                    target: None,
                                    function: Rc::from("_?._"),
                                    args: vec![expr, Expr::new(id, ExprKind::Constant(Constant::String(field)))],
                                },
                            );
                        } else {
                            expr = Expr::new(id, ExprKind::Select { operand: Box::new(expr), field, test_only: false });
                        }
                    }
                }
                TokenKind::LBracket => {
                    let id = self.next_id();
                    self.advance();
                    let optional = self.options.enable_optional_syntax && matches!(self.peek().kind, TokenKind::Question);
                    if optional {
                        self.advance();
                    }
                    let index = self.parse_conditional()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    let function = if optional { ops::OPT_INDEX } else { ops::INDEX };
                    expr = Expr::new(id, ExprKind::Call { target: None, function: Rc::from(function), args: vec![expr, index] });
                }
                _ => break,
            }
        }
        self.leave();
        Ok(expr)
    }

    fn parse_field_name(&mut self) -> PResult<Rc<str>> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::QuotedIdent(name) => {
                self.advance();
                Ok(name)
            }
            _ => {
                self.error_at_current("expected field name");
                Err(())
            }
        }
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RParen) {
            loop {
                args.push(self.parse_conditional()?);
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let id = self.next_id();
        let result = match self.peek().kind.clone() {
            TokenKind::Int(v) => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Int(v)))
            }
            TokenKind::UInt(v) => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::UInt(v)))
            }
            TokenKind::Double(v) => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Double(v)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::String(s)))
            }
            TokenKind::Bytes(b) => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Bytes(b)))
            }
            TokenKind::True => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Expr::new(id, ExprKind::Constant(Constant::Null))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_conditional()?;
                self.expect(&TokenKind::RParen, "')'")?;
                inner
            }
            TokenKind::LBracket => self.parse_list(id)?,
            TokenKind::LBrace => self.parse_map(id)?,
            TokenKind::Ident(_) | TokenKind::Dot => self.parse_ident_or_call_or_struct(id)?,
            _ => {
                self.error_at_current("expected expression");
                return Err(());
            }
        };
        self.leave();
        Ok(result)
    }

    fn parse_list(&mut self, id: ExprId) -> PResult<Expr> {
        self.advance(); // '['
        let mut elements = Vec::new();
        let mut optional_indices = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RBracket) {
            loop {
                let optional = self.options.enable_optional_syntax && matches!(self.peek().kind, TokenKind::Question);
                if optional {
                    self.advance();
                    optional_indices.push(u32::try_from(elements.len()).unwrap_or(u32::MAX));
                }
                elements.push(self.parse_conditional()?);
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                    if matches!(self.peek().kind, TokenKind::RBracket) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::new(id, ExprKind::List { elements, optional_indices }))
    }

    fn parse_map(&mut self, id: ExprId) -> PResult<Expr> {
        self.advance(); // '{'
        let mut entries = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RBrace) {
            loop {
                let entry_id = self.next_id();
                let optional = self.options.enable_optional_syntax && matches!(self.peek().kind, TokenKind::Question);
                if optional {
                    self.advance();
                }
                let key = self.parse_conditional()?;
                self.expect(&TokenKind::Colon, "':'")?;
                let value = self.parse_conditional()?;
                entries.push(MapEntry { id: entry_id, key, value, optional });
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                    if matches!(self.peek().kind, TokenKind::RBrace) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::new(id, ExprKind::Map { entries }))
    }

    /// Parses a single (possibly leading-dot, absolute) identifier segment,
    /// then decides whether it's a variable reference, a global function
    /// call, or the start of a message-struct literal. Dotted chains beyond
    /// this single segment are left to the postfix loop, which folds a
    /// trailing `.field{...}` back into a qualified struct name (see
    /// [`pure_dotted_name`]) and otherwise builds ordinary `Select`/receiver
    /// `Call` nodes — exactly as a real CEL grammar resolves the
    /// select-vs-qualified-name ambiguity.
    fn parse_ident_or_call_or_struct(&mut self, id: ExprId) -> PResult<Expr> {
        let leading_dot = matches!(self.peek().kind, TokenKind::Dot);
        if leading_dot {
            self.advance();
        }
        let name = self.parse_field_name()?;
        let full_name: Rc<str> = if leading_dot { Rc::from(format!(".{name}").as_str()) } else { name };

        if matches!(self.peek().kind, TokenKind::LParen) {
            let args = self.parse_call_args()?;
            return Ok(Expr::new(id, ExprKind::Call { target: None, function: full_name, args }));
        }
        if matches!(self.peek().kind, TokenKind::LBrace) {
            return self.parse_struct_body(id, full_name);
        }
        Ok(Expr::new(id, ExprKind::Ident(full_name)))
    }

    fn parse_struct_body(&mut self, id: ExprId, message_name: Rc<str>) -> PResult<Expr> {
        self.advance(); // '{'
        let mut entries = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RBrace) {
            loop {
                let entry_id = self.next_id();
                let optional = self.options.enable_optional_syntax && matches!(self.peek().kind, TokenKind::Question);
                if optional {
                    self.advance();
                }
                let field = self.parse_field_name()?;
                self.expect(&TokenKind::Colon, "':'")?;
                let value = self.parse_conditional()?;
                entries.push(StructEntry { id: entry_id, field, value, optional });
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                    if matches!(self.peek().kind, TokenKind::RBrace) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::new(id, ExprKind::Struct { message_name, entries }))
    }
}

/// Returns the dotted name of `expr` if it is composed entirely of plain
/// identifiers and non-presence-test selects (`a`, `a.b`, `a.b.c`, …), the
/// only shape a message-struct literal's type name may take.
fn pure_dotted_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name.to_string()),
        ExprKind::Select { operand, field, test_only: false } => {
            pure_dotted_name(operand).map(|base| format!("{base}.{field}"))
        }
        _ => None,
    }
}

/// Builds the `has(e.f)` presence-test node from a macro-expanded call; kept
/// here (rather than in `macros.rs`) because it needs direct access to the
/// `Select` shape the parser itself produces.
#[must_use]
pub fn make_presence_test(operand: Box<Expr>, field: Rc<str>, id: ExprId) -> Expr {
    Expr::new(id, ExprKind::Select { operand, field, test_only: true })
}

#[must_use]
pub fn make_comprehension(id: ExprId, c: Comprehension) -> Expr {
    Expr::new(id, ExprKind::Comprehension(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Ast {
        parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let ast = parse_ok("1 + 2 * 3");
        match &ast.root.kind {
            ExprKind::Call { function, args, .. } => {
                assert_eq!(&**function, ops::ADD);
                assert!(matches!(args[0].kind, ExprKind::Constant(Constant::Int(1))));
                match &args[1].kind {
                    ExprKind::Call { function, .. } => assert_eq!(&**function, ops::MUL),
                    other => panic!("expected mul call, got {other:?}"),
                }
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parses_field_selection_and_call() {
        let ast = parse_ok("a.b.c(1)");
        match &ast.root.kind {
            ExprKind::Call { target: Some(target), function, .. } => {
                assert_eq!(&**function, "c");
                assert!(matches!(&target.kind, ExprKind::Select { field, .. } if &**field == "b"));
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn parses_ternary_right_associative() {
        let ast = parse_ok("true ? 1 : false ? 2 : 3");
        match &ast.root.kind {
            ExprKind::Call { function, args, .. } => {
                assert_eq!(&**function, ops::TERNARY);
                assert!(matches!(args[2].kind, ExprKind::Call { .. }));
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn rejects_source_over_size_limit() {
        let opts = ParserOptions { max_code_point_count: Some(3), ..ParserOptions::default() };
        let err = parse(&Source::new("1 + 2", "<input>"), &opts).unwrap_err();
        assert_eq!(err[0].kind, IssueKind::Syntax);
    }

    #[test]
    fn rejects_deep_recursion() {
        let mut src = String::new();
        for _ in 0..40 {
            src.push_str("1 + (");
        }
        src.push('1');
        for _ in 0..40 {
            src.push(')');
        }
        let opts = ParserOptions { max_recursion_depth: Some(32), ..ParserOptions::default() };
        let err = parse(&Source::new(&src, "<input>"), &opts).unwrap_err();
        assert!(err.iter().any(|i| i.message.contains("limit")));
    }

    #[test]
    fn parses_struct_literal() {
        let ast = parse_ok("pkg.Msg{field: 1}");
        match &ast.root.kind {
            ExprKind::Struct { message_name, entries } => {
                assert_eq!(&**message_name, "pkg.Msg");
                assert_eq!(entries.len(), 1);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn parses_list_and_map_literals() {
        let ast = parse_ok("[1, 2, 3]");
        assert!(matches!(ast.root.kind, ExprKind::List { .. }));
        let ast = parse_ok("{'a': 1}");
        assert!(matches!(ast.root.kind, ExprKind::Map { .. }));
    }
}
