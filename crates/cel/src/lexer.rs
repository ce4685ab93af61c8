//! Hand-written lexer producing a flat token stream with byte spans.
//!
//! CEL's grammar is small enough that a lookup-table lexer outperforms a
//! generated one for this codebase's needs; the parser below consumes the
//! resulting `Vec<Token>` with a single token of lookahead.

use std::rc::Rc;

use crate::diagnostics::{CelIssue, IssueKind};
use crate::source::Location;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(Rc<str>),
    /// A back-tick quoted identifier, e.g. `` `a-b` ``. Only produced when
    /// quoted-identifier syntax is enabled.
    QuotedIdent(Rc<str>),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    True,
    False,
    Null,
    Dot,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
    In,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub byte_offset: u32,
}

pub struct LexOptions {
    pub enable_quoted_identifier_syntax: bool,
}

/// Tokenizes `text`. On a lexical error, returns the issue that should be
/// surfaced as a `Syntax` diagnostic — the caller attaches source location
/// via `Source::offset_to_location`.
pub fn lex(text: &str, opts: &LexOptions) -> Result<Vec<Token>, (u32, String)> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    let mut tokens = Vec::new();

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let (tok, next) = lex_number(text, i)?;
                tokens.push(Token { kind: tok, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            b'.' => {
                tokens.push(tok(TokenKind::Dot, start));
                i += 1;
            }
            b',' => {
                tokens.push(tok(TokenKind::Comma, start));
                i += 1;
            }
            b':' => {
                tokens.push(tok(TokenKind::Colon, start));
                i += 1;
            }
            b'?' => {
                tokens.push(tok(TokenKind::Question, start));
                i += 1;
            }
            b'(' => {
                tokens.push(tok(TokenKind::LParen, start));
                i += 1;
            }
            b')' => {
                tokens.push(tok(TokenKind::RParen, start));
                i += 1;
            }
            b'[' => {
                tokens.push(tok(TokenKind::LBracket, start));
                i += 1;
            }
            b']' => {
                tokens.push(tok(TokenKind::RBracket, start));
                i += 1;
            }
            b'{' => {
                tokens.push(tok(TokenKind::LBrace, start));
                i += 1;
            }
            b'}' => {
                tokens.push(tok(TokenKind::RBrace, start));
                i += 1;
            }
            b'+' => {
                tokens.push(tok(TokenKind::Plus, start));
                i += 1;
            }
            b'-' => {
                tokens.push(tok(TokenKind::Minus, start));
                i += 1;
            }
            b'*' => {
                tokens.push(tok(TokenKind::Star, start));
                i += 1;
            }
            b'%' => {
                tokens.push(tok(TokenKind::Percent, start));
                i += 1;
            }
            b'/' => {
                tokens.push(tok(TokenKind::Slash, start));
                i += 1;
            }
            b'<' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(tok(TokenKind::Le, start));
                i += 2;
            }
            b'<' => {
                tokens.push(tok(TokenKind::Lt, start));
                i += 1;
            }
            b'>' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(tok(TokenKind::Ge, start));
                i += 2;
            }
            b'>' => {
                tokens.push(tok(TokenKind::Gt, start));
                i += 1;
            }
            b'=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(tok(TokenKind::EqEq, start));
                i += 2;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(tok(TokenKind::NotEq, start));
                i += 2;
            }
            b'!' => {
                tokens.push(tok(TokenKind::Bang, start));
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(tok(TokenKind::AndAnd, start));
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(tok(TokenKind::OrOr, start));
                i += 2;
            }
            b'"' | b'\'' => {
                let (kind, next) = lex_string_or_bytes(text, i, false)?;
                tokens.push(Token { kind, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            b'b' | b'B' if matches!(bytes.get(i + 1), Some(b'"' | b'\'')) => {
                let (kind, next) = lex_string_or_bytes(text, i + 1, true)?;
                tokens.push(Token { kind, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            b'r' | b'R' if matches!(bytes.get(i + 1), Some(b'"' | b'\'')) => {
                let (kind, next) = lex_raw_string(text, i + 1)?;
                tokens.push(Token { kind, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            b'`' if opts.enable_quoted_identifier_syntax => {
                let (name, next) = lex_quoted_ident(text, i)?;
                tokens.push(Token {
                    kind: TokenKind::QuotedIdent(name.into()),
                    byte_offset: u32::try_from(start).unwrap_or(u32::MAX),
                });
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (tok_kind, next) = lex_number(text, i)?;
                tokens.push(Token { kind: tok_kind, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let next = ident_end(text, i);
                let word = &text[i..next];
                let kind = match word {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "in" => TokenKind::In,
                    _ => TokenKind::Ident(Rc::from(word)),
                };
                tokens.push(Token { kind, byte_offset: u32::try_from(start).unwrap_or(u32::MAX) });
                i = next;
            }
            _ => {
                return Err((u32::try_from(start).unwrap_or(u32::MAX), format!("unexpected character '{}'", c as char)));
            }
        }
    }
    tokens.push(tok(TokenKind::Eof, bytes.len()));
    Ok(tokens)
}

fn tok(kind: TokenKind, offset: usize) -> Token {
    Token { kind, byte_offset: u32::try_from(offset).unwrap_or(u32::MAX) }
}

fn ident_end(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    i
}

fn lex_number(text: &str, start: usize) -> Result<(TokenKind, usize), (u32, String)> {
    let bytes = text.as_bytes();
    let mut i = start;
    let hex = bytes.get(i) == Some(&b'0') && matches!(bytes.get(i + 1), Some(b'x' | b'X'));
    if hex {
        i += 2;
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        let is_unsigned = matches!(bytes.get(i), Some(b'u' | b'U'));
        let digits = &text[digits_start..i];
        let value = i64::from_str_radix(digits, 16)
            .map(|v| v as u64)
            .or_else(|_| u64::from_str_radix(digits, 16))
            .map_err(|_| (u32::try_from(start).unwrap_or(u32::MAX), "invalid hex literal".to_owned()))?;
        if is_unsigned {
            return Ok((TokenKind::UInt(value), i + 1));
        }
        return Ok((TokenKind::Int(value as i64), i));
    }

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if bytes.get(i) == Some(&b'.') && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    if is_float {
        let value: f64 = text[start..i]
            .parse()
            .map_err(|_| (u32::try_from(start).unwrap_or(u32::MAX), "invalid double literal".to_owned()))?;
        return Ok((TokenKind::Double(value), i));
    }

    let is_unsigned = matches!(bytes.get(i), Some(b'u' | b'U'));
    let digits = &text[start..i];
    if is_unsigned {
        let value: u64 = digits
            .parse()
            .map_err(|_| (u32::try_from(start).unwrap_or(u32::MAX), "invalid uint literal".to_owned()))?;
        return Ok((TokenKind::UInt(value), i + 1));
    }
    let value: i64 = digits
        .parse()
        .map_err(|_| (u32::try_from(start).unwrap_or(u32::MAX), "invalid int literal".to_owned()))?;
    Ok((TokenKind::Int(value), i))
}

fn lex_quoted_ident(text: &str, start: usize) -> Result<(String, usize), (u32, String)> {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    let content_start = i;
    while i < bytes.len() && bytes[i] != b'`' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err((u32::try_from(start).unwrap_or(u32::MAX), "unterminated quoted identifier".to_owned()));
    }
    Ok((text[content_start..i].to_owned(), i + 1))
}

fn lex_raw_string(text: &str, quote_start: usize) -> Result<(TokenKind, usize), (u32, String)> {
    let bytes = text.as_bytes();
    let quote = bytes[quote_start];
    let mut i = quote_start + 1;
    let content_start = i;
    while i < bytes.len() && bytes[i] != quote {
        i += 1;
    }
    if i >= bytes.len() {
        return Err((u32::try_from(quote_start).unwrap_or(u32::MAX), "unterminated string literal".to_owned()));
    }
    Ok((TokenKind::Str(Rc::from(&text[content_start..i])), i + 1))
}

fn lex_string_or_bytes(text: &str, quote_start: usize, as_bytes: bool) -> Result<(TokenKind, usize), (u32, String)> {
    let bytes = text.as_bytes();
    let quote = bytes[quote_start];
    let triple = bytes.get(quote_start + 1) == Some(&quote) && bytes.get(quote_start + 2) == Some(&quote);
    let (mut i, quote_len) = if triple { (quote_start + 3, 3) } else { (quote_start + 1, 1) };
    let mut out = String::new();
    loop {
        if i >= bytes.len() {
            return Err((u32::try_from(quote_start).unwrap_or(u32::MAX), "unterminated string literal".to_owned()));
        }
        if bytes[i] == quote && (!triple || (bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote))) {
            i += quote_len;
            break;
        }
        if bytes[i] == b'\\' {
            let (ch, next) = unescape(text, i)?;
            out.push(ch);
            i = next;
        } else {
            let ch = text[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    if as_bytes {
        Ok((TokenKind::Bytes(out.into_bytes().into()), i))
    } else {
        Ok((TokenKind::Str(out.into()), i))
    }
}

fn unescape(text: &str, backslash_at: usize) -> Result<(char, usize), (u32, String)> {
    let bytes = text.as_bytes();
    let esc = *bytes
        .get(backslash_at + 1)
        .ok_or((u32::try_from(backslash_at).unwrap_or(u32::MAX), "unterminated escape".to_owned()))?;
    let mapped = match esc {
        b'n' => Some('\n'),
        b't' => Some('\t'),
        b'r' => Some('\r'),
        b'\\' => Some('\\'),
        b'\'' => Some('\''),
        b'"' => Some('"'),
        b'`' => Some('`'),
        b'?' => Some('?'),
        b'a' => Some('\u{07}'),
        b'b' => Some('\u{08}'),
        b'f' => Some('\u{0C}'),
        b'v' => Some('\u{0B}'),
        b'0' => Some('\0'),
        _ => None,
    };
    if let Some(c) = mapped {
        return Ok((c, backslash_at + 2));
    }
    if esc == b'u' || esc == b'U' {
        let len = if esc == b'u' { 4 } else { 8 };
        let hex_start = backslash_at + 2;
        let hex = text
            .get(hex_start..hex_start + len)
            .ok_or((u32::try_from(backslash_at).unwrap_or(u32::MAX), "invalid unicode escape".to_owned()))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| (u32::try_from(backslash_at).unwrap_or(u32::MAX), "invalid unicode escape".to_owned()))?;
        let c = char::from_u32(code)
            .ok_or((u32::try_from(backslash_at).unwrap_or(u32::MAX), "invalid unicode code point".to_owned()))?;
        return Ok((c, hex_start + len));
    }
    if esc == b'x' {
        let hex_start = backslash_at + 2;
        let hex = text
            .get(hex_start..hex_start + 2)
            .ok_or((u32::try_from(backslash_at).unwrap_or(u32::MAX), "invalid hex escape".to_owned()))?;
        let code = u8::from_str_radix(hex, 16)
            .map_err(|_| (u32::try_from(backslash_at).unwrap_or(u32::MAX), "invalid hex escape".to_owned()))?;
        return Ok((code as char, hex_start + 2));
    }
    Err((u32::try_from(backslash_at).unwrap_or(u32::MAX), format!("unknown escape sequence '\\{}'", esc as char)))
}

pub(crate) fn issue_from_lex_error(offset: u32, message: String, location_fn: impl FnOnce(u32) -> Location) -> CelIssue {
    CelIssue::error(IssueKind::Syntax, location_fn(offset), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(text, &LexOptions { enable_quoted_identifier_syntax: true })
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_arithmetic_expression() {
        let ks = kinds("1 + 2 * 3");
        assert_eq!(
            ks,
            vec![
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::Star,
                TokenKind::Int(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_escapes() {
        let ks = kinds(r#"'a\nb'"#);
        assert_eq!(ks, vec![TokenKind::Str(Rc::from("a\nb")), TokenKind::Eof]);
    }

    #[test]
    fn lexes_unsigned_suffix() {
        let ks = kinds("42u");
        assert_eq!(ks, vec![TokenKind::UInt(42), TokenKind::Eof]);
    }

    #[test]
    fn lexes_hex_literal() {
        let ks = kinds("0x1A");
        assert_eq!(ks, vec![TokenKind::Int(26), TokenKind::Eof]);
    }
}
