//! Lexer for the expression language.
//!
//! Converts expression text into a stream of spanned tokens using the
//! logos lexer generator. Notable behaviours:
//!
//! - **Numbers**: integer/float with optional leading dot and
//!   exponent. `233e-` and `233e+` (an exponent sign with no digits)
//!   are lexical errors, matched by a dedicated error pattern that
//!   outmunches the plain number.
//! - **Strings**: single- or double-quoted. `\n \f \r \t \v \' \"` and
//!   `\uXXXX` decode; unknown escapes pass through verbatim; a bad
//!   unicode escape or a missing closing quote is a lexical error.
//! - **Operators**: matched longest-first, so `===` never lexes as
//!   `==` `=`.
//! - **Keywords**: none. `true`, `null`, `this` and friends lex as
//!   identifiers; the parser gives them meaning at primary position,
//!   which keeps `a.true` valid member access.

use std::fmt;
use std::ops::Range;

use logos::Logos;

/// What went wrong while lexing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LexErrorKind {
    #[default]
    UnexpectedCharacter,
    InvalidExponent,
    InvalidUnicodeEscape,
    UnterminatedString,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexErrorKind::UnexpectedCharacter => write!(f, "unexpected character"),
            LexErrorKind::InvalidExponent => write!(f, "invalid exponent"),
            LexErrorKind::InvalidUnicodeEscape => write!(f, "invalid unicode escape"),
            LexErrorKind::UnterminatedString => write!(f, "unterminated string"),
        }
    }
}

/// A lexical error with the offset it occurred at.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lexical error at offset {pos}: {kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub pos: usize,
}

/// Tokens produced by the expression lexer.
///
/// Tokens that carry semantic values (numbers, strings, identifiers)
/// include the decoded value directly; the raw text is recoverable by
/// slicing the source with the token's span.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\u{000B}\u{00A0}]+")]
pub enum Token {
    /// Number literal: `233`, `2.5`, `.5`, `233.`, `1e-3`.
    #[regex(r"(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?", lex_number)]
    #[regex(r"(?:[0-9]+\.?[0-9]*|\.[0-9]+)[eE][+-]", bad_exponent)]
    Number(f64),

    /// String literal with surrounding quotes stripped and escapes
    /// decoded.
    #[regex(r#""(?:[^"\\]|\\.)*""#, lex_string)]
    #[regex(r"'(?:[^'\\]|\\.)*'", lex_string)]
    #[regex(r#""(?:[^"\\]|\\.)*"#, unterminated_string)]
    #[regex(r"'(?:[^'\\]|\\.)*", unterminated_string)]
    Str(String),

    /// Identifier: `[A-Za-z_$][A-Za-z0-9_$]*`.
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    // ═══════════════════════════════════════════════════════════════
    // Operators (the trie picks the longest literal: `===` over `==`)
    // ═══════════════════════════════════════════════════════════════
    #[token("===")]
    EqEqEq,

    #[token("!==")]
    NotEqEq,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("<=")]
    LtEq,

    #[token(">=")]
    GtEq,

    #[token("&&")]
    And,

    #[token("||")]
    Or,

    #[token("=")]
    Eq,

    #[token("<")]
    Lt,

    #[token(">")]
    Gt,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("!")]
    Bang,

    #[token("|")]
    Pipe,

    // ═══════════════════════════════════════════════════════════════
    // Punctuation
    // ═══════════════════════════════════════════════════════════════
    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,

    #[token(";")]
    Semi,

    #[token("?")]
    Question,
}

impl Token {
    /// True for identifier tokens.
    pub fn is_identifier(&self) -> bool {
        matches!(self, Token::Ident(_))
    }
}

fn lex_number(lex: &mut logos::Lexer<Token>) -> Result<f64, LexErrorKind> {
    lex.slice().parse().map_err(|_| LexErrorKind::InvalidExponent)
}

fn bad_exponent(_lex: &mut logos::Lexer<Token>) -> Result<f64, LexErrorKind> {
    Err(LexErrorKind::InvalidExponent)
}

fn unterminated_string(_lex: &mut logos::Lexer<Token>) -> Result<String, LexErrorKind> {
    Err(LexErrorKind::UnterminatedString)
}

fn lex_string(lex: &mut logos::Lexer<Token>) -> Result<String, LexErrorKind> {
    decode_string(lex.slice())
}

/// Decode a quoted string literal: strip the quotes, process escapes.
fn decode_string(raw: &str) -> Result<String, LexErrorKind> {
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        // The token pattern guarantees a character follows the backslash.
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('f') => out.push('\u{000C}'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{000B}'),
            Some('u') => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let digit = chars
                        .next()
                        .and_then(|c| c.to_digit(16))
                        .ok_or(LexErrorKind::InvalidUnicodeEscape)?;
                    code = code * 16 + digit;
                }
                out.push(char::from_u32(code).ok_or(LexErrorKind::InvalidUnicodeEscape)?);
            }
            // Unknown escapes (including \' and \") pass through.
            Some(other) => out.push(other),
            None => return Err(LexErrorKind::UnterminatedString),
        }
    }
    Ok(out)
}

/// A token plus its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Range<usize>,
}

/// Tokenize an expression, failing on the first lexical error.
pub fn tokenize(src: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut lexer = Token::lexer(src);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(SpannedToken {
                token,
                span: lexer.span(),
            }),
            Err(kind) => {
                return Err(LexError {
                    kind,
                    pos: lexer.span().start,
                })
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("233"), vec![Token::Number(233.0)]);
        assert_eq!(kinds(".5"), vec![Token::Number(0.5)]);
        assert_eq!(kinds("233."), vec![Token::Number(233.0)]);
        assert_eq!(kinds("1e3"), vec![Token::Number(1000.0)]);
        assert_eq!(kinds("1E-3"), vec![Token::Number(0.001)]);
    }

    #[test]
    fn trailing_exponent_letter_is_an_identifier() {
        // `233e` lexes as the number 233 followed by the identifier e.
        assert_eq!(
            kinds("233e"),
            vec![Token::Number(233.0), Token::Ident("e".into())]
        );
    }

    #[test]
    fn signed_exponent_without_digits_is_rejected() {
        let err = tokenize("233e-").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidExponent);
        let err = tokenize("233e-a").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidExponent);
    }

    #[test]
    fn strings_decode_escapes() {
        assert_eq!(
            kinds(r#""a\tbA""#),
            vec![Token::Str("a\tbA".into())]
        );
        assert_eq!(kinds(r"'it\'s'"), vec![Token::Str("it's".into())]);
        // Unknown escapes pass through.
        assert_eq!(kinds(r#""\q""#), vec![Token::Str("q".into())]);
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let err = tokenize("'abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
    }

    #[test]
    fn bad_unicode_escape_is_rejected() {
        let err = tokenize(r#""\u12g4""#).unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidUnicodeEscape);
    }

    #[test]
    fn operators_are_greedy() {
        assert_eq!(kinds("==="), vec![Token::EqEqEq]);
        assert_eq!(kinds("=== ="), vec![Token::EqEqEq, Token::Eq]);
        assert_eq!(kinds("a||b"), vec![
            Token::Ident("a".into()),
            Token::Or,
            Token::Ident("b".into()),
        ]);
    }

    #[test]
    fn nbsp_is_whitespace() {
        assert_eq!(kinds("1\u{00A0}+\u{00A0}2"), vec![
            Token::Number(1.0),
            Token::Plus,
            Token::Number(2.0),
        ]);
    }

    #[test]
    fn unexpected_character_is_rejected() {
        let err = tokenize("1 # 2").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnexpectedCharacter);
        assert_eq!(err.pos, 2);
    }

    #[test]
    fn spans_recover_raw_text() {
        let src = r#"name | filter:"a""#;
        let tokens = tokenize(src).unwrap();
        let raw: Vec<&str> = tokens.iter().map(|t| &src[t.span.clone()]).collect();
        assert_eq!(raw, vec!["name", "|", "filter", ":", "\"a\""]);
    }
}
