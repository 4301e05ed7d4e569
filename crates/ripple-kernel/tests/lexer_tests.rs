//! Lexer tests using rstest for token-table parameterization.

use ripple_kernel::lexer::{tokenize, LexErrorKind, Token};
use rstest::rstest;

fn kinds(src: &str) -> Vec<Token> {
    tokenize(src)
        .unwrap_or_else(|e| panic!("lex error for {src:?}: {e}"))
        .into_iter()
        .map(|t| t.token)
        .collect()
}

fn error_kind(src: &str) -> LexErrorKind {
    tokenize(src)
        .expect_err(&format!("expected lex error for {src:?}"))
        .kind
}

// =============================================================================
// NUMBERS
// =============================================================================

#[rstest]
#[case("0", 0.0)]
#[case("233", 233.0)]
#[case("17.42", 17.42)]
#[case(".5", 0.5)]
#[case("233.", 233.0)]
#[case("1e3", 1000.0)]
#[case("1e+3", 1000.0)]
#[case("1E-3", 0.001)]
#[case(".5e2", 50.0)]
#[case("233e2", 23300.0)]
fn lex_number(#[case] src: &str, #[case] expected: f64) {
    assert_eq!(kinds(src), vec![Token::Number(expected)]);
}

#[rstest]
#[case("233e-")]
#[case("233e+")]
#[case("233e-a")]
fn lex_invalid_exponent(#[case] src: &str) {
    assert_eq!(error_kind(src), LexErrorKind::InvalidExponent);
}

#[test]
fn lex_number_then_exponent_letter() {
    // A bare `e` after digits is a separate identifier, not an error.
    assert_eq!(
        kinds("233e"),
        vec![Token::Number(233.0), Token::Ident("e".into())]
    );
}

// =============================================================================
// STRINGS
// =============================================================================

#[rstest]
#[case(r#""hello""#, "hello")]
#[case("'hello'", "hello")]
#[case(r#""a\nb""#, "a\nb")]
#[case(r#""a\tb""#, "a\tb")]
#[case(r#""a\r\f\vb""#, "a\r\u{000C}\u{000B}b")]
#[case(r#""say \"hi\"""#, "say \"hi\"")]
#[case(r"'it\'s'", "it's")]
#[case(r#""\u0041""#, "A")]
#[case(r#""\u00e9""#, "é")]
#[case(r#""\u00E9""#, "é")]
#[case(r#""\q""#, "q")]
#[case(r#""""#, "")]
fn lex_string(#[case] src: &str, #[case] expected: &str) {
    assert_eq!(kinds(src), vec![Token::Str(expected.into())]);
}

#[rstest]
#[case(r#""abc"#)]
#[case("'abc")]
#[case(r#""abc\""#)]
fn lex_unterminated_string(#[case] src: &str) {
    assert_eq!(error_kind(src), LexErrorKind::UnterminatedString);
}

#[rstest]
#[case(r#""\u12""#)]
#[case(r#""\uXYZW""#)]
#[case(r#""\ud800""#)]
fn lex_bad_unicode(#[case] src: &str) {
    assert_eq!(error_kind(src), LexErrorKind::InvalidUnicodeEscape);
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

#[rstest]
#[case("name")]
#[case("_private")]
#[case("$scope")]
#[case("a1_$2")]
#[case("true")]
#[case("undefined")]
#[case("this")]
fn lex_identifier(#[case] src: &str) {
    assert_eq!(kinds(src), vec![Token::Ident(src.into())]);
}

// =============================================================================
// OPERATORS & PUNCTUATION
// =============================================================================

#[test]
fn lex_all_operators() {
    assert_eq!(
        kinds("+ - * / % ! = == != === !== < > <= >= && || |"),
        vec![
            Token::Plus,
            Token::Minus,
            Token::Star,
            Token::Slash,
            Token::Percent,
            Token::Bang,
            Token::Eq,
            Token::EqEq,
            Token::NotEq,
            Token::EqEqEq,
            Token::NotEqEq,
            Token::Lt,
            Token::Gt,
            Token::LtEq,
            Token::GtEq,
            Token::And,
            Token::Or,
            Token::Pipe,
        ]
    );
}

#[test]
fn lex_all_punctuation() {
    assert_eq!(
        kinds("[ ] ( ) { } , : . ; ?"),
        vec![
            Token::LBracket,
            Token::RBracket,
            Token::LParen,
            Token::RParen,
            Token::LBrace,
            Token::RBrace,
            Token::Comma,
            Token::Colon,
            Token::Dot,
            Token::Semi,
            Token::Question,
        ]
    );
}

#[test]
fn lex_greedy_operator_runs() {
    // Longest-match: `===` is one token, and `====` is `===` `=`.
    assert_eq!(kinds("===="), vec![Token::EqEqEq, Token::Eq]);
    assert_eq!(kinds("!=="), vec![Token::NotEqEq]);
    assert_eq!(kinds("a===b"), vec![
        Token::Ident("a".into()),
        Token::EqEqEq,
        Token::Ident("b".into()),
    ]);
}

#[test]
fn lex_member_versus_leading_dot_number() {
    assert_eq!(kinds("a.b"), vec![
        Token::Ident("a".into()),
        Token::Dot,
        Token::Ident("b".into()),
    ]);
    assert_eq!(kinds("a[.5]"), vec![
        Token::Ident("a".into()),
        Token::LBracket,
        Token::Number(0.5),
        Token::RBracket,
    ]);
}

// =============================================================================
// WHITESPACE & ERRORS
// =============================================================================

#[rstest]
#[case("1 + 2")]
#[case("1\t+\t2")]
#[case("1\r\n+\n2")]
#[case("1\u{000B}+\u{000B}2")]
#[case("1\u{00A0}+\u{00A0}2")]
fn lex_whitespace_forms(#[case] src: &str) {
    assert_eq!(
        kinds(src),
        vec![Token::Number(1.0), Token::Plus, Token::Number(2.0)]
    );
}

#[rstest]
#[case("~")]
#[case("a @ b")]
#[case("#tag")]
#[case("a & b")]
fn lex_unexpected_character(#[case] src: &str) {
    assert_eq!(error_kind(src), LexErrorKind::UnexpectedCharacter);
}

#[test]
fn lex_error_reports_offset() {
    let err = tokenize("abc ~ def").unwrap_err();
    assert_eq!(err.pos, 4);
}
