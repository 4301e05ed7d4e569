//! Parser for the expression language.
//!
//! Hand-written recursive descent, one function per precedence tier:
//!
//! ```text
//! program        :=  filter (';' filter)* ';'?
//! filter         :=  assignment ('|' identifier (':' assignment)*)*
//! assignment     :=  ternary ('=' assignment)?
//! ternary        :=  logicalOr ('?' assignment ':' assignment)?
//! logicalOr      :=  logicalAnd ('||' logicalAnd)*
//! logicalAnd     :=  equality ('&&' equality)*
//! equality       :=  relational (('=='|'!='|'==='|'!==') relational)*
//! relational     :=  additive (('<'|'>'|'<='|'>=') additive)*
//! additive       :=  multiplicative (('+'|'-') multiplicative)*
//! multiplicative :=  unary (('*'|'/'|'%') unary)*
//! unary          :=  ('+'|'-'|'!') unary | primary
//! primary        :=  '(' filter ')' | arrayLit | objectLit | constant
//!                 |  identifier, each followed by suffix*
//! suffix         :=  '.' identifier | '[' filter ']' | '(' args ')'
//! ```
//!
//! `this`, `null`, `true`, `false` and `undefined` are ordinary
//! identifiers to the lexer and become constants only at primary
//! position. The target of `=` must be an identifier or member
//! expression; anything else is rejected at parse time.

use ripple_types::Value;

use crate::ast::{Ast, BinaryOp, LogicalOp, MemberKey, Property, UnaryOp};
use crate::error::Error;
use crate::lexer::{tokenize, SpannedToken, Token};

/// A parse failure: what was expected, what was found, and where.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at offset {pos}: expected {expected}, found {}", found_text(.found))]
pub struct ParseError {
    pub expected: String,
    pub found: Option<String>,
    pub pos: usize,
}

fn found_text(found: &Option<String>) -> String {
    match found {
        Some(text) => format!("{text:?}"),
        None => "end of expression".to_string(),
    }
}

/// Parse an expression into its AST.
pub fn parse(src: &str) -> Result<Ast, Error> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let program = parser.program()?;
    Ok(program)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume the given token if it is next.
    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_is(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, description: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error_here(description))
        }
    }

    fn expect_ident(&mut self, description: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(SpannedToken {
                    token: Token::Ident(name),
                    ..
                }) => Ok(name),
                _ => unreachable!("peeked identifier"),
            },
            _ => Err(self.error_here(description)),
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(t) => ParseError {
                expected: expected.to_string(),
                found: Some(self.src[t.span.clone()].to_string()),
                pos: t.span.start,
            },
            None => ParseError {
                expected: expected.to_string(),
                found: None,
                pos: self.src.len(),
            },
        }
    }

    fn program(&mut self) -> Result<Ast, ParseError> {
        let mut body = Vec::new();
        loop {
            if !self.at_end() && !self.peek_is(&Token::Semi) {
                body.push(self.filter_chain()?);
            }
            if !self.eat(&Token::Semi) {
                if self.at_end() {
                    return Ok(Ast::Program { body });
                }
                return Err(self.error_here("';' or end of expression"));
            }
            if self.at_end() {
                return Ok(Ast::Program { body });
            }
        }
    }

    fn filter_chain(&mut self) -> Result<Ast, ParseError> {
        let mut node = self.assignment()?;
        while self.eat(&Token::Pipe) {
            let name = self.expect_ident("a filter name")?;
            let mut args = vec![node];
            while self.eat(&Token::Colon) {
                args.push(self.assignment()?);
            }
            node = Ast::Call {
                callee: Box::new(Ast::Identifier { name }),
                args,
                filter: true,
            };
        }
        Ok(node)
    }

    fn assignment(&mut self) -> Result<Ast, ParseError> {
        let left = self.ternary()?;
        if self.eat(&Token::Eq) {
            if !left.is_assignable() {
                return Err(self.error_at_current(
                    "an assignable expression (identifier or member) left of '='",
                ));
            }
            let right = self.assignment()?;
            return Ok(Ast::Assign {
                target: Box::new(left),
                value: Box::new(right),
            });
        }
        Ok(left)
    }

    /// Error anchored at the token just consumed (or the next one).
    fn error_at_current(&self, expected: &str) -> ParseError {
        let anchor = self.pos.saturating_sub(1);
        match self.tokens.get(anchor) {
            Some(t) => ParseError {
                expected: expected.to_string(),
                found: Some(self.src[t.span.clone()].to_string()),
                pos: t.span.start,
            },
            None => ParseError {
                expected: expected.to_string(),
                found: None,
                pos: self.src.len(),
            },
        }
    }

    fn ternary(&mut self) -> Result<Ast, ParseError> {
        let test = self.logical_or()?;
        if self.eat(&Token::Question) {
            let then = self.assignment()?;
            self.expect(&Token::Colon, "':' in ternary expression")?;
            let otherwise = self.assignment()?;
            return Ok(Ast::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(test)
    }

    fn logical_or(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.logical_and()?;
        while self.eat(&Token::Or) {
            let right = self.logical_and()?;
            left = Ast::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Ast::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEqEq) => BinaryOp::StrictEq,
                Some(Token::NotEqEq) => BinaryOp::StrictNe,
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.relational()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn relational(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::LtEq) => BinaryOp::Le,
                Some(Token::GtEq) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn additive(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Ast, ParseError> {
        let op = match self.peek() {
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Minus) => Some(UnaryOp::Minus),
            Some(Token::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                Ok(Ast::Unary {
                    op,
                    operand: Box::new(self.unary()?),
                })
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Ast, ParseError> {
        let node = if self.eat(&Token::LParen) {
            let inner = self.filter_chain()?;
            self.expect(&Token::RParen, "')'")?;
            inner
        } else if self.eat(&Token::LBracket) {
            self.array_literal()?
        } else if self.eat(&Token::LBrace) {
            self.object_literal()?
        } else {
            match self.advance() {
                Some(SpannedToken {
                    token: Token::Ident(name),
                    ..
                }) => match name.as_str() {
                    "true" => Ast::Literal {
                        value: Value::Bool(true),
                    },
                    "false" => Ast::Literal {
                        value: Value::Bool(false),
                    },
                    "null" => Ast::Literal { value: Value::Null },
                    "undefined" => Ast::Literal {
                        value: Value::Undefined,
                    },
                    "this" => Ast::This,
                    _ => Ast::Identifier { name },
                },
                Some(SpannedToken {
                    token: Token::Number(n),
                    ..
                }) => Ast::Literal {
                    value: Value::Num(n),
                },
                Some(SpannedToken {
                    token: Token::Str(s),
                    ..
                }) => Ast::Literal {
                    value: Value::Str(s),
                },
                _ => return Err(self.error_at_current("an expression")),
            }
        };
        self.suffixes(node)
    }

    fn suffixes(&mut self, mut node: Ast) -> Result<Ast, ParseError> {
        loop {
            if self.eat(&Token::Dot) {
                let name = self.expect_ident("a property name after '.'")?;
                node = Ast::Member {
                    object: Box::new(node),
                    key: MemberKey::Name(name),
                };
            } else if self.eat(&Token::LBracket) {
                let key = self.filter_chain()?;
                self.expect(&Token::RBracket, "']'")?;
                node = Ast::Member {
                    object: Box::new(node),
                    key: MemberKey::Computed(Box::new(key)),
                };
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.peek_is(&Token::RParen) {
                    loop {
                        args.push(self.assignment()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen, "')'")?;
                node = Ast::Call {
                    callee: Box::new(node),
                    args,
                    filter: false,
                };
            } else {
                return Ok(node);
            }
        }
    }

    /// `[` already consumed. Trailing comma before `]` is allowed.
    fn array_literal(&mut self) -> Result<Ast, ParseError> {
        let mut elements = Vec::new();
        if !self.peek_is(&Token::RBracket) {
            loop {
                if self.peek_is(&Token::RBracket) {
                    break;
                }
                elements.push(self.assignment()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Ast::ArrayLit { elements })
    }

    /// `{` already consumed. Trailing comma before `}` is allowed.
    fn object_literal(&mut self) -> Result<Ast, ParseError> {
        let mut properties = Vec::new();
        if !self.peek_is(&Token::RBrace) {
            loop {
                if self.peek_is(&Token::RBrace) {
                    break;
                }
                let key = match self.advance() {
                    Some(SpannedToken {
                        token: Token::Ident(name),
                        ..
                    }) => name,
                    Some(SpannedToken {
                        token: Token::Str(s),
                        ..
                    }) => s,
                    Some(SpannedToken {
                        token: Token::Number(n),
                        ..
                    }) => Value::Num(n).to_string(),
                    _ => return Err(self.error_at_current("a property key")),
                };
                self.expect(&Token::Colon, "':' after property key")?;
                let value = self.assignment()?;
                properties.push(Property { key, value });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        Ok(Ast::ObjectLit { properties })
    }
}
