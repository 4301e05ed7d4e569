//! Kernel-wide error type.
//!
//! Each module owns its error enum (lexer, parser, interpreter, scope,
//! filters); this module folds them into one `Error` for APIs that can
//! fail in more than one stage, such as `Scope::eval`, which may fail
//! to lex, parse, or evaluate.

use crate::filters::RegistryError;
use crate::interpreter::EvalError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::scope::ScopeError;

/// Any error the kernel can produce.
///
/// Structural errors (lex, parse, security, phase, TTL) propagate out
/// of the caller; user-triggered evaluation errors inside the digest
/// are caught at each call site and routed to the error sink instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result alias for kernel APIs.
pub type Result<T> = std::result::Result<T, Error>;
