#![forbid(unsafe_code)]
#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]

mod lexer;
mod parser;
mod token;

use narrow_ast::span::Span;

pub use parser::{parse_str, MAX_NESTING_DEPTH};

/// A syntax error with the offending source span.
///
/// `parse_str` returns it inside an `anyhow::Error`; callers that want the
/// span for reporting can `downcast_ref::<ParseError>()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at {}..{}", span.start, span.end)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
