use thiserror::Error;

use crate::lexer::Mode;
use crate::token::{Span, TokenKind};

/// Any failure that aborts a compile.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("lexer error: unexpected end of input in {mode} mode at offset {offset}")]
    UnexpectedEnd { mode: Mode, offset: usize },

    #[error("lexer error: unexpected {text:?} in {mode} mode at {span}")]
    UnexpectedText { mode: Mode, text: String, span: Span },

    #[error("lexer error: `#}}` without matching `{{#` at {span}")]
    UnbalancedCommentClose { span: Span },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error: expected {expected}, got {found} {text:?} at {span}")]
pub struct ParseError {
    pub expected: String,
    pub found: TokenKind,
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("no macro found by name: {name} (known: {})", .known.join(", "))]
    UnknownMacro { name: String, known: Vec<String> },

    #[error("macro {name} takes {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("improperly formatted INSERT block: {text:?}")]
    MalformedInsert { text: String },

    #[error("INSERT must go before FROM (at {span})")]
    InsertAfterFrom { span: Span },

    #[error("invalid escape sequence {sequence:?} in SEP literal at {span}")]
    BadSeparatorEscape { sequence: String, span: Span },

    #[error("SEP must be followed by a single-quoted literal, got {text:?} at {span}")]
    BadSeparator { text: String, span: Span },

    #[error("unbound variable {name} at {span}")]
    UnboundVariable { name: String, span: Span },

    #[error("unknown alias {name} at {span}")]
    UnknownAlias { name: String, span: Span },

    #[error("invalid escape expression: {text:?}")]
    MalformedCall { text: String },

    #[error("maximum macro expansion depth {limit} exceeded while invoking {name}")]
    RecursionLimit { name: String, limit: usize },
}
