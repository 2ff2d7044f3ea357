use std::borrow::Cow;

use crate::text::Trim;
use crate::token::{Span, Token};

/// Parsed template: its sections in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<'a> {
    pub sections: Vec<Section<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section<'a> {
    /// Raw statements run before any code section.
    Init(Raw<'a>),
    /// Raw statements run after every code section.
    Fini(Raw<'a>),
    Code(Body<'a>),
}

/// Verbatim section text, split wherever a line marker or a literal `%%`
/// line interrupted it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Raw<'a> {
    pub pieces: Vec<Text<'a>>,
}

impl Raw<'_> {
    pub fn to_text(&self) -> String {
        self.pieces.iter().map(|p| p.content.as_ref()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body<'a> {
    pub nodes: Vec<Node<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node<'a> {
    Text(Text<'a>),
    Query(QueryBlock<'a>),
    Macro(MacroDef<'a>),
    Escape(Escape<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Text<'a> {
    pub content: Cow<'a, str>,
    pub span: Span,
}

/// One piece of an embedded query fragment or escape expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Part<'a> {
    Text(Token<'a>),
    /// `@name`, replaced by the argument bound in the innermost macro call
    BindVar(Token<'a>),
    /// `$Name`, replaced by its hygienic alias
    Alias(Token<'a>),
}

impl<'a> Part<'a> {
    pub fn token(&self) -> &Token<'a> {
        match self {
            Part::Text(t) | Part::BindVar(t) | Part::Alias(t) => t,
        }
    }
}

/// `{% FROM ... %} body {% END %}` or `{% INSERT ... %} body {% END %}`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBlock<'a> {
    pub is_insert: bool,
    pub open: Token<'a>,
    pub query: Vec<Part<'a>>,
    pub close: Token<'a>,
    /// Aggregation separator, already encoded as a query expression.
    pub separator: String,
    pub body: Body<'a>,
    pub end: Token<'a>,
}

impl QueryBlock<'_> {
    /// Applied to the text before `{%`.
    pub fn outer_left(&self) -> Trim {
        Trim::after_open(self.open.open_marker(), Trim::Line)
    }

    /// Applied to the start of the rendered body.
    pub fn inner_left(&self) -> Trim {
        Trim::before_close(self.close.close_marker(), Trim::Newline)
    }

    /// Applied to the end of the rendered body.
    pub fn inner_right(&self) -> Trim {
        Trim::after_open(self.end.open_marker(), Trim::Line)
    }

    /// Applied to the text after `{% END %}`.
    pub fn outer_right(&self) -> Trim {
        Trim::before_close(self.end.close_marker(), Trim::Newline)
    }
}

/// `{% macro name(@a, @b) %} body {% endmacro %}`
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef<'a> {
    pub name: Token<'a>,
    pub params: Vec<Token<'a>>,
    pub close: Token<'a>,
    pub body: Body<'a>,
    pub end: Token<'a>,
}

impl MacroDef<'_> {
    pub fn inner_left(&self) -> Trim {
        Trim::before_close(self.close.close_marker(), Trim::Newline)
    }

    pub fn inner_right(&self) -> Trim {
        Trim::after_open(self.end.open_marker(), Trim::Newline)
    }
}

/// `{{ expr }}` or `{{ call name(args) }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Escape<'a> {
    pub parts: Vec<Part<'a>>,
    pub span: Span,
}

impl<'a> Escape<'a> {
    /// Name of the invoked macro when the escape reads `call NAME(...)`.
    pub fn callee(&self) -> Option<&'a str> {
        let Some(Part::Text(first)) = self.parts.first() else {
            return None;
        };
        let mut words = first
            .text
            .trim()
            .split(|c: char| c.is_whitespace() || c == '(');
        if words.next() != Some("call") {
            return None;
        }
        words.find(|w| !w.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn tok(kind: TokenKind, text: &str) -> Token<'_> {
        Token::new(kind, text, Span::default())
    }

    fn escape(first: &str) -> Escape<'_> {
        Escape {
            parts: vec![Part::Text(tok(TokenKind::Text, first))],
            span: Span::default(),
        }
    }

    #[test]
    fn test_callee() {
        assert_eq!(escape(" call greet(1, 2) ").callee(), Some("greet"));
        assert_eq!(escape("call  \n greet ()").callee(), Some("greet"));
        assert_eq!(escape(" caller(1) ").callee(), None);
        assert_eq!(escape(" 1 + 1 ").callee(), None);
        assert_eq!(escape(" call ").callee(), None);
    }

    #[test]
    fn test_callee_needs_leading_text() {
        let escape = Escape {
            parts: vec![Part::BindVar(tok(TokenKind::BindVar, "@call"))],
            span: Span::default(),
        };
        assert_eq!(escape.callee(), None);
    }

    #[test]
    fn test_query_block_trim_defaults() {
        let block = QueryBlock {
            is_insert: false,
            open: tok(TokenKind::QueryOpen, "{%"),
            query: vec![],
            close: tok(TokenKind::QueryClose, "%}"),
            separator: "''".to_string(),
            body: Body::default(),
            end: tok(TokenKind::QueryEnd, "{% END %}"),
        };
        assert_eq!(block.outer_left(), Trim::Line);
        assert_eq!(block.inner_left(), Trim::Newline);
        assert_eq!(block.inner_right(), Trim::Line);
        assert_eq!(block.outer_right(), Trim::Newline);
    }

    #[test]
    fn test_query_block_trim_markers() {
        let block = QueryBlock {
            is_insert: false,
            open: tok(TokenKind::QueryOpen, "{%---"),
            query: vec![],
            close: tok(TokenKind::QueryClose, "+%}"),
            separator: "''".to_string(),
            body: Body::default(),
            end: tok(TokenKind::QueryEnd, "{%- END --%}"),
        };
        assert_eq!(block.outer_left(), Trim::All);
        assert_eq!(block.inner_left(), Trim::Keep);
        assert_eq!(block.inner_right(), Trim::Line);
        assert_eq!(block.outer_right(), Trim::Newline);
    }

    fn macro_def<'a>(close: &'a str, end: &'a str) -> MacroDef<'a> {
        MacroDef {
            name: tok(TokenKind::Ident, "m"),
            params: vec![],
            close: tok(TokenKind::MacroClose, close),
            body: Body::default(),
            end: tok(TokenKind::MacroEnd, end),
        }
    }

    #[test]
    fn test_macro_trim_defaults() {
        let def = macro_def("%}", "{% endmacro %}");
        assert_eq!(def.inner_left(), Trim::Newline);
        assert_eq!(def.inner_right(), Trim::Newline);
    }

    #[test]
    fn test_macro_trim_markers() {
        let def = macro_def("---%}", "{%--- endmacro %}");
        assert_eq!(def.inner_left(), Trim::All);
        assert_eq!(def.inner_right(), Trim::All);

        let def = macro_def("+%}", "{%- endmacro %}");
        assert_eq!(def.inner_left(), Trim::Keep);
        assert_eq!(def.inner_right(), Trim::Line);
    }

    #[test]
    fn test_raw_text() {
        let raw = Raw {
            pieces: vec![
                Text {
                    content: Cow::Borrowed("a\n"),
                    span: Span::default(),
                },
                Text {
                    content: Cow::Owned("-- b".to_string()),
                    span: Span::default(),
                },
            ],
        };
        assert_eq!(raw.to_text(), "a\n-- b");
        assert_eq!(Raw::default().to_text(), "");
    }
}
