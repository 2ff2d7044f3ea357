use std::borrow::Cow;

use crate::ast::{Body, Document, Escape, MacroDef, Node, Part, QueryBlock, Raw, Section, Text};
use crate::error::{Error, ParseError};
use crate::lexer::Lexer;
use crate::query::{self, DEFAULT_SEPARATOR};
use crate::token::{Span, Token, TokenKind};

/// Recursive-descent parser with one token of lookahead.
pub struct Parser<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    lookahead: Option<Token<'a>>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Lexer::new(source),
            lookahead: None,
        }
    }

    /// Parse a whole template. The first error aborts.
    pub fn parse(source: &'a str) -> Result<Document<'a>, Error> {
        let mut parser = Parser::new(source);
        let document = parser.parse_document()?;
        parser.expect(TokenKind::Eof)?;
        Ok(document)
    }

    /// Next significant token; trivia never reaches the grammar.
    fn advance(&mut self) -> Result<Token<'a>, Error> {
        if let Some(token) = self.lookahead.take() {
            return Ok(token);
        }
        loop {
            let token = match self.lexer.next() {
                Some(token) => token?,
                None => {
                    let end = self.source.len();
                    return Ok(Token::new(TokenKind::Eof, "", Span::new(end, end)));
                }
            };
            if !token.kind.is_trivia() {
                return Ok(token);
            }
        }
    }

    fn push_back(&mut self, token: Token<'a>) {
        debug_assert!(self.lookahead.is_none(), "only one token of pushback");
        self.lookahead = Some(token);
    }

    fn peek(&mut self) -> Result<TokenKind, Error> {
        let token = self.advance()?;
        let kind = token.kind;
        self.push_back(token);
        Ok(kind)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>, Error> {
        let token = self.advance()?;
        if token.kind != kind {
            return Err(unexpected(kind.to_string(), &token));
        }
        Ok(token)
    }

    fn parse_document(&mut self) -> Result<Document<'a>, Error> {
        let mut sections = Vec::new();
        loop {
            match self.peek()? {
                TokenKind::SepInit => {
                    self.advance()?;
                    sections.push(Section::Init(self.parse_raw()?));
                }
                TokenKind::SepFini => {
                    self.advance()?;
                    sections.push(Section::Fini(self.parse_raw()?));
                }
                TokenKind::SepCode => {
                    self.advance()?;
                    sections.push(Section::Code(self.parse_body()?));
                }
                TokenKind::SepDone | TokenKind::SepLiteral | TokenKind::Text => {
                    self.advance()?;
                }
                _ => break,
            }
        }
        Ok(Document { sections })
    }

    /// Init/fini text up to the next section separator.
    fn parse_raw(&mut self) -> Result<Raw<'a>, Error> {
        let mut pieces = Vec::new();
        loop {
            match self.peek()? {
                TokenKind::Text => {
                    let token = self.advance()?;
                    pieces.push(Text {
                        content: Cow::Borrowed(token.text),
                        span: token.span,
                    });
                }
                TokenKind::SepLiteral => pieces.push(literal_line(self.advance()?)),
                _ => break,
            }
        }
        Ok(Raw { pieces })
    }

    /// Stops at the first token it does not recognize; the caller consumes
    /// whatever closes the enclosing construct.
    fn parse_body(&mut self) -> Result<Body<'a>, Error> {
        tracing::trace!("enter body");
        let mut nodes = Vec::new();
        loop {
            match self.peek()? {
                TokenKind::Text => {
                    let token = self.advance()?;
                    nodes.push(Node::Text(Text {
                        content: Cow::Borrowed(token.text),
                        span: token.span,
                    }));
                }
                TokenKind::SepLiteral => nodes.push(Node::Text(literal_line(self.advance()?))),
                TokenKind::QueryOpen => nodes.push(Node::Query(self.parse_query()?)),
                TokenKind::MacroOpen => nodes.push(Node::Macro(self.parse_macro()?)),
                TokenKind::EscapeOpen => nodes.push(Node::Escape(self.parse_escape()?)),
                _ => break,
            }
        }
        tracing::trace!(nodes = nodes.len(), "leave body");
        Ok(Body { nodes })
    }

    /// Bind variables, aliases and text up to `closer`.
    fn parse_parts(&mut self, closer: TokenKind) -> Result<Vec<Part<'a>>, Error> {
        let mut parts = Vec::new();
        loop {
            let token = self.advance()?;
            match token.kind {
                TokenKind::Text => parts.push(Part::Text(token)),
                TokenKind::BindVar => parts.push(Part::BindVar(token)),
                TokenKind::Alias => parts.push(Part::Alias(token)),
                kind if kind == closer => {
                    self.push_back(token);
                    return Ok(parts);
                }
                _ => return Err(unexpected(format!("text or {closer}"), &token)),
            }
        }
    }

    fn parse_query(&mut self) -> Result<QueryBlock<'a>, Error> {
        tracing::trace!("enter query block");
        let open = self.expect(TokenKind::QueryOpen)?;
        let mut parts = self.parse_parts(TokenKind::QueryClose)?;
        let is_insert = parts
            .iter()
            .any(|part| matches!(part, Part::Text(t) if t.text == "INSERT"));

        let mut separator = DEFAULT_SEPARATOR.to_string();
        if let Some(Part::Text(last)) = parts.last_mut() {
            if let Some((keep, sep)) = query::split_separator(last.text, last.span)? {
                last.text = keep;
                separator = sep;
            }
        }

        let close = self.expect(TokenKind::QueryClose)?;
        let body = self.parse_body()?;
        let end = self.expect(TokenKind::QueryEnd)?;
        Ok(QueryBlock {
            is_insert,
            open,
            query: parts,
            close,
            separator,
            body,
            end,
        })
    }

    fn parse_macro(&mut self) -> Result<MacroDef<'a>, Error> {
        tracing::trace!("enter macro definition");
        self.expect(TokenKind::MacroOpen)?;
        let keyword = self.expect(TokenKind::Ident)?;
        if keyword.text != "macro" {
            return Err(unexpected("`macro`".to_string(), &keyword));
        }
        let name = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while self.peek()? != TokenKind::RParen {
            params.push(self.expect(TokenKind::BindVar)?);
            if self.peek()? == TokenKind::Comma {
                self.advance()?;
            }
        }
        self.expect(TokenKind::RParen)?;
        let close = self.expect(TokenKind::MacroClose)?;
        let body = self.parse_body()?;
        let end = self.expect(TokenKind::MacroEnd)?;
        Ok(MacroDef {
            name,
            params,
            close,
            body,
            end,
        })
    }

    fn parse_escape(&mut self) -> Result<Escape<'a>, Error> {
        let open = self.expect(TokenKind::EscapeOpen)?;
        let parts = self.parse_parts(TokenKind::EscapeClose)?;
        let close = self.expect(TokenKind::EscapeClose)?;
        Ok(Escape {
            parts,
            span: Span::new(open.span.start, close.span.end),
        })
    }
}

/// `%% <line>` stands for `<line>`.
fn literal_line(token: Token<'_>) -> Text<'_> {
    Text {
        content: Cow::Owned(token.text.replacen("%% ", "", 1)),
        span: token.span,
    }
}

fn unexpected(expected: String, token: &Token<'_>) -> Error {
    Error::Parse(ParseError {
        expected,
        found: token.kind,
        text: token.text.to_string(),
        span: token.span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LexError, SemanticError};

    fn code_body(source: &str) -> Body<'_> {
        let document = Parser::parse(source).unwrap();
        match document.sections.into_iter().next() {
            Some(Section::Code(body)) => body,
            other => panic!("Expected code section, got {:?}", other),
        }
    }

    fn texts<'b>(parts: &'b [Part<'_>]) -> Vec<&'b str> {
        parts.iter().map(|p| p.token().text).collect()
    }

    #[test]
    fn test_parse_sections() {
        let source = "preface\n%% init\nCREATE TABLE a(x);\n%% code\nhello\n%% fini\nDROP TABLE a;\n%% done\n";
        let document = Parser::parse(source).unwrap();
        assert_eq!(document.sections.len(), 3);
        assert!(matches!(&document.sections[0], Section::Init(r) if r.to_text() == "\nCREATE TABLE a(x);\n"));
        assert!(matches!(&document.sections[1], Section::Code(b) if b.nodes.len() == 1));
        assert!(matches!(&document.sections[2], Section::Fini(r) if r.to_text() == "\nDROP TABLE a;\n"));
    }

    #[test]
    fn test_parse_interrupted_init() {
        let source = "%% init\nCREATE TABLE a(x);\n%% -- note\n# 3 \"x.tpl\"\nCREATE TABLE b(y);\n%% fini\n%% done";
        let document = Parser::parse(source).unwrap();
        assert_eq!(document.sections.len(), 2);
        let Section::Init(raw) = &document.sections[0] else {
            panic!("Expected init section");
        };
        assert_eq!(raw.pieces.len(), 4);
        assert_eq!(
            raw.to_text(),
            "\nCREATE TABLE a(x);\n-- note\n\nCREATE TABLE b(y);\n"
        );
        assert!(matches!(&document.sections[1], Section::Fini(r) if r.pieces.len() == 1));
    }

    #[test]
    fn test_parse_document_without_code() {
        let document = Parser::parse("no sections at all").unwrap();
        assert!(document.sections.is_empty());
    }

    #[test]
    fn test_parse_query_block() {
        let body = code_body("%% code\n{%- FROM t $T WHERE t.x = @v SEP ', ' -%}[{{ $T.x }}]{% END %}\n%% done");
        let Node::Query(block) = &body.nodes[1] else {
            panic!("Expected query block, got {:?}", body.nodes[1]);
        };
        assert!(!block.is_insert);
        assert_eq!(
            texts(&block.query),
            vec![" ", "FROM", " t ", "$T", " WHERE t.x = ", "@v", " "]
        );
        assert!(matches!(block.query[3], Part::Alias(_)));
        assert!(matches!(block.query[5], Part::BindVar(_)));
        assert_eq!(block.separator, "', '");
        assert_eq!(block.open.text, "{%-");
        assert_eq!(block.close.text, "-%}");
        assert_eq!(block.body.nodes.len(), 3);
        assert!(matches!(&block.body.nodes[1], Node::Escape(e) if e.parts.len() == 3));
    }

    #[test]
    fn test_parse_default_separator() {
        let body = code_body("%% code\n{% FROM t %}x{% END %}\n%% done");
        let Node::Query(block) = &body.nodes[1] else {
            panic!("Expected query block");
        };
        assert_eq!(block.separator, DEFAULT_SEPARATOR);
    }

    #[test]
    fn test_parse_insert_block() {
        let body = code_body("%% code\n{% INSERT INTO t (a,b) VALUES (1, $$) %}Hi{% END %}\n%% done");
        assert!(matches!(&body.nodes[1], Node::Query(q) if q.is_insert));
    }

    #[test]
    fn test_parse_macro() {
        let body = code_body("%% code\n{% macro greet(@who, @n) -%}Hi {{ @who }}{%- endmacro %}\n%% done");
        let Node::Macro(def) = &body.nodes[1] else {
            panic!("Expected macro definition");
        };
        assert_eq!(def.name.text, "greet");
        let params: Vec<&str> = def.params.iter().map(|p| p.text).collect();
        assert_eq!(params, vec!["@who", "@n"]);
        assert_eq!(def.body.nodes.len(), 2);
    }

    #[test]
    fn test_parse_macro_without_params() {
        let body = code_body("%% code\n{% macro nothing() %}{% endmacro %}\n%% done");
        assert!(matches!(&body.nodes[1], Node::Macro(m) if m.params.is_empty()));
    }

    #[test]
    fn test_parse_literal_separator_line() {
        let body = code_body("%% code\n%% %% kept\n%% done");
        assert!(matches!(&body.nodes[1], Node::Text(t) if t.content == "%% kept"));
    }

    #[test]
    fn test_parse_skips_comments_and_line_markers() {
        let body = code_body("%% code\na{# gone #}b\n# 12 \"x.tpl\"\nc\n%% done");
        let content: String = body
            .nodes
            .iter()
            .map(|n| match n {
                Node::Text(t) => t.content.to_string(),
                other => panic!("Expected text, got {:?}", other),
            })
            .collect();
        assert_eq!(content, "\nab\n\nc\n");
    }

    #[test]
    fn test_parse_error_missing_end() {
        let err = Parser::parse("%% code\n{% FROM t %}x\n%% done").unwrap_err();
        match err {
            Error::Parse(e) => {
                assert_eq!(e.expected, TokenKind::QueryEnd.to_string());
                assert_eq!(e.found, TokenKind::SepDone);
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_bad_block() {
        let err = Parser::parse("%% code\n{% if x %}\n%% done").unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError { found: TokenKind::BadBlock, .. })));
    }

    #[test]
    fn test_parse_error_macro_keyword() {
        let err = Parser::parse("%% code\n{% macro %}{% endmacro %}\n%% done").unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError { found: TokenKind::MacroClose, .. })));
    }

    #[test]
    fn test_parse_bad_separator_escape() {
        let err = Parser::parse("%% code\n{% FROM t SEP '\\t' %}x{% END %}\n%% done").unwrap_err();
        assert!(matches!(
            err,
            Error::Semantic(SemanticError::BadSeparatorEscape { .. })
        ));
    }

    #[test]
    fn test_parse_propagates_lex_error() {
        let err = Parser::parse("%% code\ntext without terminator").unwrap_err();
        assert!(matches!(err, Error::Lex(LexError::UnexpectedEnd { .. })));
    }
}
