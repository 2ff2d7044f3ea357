use std::fmt;

/// Byte range of a token in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Closed set of token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `%% init`
    SepInit,
    /// `%% fini`
    SepFini,
    /// `%% code`
    SepCode,
    /// `%% done`
    SepDone,
    /// `%% <non-word>...`, a line emitted literally
    SepLiteral,
    /// Preprocessor line marker (`# ...` at line start)
    Line,
    /// `{%` opening a query block (only the delimiter and its trim marker)
    QueryOpen,
    /// `{%` opening a macro definition header
    MacroOpen,
    /// `{% END %}`
    QueryEnd,
    /// `{% endmacro %}`
    MacroEnd,
    /// `{%` that opens nothing this grammar knows
    BadBlock,
    /// `{{`
    EscapeOpen,
    /// `{#`
    CommentOpen,
    /// `#}`
    CommentClose,
    /// `%}` closing a query block header
    QueryClose,
    /// `%}` closing a macro definition header
    MacroClose,
    /// `}}`
    EscapeClose,
    /// Literal text, including the `INSERT`/`FROM` keywords inside query blocks
    Text,
    LParen,
    RParen,
    Comma,
    Whitespace,
    /// `@name`
    BindVar,
    /// Lowercase identifier inside a macro header
    Ident,
    /// `$Name`
    Alias,
    /// Text outside any section or inside a comment
    Ignore,
    Eof,
}

impl TokenKind {
    /// Kinds the parser never sees.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace
                | TokenKind::Line
                | TokenKind::Ignore
                | TokenKind::CommentOpen
                | TokenKind::CommentClose
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::SepInit => "`%% init`",
            TokenKind::SepFini => "`%% fini`",
            TokenKind::SepCode => "`%% code`",
            TokenKind::SepDone => "`%% done`",
            TokenKind::SepLiteral => "literal `%%` line",
            TokenKind::Line => "line marker",
            TokenKind::QueryOpen => "query block open",
            TokenKind::MacroOpen => "macro open",
            TokenKind::QueryEnd => "`{% END %}`",
            TokenKind::MacroEnd => "`{% endmacro %}`",
            TokenKind::BadBlock => "unrecognized block",
            TokenKind::EscapeOpen => "`{{`",
            TokenKind::CommentOpen => "`{#`",
            TokenKind::CommentClose => "`#}`",
            TokenKind::QueryClose => "query block close",
            TokenKind::MacroClose => "macro header close",
            TokenKind::EscapeClose => "`}}`",
            TokenKind::Text => "text",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::Comma => "`,`",
            TokenKind::Whitespace => "whitespace",
            TokenKind::BindVar => "bind variable",
            TokenKind::Ident => "identifier",
            TokenKind::Alias => "hygienic alias",
            TokenKind::Ignore => "ignored text",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str, span: Span) -> Self {
        Self { kind, text, span }
    }

    /// The `-`/`+` run right after a leading `{%`, empty when absent.
    pub fn open_marker(&self) -> &'a str {
        match self.text.strip_prefix("{%") {
            Some(rest) => {
                let len = rest
                    .find(|c: char| c != '-' && c != '+')
                    .unwrap_or(rest.len());
                &rest[..len]
            }
            None => "",
        }
    }

    /// The `-`/`+` run right before a trailing `%}`, empty when absent.
    pub fn close_marker(&self) -> &'a str {
        match self.text.strip_suffix("%}") {
            Some(rest) => {
                let start = rest
                    .rfind(|c: char| c != '-' && c != '+')
                    .map_or(0, |i| i + 1);
                &rest[start..]
            }
            None => "",
        }
    }
}
