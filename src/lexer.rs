//! Context-sensitive lexer for the template language.
//!
//! The document is an island grammar: which token patterns apply depends on
//! where the lexer currently is. Each [`Mode`] owns one compiled alternation
//! of patterns; the earliest match wins, ties go to the pattern listed first.
//! Anything between two matches becomes an interstitial token whose kind also
//! depends on the mode.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::LexError;
use crate::token::{Span, Token, TokenKind};

/// Lexical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Outside any section; the initial state.
    Done,
    Init,
    Fini,
    Code,
    Query,
    Macro,
    Escape,
    Comment,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Done => "DONE",
            Mode::Init => "INIT",
            Mode::Fini => "FINI",
            Mode::Code => "CODE",
            Mode::Query => "QUERY",
            Mode::Macro => "MACRO",
            Mode::Escape => "ESCAPE",
            Mode::Comment => "COMMENT",
        };
        f.write_str(name)
    }
}

// Section separators are tried first in every mode.
const SEPARATORS: &[(TokenKind, &str)] = &[
    (TokenKind::SepInit, r"^\s*%% init$"),
    (TokenKind::SepFini, r"^\s*%% fini$"),
    (TokenKind::SepCode, r"^\s*%% code$"),
    (TokenKind::SepDone, r"^\s*%% done$"),
    (TokenKind::SepLiteral, r"^\s*%% [^a-zA-Z0-9_].*$"),
];

const LINE_MARKER: (TokenKind, &str) = (TokenKind::Line, r"^#.*$");

const ALIAS: (TokenKind, &str) = (TokenKind::Alias, r"\$[A-Z][a-zA-Z0-9_]*\b");
const BIND_VAR: (TokenKind, &str) = (TokenKind::BindVar, r"@[a-z][a-zA-Z0-9_]*\b");

const CODE_RULES: &[(TokenKind, &str)] = &[
    (TokenKind::QueryOpen, r"\{%[-+]{0,3}\s*(?:INSERT|FROM)\b"),
    (TokenKind::MacroOpen, r"\{%\s*macro\b"),
    (TokenKind::QueryEnd, r"\{%[-+]{0,3}\s*END\s*[-+]{0,3}%\}"),
    (TokenKind::MacroEnd, r"\{%[-+]{0,3}\s*endmacro\s*%\}"),
    (TokenKind::BadBlock, r"\{%-*"),
    (TokenKind::EscapeOpen, r"\{\{"),
    (TokenKind::CommentOpen, r"\{#"),
    (TokenKind::CommentClose, r"#\}"),
];

const QUERY_RULES: &[(TokenKind, &str)] = &[
    (TokenKind::Text, r"\b(?:INSERT|FROM)\b"),
    ALIAS,
    BIND_VAR,
    (TokenKind::QueryClose, r"[-+]{0,3}%\}"),
];

const MACRO_RULES: &[(TokenKind, &str)] = &[
    (TokenKind::LParen, r"\("),
    (TokenKind::RParen, r"\)"),
    (TokenKind::Comma, r","),
    (TokenKind::Whitespace, r"\s+"),
    BIND_VAR,
    (TokenKind::Ident, r"\b[a-z][a-zA-Z0-9_]*\b"),
    (TokenKind::MacroClose, r"[-+]{0,3}%\}"),
];

const ESCAPE_RULES: &[(TokenKind, &str)] = &[ALIAS, BIND_VAR, (TokenKind::EscapeClose, r"\}\}")];

const COMMENT_RULES: &[(TokenKind, &str)] = &[
    (TokenKind::CommentOpen, r"\{#"),
    (TokenKind::CommentClose, r"#\}"),
];

/// One compiled alternation; capture group `i + 1` belongs to `kinds[i]`.
struct RuleSet {
    regex: Regex,
    kinds: Vec<TokenKind>,
}

impl RuleSet {
    fn new(groups: &[&[(TokenKind, &str)]]) -> Self {
        let rules: Vec<(TokenKind, &str)> = groups
            .iter()
            .flat_map(|g| g.iter().copied())
            .collect();
        let pattern = rules
            .iter()
            .map(|(_, p)| format!("({p})"))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            regex: Regex::new(&format!("(?m){pattern}")).unwrap(),
            kinds: rules.into_iter().map(|(kind, _)| kind).collect(),
        }
    }

    fn find_at(&self, input: &str, offset: usize) -> Option<(TokenKind, usize, usize)> {
        let caps = self.regex.captures_at(input, offset)?;
        self.kinds.iter().enumerate().find_map(|(i, kind)| {
            caps.get(i + 1).map(|m| (*kind, m.start(), m.end()))
        })
    }
}

struct Rules {
    outer: RuleSet,
    code: RuleSet,
    query: RuleSet,
    macro_header: RuleSet,
    escape: RuleSet,
    comment: RuleSet,
}

static RULES: LazyLock<Rules> = LazyLock::new(|| Rules {
    outer: RuleSet::new(&[SEPARATORS, &[LINE_MARKER]]),
    code: RuleSet::new(&[SEPARATORS, CODE_RULES, &[LINE_MARKER]]),
    query: RuleSet::new(&[SEPARATORS, QUERY_RULES]),
    macro_header: RuleSet::new(&[SEPARATORS, MACRO_RULES]),
    escape: RuleSet::new(&[SEPARATORS, ESCAPE_RULES]),
    comment: RuleSet::new(&[SEPARATORS, COMMENT_RULES]),
});

impl Mode {
    fn rules(self) -> &'static RuleSet {
        let rules = &*RULES;
        match self {
            Mode::Done | Mode::Init | Mode::Fini => &rules.outer,
            Mode::Code => &rules.code,
            Mode::Query => &rules.query,
            Mode::Macro => &rules.macro_header,
            Mode::Escape => &rules.escape,
            Mode::Comment => &rules.comment,
        }
    }

    /// Kind given to unmatched text between two tokens; `None` when the mode
    /// has no room for it.
    fn interstitial(self) -> Option<TokenKind> {
        match self {
            Mode::Done | Mode::Comment => Some(TokenKind::Ignore),
            Mode::Init | Mode::Fini | Mode::Code | Mode::Query | Mode::Escape => {
                Some(TokenKind::Text)
            }
            Mode::Macro => None,
        }
    }
}

/// Lazy token stream over one input. Not restartable.
pub struct Lexer<'a> {
    input: &'a str,
    offset: usize,
    mode: Mode,
    comment_depth: usize,
    pending: Option<Token<'a>>,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            mode: Mode::Done,
            comment_depth: 0,
            pending: None,
            finished: false,
        }
    }

    fn token(&self, kind: TokenKind, start: usize, end: usize) -> Token<'a> {
        Token::new(kind, &self.input[start..end], Span::new(start, end))
    }

    fn fail(&mut self, error: LexError) -> Option<Result<Token<'a>, LexError>> {
        self.finished = true;
        Some(Err(error))
    }

    /// Mode change driven by the token just emitted.
    fn transition(&mut self, token: &Token<'a>) -> Result<(), LexError> {
        let next = match (self.mode, token.kind) {
            (_, TokenKind::SepInit) => Mode::Init,
            (_, TokenKind::SepFini) => Mode::Fini,
            (_, TokenKind::SepCode) => Mode::Code,
            (_, TokenKind::SepDone) => Mode::Done,
            (Mode::Code, TokenKind::QueryOpen) => Mode::Query,
            (Mode::Code, TokenKind::MacroOpen) => Mode::Macro,
            (Mode::Code, TokenKind::EscapeOpen) => Mode::Escape,
            (Mode::Code | Mode::Comment, TokenKind::CommentOpen) => {
                self.comment_depth += 1;
                Mode::Comment
            }
            (Mode::Code, TokenKind::CommentClose) => {
                return Err(LexError::UnbalancedCommentClose { span: token.span });
            }
            (Mode::Comment, TokenKind::CommentClose) => {
                self.comment_depth -= 1;
                if self.comment_depth == 0 {
                    Mode::Code
                } else {
                    Mode::Comment
                }
            }
            (Mode::Query, TokenKind::QueryClose)
            | (Mode::Macro, TokenKind::MacroClose)
            | (Mode::Escape, TokenKind::EscapeClose) => Mode::Code,
            (mode, _) => mode,
        };
        if matches!(
            token.kind,
            TokenKind::SepInit | TokenKind::SepFini | TokenKind::SepCode | TokenKind::SepDone
        ) {
            self.comment_depth = 0;
        }
        if next != self.mode {
            tracing::trace!(from = %self.mode, to = %next, "lexer mode change");
        }
        self.mode = next;
        Ok(())
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.pending.take() {
            return Some(Ok(token));
        }
        if self.finished {
            return None;
        }

        let len = self.input.len();
        if self.offset >= len {
            self.finished = true;
            return Some(Ok(self.token(TokenKind::Eof, len, len)));
        }

        let Some((kind, start, end)) = self.mode.rules().find_at(self.input, self.offset) else {
            if self.mode != Mode::Done {
                let offset = self.offset;
                return self.fail(LexError::UnexpectedEnd {
                    mode: self.mode,
                    offset,
                });
            }
            let rest = self.token(TokenKind::Text, self.offset, len);
            self.offset = len;
            return Some(Ok(rest));
        };

        // Block openers consume only `{%` and their trim marker; the keyword
        // that selected them is lexed again in the next mode.
        let end = match kind {
            TokenKind::QueryOpen | TokenKind::MacroOpen => {
                let marker = self.input[start + 2..end]
                    .find(|c: char| c != '-' && c != '+')
                    .unwrap_or(0);
                start + 2 + marker
            }
            _ => end,
        };

        let interstitial = if start > self.offset {
            match self.mode.interstitial() {
                Some(kind) => Some(self.token(kind, self.offset, start)),
                None => {
                    let span = Span::new(self.offset, start);
                    return self.fail(LexError::UnexpectedText {
                        mode: self.mode,
                        text: self.input[self.offset..start].to_string(),
                        span,
                    });
                }
            }
        } else {
            None
        };

        let token = self.token(kind, start, end);
        if let Err(error) = self.transition(&token) {
            return self.fail(error);
        }
        self.offset = end;

        match interstitial {
            Some(text) => {
                self.pending = Some(token);
                Some(Ok(text))
            }
            None => Some(Ok(token)),
        }
    }
}
