//! Helpers over the raw text of a query block: the trailing `SEP '<literal>'`
//! suffix and the shape of `INSERT` headers.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::SemanticError;
use crate::text;
use crate::token::Span;

#[derive(Parser)]
#[grammar = "src/query.pest"]
pub struct QueryGrammar;

/// Separator used when a block carries no `SEP` suffix.
pub const DEFAULT_SEPARATOR: &str = "''";

/// Splits a trailing `SEP '<literal>'` off `fragment`.
///
/// Returns the text that stays in the query and the separator re-encoded as a
/// query-language string expression, or `None` when there is no suffix.
pub fn split_separator(
    fragment: &str,
    span: Span,
) -> Result<Option<(&str, String)>, SemanticError> {
    let trimmed = fragment.trim_end();
    let Ok(mut pairs) = QueryGrammar::parse(Rule::fragment, trimmed) else {
        return Ok(None);
    };
    let pieces: Vec<Pair<'_, Rule>> = match pairs.next() {
        Some(fragment) => fragment
            .into_inner()
            .filter(|p| p.as_rule() != Rule::EOI)
            .collect(),
        None => return Ok(None),
    };

    let n = pieces.len();
    if n < 3 || pieces[n - 3].as_str() != "SEP" {
        return Ok(None);
    }
    let literal = &pieces[n - 1];
    if literal.as_rule() != Rule::single_quoted {
        return Err(SemanticError::BadSeparator {
            text: literal.as_str().to_string(),
            span,
        });
    }
    let quoted = literal.as_str();
    let value = unescape_separator(&quoted[1..quoted.len() - 1], span)?;
    let keep = &trimmed[..pieces[n - 3].as_span().start()];
    Ok(Some((keep, text::quote(&value))))
}

/// `''` is a quote, `\n` a newline, `\\` a backslash; any other backslash
/// sequence is rejected.
pub fn unescape_separator(payload: &str, span: Span) -> Result<String, SemanticError> {
    let mut out = String::with_capacity(payload.len());
    let mut chars = payload.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                chars.next();
                out.push('\'');
            }
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                other => {
                    let mut sequence = String::from('\\');
                    sequence.extend(other);
                    return Err(SemanticError::BadSeparatorEscape { sequence, span });
                }
            },
            c => out.push(c),
        }
    }
    Ok(out)
}

/// The pieces of `INSERT INTO <table> (<columns>) VALUES (<values>) [FROM ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertHead<'q> {
    pub table: &'q str,
    pub columns: &'q str,
    pub values: Vec<&'q str>,
    /// Everything after the values list; empty or starting with `FROM`.
    pub tail: &'q str,
}

impl<'q> InsertHead<'q> {
    pub fn parse(sql: &'q str) -> Result<Self, SemanticError> {
        let malformed = || SemanticError::MalformedInsert {
            text: sql.to_string(),
        };
        let insert = QueryGrammar::parse(Rule::insert, sql)
            .map_err(|_| malformed())?
            .next()
            .ok_or_else(malformed)?;

        let mut head = InsertHead {
            table: "",
            columns: "",
            values: Vec::new(),
            tail: "",
        };
        for pair in insert.into_inner() {
            match pair.as_rule() {
                Rule::table => head.table = pair.as_str(),
                Rule::columns => head.columns = pair.as_str(),
                // Values do not nest: a comma inside a call splits it.
                Rule::values => head.values = pair.as_str().split(',').map(str::trim).collect(),
                Rule::tail => head.tail = pair.as_str(),
                _ => {}
            }
        }
        if !head.tail.is_empty() && !head.tail.starts_with("FROM") {
            return Err(malformed());
        }
        Ok(head)
    }
}
