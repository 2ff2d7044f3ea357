//! Compiler for a hybrid template language that mixes literal text, embedded
//! query fragments, hygienic macros and expression escapes, and produces a
//! single SQL script which, when run, renders the template's text.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod query;
pub mod render;
pub mod side_table;
pub mod text;
pub mod token;

pub use error::*;
pub use parser::Parser;
pub use render::{RenderContext, render};

/// Lex, parse and render `source` in one pass.
pub fn compile(source: &str) -> Result<String, Error> {
    let document = Parser::parse(source)?;
    tracing::debug!(sections = document.sections.len(), "parsed document");
    Ok(render(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile() {
        let out = compile("%% init\nCREATE TABLE t (x);\n%% code\nrows: {{ 2 }}\n%% done").unwrap();
        assert_eq!(
            out,
            "\nCREATE TABLE t (x);\n\nSELECT printf('rows: %s'\n  , 2\n) _pp\n;"
        );
    }

    #[test]
    fn test_compile_without_sections() {
        assert_eq!(compile("just a preamble\n").unwrap(), "");
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            compile("%% code\nunterminated"),
            Err(Error::Lex(LexError::UnexpectedEnd { .. }))
        ));
        assert!(matches!(
            compile("%% code\n{% FROM t %}no end\n%% done"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            compile("%% code\n{{ call nope() }}\n%% done"),
            Err(Error::Semantic(SemanticError::UnknownMacro { .. }))
        ));
    }
}
