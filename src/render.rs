//! Tree-to-text renderer.
//!
//! A [`RenderContext`] walks the document once and emits one generated
//! script. Every literal run becomes part of a `printf` template; every query
//! block, escape and macro call becomes a nested subquery that fills one `%s`
//! placeholder when the engine runs the script.

use std::collections::HashMap;

use crate::ast::{Body, Document, Escape, MacroDef, Node, Part, QueryBlock, Section};
use crate::error::SemanticError;
use crate::query::InsertHead;
use crate::text::{self, Trim};
use crate::token::Token;

const INDENT: &str = "  ";

/// Deepest chain of nested macro invocations before giving up.
pub const MAX_MACRO_DEPTH: usize = 100;

/// Macro definitions seen so far in one render pass.
#[derive(Debug, Default)]
pub struct MacroRegistry<'d, 'a>(HashMap<&'a str, &'d MacroDef<'a>>);

impl<'d, 'a> MacroRegistry<'d, 'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; a later one with the same name replaces it.
    pub fn define(&mut self, def: &'d MacroDef<'a>) {
        tracing::debug!(name = def.name.text, params = def.params.len(), "registering macro");
        self.0.insert(def.name.text, def);
    }

    pub fn get(&self, name: &str) -> Option<&'d MacroDef<'a>> {
        self.0.get(name).copied()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }
}

/// Direct child of a body that takes part in its `printf` statement.
enum Select<'d, 'a> {
    /// Adjacent text nodes, merged.
    Text(String),
    Query(&'d QueryBlock<'a>),
    Escape(&'d Escape<'a>),
}

impl Select<'_, '_> {
    fn outer_left(&self) -> Trim {
        match self {
            Select::Query(block) => block.outer_left(),
            Select::Text(_) | Select::Escape(_) => Trim::Keep,
        }
    }

    fn outer_right(&self) -> Trim {
        match self {
            Select::Query(block) => block.outer_right(),
            Select::Text(_) | Select::Escape(_) => Trim::Keep,
        }
    }
}

/// Mutable state of one render pass. Never reused across passes.
pub struct RenderContext<'d, 'a> {
    level: usize,
    lines: Vec<String>,
    /// (inner-left, inner-right) per entered construct; innermost last.
    trims: Vec<(Trim, Trim)>,
    /// Bind-variable scopes, one per macro invocation.
    bindings: Vec<HashMap<&'a str, String>>,
    /// Hygienic-alias scopes; each starts as a copy of its parent.
    aliases: Vec<HashMap<&'a str, String>>,
    macros: MacroRegistry<'d, 'a>,
    depth: usize,
}

impl Default for RenderContext<'_, '_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d, 'a> RenderContext<'d, 'a> {
    pub fn new() -> Self {
        Self {
            level: 0,
            lines: Vec::new(),
            trims: vec![(Trim::All, Trim::All)],
            bindings: vec![HashMap::new()],
            aliases: vec![HashMap::new()],
            macros: MacroRegistry::new(),
            depth: 0,
        }
    }

    pub fn macros(&self) -> &MacroRegistry<'d, 'a> {
        &self.macros
    }

    /// Init sections in order, then code sections, then fini sections in
    /// reverse order.
    pub fn render_document(&mut self, document: &'d Document<'a>) -> Result<(), SemanticError> {
        let mut inits = Vec::new();
        let mut codes = Vec::new();
        let mut finis = Vec::new();
        for section in &document.sections {
            match section {
                Section::Init(raw) => inits.push(raw),
                Section::Fini(raw) => finis.push(raw),
                Section::Code(body) => codes.push(body),
            }
        }

        for raw in inits {
            self.line(raw.to_text());
        }
        for body in codes {
            self.render_body(body)?;
        }
        for raw in finis.into_iter().rev() {
            self.line(raw.to_text());
        }
        Ok(())
    }

    pub fn finish(self) -> String {
        self.lines.join("\n")
    }

    fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn indent(&self) -> String {
        INDENT.repeat(self.level)
    }

    fn inner_trim(&self) -> (Trim, Trim) {
        self.trims.last().copied().unwrap_or((Trim::All, Trim::All))
    }

    fn nested<F>(&mut self, render: F) -> Result<(), SemanticError>
    where
        F: FnOnce(&mut Self) -> Result<(), SemanticError>,
    {
        self.level += 1;
        let result = render(self);
        self.level -= 1;
        result
    }

    /// Inserts become standalone statements first; everything else is folded
    /// into a single `printf` over one template.
    fn render_body(&mut self, body: &'d Body<'a>) -> Result<(), SemanticError> {
        let indent = self.indent();
        let mut inserts = Vec::new();
        let mut selects: Vec<Select<'d, 'a>> = Vec::new();
        for node in &body.nodes {
            match node {
                Node::Query(block) if block.is_insert => inserts.push(block),
                Node::Query(block) => selects.push(Select::Query(block)),
                Node::Escape(escape) => selects.push(Select::Escape(escape)),
                // Registered before any sibling renders, so earlier siblings
                // may call it.
                Node::Macro(def) => self.macros.define(def),
                Node::Text(text) => match selects.last_mut() {
                    Some(Select::Text(merged)) => merged.push_str(&text.content),
                    _ => selects.push(Select::Text(text.content.to_string())),
                },
            }
        }

        for block in inserts {
            self.render_query(block)?;
            self.line(";");
            self.line("");
        }

        let mut template = String::new();
        for (i, select) in selects.iter().enumerate() {
            match select {
                Select::Text(content) => {
                    let leading = i
                        .checked_sub(1)
                        .map_or(Trim::Keep, |prev| selects[prev].outer_right());
                    let trailing = selects.get(i + 1).map_or(Trim::Keep, Select::outer_left);
                    let trimmed = text::trim_end(text::trim_start(content, leading), trailing);
                    template.push_str(&text::escape_percent(trimmed));
                }
                Select::Query(_) | Select::Escape(_) => template.push_str("%s"),
            }
        }
        let (left, right) = self.inner_trim();
        let template = text::trim_end(text::trim_start(&template, left), right);

        self.line(format!("{indent}SELECT printf({}", text::quote(template)));
        for select in &selects {
            match select {
                Select::Text(_) => {}
                Select::Query(block) => self.nested(|cx| cx.render_query(block))?,
                Select::Escape(escape) => self.nested(|cx| cx.render_escape(escape))?,
            }
        }
        self.line(format!("{indent}) _pp"));
        if self.level == 0 {
            self.line(";");
        }
        Ok(())
    }

    fn render_query(&mut self, block: &'d QueryBlock<'a>) -> Result<(), SemanticError> {
        let indent = self.indent();
        self.level += 1;
        self.trims.push((block.inner_left(), block.inner_right()));
        let scope = self.aliases.last().cloned().unwrap_or_default();
        self.aliases.push(scope);

        let result = self.render_query_scoped(block, &indent);

        self.aliases.pop();
        self.trims.pop();
        self.level -= 1;
        result
    }

    fn render_query_scoped(
        &mut self,
        block: &'d QueryBlock<'a>,
        indent: &str,
    ) -> Result<(), SemanticError> {
        self.declare_aliases(block)?;
        let sql = self.query_text(block)?;
        let sql = sql.trim();

        if block.is_insert {
            return self.render_insert(block, sql, indent);
        }
        self.line(format!(
            "{indent}, (SELECT group_concat(_pp, {}) FROM (",
            block.separator
        ));
        self.render_body(&block.body)?;
        self.clause_lines(indent, sql);
        self.line(format!("{indent}  ))"));
        Ok(())
    }

    /// `INSERT INTO t (cols) SELECT v1, v2, ...`, with `$$` standing for the
    /// block's body as a scalar subquery.
    fn render_insert(
        &mut self,
        block: &'d QueryBlock<'a>,
        sql: &str,
        indent: &str,
    ) -> Result<(), SemanticError> {
        let head = InsertHead::parse(sql)?;
        self.line(format!("INSERT INTO {} ({}) ", head.table, head.columns));
        self.line(format!("{indent}SELECT "));
        for (i, value) in head.values.iter().enumerate() {
            let comma = if i == 0 { "" } else { ", " };
            if *value == "$$" {
                self.line(format!("{indent}{comma}("));
                self.render_body(&block.body)?;
                self.line(format!("{indent})"));
            } else {
                self.line(format!("{indent}{comma}{value}"));
            }
        }
        self.clause_lines(indent, head.tail);
        Ok(())
    }

    fn clause_lines(&mut self, indent: &str, clause: &str) {
        for line in clause.lines() {
            self.line(format!("{indent}  {}", line.trim()));
        }
    }

    /// Aliases after the first `FROM` get a name qualified by the current
    /// level. An alias already visible keeps its binding.
    fn declare_aliases(&mut self, block: &QueryBlock<'a>) -> Result<(), SemanticError> {
        let level = self.level;
        let Some(scope) = self.aliases.last_mut() else {
            return Ok(());
        };
        let mut seen_from = false;
        for part in &block.query {
            match part {
                Part::Text(token) if token.text == "FROM" => seen_from = true,
                Part::Text(token) if token.text == "INSERT" && seen_from => {
                    return Err(SemanticError::InsertAfterFrom { span: token.span });
                }
                Part::Alias(token) if seen_from => {
                    scope
                        .entry(token.text)
                        .or_insert_with(|| format!("_{level}_{}", &token.text[1..]));
                }
                Part::Text(_) | Part::BindVar(_) | Part::Alias(_) => {}
            }
        }
        Ok(())
    }

    /// Query text with bindings substituted. Aliases before `FROM` resolve in
    /// the enclosing scope.
    fn query_text(&self, block: &QueryBlock<'a>) -> Result<String, SemanticError> {
        let mut scopes = self.aliases.iter().rev();
        let current = scopes.next();
        let enclosing = scopes.next().or(current);

        let mut seen_from = false;
        let mut sql = String::new();
        for part in &block.query {
            match part {
                Part::Text(token) => {
                    if token.text == "FROM" {
                        seen_from = true;
                    }
                    sql.push_str(token.text);
                }
                Part::BindVar(token) => sql.push_str(self.bind_value(token)?),
                Part::Alias(token) => {
                    let scope = if seen_from { current } else { enclosing };
                    sql.push_str(alias_value(scope, token)?);
                }
            }
        }
        Ok(sql)
    }

    fn escape_text(&self, escape: &Escape<'a>) -> Result<String, SemanticError> {
        let scope = self.aliases.last();
        let mut expr = String::new();
        for part in &escape.parts {
            match part {
                Part::Text(token) => expr.push_str(token.text),
                Part::BindVar(token) => expr.push_str(self.bind_value(token)?),
                Part::Alias(token) => expr.push_str(alias_value(scope, token)?),
            }
        }
        Ok(expr)
    }

    fn bind_value(&self, token: &Token<'a>) -> Result<&str, SemanticError> {
        self.bindings
            .last()
            .and_then(|scope| scope.get(token.text))
            .map(String::as_str)
            .ok_or_else(|| SemanticError::UnboundVariable {
                name: token.text.to_string(),
                span: token.span,
            })
    }

    fn render_escape(&mut self, escape: &'d Escape<'a>) -> Result<(), SemanticError> {
        let indent = self.indent();
        let expr = self.escape_text(escape)?;
        let expr = expr.trim();
        match escape.callee() {
            None => {
                self.line(format!("{indent}, {expr}"));
                Ok(())
            }
            Some(name) => {
                let args = call_arguments(expr)?;
                self.invoke_macro(name, args)
            }
        }
    }

    pub fn invoke_macro(&mut self, name: &str, args: Vec<String>) -> Result<(), SemanticError> {
        let Some(def) = self.macros.get(name) else {
            return Err(SemanticError::UnknownMacro {
                name: name.to_string(),
                known: self.macros.names(),
            });
        };
        if def.params.len() != args.len() {
            return Err(SemanticError::ArityMismatch {
                name: name.to_string(),
                expected: def.params.len(),
                found: args.len(),
            });
        }
        if self.depth >= MAX_MACRO_DEPTH {
            return Err(SemanticError::RecursionLimit {
                name: name.to_string(),
                limit: MAX_MACRO_DEPTH,
            });
        }
        tracing::debug!(name, args = args.len(), depth = self.depth, "invoking macro");

        let bindings = def.params.iter().map(|p| p.text).zip(args).collect();
        self.bindings.push(bindings);
        let scope = self.aliases.last().cloned().unwrap_or_default();
        self.aliases.push(scope);
        self.depth += 1;

        let result = self.expand_macro(def);

        self.depth -= 1;
        self.aliases.pop();
        self.bindings.pop();
        result
    }

    fn expand_macro(&mut self, def: &'d MacroDef<'a>) -> Result<(), SemanticError> {
        let indent = self.indent();
        self.level += 1;
        self.trims.push((def.inner_left(), def.inner_right()));
        self.line(format!("{indent}, ("));
        let result = self.render_body(&def.body);
        self.trims.pop();
        self.level -= 1;
        result?;
        self.line(format!("{indent})"));
        Ok(())
    }
}

fn alias_value<'s>(
    scope: Option<&'s HashMap<&str, String>>,
    token: &Token<'_>,
) -> Result<&'s str, SemanticError> {
    scope
        .and_then(|scope| scope.get(token.text))
        .map(String::as_str)
        .ok_or_else(|| SemanticError::UnknownAlias {
            name: token.text.to_string(),
            span: token.span,
        })
}

/// Arguments between the first `(` and the last `)`, split on every comma.
/// Commas inside nested calls or string literals are not protected.
fn call_arguments(expr: &str) -> Result<Vec<String>, SemanticError> {
    let malformed = || SemanticError::MalformedCall {
        text: expr.to_string(),
    };
    let open = expr.find('(').ok_or_else(malformed)?;
    let close = expr.rfind(')').ok_or_else(malformed)?;
    if close < open {
        return Err(malformed());
    }
    Ok(expr[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(String::from)
        .collect())
}

/// Render a parsed document into the generated script.
pub fn render(document: &Document<'_>) -> Result<String, SemanticError> {
    let mut cx = RenderContext::new();
    cx.render_document(document)?;
    Ok(cx.finish())
}
