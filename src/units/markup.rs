//! Markup preprocessing against a context map.
//!
//! Supported directives:
//!
//! ```html
//! <!-- @echo NODE_ENV -->
//! <!-- @if DEBUG -->        ... <!-- @endif -->
//! <!-- @if NODE_ENV='production' --> ... <!-- @endif -->
//! <!-- @if NODE_ENV!='production' --> ... <!-- @endif -->
//! ```
//!
//! A bare variable is truthy unless missing, empty, `false` or `0`. Branches
//! that are dropped are skipped without evaluation, so an `@echo` of an
//! undefined variable inside a dead branch is not an error.

use crate::config::Context;
use crate::error::TransformError;
use crate::pipeline::{Artifact, Transform};

pub struct Preprocess {
    context: Context,
}

impl Preprocess {
    pub fn new(context: Context) -> Self {
        Self { context }
    }
}

impl Transform for Preprocess {
    fn name(&self) -> &'static str {
        "preprocess"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let text = artifact.utf8()?;
        let tokens = tokenize(text);
        let mut pos = 0;
        let out = render(&tokens, &mut pos, &self.context, None)?;
        Ok(artifact.with_text(out))
    }
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Echo(&'a str),
    If(Cond<'a>),
    EndIf,
}

#[derive(Debug)]
struct Cond<'a> {
    raw: &'a str,
    var: &'a str,
    /// `Some((negated, value))` for comparisons, `None` for a bare variable.
    cmp: Option<(bool, &'a str)>,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("<!--") {
        let Some(close) = rest[open..].find("-->") else {
            break;
        };
        let close = open + close;
        let inner = rest[open + 4..close].trim();

        let token = if inner == "@endif" {
            Some(Token::EndIf)
        } else if let Some(var) = inner.strip_prefix("@echo") {
            Some(Token::Echo(var.trim()))
        } else if let Some(expr) = inner.strip_prefix("@if") {
            Some(Token::If(parse_cond(expr.trim())))
        } else {
            // a regular comment, not a directive
            None
        };

        match token {
            Some(token) => {
                if open > 0 {
                    tokens.push(Token::Text(&rest[..open]));
                }
                tokens.push(token);
                rest = &rest[close + 3..];
            }
            None => {
                tokens.push(Token::Text(&rest[..close + 3]));
                rest = &rest[close + 3..];
            }
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }

    tokens
}

fn parse_cond(expr: &str) -> Cond<'_> {
    if let Some((var, value)) = expr.split_once("!=") {
        return Cond {
            raw: expr,
            var: var.trim(),
            cmp: Some((true, unquote(value))),
        };
    }
    if let Some((var, value)) = expr.split_once('=') {
        return Cond {
            raw: expr,
            var: var.trim(),
            cmp: Some((false, unquote(value))),
        };
    }
    Cond {
        raw: expr,
        var: expr,
        cmp: None,
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim().strip_prefix('=').unwrap_or(value).trim();
    value
        .strip_prefix(['\'', '"'])
        .and_then(|v| v.strip_suffix(['\'', '"']))
        .unwrap_or(value)
}

fn eval(cond: &Cond, context: &Context) -> bool {
    let current = context.get(cond.var).map(String::as_str);

    match cond.cmp {
        Some((negated, value)) => (current == Some(value)) != negated,
        None => current.is_some_and(|v| !v.is_empty() && v != "false" && v != "0"),
    }
}

fn render(
    tokens: &[Token],
    pos: &mut usize,
    context: &Context,
    enclosing_if: Option<&str>,
) -> Result<String, TransformError> {
    let mut out = String::new();

    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Text(text) => {
                out.push_str(text);
                *pos += 1;
            }
            Token::Echo(var) => {
                let value = context
                    .get(*var)
                    .ok_or_else(|| TransformError::UnknownVariable(var.to_string()))?;
                out.push_str(value);
                *pos += 1;
            }
            Token::EndIf => {
                if enclosing_if.is_some() {
                    *pos += 1;
                    return Ok(out);
                }
                // an endif with no opening if is left in place
                out.push_str("<!-- @endif -->");
                *pos += 1;
            }
            Token::If(cond) => {
                let raw = cond.raw;
                let keep = eval(cond, context);
                *pos += 1;

                if keep {
                    out.push_str(&render(tokens, pos, context, Some(raw))?);
                } else {
                    skip_branch(tokens, pos, raw)?;
                }
            }
        }
    }

    match enclosing_if {
        Some(raw) => Err(TransformError::UnterminatedIf(raw.to_string())),
        None => Ok(out),
    }
}

/// Advance past the matching `@endif`, honoring nesting, evaluating nothing.
fn skip_branch(tokens: &[Token], pos: &mut usize, raw: &str) -> Result<(), TransformError> {
    let mut depth = 1usize;

    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::If(_) => depth += 1,
            Token::EndIf => {
                depth -= 1;
                if depth == 0 {
                    *pos += 1;
                    return Ok(());
                }
            }
            _ => {}
        }
        *pos += 1;
    }

    Err(TransformError::UnterminatedIf(raw.to_string()))
}
