//! Dynamic expressions embedded in request text as `[*$[ EXPR ]$*]`.
//!
//! Expressions are parsed by a small recursive-descent grammar (literals,
//! member/index access, arithmetic, comparison, logical and ternary operators)
//! and evaluated against the run's chain namespace. There is no function call
//! syntax and no access to anything outside the namespace.

mod eval;
mod lexer;
mod parser;

use crate::testflow::chain::ChainNamespace;

pub use eval::Val;

pub const OPEN: &str = "[*$[";
pub const CLOSE: &str = "]$*]";

/// How an expression result is written back into the host text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Strings are escaped for embedding inside an existing JSON string literal.
    Raw,
    /// Strings are quoted, objects and arrays serialized, so the result is a JSON value.
    JsonSafe,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),
}

/// Replace every expression segment in `text` with its evaluated value.
/// Text outside the markers passes through unchanged; a segment that fails to
/// parse or evaluate becomes the empty string.
pub fn evaluate(text: &str, scope: &ChainNamespace, mode: Mode) -> String {
    map_segments(text, |inner| {
        let source = replace_unresolved(inner);
        match evaluate_expr(&source, scope) {
            Ok(value) => render(&value, mode),
            Err(e) => {
                tracing::debug!(expression = %source.trim(), error = %e, "expression evaluation failed");
                String::new()
            }
        }
    })
}

/// Evaluate a single bare expression (no markers).
pub fn evaluate_expr<'a>(source: &str, scope: &'a ChainNamespace) -> Result<Val<'a>, ExprError> {
    let tokens = lexer::tokenize(source)?;
    let expr = parser::parse(&tokens)?;
    eval::eval(&expr, scope)
}

fn render(value: &Val<'_>, mode: Mode) -> String {
    match (mode, value) {
        (Mode::Raw, Val::Str(s)) => {
            let mut out = String::with_capacity(s.len());
            for c in s.chars() {
                match c {
                    '\n' => {}
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out
        }
        (Mode::JsonSafe, Val::Str(s)) => format!("\"{s}\""),
        (Mode::JsonSafe, Val::Array(_) | Val::Object(_)) => value.to_json().to_string(),
        _ => value.to_js_string(),
    }
}

/// Calls `f` with the inner text of each `[*$[ ... ]$*]` segment (which may span
/// lines) and splices its return value in place of the whole segment. The first
/// closing marker after an opening marker ends the segment.
pub fn map_segments(text: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&f(&after_open[..end]));
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Placeholders quoted by the template pre-pass that no variable resolved
/// (`'{{name}}'`) read as `undefined` inside an expression.
fn replace_unresolved(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("'{{") {
        let body = &rest[start + 3..];
        let end = body.find("}}'").filter(|&end| !body[..end].contains('\n'));
        match end {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push_str("undefined");
                rest = &body[end + 3..];
            }
            None => {
                out.push_str(&rest[..start + 1]);
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}
