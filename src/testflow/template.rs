use super::expression::{self, CLOSE, OPEN};
use super::Variable;

/// Replace `{{key}}` with the value of every checked variable.
///
/// Keys match literally and case-sensitively; unchecked or unknown placeholders
/// are left in place. Inside `[*$[ ... ]$*]` segments, placeholders are first
/// rewritten to quoted literals (`'{{key}}'`) so a resolved variable becomes a
/// string literal in the expression and an unresolved one reads as `undefined`.
pub fn substitute(text: &str, variables: &[Variable]) -> String {
    let mut out = protect_expressions(text);

    for var in variables.iter().filter(|v| v.checked) {
        let placeholder = format!("{{{{{}}}}}", var.key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &var.value);
        }
    }

    out
}

/// Normalizes expression segments for evaluation: backslashes are dropped,
/// double quotes become single quotes and `{{ name }}` becomes `'{{name}}'`.
fn protect_expressions(text: &str) -> String {
    expression::map_segments(text, |inner| {
        let normalized: String = inner
            .chars()
            .filter(|&c| c != '\\')
            .map(|c| if c == '"' { '\'' } else { c })
            .collect();
        format!("{OPEN}{}{CLOSE}", quote_placeholders(&normalized))
    })
}

fn quote_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let body = &rest[start + 2..];
        match body.find("}}").filter(|&end| !body[..end].contains('\n')) {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push_str("'{{");
                out.push_str(body[..end].trim());
                out.push_str("}}'");
                rest = &body[end + 2..];
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
