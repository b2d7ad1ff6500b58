use std::borrow::Cow;

use serde_json::{Map, Value};

use super::parser::{BinaryOp, Expr, Key, LogicalOp, Segment, UnaryOp};
use super::ExprError;
use crate::testflow::chain::ChainNamespace;

/// Runtime value: JSON plus `undefined` and non-finite numbers.
/// Values read from the scope are borrowed, never copied.
#[derive(Debug, Clone)]
pub enum Val<'a> {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Cow<'a, str>),
    Array(Cow<'a, Vec<Value>>),
    Object(Cow<'a, Map<String, Value>>),
}

impl<'a> Val<'a> {
    pub fn from_json(value: &'a Value) -> Self {
        match value {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => Val::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Val::Str(Cow::Borrowed(s)),
            Value::Array(items) => Val::Array(Cow::Borrowed(items)),
            Value::Object(map) => Val::Object(Cow::Borrowed(map)),
        }
    }

    /// JSON form, with the `JSON.stringify` conventions for values JSON can't hold.
    pub fn to_json(&self) -> Value {
        match self {
            Val::Undefined | Val::Null => Value::Null,
            Val::Bool(b) => Value::Bool(*b),
            Val::Number(n) => serde_json::Number::from_f64(*n)
                .map(|num| {
                    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                        Value::from(*n as i64)
                    } else {
                        Value::Number(num)
                    }
                })
                .unwrap_or(Value::Null),
            Val::Str(s) => Value::String(s.to_string()),
            Val::Array(items) => Value::Array(items.clone().into_owned()),
            Val::Object(map) => Value::Object(map.clone().into_owned()),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Val::Undefined | Val::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined | Val::Null => false,
            Val::Bool(b) => *b,
            Val::Number(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::Array(_) | Val::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Val::Undefined => f64::NAN,
            Val::Null => 0.0,
            Val::Bool(b) => f64::from(u8::from(*b)),
            Val::Number(n) => *n,
            Val::Str(s) => string_to_number(s),
            Val::Array(_) | Val::Object(_) => string_to_number(&self.to_js_string()),
        }
    }

    /// `String(value)` semantics.
    pub fn to_js_string(&self) -> String {
        match self {
            Val::Undefined => "undefined".into(),
            Val::Null => "null".into(),
            Val::Bool(b) => b.to_string(),
            Val::Number(n) => format_number(*n),
            Val::Str(s) => s.to_string(),
            Val::Array(items) => join_array(items),
            Val::Object(_) => "[object Object]".into(),
        }
    }

    fn is_string_like(&self) -> bool {
        matches!(self, Val::Str(_) | Val::Array(_) | Val::Object(_))
    }
}

fn join_array(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Null => String::new(),
            other => Val::from_json(other).to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.starts_with("0x") || trimmed.starts_with("0X") => {
            u64::from_str_radix(&trimmed[2..], 16).map_or(f64::NAN, |n| n as f64)
        }
        // Rust accepts "inf"/"nan" spellings that JavaScript does not
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// JavaScript `Number.prototype.toString()` formatting.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if n == 0.0 {
        return "0".into();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        if n.fract() == 0.0 {
            return format!("{n:.0}");
        }
        return format!("{n}");
    }
    let exp = format!("{n:e}");
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
        _ => exp,
    }
}

pub fn eval<'a>(expr: &Expr, scope: &'a ChainNamespace) -> Result<Val<'a>, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Val::Number(*n)),
        Expr::Str(s) => Ok(Val::Str(Cow::Owned(s.clone()))),
        Expr::Bool(b) => Ok(Val::Bool(*b)),
        Expr::Null => Ok(Val::Null),
        Expr::Undefined => Ok(Val::Undefined),
        Expr::Ident(name) => scope
            .lookup(name)
            .map(Val::from_json)
            .ok_or_else(|| ExprError::Reference(name.clone())),
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, scope).map(|v| v.to_json()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Val::Array(Cow::Owned(values)))
        }
        Expr::Chain { base, segments } => eval_chain(base, segments, scope),
        Expr::Unary(op, operand) => {
            let v = eval(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => Val::Bool(!v.truthy()),
                UnaryOp::Neg => Val::Number(-v.to_number()),
                UnaryOp::Plus => Val::Number(v.to_number()),
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            let r = eval(rhs, scope)?;
            Ok(binary(*op, &l, &r))
        }
        Expr::Logical(op, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            let short_circuit = match op {
                LogicalOp::And => !l.truthy(),
                LogicalOp::Or => l.truthy(),
                LogicalOp::Nullish => !l.is_nullish(),
            };
            if short_circuit { Ok(l) } else { eval(rhs, scope) }
        }
        Expr::Conditional(cond, then, otherwise) => {
            if eval(cond, scope)?.truthy() {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
    }
}

fn eval_chain<'a>(base: &Expr, segments: &[Segment], scope: &'a ChainNamespace) -> Result<Val<'a>, ExprError> {
    let mut current = eval(base, scope)?;
    for segment in segments {
        if segment.optional && current.is_nullish() {
            return Ok(Val::Undefined);
        }
        let key = match &segment.key {
            Key::Name(name) => Val::Str(Cow::Owned(name.clone())),
            Key::Computed(expr) => eval(expr, scope)?,
        };
        current = member(current, &key)?;
    }
    Ok(current)
}

fn member<'a>(target: Val<'a>, key: &Val<'_>) -> Result<Val<'a>, ExprError> {
    let name = key.to_js_string();
    match target {
        Val::Undefined | Val::Null => Err(ExprError::Type(format!(
            "cannot read properties of {} (reading '{name}')",
            target.to_js_string()
        ))),
        Val::Str(s) => Ok(if name == "length" {
            Val::Number(s.chars().count() as f64)
        } else {
            index_of(&name)
                .and_then(|i| s.chars().nth(i))
                .map_or(Val::Undefined, |c| Val::Str(Cow::Owned(c.to_string())))
        }),
        Val::Array(items) => Ok(if name == "length" {
            Val::Number(items.len() as f64)
        } else {
            match items {
                Cow::Borrowed(items) => index_of(&name)
                    .and_then(|i| items.get(i))
                    .map_or(Val::Undefined, Val::from_json),
                Cow::Owned(items) => index_of(&name)
                    .and_then(|i| items.get(i))
                    .map_or(Val::Undefined, |v| owned(v.clone())),
            }
        }),
        Val::Object(map) => Ok(match map {
            Cow::Borrowed(map) => map.get(&name).map_or(Val::Undefined, Val::from_json),
            Cow::Owned(map) => map.get(&name).map_or(Val::Undefined, |v| owned(v.clone())),
        }),
        Val::Bool(_) | Val::Number(_) => Ok(Val::Undefined),
    }
}

fn owned<'a>(value: Value) -> Val<'a> {
    match value {
        Value::Null => Val::Null,
        Value::Bool(b) => Val::Bool(b),
        Value::Number(n) => Val::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => Val::Str(Cow::Owned(s)),
        Value::Array(items) => Val::Array(Cow::Owned(items)),
        Value::Object(map) => Val::Object(Cow::Owned(map)),
    }
}

fn index_of(name: &str) -> Option<usize> {
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse().ok()
}

fn binary<'a>(op: BinaryOp, l: &Val<'_>, r: &Val<'_>) -> Val<'a> {
    match op {
        BinaryOp::Add => {
            if l.is_string_like() || r.is_string_like() {
                Val::Str(Cow::Owned(format!("{}{}", l.to_js_string(), r.to_js_string())))
            } else {
                Val::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Val::Number(l.to_number() - r.to_number()),
        BinaryOp::Mul => Val::Number(l.to_number() * r.to_number()),
        BinaryOp::Div => Val::Number(l.to_number() / r.to_number()),
        BinaryOp::Rem => Val::Number(l.to_number() % r.to_number()),
        BinaryOp::Lt => Val::Bool(compare(l, r).is_some_and(|o| o.is_lt())),
        BinaryOp::Le => Val::Bool(compare(l, r).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Val::Bool(compare(l, r).is_some_and(|o| o.is_gt())),
        BinaryOp::Ge => Val::Bool(compare(l, r).is_some_and(|o| o.is_ge())),
        BinaryOp::StrictEq => Val::Bool(strict_eq(l, r)),
        BinaryOp::StrictNe => Val::Bool(!strict_eq(l, r)),
        BinaryOp::Eq => Val::Bool(loose_eq(l, r)),
        BinaryOp::Ne => Val::Bool(!loose_eq(l, r)),
    }
}

fn compare(l: &Val<'_>, r: &Val<'_>) -> Option<std::cmp::Ordering> {
    if let (Val::Str(a), Val::Str(b)) = (l, r) {
        return Some((**a).cmp(&**b));
    }
    l.to_number().partial_cmp(&r.to_number())
}

fn strict_eq(l: &Val<'_>, r: &Val<'_>) -> bool {
    match (l, r) {
        (Val::Undefined, Val::Undefined) | (Val::Null, Val::Null) => true,
        (Val::Bool(a), Val::Bool(b)) => a == b,
        (Val::Number(a), Val::Number(b)) => a == b,
        (Val::Str(a), Val::Str(b)) => a == b,
        // Reference identity: only the same borrowed JSON node is equal to itself.
        (Val::Array(Cow::Borrowed(a)), Val::Array(Cow::Borrowed(b))) => std::ptr::eq(*a, *b),
        (Val::Object(Cow::Borrowed(a)), Val::Object(Cow::Borrowed(b))) => std::ptr::eq(*a, *b),
        _ => false,
    }
}

fn loose_eq(l: &Val<'_>, r: &Val<'_>) -> bool {
    match (l, r) {
        (a, b) if a.is_nullish() && b.is_nullish() => true,
        (a, b) if a.is_nullish() || b.is_nullish() => false,
        (Val::Number(_) | Val::Str(_) | Val::Bool(_), Val::Number(_) | Val::Str(_) | Val::Bool(_))
            if std::mem::discriminant(l) != std::mem::discriminant(r) =>
        {
            l.to_number() == r.to_number()
        }
        (Val::Array(_) | Val::Object(_), Val::Number(_) | Val::Str(_) | Val::Bool(_)) => {
            loose_eq(&Val::Str(Cow::Owned(l.to_js_string())), r)
        }
        (Val::Number(_) | Val::Str(_) | Val::Bool(_), Val::Array(_) | Val::Object(_)) => {
            loose_eq(l, &Val::Str(Cow::Owned(r.to_js_string())))
        }
        _ => strict_eq(l, r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_matches_js() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-9), "1.5e-9");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_array_to_string_joins() {
        let value = serde_json::json!([1, null, "a", [2, 3]]);
        assert_eq!(Val::from_json(&value).to_js_string(), "1,,a,2,3");
    }

    #[test]
    fn test_loose_equality() {
        let one = Val::Number(1.0);
        assert!(loose_eq(&one, &Val::Str("1".into())));
        assert!(loose_eq(&one, &Val::Bool(true)));
        assert!(loose_eq(&Val::Null, &Val::Undefined));
        assert!(!loose_eq(&Val::Null, &Val::Number(0.0)));
        assert!(!strict_eq(&one, &Val::Str("1".into())));
    }

    #[test]
    fn test_to_json_integral_numbers_stay_integers() {
        assert_eq!(Val::Number(3.0).to_json(), serde_json::json!(3));
        assert_eq!(Val::Number(f64::NAN).to_json(), Value::Null);
    }
}
