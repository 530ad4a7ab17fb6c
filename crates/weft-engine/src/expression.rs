//! Restricted expression language for condition and code nodes.
//!
//! This is deliberately not an interpreter. The grammar is exactly:
//!
//! - `true` / `false`
//! - `input` or a dotted path `input.a.b` (array indices allowed: `input.items.0`)
//! - `<path|literal> <op> <literal>` with `op` one of `!==`, `===`, `>=`, `<=`, `>`, `<`
//!
//! Literals are numbers, booleans, `null`, and single- or double-quoted
//! strings; a single bare word on the right-hand side is taken as a string.
//! Anything else is rejected.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use weft_core::error::{Result, WeftError};

/// Operators in match order. Two-character forms come first so `>=` is
/// never split as `>`.
const OPERATORS: [&str; 6] = ["!==", "===", ">=", "<=", ">", "<"];

/// Evaluate a condition expression to a boolean.
pub fn evaluate_condition(expr: &str, input: Option<&Value>) -> Result<bool> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(WeftError::Expression("expression is empty".into()));
    }

    if let Some((op, left, right)) = split_comparison(expr) {
        return compare(op, left, right, input);
    }

    match expr {
        "true" => Ok(true),
        "false" => Ok(false),
        path if is_input_path(path) => Ok(is_truthy(resolve_path(path, input))),
        other => Err(WeftError::Expression(other.to_string())),
    }
}

/// Evaluate an expression to a value: a comparison yields a boolean, a path
/// yields the resolved value (or `null`), a literal yields itself.
pub fn evaluate_value(expr: &str, input: Option<&Value>) -> Result<Value> {
    let expr = expr.trim();
    if let Some((op, left, right)) = split_comparison(expr) {
        return compare(op, left, right, input).map(Value::Bool);
    }
    if is_input_path(expr) {
        return Ok(resolve_path(expr, input).cloned().unwrap_or(Value::Null));
    }
    parse_literal(expr).ok_or_else(|| WeftError::Expression(expr.to_string()))
}

fn split_comparison(expr: &str) -> Option<(&'static str, &str, &str)> {
    OPERATORS.iter().find_map(|op| {
        expr.find(op)
            .map(|pos| (*op, expr[..pos].trim(), expr[pos + op.len()..].trim()))
    })
}

fn compare(op: &str, left: &str, right: &str, input: Option<&Value>) -> Result<bool> {
    if left.is_empty() || right.is_empty() {
        return Err(WeftError::Expression(format!(
            "operator '{}' needs two operands",
            op
        )));
    }

    let left_value: Option<Value> = if is_input_path(left) {
        resolve_path(left, input).cloned()
    } else {
        Some(parse_literal(left).ok_or_else(|| WeftError::Expression(left.to_string()))?)
    };

    let right_value = if is_input_path(right) {
        resolve_path(right, input).cloned()
    } else {
        match parse_literal(right) {
            Some(value) => Some(value),
            None if is_bare_word(right) => Some(Value::String(right.to_string())),
            None => return Err(WeftError::Expression(right.to_string())),
        }
    };

    let (l, r) = (left_value.as_ref(), right_value.as_ref());
    Ok(match op {
        "===" => strict_eq(l, r),
        "!==" => !strict_eq(l, r),
        ">" => order(l, r) == Some(Ordering::Greater),
        "<" => order(l, r) == Some(Ordering::Less),
        ">=" => matches!(order(l, r), Some(Ordering::Greater | Ordering::Equal)),
        "<=" => matches!(order(l, r), Some(Ordering::Less | Ordering::Equal)),
        _ => unreachable!("operator list is fixed"),
    })
}

fn strict_eq(l: Option<&Value>, r: Option<&Value>) -> bool {
    match (l, r) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

fn order(l: Option<&Value>, r: Option<&Value>) -> Option<Ordering> {
    match (l?, r?) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn parse_literal(s: &str) -> Option<Value> {
    match s {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }

    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            let inner = &s[1..s.len() - 1];
            if inner.contains(quote) {
                return None;
            }
            return Some(Value::String(inner.to_string()));
        }
    }

    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// A single unquoted token such as `urgent` or `on-hold`.
fn is_bare_word(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_input_path(s: &str) -> bool {
    match s.strip_prefix("input") {
        Some("") => true,
        Some(rest) => rest.strip_prefix('.').is_some_and(|segments| {
            segments.split('.').all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            })
        }),
        None => false,
    }
}

/// Resolve `input` / `input.a.b` against the node input.
///
/// Returns `None` when the input is absent or any segment is missing.
pub fn resolve_path<'a>(path: &str, input: Option<&'a Value>) -> Option<&'a Value> {
    let mut current = input?;
    let rest = path.trim().strip_prefix("input")?;
    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Read a bare name relative to the input: `title` becomes `input.title`.
pub fn qualify_path(name: &str) -> String {
    let name = name.trim();
    if name == "input" || name.starts_with("input.") {
        name.to_string()
    } else {
        format!("input.{}", name)
    }
}

/// Truthiness of a possibly-absent value.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Human-readable rendering: strings as-is, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Substitute `{{path}}` placeholders from the input.
///
/// Paths not starting with `input` are read relative to it, so `{{title}}`
/// and `{{input.title}}` are the same. Missing values render empty.
pub fn render_template(template: &str, input: Option<&Value>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            resolve_path(&qualify_path(&caps[1]), input)
                .map(display_value)
                .unwrap_or_default()
        })
        .into_owned()
}
