//! Loose comparison of data values against condition operands.
//!
//! Operands are always text as written in the template. Data values are
//! coerced the way a dynamically typed template language would: numbers
//! compare numerically against the parsed operand, strings compare as text,
//! booleans count as `1`/`0`, and a missing value never matches.

use serde_json::Value;
use std::cmp::Ordering;
use stencil_types::Operator;

/// Evaluates `value OP right`. `None` is an absent value.
pub fn compare(value: Option<&Value>, operator: Operator, right: &str) -> bool {
    match operator {
        Operator::Eq => loose_eq(value, right),
        Operator::NotEq => !loose_eq(value, right),
        Operator::Gt => relation(value, right) == Some(Ordering::Greater),
        Operator::Lt => relation(value, right) == Some(Ordering::Less),
    }
}

/// Evaluates `index OP right` for the reserved `i` attribute. A negative
/// operand counts from the end of the array.
pub fn compare_index(index: usize, len: usize, operator: Operator, right: Option<i64>) -> bool {
    let Some(mut right) = right else {
        return operator == Operator::NotEq;
    };
    if right < 0 {
        right += len as i64;
    }
    let index = index as i64;
    match operator {
        Operator::Eq => index == right,
        Operator::NotEq => index != right,
        Operator::Gt => index > right,
        Operator::Lt => index < right,
    }
}

/// Integer prefix of an operand, as in `[-1]` or `[i=2]`.
pub fn parse_index(right: &str) -> Option<i64> {
    let trimmed = right.trim();
    let digits_end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..digits_end].parse().ok()
}

/// Strips one pair of surrounding quotes.
pub fn remove_quotes(right: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = right.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    right
}

fn loose_eq(value: Option<&Value>, right: &str) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => s == right,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n == to_number(right)),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)) == to_number(right),
        Some(other) => to_text(Some(other)) == right,
    }
}

fn relation(value: Option<&Value>, right: &str) -> Option<Ordering> {
    let left = match value? {
        Value::String(s) => return Some(s.as_str().cmp(right)),
        Value::Array(_) | Value::Object(_) => return Some(to_text(value).as_str().cmp(right)),
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64()?,
    };
    left.partial_cmp(&to_number(right))
}

/// Numeric value of an operand; `NaN` when it is not a number.
pub fn to_number(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    match text {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    text.parse().unwrap_or(f64::NAN)
}

/// Text form of a number without a trailing `.0` for integral values.
pub fn number_text(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    format!("{n}")
}

/// Text form of any value, `undefined` for an absent one.
pub fn to_text(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if !(n.is_i64() || n.is_u64()) => number_text(f),
            _ => n.to_string(),
        },
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_text(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

/// Whether a value counts as present when guarding a lookup.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
