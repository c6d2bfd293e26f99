//! Render-time output fragments and their position keys.

use crate::ids::LiteralId;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// One component of a fragment's position vector.
///
/// Keys have a total order: `Undefined < Number < Text`, numbers compared
/// numerically, strings compared by bytes.
#[derive(Debug, Clone, Serialize)]
pub enum PosKey {
    Undefined,
    Number(f64),
    Text(String),
}

impl PosKey {
    fn rank(&self) -> u8 {
        match self {
            PosKey::Undefined => 0,
            PosKey::Number(_) => 1,
            PosKey::Text(_) => 2,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, PosKey::Undefined)
    }
}

impl Ord for PosKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PosKey::Number(a), PosKey::Number(b)) => a.total_cmp(b),
            (PosKey::Text(a), PosKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for PosKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PosKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PosKey {}

impl From<usize> for PosKey {
    fn from(n: usize) -> Self {
        PosKey::Number(n as f64)
    }
}

impl From<&Value> for PosKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => PosKey::Undefined,
            Value::Number(n) => n.as_f64().map(PosKey::Number).unwrap_or(PosKey::Undefined),
            Value::String(s) => PosKey::Text(s.clone()),
            Value::Bool(b) => PosKey::Text(b.to_string()),
            other => PosKey::Text(other.to_string()),
        }
    }
}

impl fmt::Display for PosKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PosKey::Undefined => write!(f, "undefined"),
            PosKey::Number(n) => write!(f, "{}", n),
            PosKey::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// A piece of output emitted by one render call.
///
/// `before`/`after` reference static template text in the program's literal
/// table; `text` is the substituted value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputFragment {
    pub position: Vec<PosKey>,
    pub before: Option<LiteralId>,
    pub text: String,
    pub after: Option<LiteralId>,
    /// `None` for fragments that carry no data value.
    pub row_show: Option<bool>,
    pub row_start: bool,
    pub row_end: bool,
    /// Hide-block delta requested by a formatter (`1` opens, `-1` closes).
    pub hide: Option<i32>,
}

impl OutputFragment {
    pub fn at(position: Vec<PosKey>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pos_key_total_order() {
        let mut keys = vec![
            PosKey::Text("b".into()),
            PosKey::Number(3.0),
            PosKey::Undefined,
            PosKey::Text("a".into()),
            PosKey::Number(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PosKey::Undefined,
                PosKey::Number(-1.0),
                PosKey::Number(3.0),
                PosKey::Text("a".into()),
                PosKey::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_pos_key_from_value() {
        assert_eq!(PosKey::from(&json!(2)), PosKey::Number(2.0));
        assert_eq!(PosKey::from(&json!(2.5)), PosKey::Number(2.5));
        assert_eq!(PosKey::from(&json!("x")), PosKey::Text("x".into()));
        assert_eq!(PosKey::from(&json!(null)), PosKey::Undefined);
        assert_eq!(PosKey::from(&json!(true)), PosKey::Text("true".into()));
    }

    #[test]
    fn test_integer_and_float_keys_are_equal() {
        assert_eq!(PosKey::from(&json!(1)), PosKey::from(&json!(1.0)));
        assert_eq!(PosKey::from(1usize), PosKey::Number(1.0));
    }
}
