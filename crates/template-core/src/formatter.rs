//! The formatter table.
//!
//! Formatters are external, pure functions called on every substituted value.
//! The registry is resolved at compile time (unknown names are rejected) and
//! shared read-only by every render afterwards.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-value state shared by the formatters of one chain.
///
/// A fresh context is created for every substituted value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatterContext {
    /// Set by a formatter to skip the rest of the chain.
    pub stop_propagation: bool,
    /// Result of the last conditional formatter, if any ran.
    pub is_condition_true: Option<bool>,
    /// Whether chained conditional formatters combine with AND.
    pub is_and_operator: Option<bool>,
    /// Hide-block delta: `1` opens a hidden block, `-1` closes it.
    pub is_hidden: Option<i32>,
}

pub trait Formatter: Send + Sync {
    fn call(&self, ctx: &mut FormatterContext, value: Value, args: &[Value]) -> Value;

    /// Formatters that produce markup run after escaping.
    fn can_inject_xml(&self) -> bool {
        false
    }
}

/// Adapts a closure into a [`Formatter`].
pub struct FnFormatter<F> {
    f: F,
    inject_xml: bool,
}

impl<F> FnFormatter<F>
where
    F: Fn(&mut FormatterContext, Value, &[Value]) -> Value + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, inject_xml: false }
    }

    pub fn injecting(f: F) -> Self {
        Self { f, inject_xml: true }
    }
}

impl<F> Formatter for FnFormatter<F>
where
    F: Fn(&mut FormatterContext, Value, &[Value]) -> Value + Send + Sync,
{
    fn call(&self, ctx: &mut FormatterContext, value: Value, args: &[Value]) -> Value {
        (self.f)(ctx, value, args)
    }

    fn can_inject_xml(&self) -> bool {
        self.inject_xml
    }
}

/// Name under which [`LoopCounter`] is available when the registry does not
/// define its own formatter of that name.
pub const COUNT_FORMATTER: &str = "count";

const COUNTER_PREFIX: &str = "__COUNT_";

/// Row numbering: `{d[i].x:count}` renders 1, 2, 3... and `count(10)` starts at 10.
///
/// The formatter only leaves a `__COUNT_<id>_<start>__` token. The compiler
/// passes the marker id as the first argument, and the assembler replaces the
/// token with the next number of that counter once rows are in final order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopCounter;

impl Formatter for LoopCounter {
    fn call(&self, _: &mut FormatterContext, _: Value, args: &[Value]) -> Value {
        let number = |arg: Option<&Value>| match arg {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        let id = number(args.first()).unwrap_or(0);
        let start = number(args.get(1)).unwrap_or(1);
        Value::String(format!("{COUNTER_PREFIX}{id}_{start}__"))
    }
}

/// Finds the first counter token of `text`: `(range, id, start)`.
pub fn find_counter(text: &str) -> Option<(std::ops::Range<usize>, i64, i64)> {
    let mut from = 0;
    while let Some(rel) = text[from..].find(COUNTER_PREFIX) {
        let begin = from + rel;
        let rest = &text[begin + COUNTER_PREFIX.len()..];
        if let Some(close) = rest.find("__") {
            if let Some((id, start)) = rest[..close].split_once('_') {
                if let (Ok(id), Ok(start)) = (id.parse(), start.parse()) {
                    let end = begin + COUNTER_PREFIX.len() + close + 2;
                    return Some((begin..end, id, start));
                }
            }
        }
        from = begin + COUNTER_PREFIX.len();
    }
    None
}

/// Name-indexed formatter table.
#[derive(Clone, Default)]
pub struct FormatterRegistry {
    formatters: BTreeMap<String, Arc<dyn Formatter>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, formatter: impl Formatter + 'static) {
        self.formatters.insert(name.into(), Arc::new(formatter));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut FormatterContext, Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.register(name, FnFormatter::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formatters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formatters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formatters.is_empty()
    }

    /// The registered name closest to `name` by edit distance.
    ///
    /// Only names strictly closer than `name.len()` edits win over the first
    /// name in sort order. Returns an empty string when nothing is registered.
    pub fn closest(&self, name: &str) -> String {
        let names: Vec<&str> = self.names().collect();
        if names.is_empty() || name.is_empty() {
            return String::new();
        }
        let mut min = name.chars().count();
        let mut closest = names[0];
        for candidate in names {
            let distance = levenshtein(name, candidate);
            if distance < min {
                min = distance;
                closest = candidate;
            }
        }
        closest.to_string()
    }
}

impl fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("formatters", &self.formatters.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[b.len()]
}
