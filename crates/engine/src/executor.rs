//! Runs a [`Program`] against one data set.
//!
//! Execution is single-threaded per call and only reads the program, so one
//! compiled program can be rendered from many threads at once. Data values
//! are borrowed from the caller wherever possible; formatter results and
//! object-iteration rows are the only owned values.

use crate::filter::{compare, compare_index, is_truthy, number_text, to_text};
use crate::program::{
    ArgSource, Emit, Filter, FormatterStep, Instruction, IteratorKey, Loop, Program, Slot,
    ValueAccess,
};
use log::trace;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use stencil_template_core::FormatterContext;
use stencil_types::{LiteralId, OutputFragment, PosKey};

/// Value bound to a frame slot.
#[derive(Debug, Clone)]
enum Binding<'d> {
    Undefined,
    /// The synthetic `{ d, c }` object.
    Root,
    Value(Cow<'d, Value>),
}

impl Binding<'_> {
    fn is_container(&self) -> bool {
        match self {
            Binding::Undefined => false,
            Binding::Root => true,
            Binding::Value(v) => matches!(v.as_ref(), Value::Object(_) | Value::Array(_)),
        }
    }

    fn empty_object() -> Self {
        Binding::Value(Cow::Owned(Value::Object(Map::new())))
    }
}

/// Rows of a loop or lookup.
enum Rows<'d> {
    Empty,
    Borrowed(&'d [Value]),
    Owned(Vec<Value>),
}

impl<'d> Rows<'d> {
    fn len(&self) -> usize {
        match self {
            Rows::Empty => 0,
            Rows::Borrowed(rows) => rows.len(),
            Rows::Owned(rows) => rows.len(),
        }
    }

    fn get(&self, i: usize) -> Binding<'d> {
        let row = match *self {
            Rows::Empty => None,
            Rows::Borrowed(rows) => rows.get(i).map(Cow::Borrowed),
            Rows::Owned(ref rows) => rows.get(i).cloned().map(Cow::Owned),
        };
        row.map(Binding::Value).unwrap_or(Binding::Undefined)
    }
}

/// Runs `program` and returns the unsorted fragments.
pub fn execute(program: &Program, data: &Value, complement: Option<&Value>) -> Vec<OutputFragment> {
    let mut executor = Executor::new(program, data, complement);
    if program.has_dynamic {
        executor.collecting = true;
        executor.run(program.instructions());
        executor.collecting = false;
        executor.reset();
    }
    executor.run(program.instructions());
    trace!("executed program into {} fragments", executor.fragments.len());
    executor.fragments
}

struct Executor<'p, 'd> {
    program: &'p Program,
    data: &'d Value,
    complement: Option<&'d Value>,
    slots: Vec<Binding<'d>>,
    indices: Vec<usize>,
    lengths: Vec<usize>,
    position: Vec<PosKey>,
    fragments: Vec<OutputFragment>,
    /// Offsets already emitted by a loop-free program.
    emitted: HashSet<usize>,
    /// Values of every dynamic iterator, per loop slot, across the whole data set.
    domains: HashMap<Slot, Vec<Option<Value>>>,
    /// First pass of a program with dynamic iterators: only fills `domains`.
    collecting: bool,
}

impl<'p, 'd> Executor<'p, 'd> {
    fn new(program: &'p Program, data: &'d Value, complement: Option<&'d Value>) -> Self {
        let count = program.slot_count();
        let mut executor = Self {
            program,
            data,
            complement,
            slots: vec![Binding::Undefined; count],
            indices: vec![0; count],
            lengths: vec![0; count],
            position: vec![PosKey::Number(0.0)],
            fragments: Vec::new(),
            emitted: HashSet::new(),
            domains: HashMap::new(),
            collecting: false,
        };
        executor.reset();
        executor
    }

    fn reset(&mut self) {
        self.slots.fill(Binding::Undefined);
        if let Some(root) = self.program.root.filter(|&r| r < self.slots.len()) {
            self.slots[root] = Binding::Root;
        }
        self.position = vec![PosKey::Number(0.0)];
    }

    fn run(&mut self, instructions: &'p [Instruction]) {
        for instruction in instructions {
            match instruction {
                Instruction::Bind { slot, parent, name } => {
                    let parent = &self.slots[*parent];
                    let bound = if !parent.is_container() {
                        Binding::empty_object()
                    } else {
                        self.child(parent, self.literal(*name))
                    };
                    self.slots[*slot] = bound;
                }
                Instruction::Find { slot, parent, name, filters } => {
                    self.find(*slot, *parent, *name, filters);
                }
                Instruction::SetPos { index, value } => {
                    if !self.collecting {
                        self.set_pos(*index, PosKey::from(*value));
                    }
                }
                Instruction::Emit(emit) => {
                    if !self.collecting {
                        self.emit(emit);
                    }
                }
                Instruction::Loop(l) => self.run_loop(l),
            }
        }
    }

    fn literal(&self, id: LiteralId) -> &'p str {
        self.program.literals.get(id)
    }

    /// `parent[name]`, or the parent itself for an empty name.
    fn child(&self, parent: &Binding<'d>, name: &str) -> Binding<'d> {
        if name.is_empty() {
            return parent.clone();
        }
        let found = match parent {
            Binding::Undefined => None,
            Binding::Root => match name {
                "d" => Some(Cow::Borrowed(self.data)),
                "c" => self.complement.map(Cow::Borrowed),
                _ => None,
            },
            Binding::Value(Cow::Borrowed(value)) => get(*value, name).map(Cow::Borrowed),
            Binding::Value(Cow::Owned(value)) => get(value, name).cloned().map(Cow::Owned),
        };
        found.map(Binding::Value).unwrap_or(Binding::Undefined)
    }

    /// Attribute of a binding, read without cloning.
    fn lookup<'a>(&'a self, binding: &'a Binding<'d>, name: &str) -> Option<&'a Value> {
        match binding {
            Binding::Undefined => None,
            Binding::Root => match name {
                "d" => Some(self.data),
                "c" => self.complement,
                _ => None,
            },
            Binding::Value(value) => get(value, name),
        }
    }

    fn rows(&self, parent: Slot, name: LiteralId, with_entries: bool) -> Rows<'d> {
        let parent = &self.slots[parent];
        if !parent.is_container() {
            return Rows::Empty;
        }
        match self.child(parent, self.literal(name)) {
            Binding::Value(Cow::Borrowed(Value::Array(rows))) => Rows::Borrowed(rows),
            Binding::Value(Cow::Owned(Value::Array(rows))) => Rows::Owned(rows),
            Binding::Value(Cow::Borrowed(Value::Object(map))) if with_entries => {
                Rows::Owned(map.iter().map(|(k, v)| entry(k.clone(), v.clone())).collect())
            }
            Binding::Value(Cow::Owned(Value::Object(map))) if with_entries => {
                Rows::Owned(map.into_iter().map(|(k, v)| entry(k, v)).collect())
            }
            _ => Rows::Empty,
        }
    }

    fn find(&mut self, slot: Slot, parent: Slot, name: LiteralId, filters: &'p [Filter]) {
        let rows = self.rows(parent, name, false);
        self.lengths[slot] = rows.len();
        for i in 0..rows.len() {
            self.slots[slot] = rows.get(i);
            self.indices[slot] = i;
            if self.filters_pass(filters) {
                return;
            }
        }
        self.slots[slot] = Binding::empty_object();
    }

    fn run_loop(&mut self, l: &'p Loop) {
        let rows = self.rows(l.parent, l.name, true);
        let len = rows.len();
        self.lengths[l.slot] = len;
        let mut missing: Vec<Option<Value>> = if l.dynamic && !self.collecting {
            self.domains.get(&l.slot).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut i = 0;
        while i < len || !missing.is_empty() {
            let row = rows.get(i);
            let exists = i < len;
            for iterator in &l.iterators {
                let key = match &iterator.key {
                    IteratorKey::Index => {
                        if self.collecting {
                            continue;
                        }
                        PosKey::from(i)
                    }
                    IteratorKey::Attribute { object, attribute, dynamic } => {
                        let value = if exists {
                            let value = self.row_key(&row, *object, *attribute);
                            if self.collecting {
                                if *dynamic {
                                    let domain = self.domains.entry(l.slot).or_default();
                                    if !domain.contains(&value) {
                                        domain.push(value.clone());
                                    }
                                }
                            } else if l.dynamic {
                                if let Some(at) = missing.iter().position(|m| *m == value) {
                                    missing.remove(at);
                                }
                            }
                            value
                        } else {
                            missing.pop().flatten()
                        };
                        match &value {
                            Some(v) => PosKey::from(v),
                            None => PosKey::Undefined,
                        }
                    }
                };
                if !self.collecting {
                    self.set_pos(iterator.position, key);
                }
            }
            self.slots[l.slot] = row;
            self.indices[l.slot] = i;
            self.run(&l.body);
            i += 1;
        }
    }

    /// `row[attribute]`, or `row[object][attribute]` defaulting to `0` when
    /// the sub-object is absent.
    fn row_key(&self, row: &Binding<'d>, object: Option<LiteralId>, attribute: LiteralId) -> Option<Value> {
        let attribute = self.literal(attribute);
        match object {
            Some(object) => match self.lookup(row, self.literal(object)) {
                Some(sub) => get(sub, attribute).cloned(),
                None => Some(Value::from(0)),
            },
            None => self.lookup(row, attribute).cloned(),
        }
    }

    fn set_pos(&mut self, index: usize, key: PosKey) {
        if index >= self.position.len() {
            self.position.resize(index + 1, PosKey::Undefined);
        }
        self.position[index] = key;
    }

    fn filters_pass(&self, filters: &[Filter]) -> bool {
        filters.iter().all(|filter| match filter {
            Filter::Index { array, operator, right } => {
                compare_index(self.indices[*array], self.lengths[*array], *operator, *right)
            }
            Filter::Attribute { object, sub, attribute, operator, right, stringify } => {
                let base = &self.slots[*object];
                let target = match sub {
                    Some(sub) => self.child(base, self.literal(*sub)),
                    None => base.clone(),
                };
                let guard = match &target {
                    Binding::Root => true,
                    Binding::Undefined => false,
                    Binding::Value(v) => is_truthy(Some(v.as_ref())),
                };
                if !guard {
                    return false;
                }
                let value = self.lookup(&target, self.literal(*attribute));
                let right = self.literal(*right);
                if *stringify {
                    compare(Some(&Value::String(to_text(value))), *operator, right)
                } else {
                    compare(value, *operator, right)
                }
            }
        })
    }

    fn emit(&mut self, emit: &'p Emit) {
        let len = emit.position_len.min(self.position.len());
        let mut fragment = OutputFragment::at(self.position[..len].to_vec());
        fragment.before = emit.before;
        fragment.after = emit.after;
        fragment.row_start = emit.row_start;
        fragment.row_end = emit.row_end;

        if let Some(access) = &emit.value {
            let shown = self.filters_pass(&access.filters);
            let (text, hide) = self.render_value(access);
            fragment.hide = hide;
            fragment.row_show = Some(shown);
            if shown {
                fragment.text = text;
            }
        }

        match emit.dedupe {
            Some(offset) => {
                if !self.emitted.contains(&offset) || fragment.row_show == Some(true) {
                    self.fragments.push(fragment);
                }
                self.emitted.insert(offset);
            }
            None => self.fragments.push(fragment),
        }
    }

    /// Reads, formats and escapes one value. Returns the text and the
    /// hide-block delta requested by the formatters.
    fn render_value(&self, access: &'p ValueAccess) -> (String, Option<i32>) {
        let binding = &self.slots[access.object];
        let value = match access.attribute {
            Some(attribute) => self.lookup(binding, self.literal(attribute)).cloned(),
            None => match binding {
                Binding::Value(v) if !v.is_object() && !v.is_array() => Some(v.as_ref().clone()),
                _ => None,
            },
        };

        let mut ctx = FormatterContext::default();
        let mut value = self.run_chain(&access.formatters, access, &mut ctx, value.unwrap_or(Value::Null));
        if value.is_null() {
            value = Value::String(String::new());
        }
        let hide = ctx.is_hidden;
        if self.program.escape_xml {
            if let Value::String(s) = &value {
                value = Value::String(escape_xml(s));
            }
        }
        let value = self.run_chain(&access.injecting, access, &mut ctx, value);

        let text = match &value {
            Value::Null | Value::Object(_) | Value::Array(_) => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if !(n.is_i64() || n.is_u64()) => number_text(f),
                _ => n.to_string(),
            },
            Value::Bool(b) => b.to_string(),
        };
        (text, hide)
    }

    fn run_chain(
        &self,
        steps: &'p [FormatterStep],
        access: &'p ValueAccess,
        ctx: &mut FormatterContext,
        mut value: Value,
    ) -> Value {
        for (k, step) in steps.iter().enumerate() {
            if k > 0 && ctx.stop_propagation {
                break;
            }
            let args: Vec<Value> = step.args.iter().map(|arg| self.argument(arg, access)).collect();
            value = step.formatter.call(ctx, value, &args);
        }
        value
    }

    fn argument(&self, arg: &ArgSource, access: &ValueAccess) -> Value {
        match arg {
            ArgSource::Literal(id) => Value::String(self.literal(*id).to_string()),
            ArgSource::Data { levels, path } => {
                let Some(&slot) = access.parents.get(*levels) else {
                    return Value::Null;
                };
                let binding = &self.slots[slot];
                let mut parts = self.literal(*path).split('.').filter(|p| !p.is_empty());
                let Some(first) = parts.next() else {
                    return match binding {
                        Binding::Value(v) => v.as_ref().clone(),
                        _ => Value::Null,
                    };
                };
                let mut current = self.lookup(binding, first);
                for part in parts {
                    current = current.and_then(|v| get(v, part));
                }
                current.cloned().unwrap_or(Value::Null)
            }
        }
    }
}

/// Property access on a data value; arrays accept numeric keys.
fn get<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Row of an iterated object: `{ "att": key, "val": value }`.
fn entry(key: String, value: Value) -> Value {
    let mut row = Map::with_capacity(2);
    row.insert("att".to_string(), Value::String(key));
    row.insert("val".to_string(), value);
    Value::Object(row)
}

/// Escapes markup characters and drops control characters XML forbids.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' => {}
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::hierarchy::sort_hierarchy;
    use crate::segmenter::segment;
    use serde_json::json;
    use stencil_marker::DescriptorBuilder;
    use stencil_markup::find_markers;
    use stencil_template_core::{CompileOptions, FormatterRegistry};

    fn program(template: &str, registry: &FormatterRegistry) -> Program {
        let (xml, markers) = find_markers(template);
        let mut builder = DescriptorBuilder::new();
        for marker in &markers {
            builder.parse(&marker.name, marker.pos).unwrap();
        }
        let mut descriptor = builder.finish();
        let text = segment(&xml, &mut descriptor).unwrap();
        let order = sort_hierarchy(&descriptor);
        Compiler::new(&descriptor, registry, &CompileOptions::default())
            .compile(&order, &text)
            .unwrap()
    }

    fn texts(fragments: &[OutputFragment]) -> Vec<&str> {
        fragments
            .iter()
            .filter(|f| f.row_show.is_some())
            .map(|f| f.text.as_str())
            .collect()
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&c"), "a&lt;b&gt;&amp;c");
        assert_eq!(escape_xml("x\u{1}y\u{b}z\n"), "xyz\n");
    }

    #[test]
    fn test_object_value_and_missing_value() {
        let program = program("<x>{d.title}|{d.missing}</x>", &FormatterRegistry::new());
        let fragments = execute(&program, &json!({"title": "Hi"}), None);
        assert_eq!(texts(&fragments), vec!["Hi", ""]);
    }

    #[test]
    fn test_complement_is_read_from_c() {
        let program = program("<x>{c.now}</x>", &FormatterRegistry::new());
        let fragments = execute(&program, &json!({}), Some(&json!({"now": 7})));
        assert_eq!(texts(&fragments), vec!["7"]);
    }

    #[test]
    fn test_loop_emits_one_value_per_row() {
        let program = program("<t><r>{d[i].n}</r><r>{d[i+1].n}</r></t>", &FormatterRegistry::new());
        let fragments = execute(&program, &json!([{"n": 1}, {"n": 2}, {"n": 3}]), None);
        assert_eq!(texts(&fragments), vec!["1", "2", "3"]);
        assert_eq!(fragments.iter().filter(|f| f.row_start).count(), 3);
    }

    #[test]
    fn test_object_iteration_rows() {
        let program = program(
            "<t><r>{d.m[i].att}={d.m[i].val}</r><r>{d.m[i+1].att}</r></t>",
            &FormatterRegistry::new(),
        );
        let fragments = execute(&program, &json!({"m": {"a": 1, "b": 2}}), None);
        assert_eq!(texts(&fragments), vec!["a", "1", "b", "2"]);
    }

    #[test]
    fn test_failed_filter_blanks_value() {
        let program = program(
            "<t><r>{d[i, n > 1].n}</r><r>{d[i+1, n > 1].n}</r></t>",
            &FormatterRegistry::new(),
        );
        let fragments = execute(&program, &json!([{"n": 1}, {"n": 2}]), None);
        let shown: Vec<_> = fragments
            .iter()
            .filter_map(|f| f.row_show.map(|s| (s, f.text.as_str())))
            .collect();
        assert_eq!(shown, vec![(false, ""), (true, "2")]);
    }

    #[test]
    fn test_lookup_finds_first_match() {
        let program = program("<x>{d.cars[id=2].brand}</x>", &FormatterRegistry::new());
        let data = json!({"cars": [{"id": 1, "brand": "A"}, {"id": 2, "brand": "B"}, {"id": 2, "brand": "C"}]});
        assert_eq!(texts(&execute(&program, &data, None)), vec!["B"]);
        let none = json!({"cars": [{"id": 1, "brand": "A"}]});
        assert_eq!(texts(&execute(&program, &none, None)), vec![""]);
    }

    #[test]
    fn test_values_are_escaped() {
        let program = program("<x>{d.v}</x>", &FormatterRegistry::new());
        let fragments = execute(&program, &json!({"v": "<b>&"}), None);
        assert_eq!(texts(&fragments), vec!["&lt;b&gt;&amp;"]);
    }

    #[test]
    fn test_formatter_chain_and_stop_propagation() {
        let mut registry = FormatterRegistry::new();
        registry.register_fn("upper", |_, v, _| match v {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        });
        registry.register_fn("stop", |ctx, v, _| {
            ctx.stop_propagation = true;
            v
        });
        registry.register_fn("suffix", |_, v, args| {
            let suffix = args.first().and_then(Value::as_str).unwrap_or_default();
            Value::String(format!("{}{}", v.as_str().unwrap_or_default(), suffix))
        });
        let chained = program("<x>{d.v:upper:suffix(!)}</x>", &registry);
        assert_eq!(texts(&execute(&chained, &json!({"v": "a"}), None)), vec!["A!"]);
        let stopped = program("<x>{d.v:stop:upper}</x>", &registry);
        assert_eq!(texts(&execute(&stopped, &json!({"v": "a"}), None)), vec!["a"]);
    }

    #[test]
    fn test_dynamic_iterator_fills_missing_rows() {
        let template = "<t><r>{d[i].n}<c>{d[i].cells[k].v}</c><c>{d[i].cells[k++].v}</c></r><r>{d[i+1].n}</r></t>";
        let program = program(template, &FormatterRegistry::new());
        let data = json!([
            {"n": "a", "cells": [{"k": 1, "v": "x"}, {"k": 2, "v": "y"}]},
            {"n": "b", "cells": [{"k": 2, "v": "z"}]}
        ]);
        let fragments = execute(&program, &data, None);
        // Row `b` gets an empty cell for the key it lacks.
        let cell_starts = fragments.iter().filter(|f| f.row_start && f.position.len() > 3).count();
        assert_eq!(cell_starts, 4);
    }
}
