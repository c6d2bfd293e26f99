//! The executable instruction set produced by the compiler.
//!
//! Instructions never embed template text. Attribute names, operands,
//! formatter arguments and static markup are referenced through the
//! program's [`LiteralTable`], so nothing a template author or a data value
//! writes can change the structure of the program.

use itertools::Itertools;
use std::fmt::{self, Write};
use std::sync::Arc;
use stencil_template_core::Formatter;
use stencil_types::{LiteralId, LiteralTable, NodePath, Operator};

/// Index of a binding in the render-time frame. One slot per descriptor node.
pub type Slot = usize;

#[derive(Debug, Clone)]
pub enum Instruction {
    /// `slot = parent[name]`, or the parent itself when `name` is empty.
    Bind { slot: Slot, parent: Slot, name: LiteralId },
    /// `slot` = first row of `parent[name]` passing every filter.
    Find {
        slot: Slot,
        parent: Slot,
        name: LiteralId,
        filters: Vec<Filter>,
    },
    /// `position[index] = value`
    SetPos { index: usize, value: usize },
    Emit(Emit),
    Loop(Loop),
}

/// Iterates the rows of `parent[name]`, binding each to `slot`.
#[derive(Debug, Clone)]
pub struct Loop {
    pub slot: Slot,
    pub parent: Slot,
    pub name: LiteralId,
    pub iterators: Vec<LoopIterator>,
    /// Rows are also produced for dynamic-domain values missing from the data.
    pub dynamic: bool,
    pub body: Vec<Instruction>,
}

/// Writes one row key at `position` of the position vector.
#[derive(Debug, Clone)]
pub struct LoopIterator {
    pub position: usize,
    pub key: IteratorKey,
}

#[derive(Debug, Clone)]
pub enum IteratorKey {
    /// The row index.
    Index,
    /// `row[attribute]` or `row[object][attribute]`.
    Attribute {
        object: Option<LiteralId>,
        attribute: LiteralId,
        dynamic: bool,
    },
}

/// Pushes one output fragment.
#[derive(Debug, Clone, Default)]
pub struct Emit {
    /// Number of position components copied into the fragment.
    pub position_len: usize,
    pub before: Option<LiteralId>,
    pub after: Option<LiteralId>,
    pub row_start: bool,
    pub row_end: bool,
    pub value: Option<ValueAccess>,
    /// Offset de-duplicated in templates without loops.
    pub dedupe: Option<usize>,
}

/// Reads, filters and formats one data value.
#[derive(Debug, Clone)]
pub struct ValueAccess {
    pub object: Slot,
    /// `None` reads the bound value itself.
    pub attribute: Option<LiteralId>,
    /// Row filters; a failing filter blanks the value and hides the row.
    pub filters: Vec<Filter>,
    /// Run before escaping.
    pub formatters: Vec<FormatterStep>,
    /// Run after escaping.
    pub injecting: Vec<FormatterStep>,
    /// Objects `.`/`..` formatter arguments resolve against: the read
    /// object, then the owner's ancestors nearest first.
    pub parents: Vec<Slot>,
}

#[derive(Clone)]
pub struct FormatterStep {
    pub name: LiteralId,
    pub formatter: Arc<dyn Formatter>,
    pub args: Vec<ArgSource>,
}

impl fmt::Debug for FormatterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterStep")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSource {
    Literal(LiteralId),
    /// `path` read from `parents[levels]`.
    Data { levels: usize, path: LiteralId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Compares the current row index of `array`. A negative operand counts
    /// from the end; an operand that is not an integer never matches.
    Index {
        array: Slot,
        operator: Operator,
        right: Option<i64>,
    },
    /// Compares `object[attribute]`, or `object[sub][attribute]`.
    Attribute {
        object: Slot,
        sub: Option<LiteralId>,
        attribute: LiteralId,
        operator: Operator,
        right: LiteralId,
        /// The operand is `true`/`false`: compare the value's text form.
        stringify: bool,
    },
}

/// A compiled template: instructions, literal side-table and slot names.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) literals: LiteralTable,
    pub(crate) slots: Vec<NodePath>,
    /// Slot bound to the synthetic `{ d, c }` root object.
    pub(crate) root: Option<Slot>,
    pub(crate) has_dynamic: bool,
    pub(crate) escape_xml: bool,
}

impl Program {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn literals(&self) -> &LiteralTable {
        &self.literals
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Total number of instructions, loop bodies included.
    pub fn len(&self) -> usize {
        fn count(instructions: &[Instruction]) -> usize {
            instructions
                .iter()
                .map(|i| match i {
                    Instruction::Loop(l) => 1 + count(&l.body),
                    _ => 1,
                })
                .sum()
        }
        count(&self.instructions)
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Human-readable dump of the program, one instruction per line.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        self.list(&self.instructions, 0, &mut out);
        out
    }

    fn list(&self, instructions: &[Instruction], indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        for instruction in instructions {
            // Writing to a String cannot fail.
            let _ = match instruction {
                Instruction::Bind { slot, parent, name } => writeln!(
                    out,
                    "{pad}bind {} = {}[{}]",
                    self.slot_name(*slot),
                    self.slot_name(*parent),
                    self.quoted(*name)
                ),
                Instruction::Find { slot, parent, name, filters } => writeln!(
                    out,
                    "{pad}find {} in {}[{}] where {}",
                    self.slot_name(*slot),
                    self.slot_name(*parent),
                    self.quoted(*name),
                    filters.iter().map(|f| self.filter_text(f)).join(" && ")
                ),
                Instruction::SetPos { index, value } => {
                    writeln!(out, "{pad}pos[{index}] = {value}")
                }
                Instruction::Emit(emit) => writeln!(out, "{pad}{}", self.emit_text(emit)),
                Instruction::Loop(l) => {
                    let keys = l
                        .iterators
                        .iter()
                        .map(|it| match &it.key {
                            IteratorKey::Index => format!("pos[{}] = i", it.position),
                            IteratorKey::Attribute { object, attribute, dynamic } => format!(
                                "pos[{}] = {}{}{}",
                                it.position,
                                object.map(|o| format!("{}.", self.literals.get(o))).unwrap_or_default(),
                                self.literals.get(*attribute),
                                if *dynamic { "++" } else { "" }
                            ),
                        })
                        .join(", ");
                    let _ = writeln!(
                        out,
                        "{pad}loop {} over {}[{}]{} {{ {} }}",
                        self.slot_name(l.slot),
                        self.slot_name(l.parent),
                        self.quoted(l.name),
                        if l.dynamic { " with missing rows" } else { "" },
                        keys
                    );
                    self.list(&l.body, indent + 1, out);
                    writeln!(out, "{pad}end")
                }
            };
        }
    }

    fn emit_text(&self, emit: &Emit) -> String {
        let mut text = format!("emit pos[..{}]", emit.position_len);
        if let Some(before) = emit.before {
            let _ = write!(text, " before={before}");
        }
        if let Some(value) = &emit.value {
            let attribute = value.attribute.map(|a| self.quoted(a)).unwrap_or_default();
            let _ = write!(text, " value={}[{}]", self.slot_name(value.object), attribute);
            for step in value.formatters.iter().chain(&value.injecting) {
                let _ = write!(text, ":{}", self.literals.get(step.name));
                if !step.args.is_empty() {
                    let args = step
                        .args
                        .iter()
                        .map(|arg| match arg {
                            ArgSource::Literal(id) => id.to_string(),
                            ArgSource::Data { levels, path } => {
                                format!("{}{}", ".".repeat(levels + 1), self.literals.get(*path))
                            }
                        })
                        .join(", ");
                    let _ = write!(text, "({args})");
                }
            }
            if !value.filters.is_empty() {
                let filters = value.filters.iter().map(|f| self.filter_text(f)).join(" && ");
                let _ = write!(text, " if {filters}");
            }
        }
        if let Some(after) = emit.after {
            let _ = write!(text, " after={after}");
        }
        if emit.row_start {
            text.push_str(" row-start");
        }
        if emit.row_end {
            text.push_str(" row-end");
        }
        if let Some(offset) = emit.dedupe {
            let _ = write!(text, " once@{offset}");
        }
        text
    }

    fn filter_text(&self, filter: &Filter) -> String {
        match filter {
            Filter::Index { array, operator, right } => format!(
                "{}.i {} {}",
                self.slot_name(*array),
                operator.symbol(),
                right.map(|r| r.to_string()).unwrap_or_else(|| "NaN".to_string())
            ),
            Filter::Attribute { object, sub, attribute, operator, right, .. } => format!(
                "{}{}[{}] {} {}",
                self.slot_name(*object),
                sub.map(|s| format!("[{}]", self.quoted(s))).unwrap_or_default(),
                self.quoted(*attribute),
                operator.symbol(),
                right
            ),
        }
    }

    fn slot_name(&self, slot: Slot) -> &str {
        self.slots.get(slot).map(NodePath::as_str).unwrap_or("?")
    }

    fn quoted(&self, id: LiteralId) -> String {
        format!("{:?}", self.literals.get(id))
    }
}
