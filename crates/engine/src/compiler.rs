//! Lowers a segmented descriptor into a [`Program`].
//!
//! Nodes are visited in hierarchy order. Every array opens a loop whose body
//! receives the nodes and access points below it; a loop is closed as soon as
//! the next node no longer belongs to it. Position indexes are allocated so
//! that each array level owns two slots of the position vector (row key and
//! part offset), plus one extra slot per additional custom iterator.

use crate::error::CompileError;
use crate::filter::{parse_index, remove_quotes};
use crate::program::{
    ArgSource, Emit, Filter, FormatterStep, Instruction, IteratorKey, Loop, LoopIterator, Program,
    Slot, ValueAccess,
};
use crate::segmenter::StaticText;
use log::debug;
use std::sync::Arc;
use stencil_template_core::{
    COUNT_FORMATTER, CompileOptions, Formatter, FormatterRegistry, LoopCounter,
};
use stencil_types::{
    AccessPoint, ArrayRole, Condition, Descriptor, FormatterArg, LiteralTable, NodeKind, NodePath,
};

pub struct Compiler<'a> {
    registry: &'a FormatterRegistry,
    options: &'a CompileOptions,
    descriptor: &'a Descriptor,
    literals: LiteralTable,
    root: Vec<Instruction>,
    open: Vec<OpenLoop>,
    /// Extra position slots taken by the custom iterators of open loops.
    nb_custom: usize,
}

struct OpenLoop {
    node: usize,
    header: Loop,
}

impl<'a> Compiler<'a> {
    pub fn new(
        descriptor: &'a Descriptor,
        registry: &'a FormatterRegistry,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            registry,
            options,
            descriptor,
            literals: LiteralTable::new(),
            root: Vec::new(),
            open: Vec::new(),
            nb_custom: 0,
        }
    }

    /// Compiles the descriptor visited in `order` (see [`crate::hierarchy::sort_hierarchy`]).
    pub fn compile(mut self, order: &[usize], text: &StaticText) -> Result<Program, CompileError> {
        let descriptor = self.descriptor;
        let single_pass = !descriptor.has_iterators();
        let mut highest = 0;

        if let Some(before) = self.literals.intern_text(&text.before) {
            self.push(Instruction::SetPos { index: 0, value: 0 });
            self.push(Instruction::Emit(Emit {
                position_len: 1,
                before: Some(before),
                ..Default::default()
            }));
        }

        for &idx in order {
            self.close_exited_loops(idx);
            let node = descriptor.node(idx);
            match node.kind {
                NodeKind::Object => {
                    if let Some(parent) = &node.parent {
                        let parent = self.slot(parent)?;
                        let name = self.literals.intern(&node.name);
                        self.push(Instruction::Bind { slot: idx, parent, name });
                    }
                }
                NodeKind::ObjectInArray => {
                    let parent = self.parent_slot(&node.parent, &node.path)?;
                    let name = self.literals.intern(&node.name);
                    let filters = self.filters(&node.conditions, Some(idx))?;
                    self.push(Instruction::Find { slot: idx, parent, name, filters });
                }
                NodeKind::Array => self.open_loop(idx)?,
            }

            for part in &node.xml_parts {
                highest = highest.max(part.position);
                let emit = self.emit(node.parents.as_slice(), part, single_pass)?;
                self.push(Instruction::SetPos {
                    index: self.nb_custom + 2 * part.depth,
                    value: part.position,
                });
                self.push(Instruction::Emit(emit));
            }
        }

        while self.close_loop() {}

        if let Some(after) = self.literals.intern_text(&text.after) {
            self.push(Instruction::SetPos { index: 0, value: highest + 1 });
            self.push(Instruction::Emit(Emit {
                position_len: 1,
                after: Some(after),
                ..Default::default()
            }));
        }

        let program = Program {
            instructions: self.root,
            literals: self.literals,
            slots: descriptor.iter().map(|n| n.path.clone()).collect(),
            root: descriptor.index_of(&NodePath::from("_root")),
            has_dynamic: descriptor.iter().any(|n| n.has_dynamic_iterator()),
            escape_xml: self.options.escape_xml,
        };
        debug!(
            "compiled {} instructions, {} literals, {} slots",
            program.len(),
            program.literals.len(),
            program.slots.len()
        );
        Ok(program)
    }

    fn open_loop(&mut self, idx: usize) -> Result<(), CompileError> {
        let descriptor = self.descriptor;
        let node = descriptor.node(idx);
        let depth = node.depth.unwrap_or(0);
        let start = node.span.map(|s| s.start).unwrap_or(0);
        let base = self.nb_custom + 2 * depth;

        if let Some(index) = base.checked_sub(2) {
            self.push(Instruction::SetPos { index, value: start });
        }
        if let Some(index) = base.checked_sub(1) {
            self.push(Instruction::SetPos { index, value: start });
        }
        if let Some(before) = self.literals.intern_text(&node.before) {
            self.push(Instruction::Emit(Emit {
                position_len: base.saturating_sub(1),
                before: Some(before),
                ..Default::default()
            }));
        }

        let mut iterators = Vec::with_capacity(node.iterators.len());
        for (k, spec) in node.iterators.iter().enumerate() {
            if k > 0 {
                self.nb_custom += 1;
            }
            let key = if spec.is_index() {
                IteratorKey::Index
            } else {
                IteratorKey::Attribute {
                    object: spec.object.as_deref().map(|o| self.literals.intern(o)),
                    attribute: self.literals.intern(&spec.attribute),
                    dynamic: spec.dynamic,
                }
            };
            iterators.push(LoopIterator {
                position: (self.nb_custom + 2 * depth).saturating_sub(1),
                key,
            });
        }

        let parent = self.parent_slot(&node.parent, &node.path)?;
        let header = Loop {
            slot: idx,
            parent,
            name: self.literals.intern(&node.name),
            iterators,
            dynamic: node.has_dynamic_iterator(),
            body: Vec::new(),
        };
        debug!("open loop {} at depth {}", node.path, depth);
        self.open.push(OpenLoop { node: idx, header });
        Ok(())
    }

    /// Closes the loops the node at `next` is not part of.
    fn close_exited_loops(&mut self, next: usize) {
        let descriptor = self.descriptor;
        let node = descriptor.node(next);

        let mut array_parent = node.parent.as_ref().and_then(|p| descriptor.index_of(p));
        while let Some(p) = array_parent {
            if descriptor.node(p).kind == NodeKind::Array {
                break;
            }
            array_parent = descriptor.node(p).parent.as_ref().and_then(|pp| descriptor.index_of(pp));
        }

        let next_depth = node
            .depth
            .or_else(|| array_parent.and_then(|p| descriptor.node(p).depth))
            .map(|d| d as i64)
            .unwrap_or(-1);

        while let Some(last) = self.open.last().map(|l| l.node) {
            // A depth of zero means the loop was never located: it only
            // closes when the traversal leaves its branch.
            let last_depth = descriptor
                .node(last)
                .depth
                .filter(|&d| d != 0)
                .map(|d| d as i64)
                .unwrap_or(i64::MAX);
            if array_parent == Some(last) || next_depth > last_depth {
                break;
            }
            self.close_loop();
        }
    }

    /// Closes the innermost loop. Returns `false` when none is open.
    fn close_loop(&mut self) -> bool {
        let Some(open) = self.open.pop() else {
            return false;
        };
        self.nb_custom = self
            .nb_custom
            .saturating_sub(open.header.iterators.len().saturating_sub(1));
        debug!("close loop {}", self.descriptor.node(open.node).path);
        self.push(Instruction::Loop(open.header));
        true
    }

    fn push(&mut self, instruction: Instruction) {
        match self.open.last_mut() {
            Some(open) => open.header.body.push(instruction),
            None => self.root.push(instruction),
        }
    }

    fn emit(
        &mut self,
        ancestors: &[NodePath],
        part: &AccessPoint,
        single_pass: bool,
    ) -> Result<Emit, CompileError> {
        let value = match part.role {
            ArrayRole::None => Some(self.value_access(ancestors, part)?),
            ArrayRole::Start | ArrayRole::End => None,
        };
        Ok(Emit {
            position_len: self.nb_custom + 2 * part.depth + 1,
            before: self.literals.intern_text(&part.before),
            after: self.literals.intern_text(&part.after),
            row_start: part.role == ArrayRole::Start,
            row_end: part.role == ArrayRole::End,
            value,
            dedupe: single_pass.then_some(part.position),
        })
    }

    fn value_access(&mut self, ancestors: &[NodePath], part: &AccessPoint) -> Result<ValueAccess, CompileError> {
        let object = self.slot(&part.object)?;
        let mut parents = vec![object];
        for ancestor in ancestors.iter().rev() {
            parents.push(self.slot(ancestor)?);
        }

        let mut formatters = Vec::new();
        let mut injecting = Vec::new();
        for call in &part.formatters {
            let counter = call.name == COUNT_FORMATTER && !self.registry.contains(&call.name);
            let formatter: Arc<dyn Formatter> = match self.registry.get(&call.name) {
                Some(formatter) => formatter,
                None if counter => Arc::new(LoopCounter),
                None => {
                    return Err(CompileError::UnknownFormatter {
                        name: call.name.clone(),
                        suggestion: self.registry.closest(&call.name),
                    });
                }
            };
            let mut args = Vec::with_capacity(call.args.len() + 1);
            if counter {
                // One counter per marker, keyed by its offset.
                args.push(ArgSource::Literal(self.literals.intern(&part.position.to_string())));
            }
            args.extend(call.args.iter().map(|arg| match arg {
                FormatterArg::Literal(text) => ArgSource::Literal(self.literals.intern(text)),
                FormatterArg::Data { levels, path } => ArgSource::Data {
                    levels: *levels,
                    path: self.literals.intern(path),
                },
            }));
            let step = FormatterStep {
                name: self.literals.intern(&call.name),
                formatter: formatter.clone(),
                args,
            };
            if formatter.can_inject_xml() {
                injecting.push(step);
            } else {
                formatters.push(step);
            }
        }

        Ok(ValueAccess {
            object,
            attribute: self.literals.intern_text(&part.attribute),
            filters: self.filters(&part.conditions, None)?,
            formatters,
            injecting,
            parents,
        })
    }

    /// Compiles conditions. `lookup` binds attribute filters to the row being
    /// scanned by a `Find` instead of the condition's own node.
    fn filters(&mut self, conditions: &[Condition], lookup: Option<Slot>) -> Result<Vec<Filter>, CompileError> {
        let mut filters = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let (sub, attribute) = match condition.left_attr.split_once('.') {
                Some((sub, attribute)) => (Some(sub), attribute),
                None => (None, condition.left_attr.as_str()),
            };
            if attribute == "i" {
                filters.push(Filter::Index {
                    array: self.slot(&condition.left_parent)?,
                    operator: condition.operator,
                    right: parse_index(&condition.right),
                });
                continue;
            }
            let object = match lookup {
                Some(slot) => slot,
                None => self.slot(&condition.left_parent)?,
            };
            filters.push(Filter::Attribute {
                object,
                sub: sub.map(|s| self.literals.intern(s)),
                attribute: self.literals.intern(attribute),
                operator: condition.operator,
                right: self.literals.intern(remove_quotes(&condition.right)),
                stringify: condition.right == "true" || condition.right == "false",
            });
        }
        Ok(filters)
    }

    fn parent_slot(&self, parent: &Option<NodePath>, path: &NodePath) -> Result<Slot, CompileError> {
        match parent {
            Some(parent) => self.slot(parent),
            None => Err(self.program_error(format!("\"{path}\" has no parent object"))),
        }
    }

    fn slot(&self, path: &NodePath) -> Result<Slot, CompileError> {
        self.descriptor
            .index_of(path)
            .ok_or_else(|| self.program_error(format!("unknown object \"{path}\"")))
    }

    /// Error carrying a listing of everything compiled so far.
    fn program_error(&self, reason: String) -> CompileError {
        let mut instructions = self.root.clone();
        for open in self.open.iter().rev() {
            instructions.push(Instruction::Loop(open.header.clone()));
        }
        let partial = Program {
            instructions,
            literals: self.literals.clone(),
            slots: self.descriptor.iter().map(|n| n.path.clone()).collect(),
            root: None,
            has_dynamic: false,
            escape_xml: self.options.escape_xml,
        };
        CompileError::Program { reason, listing: partial.listing() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::sort_hierarchy;
    use crate::segmenter::segment;
    use stencil_marker::DescriptorBuilder;
    use stencil_markup::find_markers;

    fn compile_with(template: &str, registry: &FormatterRegistry) -> Result<Program, CompileError> {
        let (xml, markers) = find_markers(template);
        let mut builder = DescriptorBuilder::new();
        for marker in &markers {
            builder.parse(&marker.name, marker.pos)?;
        }
        let mut descriptor = builder.finish();
        let text = segment(&xml, &mut descriptor)?;
        let order = sort_hierarchy(&descriptor);
        let options = CompileOptions::default();
        Compiler::new(&descriptor, registry, &options).compile(&order, &text)
    }

    fn compile(template: &str) -> Program {
        compile_with(template, &FormatterRegistry::new()).unwrap()
    }

    fn loops(instructions: &[Instruction]) -> Vec<&Loop> {
        instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Loop(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_static_text_only() {
        let program = compile("<xml>plain</xml>");
        assert_eq!(program.len(), 2);
        assert!(matches!(program.instructions()[0], Instruction::SetPos { index: 0, value: 0 }));
        let Instruction::Emit(emit) = &program.instructions()[1] else {
            panic!("expected emit");
        };
        assert_eq!(program.literals().get(emit.before.unwrap()), "<xml>plain</xml>");
    }

    #[test]
    fn test_object_marker_binds_and_emits() {
        let program = compile("<xml> {d.title} </xml>");
        let listing = program.listing();
        assert!(listing.contains("bind _rootd = _root[\"d\"]"), "{listing}");
        assert!(listing.contains("value=_rootd[\"title\"]"), "{listing}");
        assert!(listing.contains("once@6"), "{listing}");
        assert!(loops(program.instructions()).is_empty());
    }

    #[test]
    fn test_array_opens_loop_with_row_markers() {
        let program = compile("<t><r>{d[i].name}</r><r>{d[i+1].name}</r></t>");
        let outer = loops(program.instructions());
        assert_eq!(outer.len(), 1);
        let body = &outer[0].body;
        assert!(matches!(outer[0].iterators[0].key, IteratorKey::Index));
        assert_eq!(outer[0].iterators[0].position, 1);

        let emits: Vec<&Emit> = body
            .iter()
            .filter_map(|i| match i {
                Instruction::Emit(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(emits.len(), 3);
        assert!(emits[0].value.is_some());
        assert_eq!(emits[0].position_len, 3);
        assert!(emits[1].row_start);
        assert!(emits[2].row_end);
        assert!(emits.iter().all(|e| e.dedupe.is_none()));
    }

    #[test]
    fn test_nested_array_loops_inside_parent() {
        let template = "<t><r>{d[i].a}<c>{d[i].sub[i].v}</c><c>{d[i].sub[i+1].v}</c></r><r>{d[i+1].a}</r></t>";
        let program = compile(template);
        let listing = program.listing();
        let top = loops(program.instructions());
        assert_eq!(top.len(), 1, "{listing}");
        let inner = loops(&top[0].body);
        assert_eq!(inner.len(), 1, "{listing}");
        assert_eq!(program.literals().get(inner[0].name), "sub");
        assert_eq!(inner[0].iterators[0].position, 3);
    }

    #[test]
    fn test_sibling_arrays_are_separate_loops() {
        let template = "<t><r>{d.a[i].x}</r><r>{d.a[i+1].x}</r></t><u><r>{d.b[i].y}</r><r>{d.b[i+1].y}</r></u>";
        let program = compile(template);
        let listing = program.listing();
        let top = loops(program.instructions());
        assert_eq!(top.len(), 2, "{listing}");
        assert!(loops(&top[0].body).is_empty());
    }

    #[test]
    fn test_custom_iterator_key() {
        let program = compile("<t><r>{d[sort].n}</r><r>{d[sort+1].n}</r></t>");
        let top = loops(program.instructions());
        match &top[0].iterators[0].key {
            IteratorKey::Attribute { object, attribute, dynamic } => {
                assert!(object.is_none());
                assert_eq!(program.literals().get(*attribute), "sort");
                assert!(!dynamic);
            }
            other => panic!("unexpected key {other:?}"),
        }
        assert!(!top[0].dynamic);
    }

    #[test]
    fn test_row_condition_becomes_filter() {
        let program = compile("<t><r>{d[i, sort > 10].n}</r><r>{d[i+1, sort > 10].n}</r></t>");
        let listing = program.listing();
        assert!(listing.contains("if _rootd[\"sort\"] >"), "{listing}");
    }

    #[test]
    fn test_lookup_compiles_to_find() {
        let program = compile("<x>{d.cars[id=2].brand}</x>");
        let listing = program.listing();
        assert!(listing.contains("find _rootdcars[id=2] in _rootd[\"cars\"] where"), "{listing}");
        assert!(listing.contains("value=_rootdcars[id=2][\"brand\"]"), "{listing}");
    }

    #[test]
    fn test_unknown_formatter_suggests_name() {
        let mut registry = FormatterRegistry::new();
        registry.register_fn("upperCase", |_, v, _| v);
        let err = compile_with("<x>{d.title:uperCase}</x>", &registry).unwrap_err();
        match err {
            CompileError::UnknownFormatter { name, suggestion } => {
                assert_eq!(name, "uperCase");
                assert_eq!(suggestion, "upperCase");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_static_after_positioned_past_last_part() {
        let program = compile("<x>{d.a}</x>");
        let last = program.instructions().len();
        assert!(matches!(
            program.instructions()[last - 2],
            Instruction::SetPos { index: 0, value: 4 }
        ));
    }
}
