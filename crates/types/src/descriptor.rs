//! The descriptor: every data path a template touches, keyed by canonical path.
//!
//! The descriptor is built once per template by the marker parser, enriched by
//! the segmenter (exact array boundaries, static text, depths) and then frozen
//! inside the compiled program.

use crate::ids::NodePath;
use serde::Serialize;
use std::collections::HashMap;

/// How a descriptor node is bound at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// `parent[name]`
    Object,
    /// A repeated block iterated over `parent[name]`.
    Array,
    /// The first row of `parent[name]` matching the node's conditions.
    ObjectInArray,
}

/// Per-row key of an array loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IteratorSpec {
    /// Sub-object holding the attribute, as in `movie.sort`.
    pub object: Option<String>,
    pub attribute: String,
    /// `++` iterators: the value domain is collected from the whole data set.
    pub dynamic: bool,
}

impl IteratorSpec {
    /// The reserved row-index iterator `i`.
    pub fn index() -> Self {
        Self {
            object: None,
            attribute: "i".to_string(),
            dynamic: false,
        }
    }

    pub fn is_index(&self) -> bool {
        self.object.is_none() && self.attribute == "i"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
        }
    }
}

/// `left_attr OP right` evaluated against the current row of `left_parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    /// Attribute of the row, possibly dotted (`owner.age`) or the index `i`.
    pub left_attr: String,
    pub left_parent: NodePath,
    pub operator: Operator,
    /// Right operand as written, quotes included.
    pub right: String,
}

/// One argument of a formatter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FormatterArg {
    Literal(String),
    /// `.attr` / `..attr`: read from the enclosing data objects at render time.
    /// `levels` is the number of dots minus one.
    Data { levels: usize, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatterCall {
    pub name: String,
    pub args: Vec<FormatterArg>,
}

/// Whether an access point opens or closes a repeated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ArrayRole {
    #[default]
    None,
    Start,
    End,
}

/// One marker occurrence bound to a descriptor node.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AccessPoint {
    /// Node whose bound value is read. Differs from the owning node when the
    /// marker steps up with `..`.
    pub object: NodePath,
    pub attribute: String,
    pub formatters: Vec<FormatterCall>,
    /// Row filters inherited from the enclosing array brackets.
    pub conditions: Vec<Condition>,
    /// Offset in the cleaned template text.
    pub position: usize,
    /// Array nesting depth, set by the segmenter.
    pub depth: usize,
    pub before: String,
    pub after: String,
    pub role: ArrayRole,
}

/// Raw and then exact boundaries of a repeated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    /// Offset of the first `[i]` marker, later the exact start of the first row.
    pub start: usize,
    /// Offset of the closing `[i+1]` marker, later the exact end of the first row.
    pub end: Option<usize>,
    /// End of the second, template-only copy of the row.
    pub end_odd: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorNode {
    pub path: NodePath,
    /// Local attribute name; empty for an unnamed nested array.
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodePath>,
    /// Ancestors, root first.
    pub parents: Vec<NodePath>,
    pub iterators: Vec<IteratorSpec>,
    /// Lookup conditions of an `ObjectInArray` node.
    pub conditions: Vec<Condition>,
    pub span: Option<Span>,
    pub xml_parts: Vec<AccessPoint>,
    pub depth: Option<usize>,
    /// Static text emitted before the first row of an array.
    pub before: String,
    /// Marker text that created the node, kept for diagnostics.
    pub marker: String,
}

impl DescriptorNode {
    pub fn new(path: NodePath, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            path,
            name: name.into(),
            kind,
            parent: None,
            parents: Vec::new(),
            iterators: Vec::new(),
            conditions: Vec::new(),
            span: None,
            xml_parts: Vec::new(),
            depth: None,
            before: String::new(),
            marker: String::new(),
        }
    }

    pub fn is_array(&self) -> bool {
        self.kind == NodeKind::Array
    }

    pub fn has_dynamic_iterator(&self) -> bool {
        self.iterators.iter().any(|it| it.dynamic)
    }
}

/// Insertion-ordered set of descriptor nodes.
///
/// Node order is significant: leaves are collected and ties are broken in the
/// order markers were first seen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Descriptor {
    nodes: Vec<DescriptorNode>,
    #[serde(skip)]
    index: HashMap<NodePath, usize>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, returning its index. An existing node with the same path
    /// is kept and its index returned.
    pub fn insert(&mut self, node: DescriptorNode) -> usize {
        if let Some(&idx) = self.index.get(&node.path) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.path.clone(), idx);
        self.nodes.push(node);
        idx
    }

    pub fn index_of(&self, path: &NodePath) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.index.contains_key(path)
    }

    pub fn get(&self, path: &NodePath) -> Option<&DescriptorNode> {
        self.index_of(path).map(|idx| &self.nodes[idx])
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut DescriptorNode> {
        match self.index_of(path) {
            Some(idx) => Some(&mut self.nodes[idx]),
            None => None,
        }
    }

    pub fn node(&self, idx: usize) -> &DescriptorNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut DescriptorNode {
        &mut self.nodes[idx]
    }

    pub fn nodes(&self) -> &[DescriptorNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &DescriptorNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when at least one array declares an iterator, i.e. the template loops.
    pub fn has_iterators(&self) -> bool {
        self.nodes.iter().any(|n| !n.iterators.is_empty())
    }

    /// Total number of access points over all nodes.
    pub fn access_point_count(&self) -> usize {
        self.nodes.iter().map(|n| n.xml_parts.len()).sum()
    }
}
