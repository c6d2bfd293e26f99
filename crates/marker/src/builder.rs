//! Accumulates parsed markers into a [`Descriptor`].

use crate::error::MarkerError;
use crate::lexer::{Step, lex};
use log::{debug, warn};
use std::collections::HashMap;
use stencil_types::{AccessPoint, Descriptor, DescriptorNode, NodeKind, NodePath, Span};

/// Owned builder threaded through every marker of one template.
///
/// Markers must be fed in document order: the first `[i]` occurrence of an
/// array opens it, the first `[i+1]` occurrence closes it, and an `[i]`
/// occurrence of an already closed array starts a new repetition under a
/// `$`-suffixed path.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    descriptor: Descriptor,
    /// Current repetition suffix of each array base path.
    repeated: HashMap<NodePath, String>,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one marker found at `position` of the cleaned template.
    pub fn parse(&mut self, marker: &str, position: usize) -> Result<(), MarkerError> {
        let lexed = lex(marker)?;
        let mut chain: Vec<usize> = Vec::new();
        let mut path = NodePath::default();
        // A `+1` occurrence was met: this marker only closes arrays.
        let mut odd = false;
        let mut up: Option<usize> = None;
        let mut row_conditions = Vec::new();

        for step in lexed.steps {
            if up.is_some() {
                return Err(MarkerError::ParentStepNotLast { marker: marker.to_string() });
            }
            match step {
                Step::Up(levels) => up = Some(levels),
                Step::Object(name) => {
                    let child = path.child(&name);
                    let idx = match self.descriptor.index_of(&child) {
                        Some(idx) => idx,
                        None if odd => return Ok(()),
                        None => self.insert_node(&chain, child.clone(), &name, NodeKind::Object, marker),
                    };
                    chain.push(idx);
                    path = child;
                }
                Step::Array { name, bracket } => {
                    let base = if name.is_empty() { path.child("_") } else { path.child(&name) };

                    if !bracket.has_iterator {
                        // Distinct lookups of the same array are distinct nodes.
                        let base = base.child(&format!("[{}]", bracket.key));
                        let idx = match self.descriptor.index_of(&base) {
                            Some(idx) => idx,
                            None if odd => return Ok(()),
                            None => {
                                let idx = self.insert_node(
                                    &chain,
                                    base.clone(),
                                    &name,
                                    NodeKind::ObjectInArray,
                                    marker,
                                );
                                self.descriptor.node_mut(idx).conditions =
                                    bracket.conditions.iter().map(|c| c.bind(&base)).collect();
                                idx
                            }
                        };
                        chain.push(idx);
                        path = base;
                        continue;
                    }

                    let mut suffix = self.repeated.get(&base).cloned().unwrap_or_default();
                    let mut current = base.with_suffix(&suffix);

                    if bracket.closing {
                        let Some(idx) = self.descriptor.index_of(&current) else {
                            if odd {
                                return Ok(());
                            }
                            return Err(MarkerError::UnknownArray { marker: marker.to_string() });
                        };
                        odd = true;
                        let node = self.descriptor.node_mut(idx);
                        if let Some(span) = node.span.as_mut() {
                            if span.end.is_none() {
                                span.end = Some(position);
                                node.iterators = bracket.iterators;
                            }
                        }
                        chain.push(idx);
                        path = current;
                        continue;
                    }

                    if odd {
                        let Some(idx) = self.descriptor.index_of(&current) else {
                            return Ok(());
                        };
                        chain.push(idx);
                        path = current;
                        continue;
                    }

                    while self.is_closed(&current) {
                        suffix.push('$');
                        current = base.with_suffix(&suffix);
                    }
                    if !suffix.is_empty() {
                        self.repeated.insert(base.clone(), suffix);
                    }
                    let idx = match self.descriptor.index_of(&current) {
                        Some(idx) => idx,
                        None => {
                            let idx = self.insert_node(
                                &chain,
                                current.clone(),
                                &name,
                                NodeKind::Array,
                                marker,
                            );
                            self.descriptor.node_mut(idx).span =
                                Some(Span { start: position, end: None, end_odd: None });
                            idx
                        }
                    };
                    row_conditions.extend(bracket.conditions.iter().map(|c| c.bind(&current)));
                    chain.push(idx);
                    path = current;
                }
            }
        }

        if odd {
            return Ok(());
        }
        let Some(&owner) = chain.last() else {
            debug!("marker \"{}\" has no object path, ignored", marker);
            return Ok(());
        };
        let object = match up {
            Some(levels) => {
                // The synthetic root is the highest reachable object.
                if chain.len() < levels + 1 {
                    return Err(MarkerError::ParentTooHigh { marker: marker.to_string() });
                }
                chain[chain.len() - 1 - levels]
            }
            None => owner,
        };
        let object = self.descriptor.node(object).path.clone();
        self.descriptor.node_mut(owner).xml_parts.push(AccessPoint {
            object,
            attribute: lexed.attribute,
            formatters: lexed.formatters,
            conditions: row_conditions,
            position,
            ..Default::default()
        });
        Ok(())
    }

    /// Freezes the descriptor. Arrays that were never closed are left open and
    /// rejected by the compiler.
    pub fn finish(self) -> Descriptor {
        for node in self.descriptor.iter() {
            if node.span.is_some_and(|s| s.end.is_none()) {
                warn!("array \"{}\" opened by \"{}\" is never closed", node.path, node.marker);
            }
        }
        self.descriptor
    }

    fn is_closed(&self, path: &NodePath) -> bool {
        self.descriptor
            .get(path)
            .and_then(|node| node.span)
            .is_some_and(|span| span.end.is_some())
    }

    fn insert_node(
        &mut self,
        chain: &[usize],
        path: NodePath,
        name: &str,
        kind: NodeKind,
        marker: &str,
    ) -> usize {
        let mut node = DescriptorNode::new(path, name, kind);
        node.parents = chain.iter().map(|&idx| self.descriptor.node(idx).path.clone()).collect();
        node.parent = node.parents.last().cloned();
        node.marker = marker.to_string();
        self.descriptor.insert(node)
    }
}
