//! Traversal order of the descriptor.
//!
//! The compiler emits nested loops in the order returned here, so a parent
//! always precedes its descendants, and unrelated sibling arrays are kept
//! apart instead of being interleaved.

use log::debug;
use std::cmp::Ordering;
use std::collections::HashSet;
use stencil_types::{Descriptor, NodeKind, NodePath};

#[derive(Debug)]
struct Leaf<'a> {
    index: usize,
    kind: NodeKind,
    /// Ancestors, root first.
    parents: &'a [NodePath],
    only_objects: bool,
    /// Ancestor paths joined root first, each followed by a space.
    branch: String,
}

fn compare_leaves(a: &Leaf<'_>, b: &Leaf<'_>) -> Ordering {
    match (a.only_objects, b.only_objects) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    if !a.branch.contains(b.branch.as_str()) && !b.branch.contains(a.branch.as_str()) {
        match a.branch.cmp(&b.branch) {
            Ordering::Equal => {}
            unrelated => return unrelated,
        }
    }
    match a.parents.len().cmp(&b.parents.len()) {
        Ordering::Equal => {}
        by_depth => return by_depth,
    }
    match (a.kind, b.kind) {
        (NodeKind::Object, NodeKind::Array) => Ordering::Less,
        (NodeKind::Array, NodeKind::Object) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Returns descriptor indices in traversal order.
pub fn sort_hierarchy(descriptor: &Descriptor) -> Vec<usize> {
    let has_children: HashSet<&NodePath> = descriptor.iter().filter_map(|n| n.parent.as_ref()).collect();

    let mut leaves: Vec<Leaf<'_>> = descriptor
        .iter()
        .enumerate()
        .filter(|(_, node)| !has_children.contains(&node.path))
        .map(|(index, node)| {
            let mut branch = String::new();
            let mut only_objects = node.kind == NodeKind::Object;
            for parent in &node.parents {
                branch.push_str(parent.as_str());
                branch.push(' ');
                if descriptor.get(parent).is_some_and(|p| p.kind != NodeKind::Object) {
                    only_objects = false;
                }
            }
            Leaf {
                index,
                kind: node.kind,
                parents: &node.parents,
                only_objects,
                branch,
            }
        })
        .collect();

    // Insertion sort: stable, and tolerant of the comparator not being a
    // strict total order over unrelated branches.
    for i in 1..leaves.len() {
        let mut j = i;
        while j > 0 && compare_leaves(&leaves[j - 1], &leaves[j]) == Ordering::Greater {
            leaves.swap(j - 1, j);
            j -= 1;
        }
    }

    let mut order = Vec::with_capacity(descriptor.len());
    let mut inserted = HashSet::with_capacity(descriptor.len());
    for leaf in &leaves {
        for parent in leaf.parents {
            if let Some(idx) = descriptor.index_of(parent) {
                if inserted.insert(idx) {
                    order.push(idx);
                }
            }
        }
        if inserted.insert(leaf.index) {
            order.push(leaf.index);
        }
    }
    debug!(
        "traversal order: {:?}",
        order.iter().map(|&idx| descriptor.node(idx).path.as_str()).collect::<Vec<_>>()
    );
    order
}
