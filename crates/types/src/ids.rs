//! Newtype wrappers for descriptor paths and literal-table indexes
//!
//! Canonical paths and literal indexes are both "just" strings and integers at
//! runtime; wrapping them keeps the compiler from mixing a node path with an
//! attribute name or a literal index with a source offset.

use serde::Serialize;
use std::fmt;

/// Canonical path of a descriptor node, e.g. `_rootd`, `_rootdsite`, `_rootdsite$`.
///
/// A path is the concatenation of every attribute name walked from the root,
/// plus the repetition suffix of any repeated array along the way.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default, Serialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Creates a new NodePath from a string
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the string representation of this path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path of a child attribute of this node.
    pub fn child(&self, name: &str) -> Self {
        let mut path = String::with_capacity(self.0.len() + name.len());
        path.push_str(&self.0);
        path.push_str(name);
        Self(path)
    }

    /// Returns this path with the repetition suffix appended.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        self.child(suffix)
    }
}

impl From<String> for NodePath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodePath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a compiled program's literal table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct LiteralId(u32);

impl LiteralId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LiteralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path_creation() {
        let p1 = NodePath::new("_rootd");
        let p2 = NodePath::from("_rootd");
        let p3 = NodePath::from(String::from("_rootd"));

        assert_eq!(p1, p2);
        assert_eq!(p2, p3);
        assert_eq!(p1.as_str(), "_rootd");
    }

    #[test]
    fn test_child_path_concatenates() {
        let root = NodePath::new("_root");
        let site = root.child("d").child("site");
        assert_eq!(site.as_str(), "_rootdsite");
        assert_eq!(site.with_suffix("$").as_str(), "_rootdsite$");
    }

    #[test]
    fn test_hash_map_usage() {
        use std::collections::HashMap;

        let mut nodes = HashMap::new();
        nodes.insert(NodePath::new("_rootd"), 1);
        assert_eq!(nodes.get(&NodePath::from("_rootd")), Some(&1));
    }

    #[test]
    fn test_literal_id_display() {
        assert_eq!(LiteralId::new(4).to_string(), "#4");
        assert_eq!(LiteralId::new(4).index(), 4);
    }
}
