//! Interned side-table for every string a compiled program embeds.
//!
//! Attribute names, formatter arguments, condition operands and static
//! template text are never spliced into program structure. The compiler
//! interns them here and instructions refer to them by [`LiteralId`].

use crate::ids::LiteralId;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiteralTable {
    values: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, LiteralId>,
}

impl LiteralTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `value`, adding it to the table the first time it is seen.
    pub fn intern(&mut self, value: &str) -> LiteralId {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = LiteralId::new(self.values.len() as u32);
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), id);
        id
    }

    /// Interns non-empty text only.
    pub fn intern_text(&mut self, value: &str) -> Option<LiteralId> {
        (!value.is_empty()).then(|| self.intern(value))
    }

    pub fn get(&self, id: LiteralId) -> &str {
        self.values.get(id.index()).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
