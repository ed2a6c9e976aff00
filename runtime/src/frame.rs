//! Frame schemas: which fields a frame kind carries, in which order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::units::Unit;

/// The three frame kinds a log can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Main,
    Slow,
    Gps,
}

/// One field of a frame definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub signed: bool,
    pub unit: Unit,
}

/// Ordered schema of one frame kind: field names, signedness, units.
///
/// Decoded once per headers per kind and immutable afterwards; parsers share
/// it via `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDef {
    fields: Vec<FieldDef>,
}

impl FrameDef {
    pub(crate) fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDef> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDef> {
        self.fields.iter()
    }
}

impl<'a> IntoIterator for &'a FrameDef {
    type Item = &'a FieldDef;
    type IntoIter = std::slice::Iter<'a, FieldDef>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Optional per-kind field allowlists for parser creation.
///
/// `None` keeps every field of that kind; `Some(vec![])` keeps none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilterSet {
    pub main: Option<Vec<String>>,
    pub slow: Option<Vec<String>>,
    pub gps: Option<Vec<String>>,
}

impl FieldFilterSet {
    /// Total UTF-8 byte length of every requested name; sizes the scratch
    /// arena the names are written into.
    pub(crate) fn arena_size(&self) -> usize {
        [&self.main, &self.slow, &self.gps]
            .into_iter()
            .flatten()
            .flatten()
            .map(String::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_size_sums_all_kinds() {
        let filter = FieldFilterSet {
            main: Some(vec!["roll".into(), "pitch".into()]),
            slow: None,
            gps: Some(vec![]),
        };
        assert_eq!(filter.arena_size(), 9);
    }
}
