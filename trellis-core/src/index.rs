//! Seam to secondary value indexes.
//!
//! The table itself never consults an index. It only reports which values
//! were added or removed by an edit, and the registry forwards the batches
//! to whatever index implementation is installed for each kind.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Kinds of secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Text node values
    Text,
    /// Attribute values
    Attribute,
    /// Full-text tokens of text nodes
    FullText,
}

/// A lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexToken {
    /// Index to consult
    pub kind: IndexKind,
    /// Value to look up
    pub value: Vec<u8>,
}

impl IndexToken {
    /// Creates a token.
    pub fn new(kind: IndexKind, value: impl Into<Vec<u8>>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// A batch of `(value, node id)` pairs.
pub type Batch = Vec<(Vec<u8>, u32)>;

/// A secondary index over node values.
pub trait ValueIndex: Send {
    /// Adds entries.
    fn add(&mut self, entries: &[(Vec<u8>, u32)]);

    /// Removes entries.
    fn remove(&mut self, entries: &[(Vec<u8>, u32)]);

    /// Ids of the nodes holding `value`, in ascending order.
    fn ids(&self, value: &[u8]) -> Vec<u32>;
}

/// Exact-match index backed by a hash map.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: HashMap<Vec<u8>, Vec<u32>>,
}

impl HashIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueIndex for HashIndex {
    fn add(&mut self, entries: &[(Vec<u8>, u32)]) {
        for (value, id) in entries {
            let ids = self.entries.entry(value.clone()).or_default();
            if let Err(at) = ids.binary_search(id) {
                ids.insert(at, *id);
            }
        }
    }

    fn remove(&mut self, entries: &[(Vec<u8>, u32)]) {
        for (value, id) in entries {
            if let Some(ids) = self.entries.get_mut(value) {
                if let Ok(at) = ids.binary_search(id) {
                    ids.remove(at);
                }
                if ids.is_empty() {
                    self.entries.remove(value);
                }
            }
        }
    }

    fn ids(&self, value: &[u8]) -> Vec<u32> {
        self.entries.get(value).cloned().unwrap_or_default()
    }
}

/// Pending index changes of one kind, collected during an edit.
#[derive(Debug, Default)]
pub struct Pending {
    /// Entries to add
    pub added: Batch,
    /// Entries to remove
    pub removed: Batch,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Pending changes for all kinds.
#[derive(Debug, Default)]
pub struct Updates {
    /// Text value changes
    pub text: Pending,
    /// Attribute value changes
    pub attr: Pending,
}

impl Updates {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attr.is_empty()
    }
}

type Slot = Mutex<Option<Box<dyn ValueIndex>>>;

/// Registry of installed indexes, one lockable slot per kind.
///
/// Lookups and swaps take the slot's lock, so an index can be replaced
/// while other threads query it.
#[derive(Default)]
pub struct Indexes {
    text: Slot,
    attr: Slot,
    fulltext: Slot,
}

impl std::fmt::Debug for Indexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexes")
            .field("text", &self.text.lock().is_some())
            .field("attr", &self.attr.lock().is_some())
            .field("fulltext", &self.fulltext.lock().is_some())
            .finish()
    }
}

impl Indexes {
    fn slot(&self, kind: IndexKind) -> &Slot {
        match kind {
            IndexKind::Text => &self.text,
            IndexKind::Attribute => &self.attr,
            IndexKind::FullText => &self.fulltext,
        }
    }

    /// Installs `index` for `kind`, returning the previous one.
    pub fn set_index(&self, kind: IndexKind, index: Box<dyn ValueIndex>) -> Option<Box<dyn ValueIndex>> {
        self.slot(kind).lock().replace(index)
    }

    /// Removes the index for `kind`.
    pub fn drop_index(&self, kind: IndexKind) -> Option<Box<dyn ValueIndex>> {
        self.slot(kind).lock().take()
    }

    /// Returns true if an index is installed for `kind`.
    pub fn has_index(&self, kind: IndexKind) -> bool {
        self.slot(kind).lock().is_some()
    }

    /// Ids matching `token`; empty if no index of its kind is installed.
    pub fn iter(&self, token: &IndexToken) -> std::vec::IntoIter<u32> {
        let ids = self.slot(token.kind).lock().as_ref().map(|index| index.ids(&token.value));
        ids.unwrap_or_default().into_iter()
    }

    fn apply_to(slot: &Slot, pending: &Pending) {
        if pending.is_empty() {
            return;
        }
        if let Some(index) = slot.lock().as_mut() {
            index.remove(&pending.removed);
            index.add(&pending.added);
        }
    }

    /// Applies the changes of one edit. Text changes also feed the
    /// full-text index. Kinds are updated in parallel and the call returns
    /// once all of them are done.
    pub fn apply(&self, updates: &Updates) {
        if updates.is_empty() {
            return;
        }
        rayon::join(
            || {
                rayon::join(
                    || Self::apply_to(&self.text, &updates.text),
                    || Self::apply_to(&self.fulltext, &updates.text),
                )
            },
            || Self::apply_to(&self.attr, &updates.attr),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, u32)]) -> Batch {
        pairs.iter().map(|&(v, id)| (v.as_bytes().to_vec(), id)).collect()
    }

    #[test]
    fn test_hash_index_add_remove() {
        let mut index = HashIndex::new();
        index.add(&batch(&[("a", 3), ("a", 1), ("b", 2), ("a", 3)]));
        assert_eq!(index.ids(b"a"), vec![1, 3]);

        index.remove(&batch(&[("a", 1), ("c", 9)]));
        assert_eq!(index.ids(b"a"), vec![3]);
        assert!(index.ids(b"c").is_empty());
    }

    #[test]
    fn test_updates_reach_installed_indexes() {
        let indexes = Indexes::default();
        indexes.set_index(IndexKind::Attribute, Box::new(HashIndex::new()));
        indexes.set_index(IndexKind::FullText, Box::new(HashIndex::new()));

        let mut updates = Updates::default();
        updates.attr.added = batch(&[("red", 4)]);
        updates.text.added = batch(&[("hello", 7)]);
        indexes.apply(&updates);

        let ids: Vec<u32> = indexes.iter(&IndexToken::new(IndexKind::Attribute, "red")).collect();
        assert_eq!(ids, vec![4]);
        let ids: Vec<u32> = indexes.iter(&IndexToken::new(IndexKind::FullText, "hello")).collect();
        assert_eq!(ids, vec![7]);
        // no text index installed
        assert_eq!(indexes.iter(&IndexToken::new(IndexKind::Text, "hello")).count(), 0);
    }

    #[test]
    fn test_swap_and_drop() {
        let indexes = Indexes::default();
        assert!(indexes.set_index(IndexKind::Text, Box::new(HashIndex::new())).is_none());
        assert!(indexes.set_index(IndexKind::Text, Box::new(HashIndex::new())).is_some());
        assert!(indexes.has_index(IndexKind::Text));
        assert!(indexes.drop_index(IndexKind::Text).is_some());
        assert!(!indexes.has_index(IndexKind::Text));
    }
}
