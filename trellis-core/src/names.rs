//! Dictionaries mapping names to small integer ids.

use crate::num::{NumReader, write_num, write_token};
use anyhow::Result;
use std::collections::HashMap;

/// Interning dictionary. Id 0 is reserved for "no name"; real entries are
/// numbered from 1 in insertion order and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names {
    entries: Vec<Vec<u8>>,
    ids: HashMap<Vec<u8>, u32>,
    max: u32,
}

impl Names {
    /// Creates a dictionary holding at most `max` entries.
    pub fn new(max: u32) -> Self {
        Self { entries: Vec::new(), ids: HashMap::new(), max }
    }

    /// Returns the id of `name`, adding it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary is full.
    pub fn index(&mut self, name: &[u8]) -> Result<u32> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        let id = self.entries.len() as u32 + 1;
        if id > self.max {
            anyhow::bail!(
                "Too many distinct names (limit {}) while adding '{}'",
                self.max,
                String::from_utf8_lossy(name)
            );
        }
        self.entries.push(name.to_vec());
        self.ids.insert(name.to_vec(), id);
        Ok(id)
    }

    /// Looks up the id of `name` without adding it.
    pub fn id(&self, name: &[u8]) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Returns the name for `id`, or an empty name for id 0.
    pub fn name(&self, id: u32) -> &[u8] {
        id.checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no names have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the serialized dictionary to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        write_num(out, self.entries.len() as u32);
        for entry in &self.entries {
            write_token(out, entry);
        }
    }

    /// Reads a dictionary written by [`Names::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated.
    pub fn read(reader: &mut NumReader<'_>, max: u32) -> Result<Self> {
        let mut names = Self::new(max);
        let count = reader.num()?;
        for _ in 0..count {
            let name = reader.token()?;
            names.index(name)?;
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mut names = Names::new(10);
        assert_eq!(names.index(b"a").unwrap(), 1);
        assert_eq!(names.index(b"b").unwrap(), 2);
        assert_eq!(names.index(b"a").unwrap(), 1);
        assert_eq!(names.name(2), b"b");
        assert_eq!(names.name(0), b"");
        assert_eq!(names.id(b"c"), None);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut names = Names::new(2);
        names.index(b"x").unwrap();
        names.index(b"y").unwrap();
        let err = names.index(b"z").unwrap_err();
        assert!(err.to_string().contains("Too many"));
    }

    #[test]
    fn test_serialized_dictionary_keeps_ids() {
        let mut names = Names::new(100);
        for name in [&b"root"[..], b"item", b"xml:lang"] {
            names.index(name).unwrap();
        }
        let mut out = Vec::new();
        names.write(&mut out);

        let restored = Names::read(&mut NumReader::new(&out), 100).unwrap();
        assert_eq!(restored, names);
    }
}
