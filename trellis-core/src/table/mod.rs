//! Node table: a dense array of 16 byte records addressed by `pre`.
//!
//! Two backends share the [`TableAccess`] contract. [`MemTable`] keeps all
//! records in one buffer and is used for in-memory databases and insertion
//! sources. [`DiskTable`] stores records in 4KB blocks of a memory-mapped
//! file, so that splicing only moves the records of the touched blocks.
//!
//! Accessors do not check their arguments. Callers are responsible for
//! passing a valid `pre` and a field offset matching the node kind; debug
//! builds assert the bounds.

mod disk;
mod mem;
pub mod record;

pub use disk::DiskTable;
pub use mem::MemTable;
pub use record::{ENTRIES, NODE_SIZE, NodeKind, Record};

use anyhow::Result;

/// Positional access to a table of fixed-width node records.
pub trait TableAccess: Send + std::fmt::Debug {
    /// Number of records.
    fn len(&self) -> u32;

    /// Returns true if the table holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The 16 bytes of the record at `pre`.
    fn slot(&self, pre: u32) -> &[u8];

    /// Mutable view of the record at `pre`.
    fn slot_mut(&mut self, pre: u32) -> &mut [u8];

    /// Splices `records` (a multiple of [`NODE_SIZE`] bytes) in at `pre`.
    /// All records from `pre` on move up by the number of inserted records.
    ///
    /// # Errors
    ///
    /// Returns an error if backing storage cannot be grown.
    fn insert(&mut self, pre: u32, records: &[u8]) -> Result<()>;

    /// Removes `count` records starting at `pre`; following records move down.
    ///
    /// # Errors
    ///
    /// Returns an error if backing storage cannot be updated.
    fn delete(&mut self, pre: u32, count: u32) -> Result<()>;

    /// Replaces the `count` records from `pre` with `records`. Records
    /// covered by both are overwritten in place; the surplus is spliced in
    /// or removed.
    ///
    /// # Errors
    ///
    /// Returns an error if backing storage cannot be updated.
    fn replace(&mut self, pre: u32, count: u32, records: &[u8]) -> Result<()> {
        debug_assert!(records.len() % NODE_SIZE == 0);
        let new = (records.len() / NODE_SIZE) as u32;
        for (i, rec) in records.chunks_exact(NODE_SIZE).take(count.min(new) as usize).enumerate() {
            self.slot_mut(pre + i as u32).copy_from_slice(rec);
        }
        if new > count {
            self.insert(pre + count, &records[count as usize * NODE_SIZE..])
        } else if new < count {
            self.delete(pre + new, count - new)
        } else {
            Ok(())
        }
    }

    /// Writes pending changes to backing storage.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or syncing fails.
    fn flush(&mut self) -> Result<()>;

    /// Reads one byte.
    #[inline]
    fn read1(&self, pre: u32, off: usize) -> u32 {
        u32::from(self.slot(pre)[off])
    }

    /// Reads a big-endian 16-bit field.
    #[inline]
    fn read2(&self, pre: u32, off: usize) -> u32 {
        let s = self.slot(pre);
        u32::from(s[off]) << 8 | u32::from(s[off + 1])
    }

    /// Reads a big-endian 32-bit field.
    #[inline]
    fn read4(&self, pre: u32, off: usize) -> u32 {
        record::get4(self.slot(pre), off)
    }

    /// Reads a big-endian 40-bit field.
    #[inline]
    fn read5(&self, pre: u32, off: usize) -> u64 {
        record::get5(self.slot(pre), off)
    }

    /// Writes one byte.
    #[inline]
    fn write1(&mut self, pre: u32, off: usize, value: u32) {
        self.slot_mut(pre)[off] = value as u8;
    }

    /// Writes a big-endian 16-bit field.
    #[inline]
    fn write2(&mut self, pre: u32, off: usize, value: u32) {
        let s = self.slot_mut(pre);
        s[off] = (value >> 8) as u8;
        s[off + 1] = value as u8;
    }

    /// Writes a big-endian 32-bit field.
    #[inline]
    fn write4(&mut self, pre: u32, off: usize, value: u32) {
        record::put4(self.slot_mut(pre), off, value);
    }

    /// Writes a big-endian 40-bit field.
    #[inline]
    fn write5(&mut self, pre: u32, off: usize, value: u64) {
        record::put5(self.slot_mut(pre), off, value);
    }
}
