use super::{NODE_SIZE, TableAccess};
use anyhow::Result;

/// Table held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemTable {
    bytes: Vec<u8>,
}

impl MemTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record bytes, in pre order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl TableAccess for MemTable {
    fn len(&self) -> u32 {
        (self.bytes.len() / NODE_SIZE) as u32
    }

    #[inline]
    fn slot(&self, pre: u32) -> &[u8] {
        debug_assert!(pre < self.len(), "pre {pre} out of range");
        let at = pre as usize * NODE_SIZE;
        &self.bytes[at..at + NODE_SIZE]
    }

    #[inline]
    fn slot_mut(&mut self, pre: u32) -> &mut [u8] {
        debug_assert!(pre < self.len(), "pre {pre} out of range");
        let at = pre as usize * NODE_SIZE;
        &mut self.bytes[at..at + NODE_SIZE]
    }

    fn insert(&mut self, pre: u32, records: &[u8]) -> Result<()> {
        debug_assert!(records.len() % NODE_SIZE == 0);
        let at = pre as usize * NODE_SIZE;
        self.bytes.splice(at..at, records.iter().copied());
        Ok(())
    }

    fn delete(&mut self, pre: u32, count: u32) -> Result<()> {
        let at = pre as usize * NODE_SIZE;
        self.bytes.drain(at..at + count as usize * NODE_SIZE);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
