use crate::table::{NODE_SIZE, Record, TableAccess, record};
use anyhow::Result;

/// Records collected before they are spliced into the table
const BUFFER_RECORDS: usize = 1 << 12;

/// Accumulates appended records and splices them into the table in bulk.
///
/// Records enter at consecutive positions starting at the position given
/// to [`AppendBuffer::begin`]. Fields of records that are still buffered
/// can be patched in place.
#[derive(Debug, Default)]
pub(crate) struct AppendBuffer {
    bytes: Vec<u8>,
    start: u32,
}

impl AppendBuffer {
    /// Starts buffering at `pre`. Must only be called while empty.
    pub(crate) fn begin(&mut self, pre: u32) {
        debug_assert!(self.bytes.is_empty());
        self.start = pre;
    }

    /// Position the next record will take.
    pub(crate) fn next_pre(&self) -> u32 {
        self.start + (self.bytes.len() / NODE_SIZE) as u32
    }

    fn buffered(&self, pre: u32) -> Option<usize> {
        (pre >= self.start && pre < self.next_pre()).then(|| (pre - self.start) as usize * NODE_SIZE)
    }

    /// Appends a record, splicing the buffer into `table` when full.
    pub(crate) fn push(&mut self, table: &mut dyn TableAccess, rec: &Record) -> Result<()> {
        self.bytes.extend_from_slice(&rec.0);
        if self.bytes.len() >= BUFFER_RECORDS * NODE_SIZE {
            self.flush(table)?;
        }
        Ok(())
    }

    /// Splices all buffered records into `table`.
    pub(crate) fn flush(&mut self, table: &mut dyn TableAccess) -> Result<()> {
        if self.bytes.is_empty() {
            return Ok(());
        }
        let count = (self.bytes.len() / NODE_SIZE) as u32;
        table.insert(self.start, &self.bytes)?;
        log::debug!("spliced {} buffered records at {}", count, self.start);
        self.start += count;
        self.bytes.clear();
        Ok(())
    }

    /// Writes a 32-bit field of `pre`, in the buffer if the record is still
    /// buffered and in `table` otherwise.
    pub(crate) fn write4(&mut self, table: &mut dyn TableAccess, pre: u32, off: usize, value: u32) {
        match self.buffered(pre) {
            Some(at) => record::put4(&mut self.bytes[at..at + NODE_SIZE], off, value),
            None => table.write4(pre, off, value),
        }
    }

    /// Reads one byte, like [`AppendBuffer::write4`].
    pub(crate) fn read1(&self, table: &dyn TableAccess, pre: u32, off: usize) -> u32 {
        match self.buffered(pre) {
            Some(at) => u32::from(self.bytes[at + off]),
            None => table.read1(pre, off),
        }
    }
}
