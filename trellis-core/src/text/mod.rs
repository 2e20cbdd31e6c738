//! Storage for variable-length texts and attribute values.
//!
//! A record refers to its content through a 40-bit reference. Two high bits
//! of the reference are reserved:
//!
//! - [`OFFNUM`]: the content is a small non-negative integer held in the
//!   reference itself. Nothing is written to the heap.
//! - [`OFFCOMP`]: the heap slot holds zstd-compressed content, prefixed with
//!   the uncompressed length.
//!
//! All other references are heap offsets.

mod heap;

pub use heap::Heap;

use anyhow::{Context, Result};
use std::borrow::Cow;

/// Reference flag for inlined integers
pub const OFFNUM: u64 = 1 << 39;

/// Reference flag for compressed content
pub const OFFCOMP: u64 = 1 << 38;

/// Mask selecting the heap offset of a reference
const OFFSET_MASK: u64 = OFFCOMP - 1;

/// zstd level used for stored texts
const COMPRESSION_LEVEL: i32 = 3;

/// Returns the inlined reference for `value` if it is a canonical integer
/// (ASCII digits, no leading zero) no larger than `i32::MAX`.
pub fn inline(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 10 || (value.len() > 1 && value[0] == b'0') {
        return None;
    }
    let mut n: u64 = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n * 10 + u64::from(b - b'0');
    }
    (n <= i32::MAX as u64).then_some(n | OFFNUM)
}

/// Returns true if `reference` holds an inlined integer.
#[inline]
pub fn is_inline(reference: u64) -> bool {
    reference & OFFNUM != 0
}

/// Text heap with integer inlining and optional compression.
#[derive(Debug)]
pub struct TextStore {
    heap: Heap,

    /// Compress values of at least `threshold` bytes
    compress: bool,
    threshold: usize,
}

impl TextStore {
    /// Wraps a heap.
    pub fn new(heap: Heap, compress: bool, threshold: usize) -> Self {
        Self { heap, compress, threshold }
    }

    /// In-memory store without compression.
    pub fn memory() -> Self {
        Self::new(Heap::memory(), false, usize::MAX)
    }

    /// Heap payload and flag bits for `value`.
    fn encode<'v>(&self, value: &'v [u8]) -> Result<(Cow<'v, [u8]>, u64)> {
        if self.compress && value.len() >= self.threshold {
            let packed = zstd::bulk::compress(value, COMPRESSION_LEVEL)
                .context("Failed to compress text")?;
            if packed.len() + 4 < value.len() {
                let mut payload = Vec::with_capacity(packed.len() + 4);
                payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
                payload.extend_from_slice(&packed);
                return Ok((Cow::Owned(payload), OFFCOMP));
            }
        }
        Ok((Cow::Borrowed(value), 0))
    }

    /// Stores `value` and returns its reference.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails or the heap cannot grow.
    pub fn store(&mut self, value: &[u8]) -> Result<u64> {
        if let Some(reference) = inline(value) {
            return Ok(reference);
        }
        let (payload, flags) = self.encode(value)?;
        Ok(self.heap.store(&payload)? | flags)
    }

    /// Returns the content behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if compressed content is corrupt.
    pub fn read(&self, reference: u64) -> Result<Cow<'_, [u8]>> {
        if is_inline(reference) {
            return Ok(Cow::Owned((reference & !OFFNUM).to_string().into_bytes()));
        }
        let slot = self.heap.read(reference & OFFSET_MASK);
        if reference & OFFCOMP == 0 {
            return Ok(Cow::Borrowed(slot));
        }
        let Some((len, packed)) = slot.split_first_chunk::<4>() else {
            anyhow::bail!("Compressed text at {} is truncated", reference & OFFSET_MASK);
        };
        let value = zstd::bulk::decompress(packed, u32::from_le_bytes(*len) as usize)
            .with_context(|| format!("Corrupt compressed text at {}", reference & OFFSET_MASK))?;
        Ok(Cow::Owned(value))
    }

    /// Replaces the content behind `reference`, reusing its slot when the
    /// new content fits. Returns the reference to store in the record.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails or the heap cannot grow.
    pub fn replace(&mut self, reference: u64, value: &[u8]) -> Result<u64> {
        if let Some(inlined) = inline(value) {
            self.free(reference);
            return Ok(inlined);
        }
        if is_inline(reference) {
            return self.store(value);
        }
        let (payload, flags) = self.encode(value)?;
        Ok(self.heap.replace(reference & OFFSET_MASK, &payload)? | flags)
    }

    /// Releases the content behind `reference`. Inlined values own no space.
    pub fn free(&mut self, reference: u64) {
        if !is_inline(reference) {
            self.heap.free(reference & OFFSET_MASK);
        }
    }

    /// The underlying heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Commits the heap to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.heap.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_accepts_canonical_integers() {
        assert_eq!(inline(b"0"), Some(OFFNUM));
        assert_eq!(inline(b"42"), Some(OFFNUM | 42));
        assert_eq!(inline(b"2147483647"), Some(OFFNUM | 2_147_483_647));
    }

    #[test]
    fn test_inline_rejects_everything_else() {
        for value in [&b""[..], b"007", b"-1", b"1.5", b"2147483648", b"12a", b" 1"] {
            assert_eq!(inline(value), None, "{:?}", String::from_utf8_lossy(value));
        }
    }

    #[test]
    fn test_inlined_values_bypass_the_heap() {
        let mut store = TextStore::memory();
        let reference = store.store(b"1234").unwrap();
        assert!(is_inline(reference));
        assert_eq!(store.heap().used(), 0);
        assert_eq!(&*store.read(reference).unwrap(), b"1234");
    }

    #[test]
    fn test_replace_between_inline_and_heap() {
        let mut store = TextStore::memory();
        let text = store.store(b"text").unwrap();
        let number = store.replace(text, b"17").unwrap();
        assert!(is_inline(number));
        assert_eq!(store.heap().free_slots(), 1);

        let back = store.replace(number, b"tex").unwrap();
        assert_eq!(back, text, "freed slot should be reused");
        assert_eq!(&*store.read(back).unwrap(), b"tex");
    }

    #[test]
    fn test_compression_roundtrip() {
        let mut store = TextStore::new(Heap::memory(), true, 16);
        let long = "abcabcabc ".repeat(50);
        let reference = store.store(long.as_bytes()).unwrap();

        assert_ne!(reference & OFFCOMP, 0);
        assert!(store.heap().used() < long.len() as u64);
        assert_eq!(&*store.read(reference).unwrap(), long.as_bytes());

        let short = store.store(b"short text").unwrap();
        assert_eq!(short & OFFCOMP, 0);
    }

    #[test]
    fn test_corrupt_compressed_text_is_an_error() {
        let mut store = TextStore::new(Heap::memory(), true, 16);
        let long = "xyz".repeat(100);
        let reference = store.store(long.as_bytes()).unwrap();
        let offset = reference & OFFSET_MASK;
        store.heap.replace(offset, &[10, 0, 0, 0, 1, 2, 3]).unwrap();

        assert!(store.read(reference).is_err());
    }
}
