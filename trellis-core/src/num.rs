//! Compressed integers and length-prefixed tokens.
//!
//! Integers are written with a 1, 2, 4 or 5 byte encoding selected by the
//! two high bits of the first byte:
//!
//! ```text
//! 00xxxxxx                      values < 0x40
//! 01xxxxxx xxxxxxxx             values < 0x4000
//! 10xxxxxx xxxxxxxx (2 bytes)   values < 0x40000000
//! 11000000 (4 bytes)            everything else
//! ```
//!
//! Used by the metadata file and the block directory.

use anyhow::{Context, Result};

/// Appends a compressed integer.
pub fn write_num(out: &mut Vec<u8>, value: u32) {
    if value < 0x40 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push((value >> 8) as u8 | 0x40);
        out.push(value as u8);
    } else if value < 0x4000_0000 {
        out.push((value >> 24) as u8 | 0x80);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.push(0xC0);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Appends a length-prefixed byte token.
pub fn write_token(out: &mut Vec<u8>, token: &[u8]) {
    write_num(out, token.len() as u32);
    out.extend_from_slice(token);
}

/// Sequential reader over an encoded buffer.
#[derive(Debug)]
pub struct NumReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> NumReader<'a> {
    /// Creates a reader positioned at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Returns true when all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).context("Encoded length overflow")?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .with_context(|| format!("Truncated input at byte {}", self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads a compressed integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the input ends in the middle of a value.
    pub fn num(&mut self) -> Result<u32> {
        let first = self.take(1)?[0];
        let value = match first >> 6 {
            0 => u32::from(first),
            1 => {
                let b = self.take(1)?;
                u32::from(first & 0x3F) << 8 | u32::from(b[0])
            }
            2 => {
                let b = self.take(3)?;
                u32::from(first & 0x3F) << 24
                    | u32::from(b[0]) << 16
                    | u32::from(b[1]) << 8
                    | u32::from(b[2])
            }
            _ => {
                let b = self.take(4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        Ok(value)
    }

    /// Reads a length-prefixed token.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated.
    pub fn token(&mut self) -> Result<&'a [u8]> {
        let len = self.num()? as usize;
        self.take(len)
    }
}
