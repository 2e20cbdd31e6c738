//! Fixed-width node record layout.
//!
//! Every node occupies one 16 byte slot, addressed by its `pre` value.
//! Multi-byte fields are big endian.
//!
//! ```text
//! COMMON
//!   byte  0       KIND (bits 2-0)
//!   bytes 12-15   ID
//! DOCUMENT
//!   bytes 3-7     TEXT reference (document name)
//!   bytes 8-11    SIZE
//! ELEMENT
//!   byte  0       ATTS (bits 7-3), saturates at 31
//!   bytes 1-2     NS flag (bit 15), NAME id (bits 14-0)
//!   byte  3       URI id
//!   bytes 4-7     DIST
//!   bytes 8-11    SIZE
//! TEXT, COMMENT, PI
//!   bytes 3-7     TEXT reference
//!   bytes 8-11    DIST
//! ATTRIBUTE
//!   byte  0       DIST (bits 7-3), saturates at 31
//!   bytes 1-2     NS flag (bit 15), NAME id (bits 14-0)
//!   bytes 3-7     VALUE reference
//!   byte  11      URI id
//! ```

/// Size of one record in bytes
pub const NODE_SIZE: usize = 16;

/// Records per 4KB block
pub const ENTRIES: usize = 4096 / NODE_SIZE;

/// Saturation value of the 5-bit attribute counter and attribute distance
pub const MAX_ATTS: u32 = 0x1F;

/// Largest name id that fits next to the namespace flag
pub const MAX_NAME_ID: u32 = 0x7FFF;

/// Namespace flag within the two name bytes
pub const NS_FLAG: u16 = 0x8000;

/// Byte offsets of the record fields.
pub mod off {
    /// Kind, attribute count, attribute distance
    pub const KIND: usize = 0;
    /// Namespace flag and name id
    pub const NAME: usize = 1;
    /// Element namespace uri id
    pub const ELEM_URI: usize = 3;
    /// Text or value reference (5 bytes)
    pub const TEXT: usize = 3;
    /// Element distance
    pub const ELEM_DIST: usize = 4;
    /// Element or document size
    pub const SIZE: usize = 8;
    /// Text, comment or PI distance
    pub const TEXT_DIST: usize = 8;
    /// Attribute namespace uri id
    pub const ATTR_URI: usize = 11;
    /// Unique node id
    pub const ID: usize = 12;
}

/// XML node kinds, as stored in the low three bits of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Document node
    Doc = 0,
    /// Element node
    Elem = 1,
    /// Text node
    Text = 2,
    /// Attribute node
    Attr = 3,
    /// Comment node
    Comm = 4,
    /// Processing instruction
    Pi = 5,
}

impl NodeKind {
    /// Decodes the kind bits of a record's first byte.
    #[inline]
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x07 {
            0 => Self::Doc,
            1 => Self::Elem,
            2 => Self::Text,
            3 => Self::Attr,
            4 => Self::Comm,
            5 => Self::Pi,
            other => unreachable!("invalid node kind {other}"),
        }
    }

    /// True for kinds whose content lives in the text heap.
    #[must_use]
    pub const fn has_text(self) -> bool {
        matches!(self, Self::Doc | Self::Text | Self::Comm | Self::Pi)
    }

    /// True for kinds that carry a subtree size.
    #[must_use]
    pub const fn has_size(self) -> bool {
        matches!(self, Self::Doc | Self::Elem)
    }
}

/// An encoded node record, built before it is spliced into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record(pub [u8; NODE_SIZE]);

impl Record {
    /// Document record.
    #[must_use]
    pub fn doc(text: u64, size: u32, id: u32) -> Self {
        let mut r = [0u8; NODE_SIZE];
        r[off::KIND] = NodeKind::Doc as u8;
        put5(&mut r, off::TEXT, text);
        put4(&mut r, off::SIZE, size);
        put4(&mut r, off::ID, id);
        Self(r)
    }

    /// Element record.
    #[must_use]
    pub fn elem(dist: u32, name: u16, atts: u32, size: u32, uri: u8, ns: bool, id: u32) -> Self {
        let mut r = [0u8; NODE_SIZE];
        r[off::KIND] = (atts.min(MAX_ATTS) as u8) << 3 | NodeKind::Elem as u8;
        let name = if ns { name | NS_FLAG } else { name };
        r[off::NAME..off::NAME + 2].copy_from_slice(&name.to_be_bytes());
        r[off::ELEM_URI] = uri;
        put4(&mut r, off::ELEM_DIST, dist);
        put4(&mut r, off::SIZE, size);
        put4(&mut r, off::ID, id);
        Self(r)
    }

    /// Text, comment or processing instruction record.
    #[must_use]
    pub fn text(kind: NodeKind, text: u64, dist: u32, id: u32) -> Self {
        let mut r = [0u8; NODE_SIZE];
        r[off::KIND] = kind as u8;
        put5(&mut r, off::TEXT, text);
        put4(&mut r, off::TEXT_DIST, dist);
        put4(&mut r, off::ID, id);
        Self(r)
    }

    /// Attribute record.
    #[must_use]
    pub fn attr(dist: u32, name: u16, value: u64, uri: u8, id: u32) -> Self {
        let mut r = [0u8; NODE_SIZE];
        r[off::KIND] = (dist.min(MAX_ATTS) as u8) << 3 | NodeKind::Attr as u8;
        r[off::NAME..off::NAME + 2].copy_from_slice(&name.to_be_bytes());
        put5(&mut r, off::TEXT, value);
        r[off::ATTR_URI] = uri;
        put4(&mut r, off::ID, id);
        Self(r)
    }

    /// Kind of the record.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_byte(self.0[off::KIND])
    }
}

/// Writes a big-endian u32 at `at`.
#[inline]
pub fn put4(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Writes the low 40 bits of `value` big-endian at `at`.
#[inline]
pub fn put5(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 5].copy_from_slice(&value.to_be_bytes()[3..]);
}

/// Reads a big-endian u32 at `at`.
#[inline]
#[must_use]
pub fn get4(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Reads a 40-bit big-endian value at `at`.
#[inline]
#[must_use]
pub fn get5(bytes: &[u8], at: usize) -> u64 {
    let mut wide = [0u8; 8];
    wide[3..].copy_from_slice(&bytes[at..at + 5]);
    u64::from_be_bytes(wide)
}
