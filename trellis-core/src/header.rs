/// Magic bytes identifying a Trellis storage file
pub const MAGIC: &[u8; 8] = b"TRELLIS\0";

/// Current storage format version
pub const VERSION: u32 = 1;

/// Size of the header in bytes (always one 4KB page)
pub const HEADER_SIZE: usize = 4096;

/// Number of meaningful bytes at the start of the header page.
const ENCODED_SIZE: usize = 24;

/// Kind of content stored behind a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Node table (`tbl`)
    Table = 1,
    /// Text heap (`txt`)
    Texts = 2,
    /// Attribute value heap (`atv`)
    Values = 3,
}

impl FileKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Table),
            2 => Some(Self::Texts),
            3 => Some(Self::Values),
            _ => None,
        }
    }
}

/// Header page of every Trellis storage file.
///
/// # Layout (little endian, padded to 4096 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     magic
/// 8       4     version
/// 12      4     kind
/// 16      8     count (table: physical blocks, heap: bytes used)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic bytes for file type identification
    pub magic: [u8; 8],

    /// File format version
    pub version: u32,

    /// What the file stores
    pub kind: FileKind,

    /// Kind-specific counter
    pub count: u64,
}

impl Header {
    /// Creates a new header for the given file kind
    pub fn new(kind: FileKind) -> Self {
        Self { magic: *MAGIC, version: VERSION, kind, count: 0 }
    }

    /// Validates the header for correctness and compatibility
    pub fn is_valid(&self) -> bool {
        self.magic == *MAGIC && self.version == VERSION
    }

    /// Encodes the header into the first bytes of a page
    pub fn write_to(&self, page: &mut [u8]) {
        debug_assert!(page.len() >= ENCODED_SIZE);
        page[..8].copy_from_slice(&self.magic);
        page[8..12].copy_from_slice(&self.version.to_le_bytes());
        page[12..16].copy_from_slice(&(self.kind as u32).to_le_bytes());
        page[16..24].copy_from_slice(&self.count.to_le_bytes());
    }

    /// Decodes a header from the start of a page
    ///
    /// # Errors
    ///
    /// Returns an error if the page is too short, the magic bytes do not
    /// match, or the format version or file kind is unknown.
    pub fn read_from(page: &[u8]) -> anyhow::Result<Self> {
        if page.len() < ENCODED_SIZE || &page[..8] != MAGIC {
            anyhow::bail!("File is not a valid Trellis storage file");
        }
        let word = |at: usize| u32::from_le_bytes([page[at], page[at + 1], page[at + 2], page[at + 3]]);
        let version = word(8);
        if version != VERSION {
            anyhow::bail!(
                "Storage format {} is incompatible with this build (expected {})",
                version,
                VERSION
            );
        }
        let Some(kind) = FileKind::from_raw(word(12)) else {
            anyhow::bail!("File is not a valid Trellis storage file: unknown kind {}", word(12));
        };
        let mut count = [0u8; 8];
        count.copy_from_slice(&page[16..24]);

        Ok(Self { magic: *MAGIC, version, kind, count: u64::from_le_bytes(count) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_one_page() {
        assert!(ENCODED_SIZE <= HEADER_SIZE);
        assert_eq!(HEADER_SIZE, 4096, "Header must be exactly one page (4KB)");
    }

    #[test]
    fn test_new_header_is_valid() {
        let header = Header::new(FileKind::Table);
        assert!(header.is_valid());
        assert_eq!(header.count, 0);
    }

    #[test]
    fn test_header_page_roundtrip() {
        let mut header = Header::new(FileKind::Values);
        header.count = 77;

        let mut page = vec![0u8; HEADER_SIZE];
        header.write_to(&mut page);

        let restored = Header::read_from(&page).unwrap();
        assert_eq!(restored, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut page = vec![0u8; HEADER_SIZE];
        Header::new(FileKind::Texts).write_to(&mut page);
        page[0] = b'X';

        let err = Header::read_from(&page).unwrap_err();
        assert!(err.to_string().contains("not a valid"));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut page = vec![0u8; HEADER_SIZE];
        Header::new(FileKind::Table).write_to(&mut page);
        page[8..12].copy_from_slice(&(VERSION + 1).to_le_bytes());

        let err = Header::read_from(&page).unwrap_err();
        assert!(err.to_string().contains("incompatible"));
    }
}
