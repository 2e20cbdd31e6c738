use crate::header::{FileKind, HEADER_SIZE, Header};
use anyhow::{Context, Result};
use memmap2::MmapMut;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Page size for file alignment (4KB)
const PAGE_SIZE: usize = 4096;

/// Slot prefix: capacity and length, both u32 little endian
const SLOT_HEADER: usize = 8;

/// Length marker of a freed slot
const FREE: u32 = u32::MAX;

/// Where the heap bytes live.
#[derive(Debug)]
enum Backing {
    Memory(Vec<u8>),
    Mapped { file: File, mmap: MmapMut },
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Memory(bytes) => bytes,
            Self::Mapped { mmap, .. } => &mmap[HEADER_SIZE..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Memory(bytes) => bytes,
            Self::Mapped { mmap, .. } => &mut mmap[HEADER_SIZE..],
        }
    }

    /// Makes at least `len` data bytes addressable.
    fn reserve(&mut self, len: usize) -> Result<()> {
        match self {
            Self::Memory(bytes) => {
                if bytes.len() < len {
                    bytes.resize(len, 0);
                }
            }
            Self::Mapped { file, mmap } => {
                let required = HEADER_SIZE + len;
                if mmap.len() < required {
                    let wanted = required.max(mmap.len() + mmap.len() / 4);
                    let new_size = (wanted + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
                    file.set_len(new_size as u64).context("Failed to grow heap file")?;
                    // SAFETY: the old mapping is replaced while `self` is
                    // mutably borrowed, so no slice into it survives.
                    *mmap = unsafe { MmapMut::map_mut(&*file)? };
                }
            }
        }
        Ok(())
    }
}

/// Slotted byte heap behind a [`TextStore`](super::TextStore).
///
/// Every value occupies a slot `[capacity][length][bytes]`. A freed slot
/// keeps its capacity and is handed out again to the smallest later value
/// that fits. Offsets are stable for the lifetime of a slot.
#[derive(Debug)]
pub struct Heap {
    backing: Backing,

    /// End of the used area
    used: u64,

    /// Freed slots by capacity
    free: BTreeMap<u32, Vec<u64>>,

    /// Header kind for mapped heaps
    kind: FileKind,
}

impl Heap {
    /// Creates an empty in-memory heap.
    pub fn memory() -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            used: 0,
            free: BTreeMap::new(),
            kind: FileKind::Texts,
        }
    }

    /// Creates an empty heap file at `path`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or mapped.
    pub fn create(path: &Path, kind: FileKind) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create heap file: {}", path.display()))?;
        file.set_len(HEADER_SIZE as u64)?;

        // SAFETY: the file is owned by this heap for its whole lifetime.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        Header::new(kind).write_to(&mut mmap[..HEADER_SIZE]);

        Ok(Self { backing: Backing::Mapped { file, mmap }, used: 0, free: BTreeMap::new(), kind })
    }

    /// Opens an existing heap file and rediscovers its free slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an invalid or
    /// incompatible header, or stores a different kind of content.
    pub fn open(path: &Path, kind: FileKind) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open heap file: {}", path.display()))?;

        // SAFETY: the file is owned by this heap for its whole lifetime.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = Header::read_from(&mmap)
            .with_context(|| format!("Cannot open heap {}", path.display()))?;
        if header.kind != kind {
            anyhow::bail!("{} is not a valid {:?} heap", path.display(), kind);
        }
        if (mmap.len() as u64) < HEADER_SIZE as u64 + header.count {
            anyhow::bail!("Heap {} is not a valid size for its header", path.display());
        }

        let mut heap = Self {
            backing: Backing::Mapped { file, mmap },
            used: header.count,
            free: BTreeMap::new(),
            kind,
        };
        heap.scan_free();
        Ok(heap)
    }

    fn scan_free(&mut self) {
        let mut at = 0u64;
        while at < self.used {
            let (cap, len) = self.slot_header(at);
            if len == FREE {
                self.free.entry(cap).or_default().push(at);
            }
            at += (SLOT_HEADER + cap as usize) as u64;
        }
    }

    fn slot_header(&self, at: u64) -> (u32, u32) {
        let bytes = self.backing.bytes();
        let at = at as usize;
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        (word(at), word(at + 4))
    }

    fn write_slot(&mut self, at: u64, cap: u32, value: &[u8]) {
        let at = at as usize;
        let bytes = self.backing.bytes_mut();
        bytes[at..at + 4].copy_from_slice(&cap.to_le_bytes());
        bytes[at + 4..at + 8].copy_from_slice(&(value.len() as u32).to_le_bytes());
        bytes[at + SLOT_HEADER..at + SLOT_HEADER + value.len()].copy_from_slice(value);
    }

    /// Stores `value` and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap cannot grow.
    pub fn store(&mut self, value: &[u8]) -> Result<u64> {
        let len = u32::try_from(value.len()).context("Value too large for the text heap")?;
        let fit = self.free.range(len..).next().map(|(&cap, _)| cap);
        if let Some(cap) = fit {
            let offsets = self.free.get_mut(&cap).context("free list out of sync")?;
            let at = offsets.pop().context("free list out of sync")?;
            if offsets.is_empty() {
                self.free.remove(&cap);
            }
            self.write_slot(at, cap, value);
            return Ok(at);
        }

        let at = self.used;
        let end = at as usize + SLOT_HEADER + value.len();
        self.backing.reserve(end)?;
        self.write_slot(at, len, value);
        self.used = end as u64;
        Ok(at)
    }

    /// Returns the value stored at `offset`.
    pub fn read(&self, offset: u64) -> &[u8] {
        let (_, len) = self.slot_header(offset);
        debug_assert!(len != FREE, "read of freed slot {offset}");
        let start = offset as usize + SLOT_HEADER;
        &self.backing.bytes()[start..start + len as usize]
    }

    /// Overwrites the value at `offset`, moving it if it no longer fits.
    /// Returns the (possibly new) offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the heap cannot grow.
    pub fn replace(&mut self, offset: u64, value: &[u8]) -> Result<u64> {
        let (cap, _) = self.slot_header(offset);
        if value.len() <= cap as usize {
            self.write_slot(offset, cap, value);
            return Ok(offset);
        }
        self.free(offset);
        self.store(value)
    }

    /// Releases the slot at `offset` for reuse.
    pub fn free(&mut self, offset: u64) {
        let (cap, len) = self.slot_header(offset);
        if len == FREE {
            return;
        }
        let at = offset as usize + 4;
        self.backing.bytes_mut()[at..at + 4].copy_from_slice(&FREE.to_le_bytes());
        self.free.entry(cap).or_default().push(offset);
    }

    /// Bytes in use, including freed slots.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Number of freed slots awaiting reuse.
    pub fn free_slots(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Commits the heap to disk. A no-op for in-memory heaps.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    pub fn flush(&mut self) -> Result<()> {
        let mut header = Header::new(self.kind);
        header.count = self.used;
        if let Backing::Mapped { file, mmap } = &mut self.backing {
            header.write_to(&mut mmap[..HEADER_SIZE]);
            mmap.flush()?;
            file.sync_data()?;
            file.sync_all()?;
        }
        Ok(())
    }
}
