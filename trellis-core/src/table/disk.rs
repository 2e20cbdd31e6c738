use super::{ENTRIES, NODE_SIZE, TableAccess};
use crate::header::{FileKind, HEADER_SIZE, Header};
use crate::num::{NumReader, write_num};
use anyhow::{Context, Result};
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Page size for file alignment (4KB)
const PAGE_SIZE: usize = 4096;

/// Bytes per block
const BLOCK_SIZE: usize = ENTRIES * NODE_SIZE;

/// Pages added at least on every growth of the table file
const GROW_PAGES: usize = 16;

/// Name of the table file within a database directory
pub const TABLE_FILE: &str = "tbl";

/// Name of the block directory file
pub const DIRECTORY_FILE: &str = "tbli";

/// Block-structured table on a memory-mapped file.
///
/// The file starts with a header page followed by physical pages of 256
/// records each. The in-memory directory lists the used pages in logical
/// order together with the first `pre` of each, so a record is found with
/// one binary search. Blocks are never empty: a block that loses all its
/// records is returned to the free list, and inserts that overflow a block
/// spill into fresh blocks linked in right behind it.
///
/// # Layout of `tbli`
///
/// ```text
/// num  physical pages
/// num  used blocks
/// num  records
/// num* first pre of each used block
/// num* physical page of each used block
/// ```
#[derive(Debug)]
pub struct DiskTable {
    /// File handle
    file: File,

    /// Memory-mapped view of the file
    mmap: MmapMut,

    /// Path of the directory file
    directory: PathBuf,

    /// First pre of every used block, in logical order
    fpres: Vec<u32>,

    /// Physical page of every used block
    pages: Vec<u32>,

    /// Physical pages in the file
    blocks: u32,

    /// Pages in the file that hold no block
    free: Vec<u32>,

    /// Number of records
    len: u32,

    /// Index of the most recently resolved block
    hint: AtomicUsize,
}

impl DiskTable {
    /// Creates an empty table in `dir`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created or mapped.
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(TABLE_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create table file: {}", path.display()))?;
        file.set_len(HEADER_SIZE as u64)?;

        // SAFETY: the file is owned by this table for its whole lifetime.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        Header::new(FileKind::Table).write_to(&mut mmap[..HEADER_SIZE]);

        let mut table = Self {
            file,
            mmap,
            directory: dir.join(DIRECTORY_FILE),
            fpres: Vec::new(),
            pages: Vec::new(),
            blocks: 0,
            free: Vec::new(),
            len: 0,
            hint: AtomicUsize::new(0),
        };
        table.flush()?;
        Ok(table)
    }

    /// Opens the table stored in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The table or directory file is missing or unreadable
    /// - The header is invalid or written by an incompatible format version
    /// - The directory does not match the table file
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(TABLE_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open table file: {}", path.display()))?;

        // SAFETY: the file is owned by this table for its whole lifetime.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = Header::read_from(&mmap)
            .with_context(|| format!("Cannot open table {}", path.display()))?;
        if header.kind != FileKind::Table {
            anyhow::bail!("{} is not a valid table file", path.display());
        }

        let directory = dir.join(DIRECTORY_FILE);
        let bytes = fs::read(&directory)
            .with_context(|| format!("Failed to read block directory: {}", directory.display()))?;
        let mut reader = NumReader::new(&bytes);
        let blocks = reader.num()?;
        let used = reader.num()? as usize;
        let len = reader.num()?;
        let fpres = (0..used).map(|_| reader.num()).collect::<Result<Vec<_>>>()?;
        let pages = (0..used).map(|_| reader.num()).collect::<Result<Vec<_>>>()?;

        if u64::from(blocks) != header.count
            || mmap.len() < HEADER_SIZE + blocks as usize * BLOCK_SIZE
        {
            anyhow::bail!(
                "Block directory of {} is not a valid match for its table ({} blocks, file has {})",
                path.display(),
                blocks,
                header.count
            );
        }

        let mut taken = vec![false; blocks as usize];
        for &page in &pages {
            if let Some(slot) = taken.get_mut(page as usize) {
                *slot = true;
            }
        }
        let free = (0..blocks).rev().filter(|&p| !taken[p as usize]).collect();

        log::debug!("opened table {} with {} records in {} blocks", path.display(), len, used);
        Ok(Self {
            file,
            mmap,
            directory,
            fpres,
            pages,
            blocks,
            free,
            len,
            hint: AtomicUsize::new(0),
        })
    }

    /// Number of used blocks.
    pub fn used_blocks(&self) -> usize {
        self.pages.len()
    }

    /// Number of physical pages in the file, including free ones.
    pub fn physical_blocks(&self) -> u32 {
        self.blocks
    }

    /// Records held by block `b`.
    fn fill(&self, b: usize) -> u32 {
        let end = self.fpres.get(b + 1).copied().unwrap_or(self.len);
        end - self.fpres[b]
    }

    /// Index of the block holding `pre`.
    #[inline]
    fn block_of(&self, pre: u32) -> usize {
        let hint = self.hint.load(Ordering::Relaxed);
        if hint < self.fpres.len()
            && self.fpres[hint] <= pre
            && self.fpres.get(hint + 1).is_none_or(|&next| pre < next)
        {
            return hint;
        }
        let b = self.fpres.partition_point(|&first| first <= pre).saturating_sub(1);
        self.hint.store(b, Ordering::Relaxed);
        b
    }

    /// Byte offset of record `index` of block `b`.
    #[inline]
    fn offset(&self, b: usize, index: u32) -> usize {
        HEADER_SIZE + self.pages[b] as usize * BLOCK_SIZE + index as usize * NODE_SIZE
    }

    /// Adds `delta` to the first pre of every block from `from` on.
    fn shift_blocks(&mut self, from: usize, delta: i64) {
        for first in self.fpres.iter_mut().skip(from) {
            *first = (i64::from(*first) + delta) as u32;
        }
    }

    /// Takes a page from the free list or appends one to the file.
    fn alloc_page(&mut self) -> Result<u32> {
        if let Some(page) = self.free.pop() {
            return Ok(page);
        }
        let page = self.blocks;
        self.blocks += 1;
        self.ensure_capacity(HEADER_SIZE + self.blocks as usize * BLOCK_SIZE)?;
        Ok(page)
    }

    /// Ensures file has enough capacity, growing if necessary
    ///
    /// Growth is page-aligned and adds at least [`GROW_PAGES`] pages, so bulk
    /// loads do not remap on every block.
    ///
    /// # Warning
    ///
    /// This method invalidates all existing pointers into the mmap.
    fn ensure_capacity(&mut self, required_size: usize) -> Result<()> {
        if self.mmap.len() >= required_size {
            return Ok(());
        }

        let wanted = required_size.max(self.mmap.len() + GROW_PAGES * PAGE_SIZE);
        let new_size = (wanted + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        self.file
            .set_len(new_size as u64)
            .context("Failed to grow table file")?;
        // SAFETY: the old mapping is dropped by the assignment and no slices
        // into it can outlive the `&mut self` borrow.
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Writes records into fresh blocks linked in at directory index `at`.
    fn append_blocks(&mut self, mut at: usize, mut first: u32, data: &[u8]) -> Result<usize> {
        for chunk in data.chunks(BLOCK_SIZE) {
            let page = self.alloc_page()?;
            self.pages.insert(at, page);
            self.fpres.insert(at, first);
            let start = self.offset(at, 0);
            self.mmap[start..start + chunk.len()].copy_from_slice(chunk);
            first += (chunk.len() / NODE_SIZE) as u32;
            at += 1;
        }
        Ok(at)
    }
}

impl TableAccess for DiskTable {
    fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    fn slot(&self, pre: u32) -> &[u8] {
        debug_assert!(pre < self.len, "pre {pre} out of range");
        let b = self.block_of(pre);
        let at = self.offset(b, pre - self.fpres[b]);
        &self.mmap[at..at + NODE_SIZE]
    }

    #[inline]
    fn slot_mut(&mut self, pre: u32) -> &mut [u8] {
        debug_assert!(pre < self.len, "pre {pre} out of range");
        let b = self.block_of(pre);
        let at = self.offset(b, pre - self.fpres[b]);
        &mut self.mmap[at..at + NODE_SIZE]
    }

    fn insert(&mut self, pre: u32, records: &[u8]) -> Result<()> {
        debug_assert!(records.len() % NODE_SIZE == 0);
        debug_assert!(pre <= self.len);
        let count = (records.len() / NODE_SIZE) as u32;
        if count == 0 {
            return Ok(());
        }
        if self.pages.is_empty() {
            self.append_blocks(0, 0, records)?;
            self.len = count;
            return Ok(());
        }

        // insert behind the record preceding pre, so appends fill the last block
        let b = if pre == 0 { 0 } else { self.block_of(pre - 1) };
        let offset = pre - self.fpres[b];
        let fill = self.fill(b);
        let start = self.offset(b, offset);
        let end = self.offset(b, fill);

        if (fill + count) as usize <= ENTRIES {
            self.mmap.copy_within(start..end, start + records.len());
            self.mmap[start..start + records.len()].copy_from_slice(records);
            self.len += count;
            self.shift_blocks(b + 1, i64::from(count));
            return Ok(());
        }

        // overflow: new records and the displaced tail spill into new blocks
        let mut data = Vec::with_capacity(records.len() + end - start);
        data.extend_from_slice(records);
        data.extend_from_slice(&self.mmap[start..end]);

        let room = (ENTRIES - offset as usize) * NODE_SIZE;
        let head = room.min(data.len());
        self.mmap[start..start + head].copy_from_slice(&data[..head]);
        let first = self.fpres[b] + offset + (head / NODE_SIZE) as u32;
        let next = self.append_blocks(b + 1, first, &data[head..])?;

        self.len += count;
        self.shift_blocks(next, i64::from(count));
        log::debug!("table insert of {count} records spilled into {} blocks", next - b - 1);
        Ok(())
    }

    fn delete(&mut self, pre: u32, count: u32) -> Result<()> {
        debug_assert!(pre + count <= self.len);
        let mut left = count;
        while left > 0 {
            let b = self.block_of(pre);
            let offset = pre - self.fpres[b];
            let fill = self.fill(b);
            let take = left.min(fill - offset);

            if take == fill {
                let page = self.pages.remove(b);
                self.fpres.remove(b);
                self.free.push(page);
                self.shift_blocks(b, -i64::from(take));
            } else {
                let start = self.offset(b, offset);
                let end = self.offset(b, fill);
                self.mmap.copy_within(start + take as usize * NODE_SIZE..end, start);
                self.shift_blocks(b + 1, -i64::from(take));
            }
            self.len -= take;
            left -= take;
        }
        self.hint.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Commits all pending changes to disk
    ///
    /// Flushes the memory map, rewrites the block directory and forces both
    /// to the physical device.
    fn flush(&mut self) -> Result<()> {
        let mut header = Header::new(FileKind::Table);
        header.count = u64::from(self.blocks);
        header.write_to(&mut self.mmap[..HEADER_SIZE]);
        self.mmap.flush()?;

        let mut out = Vec::with_capacity(16 + self.pages.len() * 8);
        write_num(&mut out, self.blocks);
        write_num(&mut out, self.pages.len() as u32);
        write_num(&mut out, self.len);
        for &first in &self.fpres {
            write_num(&mut out, first);
        }
        for &page in &self.pages {
            write_num(&mut out, page);
        }
        fs::write(&self.directory, out)
            .with_context(|| format!("Failed to write block directory: {}", self.directory.display()))?;

        self.file.sync_data()?;
        self.file.sync_all()?;
        Ok(())
    }
}
