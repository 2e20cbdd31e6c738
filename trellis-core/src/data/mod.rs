//! The database façade.
//!
//! [`Data`] owns the node table, the text heaps, the name dictionaries, the
//! namespace tree and the id map, and is the only place where they are
//! changed together. Navigation uses the integer fields of the records:
//! a node's parent is `pre - dist`, its subtree ends at `pre + size`.
//!
//! Accessors take a `pre` without checking it. Passing a position outside
//! the table, or asking a node for a field its kind does not have, is a
//! caller error; debug builds catch out-of-range positions.

pub(crate) mod buffer;
mod update;

use crate::header::FileKind;
use crate::idmap::{IdMap, IdentityMode};
use crate::index::{IndexKind, IndexToken, Indexes, ValueIndex};
use crate::lock::DbLock;
use crate::meta::MetaData;
use crate::names::Names;
use crate::ns::Namespaces;
use crate::table::record::{MAX_ATTS, MAX_NAME_ID, NS_FLAG, off};
use crate::table::{DiskTable, MemTable, NodeKind, TableAccess};
use crate::text::{Heap, TextStore};
use anyhow::{Context, Result};
use buffer::AppendBuffer;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Text heap file
pub const TEXT_FILE: &str = "txt";

/// Attribute value heap file
pub const VALUE_FILE: &str = "atv";

/// Configuration options for [`Data`]
#[derive(Debug, Clone)]
pub struct DataOptions {
    /// Id map maintained for `pre(id)` lookups
    pub identity: IdentityMode,

    /// Compress long texts
    pub compress: bool,

    /// Minimum byte length considered for compression
    pub compress_threshold: usize,

    /// Maintain the text value index on updates
    pub text_index: bool,

    /// Maintain the attribute value index on updates
    pub attr_index: bool,

    /// Maintain the full-text index on updates
    pub ft_index: bool,

    /// Further attempts to take a held database lock
    pub lock_retries: u32,

    /// Pause before the first lock retry; doubles on each retry
    pub lock_backoff: Duration,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            identity: IdentityMode::MapTree,
            compress: false,
            compress_threshold: 128,
            text_index: false,
            attr_index: false,
            ft_index: false,
            lock_retries: 5,
            lock_backoff: Duration::from_millis(20),
        }
    }
}

/// Subtree size of `pre`, read from the table alone.
pub(crate) fn size_at(table: &dyn TableAccess, pre: u32) -> u32 {
    match NodeKind::from_byte(table.read1(pre, off::KIND) as u8) {
        NodeKind::Doc | NodeKind::Elem => table.read4(pre, off::SIZE),
        _ => 1,
    }
}

/// An XML database: a forest of documents stored as a node table.
#[derive(Debug)]
pub struct Data {
    pub(crate) table: Box<dyn TableAccess>,
    pub(crate) texts: TextStore,
    pub(crate) values: TextStore,
    pub(crate) elems: Names,
    pub(crate) attrs: Names,
    pub(crate) ns: Namespaces,
    pub(crate) ids: IdMap,
    pub(crate) meta: MetaData,
    pub(crate) buffer: AppendBuffer,
    pub(crate) indexes: Indexes,
    dir: Option<PathBuf>,

    /// Released last, after everything has been written
    _lock: Option<DbLock>,
}

impl Data {
    /// Creates an empty in-memory database.
    pub fn memory(name: &str, options: &DataOptions) -> Self {
        let heap = |compress| TextStore::new(Heap::memory(), compress, options.compress_threshold);
        let mut meta = MetaData::new(name);
        Self::apply_flags(&mut meta, options);
        Self {
            table: Box::new(MemTable::new()),
            texts: heap(options.compress),
            values: heap(options.compress),
            elems: Names::new(MAX_NAME_ID),
            attrs: Names::new(MAX_NAME_ID),
            ns: Namespaces::new(),
            ids: IdMap::new(options.identity),
            meta,
            buffer: AppendBuffer::default(),
            indexes: Indexes::default(),
            dir: None,
            _lock: None,
        }
    }

    fn apply_flags(meta: &mut MetaData, options: &DataOptions) {
        meta.compress = options.compress;
        meta.text_index = options.text_index;
        meta.attr_index = options.attr_index;
        meta.ft_index = options.ft_index;
    }

    /// Creates an empty database in directory `dir`, replacing the files of
    /// any database stored there.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or its files cannot be created
    /// - The database is locked by another process
    pub fn create<P: AsRef<Path>>(dir: P, name: &str, options: &DataOptions) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory: {}", dir.display()))?;
        let lock = DbLock::acquire(dir, options.lock_retries, options.lock_backoff)?;

        let table = DiskTable::create(dir)?;
        let heap = |file: &str, kind| -> Result<TextStore> {
            let heap = Heap::create(&dir.join(file), kind)?;
            Ok(TextStore::new(heap, options.compress, options.compress_threshold))
        };
        let mut meta = MetaData::new(name);
        Self::apply_flags(&mut meta, options);

        let mut data = Self {
            table: Box::new(table),
            texts: heap(TEXT_FILE, FileKind::Texts)?,
            values: heap(VALUE_FILE, FileKind::Values)?,
            elems: Names::new(MAX_NAME_ID),
            attrs: Names::new(MAX_NAME_ID),
            ns: Namespaces::new(),
            ids: IdMap::new(options.identity),
            meta,
            buffer: AppendBuffer::default(),
            indexes: Indexes::default(),
            dir: Some(dir.to_path_buf()),
            _lock: Some(lock),
        };
        data.flush()?;
        log::info!("created database '{}' in {}", name, dir.display());
        Ok(data)
    }

    /// Opens the database stored in `dir`.
    ///
    /// Flags that affect the stored format (compression, index flags) are
    /// taken from the database; `options` supplies the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database is locked by another process
    /// - A file is missing, corrupt, or written by an incompatible version
    pub fn open<P: AsRef<Path>>(dir: P, options: &DataOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let lock = DbLock::acquire(dir, options.lock_retries, options.lock_backoff)?;
        let (meta, elems, attrs, ns) = MetaData::read(dir)?;
        let table = DiskTable::open(dir)?;
        if table.len() != meta.size {
            anyhow::bail!(
                "Database {} is not a valid store: metadata lists {} nodes, table holds {}",
                dir.display(),
                meta.size,
                table.len()
            );
        }

        let heap = |file: &str, kind| -> Result<TextStore> {
            let heap = Heap::open(&dir.join(file), kind)?;
            Ok(TextStore::new(heap, meta.compress, options.compress_threshold))
        };
        let texts = heap(TEXT_FILE, FileKind::Texts)?;
        let values = heap(VALUE_FILE, FileKind::Values)?;
        let ids = IdMap::from_ids(options.identity, (0..table.len()).map(|pre| table.read4(pre, off::ID)));

        log::info!("opened database '{}' with {} nodes from {}", meta.name, meta.size, dir.display());
        Ok(Self {
            table: Box::new(table),
            texts,
            values,
            elems,
            attrs,
            ns,
            ids,
            meta,
            buffer: AppendBuffer::default(),
            indexes: Indexes::default(),
            dir: Some(dir.to_path_buf()),
            _lock: Some(lock),
        })
    }

    /// Writes all pending changes to disk. A no-op for in-memory databases.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written or synced.
    pub fn flush(&mut self) -> Result<()> {
        self.buffer.flush(&mut *self.table)?;
        self.meta.size = self.table.len();
        let Some(dir) = &self.dir else {
            self.meta.dirty = false;
            return Ok(());
        };
        self.table.flush()?;
        self.texts.flush()?;
        self.values.flush()?;
        self.meta.write(dir, &self.elems, &self.attrs, &self.ns)?;
        self.meta.dirty = false;
        log::info!("flushed database '{}' ({} nodes)", self.meta.name, self.meta.size);
        Ok(())
    }

    // structure

    /// Number of nodes.
    pub fn len(&self) -> u32 {
        self.table.len()
    }

    /// Returns true if the table holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Metadata counters and flags.
    pub fn meta(&self) -> &MetaData {
        &self.meta
    }

    /// Directory of a disk-backed database.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Raw bytes of the record at `pre`.
    pub fn record(&self, pre: u32) -> &[u8] {
        self.table.slot(pre)
    }

    /// Kind of node `pre`.
    #[inline]
    pub fn kind(&self, pre: u32) -> NodeKind {
        NodeKind::from_byte(self.table.read1(pre, off::KIND) as u8)
    }

    /// Stable id of node `pre`.
    #[inline]
    pub fn id(&self, pre: u32) -> u32 {
        self.table.read4(pre, off::ID)
    }

    /// Current position of the node with `id`, or `None` if it was deleted.
    pub fn pre(&self, id: u32) -> Option<u32> {
        match self.ids {
            IdMap::Scan => (0..self.len()).find(|&pre| self.id(pre) == id),
            ref map => map.pre(id),
        }
    }

    /// Which id map is maintained.
    pub fn identity(&self) -> IdentityMode {
        self.ids.mode()
    }

    /// Number of table slots of the subtree rooted at `pre`.
    #[inline]
    pub fn size(&self, pre: u32) -> u32 {
        size_at(&*self.table, pre)
    }

    /// Distance from `pre` to its parent. Top-level nodes of a fragment
    /// store `pre + 1`; documents store nothing and report 0.
    pub fn dist(&self, pre: u32) -> u32 {
        match self.kind(pre) {
            NodeKind::Doc => 0,
            NodeKind::Elem => self.table.read4(pre, off::ELEM_DIST),
            NodeKind::Attr => {
                let dist = self.table.read1(pre, off::KIND) >> 3;
                if dist < MAX_ATTS { dist } else { self.scan_attr_dist(pre) }
            }
            NodeKind::Text | NodeKind::Comm | NodeKind::Pi => self.table.read4(pre, off::TEXT_DIST),
        }
    }

    /// Distance of an attribute to its element, found by skipping back over
    /// the preceding attributes. Standalone attributes report `pre + 1`.
    pub(crate) fn scan_attr_dist(&self, pre: u32) -> u32 {
        let mut p = pre;
        while p > 0 {
            p -= 1;
            if self.kind(p) != NodeKind::Attr {
                return pre - p;
            }
        }
        pre + 1
    }

    /// Parent of `pre`, or `None` for documents and top-level fragment nodes.
    pub fn parent(&self, pre: u32) -> Option<u32> {
        if self.kind(pre) == NodeKind::Doc {
            return None;
        }
        pre.checked_sub(self.dist(pre))
    }

    /// Number of attributes of element `pre`; 0 for other kinds.
    pub fn att_size(&self, pre: u32) -> u32 {
        if self.kind(pre) != NodeKind::Elem {
            return 0;
        }
        let atts = self.table.read1(pre, off::KIND) >> 3;
        if atts < MAX_ATTS {
            return atts;
        }
        let mut p = pre + 1;
        while p < self.len() && self.kind(p) == NodeKind::Attr {
            p += 1;
        }
        p - pre - 1
    }

    /// Level of `pre`: 1 for top-level nodes, parent level + 1 otherwise.
    pub fn level(&self, pre: u32) -> u32 {
        let mut level = 1;
        let mut p = pre;
        while let Some(parent) = self.parent(p) {
            level += 1;
            p = parent;
        }
        level
    }

    // names and namespaces

    /// Name id of element or attribute `pre`.
    pub fn name_id(&self, pre: u32) -> u32 {
        self.table.read2(pre, off::NAME) & MAX_NAME_ID
    }

    /// Returns true if element `pre` declares namespaces.
    pub fn ns_flag(&self, pre: u32) -> bool {
        self.table.read2(pre, off::NAME) & u32::from(NS_FLAG) != 0
    }

    /// Namespace uri id of element or attribute `pre`.
    pub fn uri_id(&self, pre: u32) -> u32 {
        match self.kind(pre) {
            NodeKind::Elem => self.table.read1(pre, off::ELEM_URI),
            NodeKind::Attr => self.table.read1(pre, off::ATTR_URI),
            _ => 0,
        }
    }

    /// Namespace uri of element or attribute `pre`; empty if none.
    pub fn uri(&self, pre: u32) -> &[u8] {
        self.ns.uri(self.uri_id(pre))
    }

    /// Name of node `pre`: the qualified name of elements and attributes,
    /// the target of processing instructions, the name of documents.
    ///
    /// # Errors
    ///
    /// Returns an error if stored text cannot be decoded.
    pub fn name(&self, pre: u32) -> Result<Vec<u8>> {
        Ok(match self.kind(pre) {
            NodeKind::Elem => self.elems.name(self.name_id(pre)).to_vec(),
            NodeKind::Attr => self.attrs.name(self.name_id(pre)).to_vec(),
            NodeKind::Doc => self.text(pre)?.into_owned(),
            NodeKind::Pi => {
                let text = self.text(pre)?;
                split_pi(&text).0.to_vec()
            }
            NodeKind::Text | NodeKind::Comm => Vec::new(),
        })
    }

    /// Namespaces declared by element `pre`, as `(prefix, uri)` pairs.
    pub fn namespaces(&self, pre: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
        let table = &*self.table;
        self.ns
            .declared(pre, |p| size_at(table, p))
            .iter()
            .map(|&(prefix, uri)| (self.ns.prefix(prefix).to_vec(), self.ns.uri(uri).to_vec()))
            .collect()
    }

    /// Uri bound to `prefix` in the scope of node `pre`. An explicit
    /// undeclaration yields an empty uri.
    pub fn ns_uri(&self, prefix: &[u8], pre: u32) -> Option<Vec<u8>> {
        let table = &*self.table;
        self.ns
            .lookup(prefix, pre, |p| size_at(table, p))
            .map(|id| self.ns.uri(id).to_vec())
    }

    /// The namespace tree.
    pub fn namespace_tree(&self) -> &Namespaces {
        &self.ns
    }

    // content

    /// Raw reference field of a text-bearing node or attribute.
    pub fn text_ref(&self, pre: u32) -> u64 {
        self.table.read5(pre, off::TEXT)
    }

    /// Stored content of `pre`: the text of documents (their name), texts,
    /// comments and processing instructions, or the value of attributes.
    /// Elements have no stored content.
    ///
    /// # Errors
    ///
    /// Returns an error if compressed content is corrupt.
    pub fn text(&self, pre: u32) -> Result<Cow<'_, [u8]>> {
        match self.kind(pre) {
            NodeKind::Elem => Ok(Cow::Borrowed(&[])),
            NodeKind::Attr => self.values.read(self.text_ref(pre)),
            _ => self.texts.read(self.text_ref(pre)),
        }
    }

    /// String value of `pre`: the concatenated descendant texts of
    /// elements and documents, the value of processing instructions.
    ///
    /// # Errors
    ///
    /// Returns an error if compressed content is corrupt.
    pub fn atom(&self, pre: u32) -> Result<Vec<u8>> {
        match self.kind(pre) {
            NodeKind::Elem | NodeKind::Doc => {
                let mut out = Vec::new();
                for p in pre + 1..pre + self.size(pre) {
                    if self.kind(p) == NodeKind::Text {
                        out.extend_from_slice(&self.text(p)?);
                    }
                }
                Ok(out)
            }
            NodeKind::Pi => Ok(split_pi(&self.text(pre)?).1.to_vec()),
            _ => Ok(self.text(pre)?.into_owned()),
        }
    }

    /// Value of the attribute called `name` of element `pre`.
    ///
    /// # Errors
    ///
    /// Returns an error if compressed content is corrupt.
    pub fn attr_value(&self, name: &[u8], pre: u32) -> Result<Option<Vec<u8>>> {
        let Some(id) = self.attrs.id(name) else {
            return Ok(None);
        };
        for p in pre + 1..=pre + self.att_size(pre) {
            if self.name_id(p) == id {
                return Ok(Some(self.text(p)?.into_owned()));
            }
        }
        Ok(None)
    }

    // indexes

    /// Installs a secondary index, returning the one it replaces.
    pub fn set_index(&self, kind: IndexKind, index: Box<dyn ValueIndex>) -> Option<Box<dyn ValueIndex>> {
        self.indexes.set_index(kind, index)
    }

    /// Removes a secondary index.
    pub fn drop_index(&self, kind: IndexKind) -> Option<Box<dyn ValueIndex>> {
        self.indexes.drop_index(kind)
    }

    /// Ids of the nodes matching `token`.
    pub fn index_ids(&self, token: &IndexToken) -> Vec<u32> {
        self.indexes.iter(token).collect()
    }

    /// Returns true if this database holds only the empty document left
    /// behind after deleting everything.
    pub fn is_placeholder(&self) -> bool {
        self.meta.placeholder
    }
}

/// Prefix of a qualified name; empty if the name has none.
pub(crate) fn prefix_of(name: &[u8]) -> &[u8] {
    name.iter().position(|&b| b == b':').map_or(&[][..], |at| &name[..at])
}

/// Splits a processing instruction into target and value.
pub(crate) fn split_pi(text: &[u8]) -> (&[u8], &[u8]) {
    match text.iter().position(|&b| b == b' ') {
        Some(at) => (&text[..at], &text[at + 1..]),
        None => (text, &[]),
    }
}

/// Joins a processing instruction target and value.
pub(crate) fn join_pi(name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = name.to_vec();
    if !value.is_empty() {
        out.push(b' ');
        out.extend_from_slice(value);
    }
    out
}
