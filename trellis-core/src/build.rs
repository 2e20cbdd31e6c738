use crate::data::{Data, DataOptions, join_pi, prefix_of};
use crate::idmap::IdMap;
use crate::index::Updates;
use crate::ns::XML_URI;
use crate::table::record::off;
use crate::table::{NodeKind, Record, TableAccess};
use anyhow::Result;

/// Appends parse events to an empty database in document order.
///
/// Elements and documents are opened and closed explicitly; their sizes
/// are patched in when they are closed. Namespace declarations announced
/// with [`Builder::start_ns`] belong to the next element.
///
/// # Example
///
/// ```
/// use trellis_core::{Builder, Data, DataOptions};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut builder = Builder::new(Data::memory("books", &DataOptions::default()))?;
/// builder.start_doc("books.xml")?;
/// builder.start_elem("book", &[("year", "1999")])?;
/// builder.text("Dune")?;
/// builder.end_elem()?;
/// builder.end_doc()?;
/// let data = builder.finish()?;
///
/// assert_eq!(data.len(), 4);
/// assert_eq!(data.size(1), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Builder {
    data: Data,

    /// Open documents and elements, innermost last
    stack: Vec<u32>,

    /// Declarations for the next element
    pending: Vec<(u32, u32)>,

    updates: Updates,
}

impl Builder {
    /// Starts building into `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` already holds nodes.
    pub fn new(mut data: Data) -> Result<Self> {
        if !data.is_empty() {
            anyhow::bail!("Cannot build into database '{}': it already holds {} nodes", data.meta.name, data.len());
        }
        data.buffer.begin(0);
        Ok(Self { data, stack: Vec::new(), pending: Vec::new(), updates: Updates::default() })
    }

    /// Starts building an in-memory database.
    pub fn memory(name: &str, options: &DataOptions) -> Self {
        let mut data = Data::memory(name, options);
        data.buffer.begin(0);
        Self { data, stack: Vec::new(), pending: Vec::new(), updates: Updates::default() }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.data.meta.next_id();
        self.data.meta.last_id = Some(id);
        id
    }

    fn push(&mut self, record: &Record) -> Result<()> {
        self.data.buffer.push(&mut *self.data.table, record)
    }

    /// Distance to the innermost open node; top-level nodes store `pre + 1`.
    fn dist(&self, pre: u32) -> u32 {
        self.stack.last().map_or(pre + 1, |&parent| pre - parent)
    }

    fn open(&mut self, pre: u32) {
        self.stack.push(pre);
        let level = self.stack.len() as u32;
        self.data.meta.height = self.data.meta.height.max(level);
    }

    /// Closes the innermost open node, which must be of `kind`.
    fn close(&mut self, kind: NodeKind) -> Result<u32> {
        let Some(&pre) = self.stack.last() else {
            anyhow::bail!("No open {kind:?} node to close");
        };
        if NodeKind::from_byte(self.data.buffer.read1(&*self.data.table, pre, off::KIND) as u8) != kind {
            anyhow::bail!("Cannot close {kind:?}: innermost open node at {pre} is not one");
        }
        self.stack.pop();
        let size = self.data.buffer.next_pre() - pre;
        self.data.buffer.write4(&mut *self.data.table, pre, off::SIZE, size);
        Ok(pre)
    }

    /// Uri id a prefix resolves to in the open scopes.
    fn resolve(&self, prefix: &[u8]) -> u32 {
        self.data.ns.find_prefix(prefix).and_then(|p| self.data.ns.resolve_open(p)).unwrap_or(0)
    }

    /// Opens a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the name cannot be stored.
    pub fn start_doc(&mut self, name: &str) -> Result<()> {
        let pre = self.data.buffer.next_pre();
        let text = self.data.texts.store(name.as_bytes())?;
        let id = self.next_id();
        self.push(&Record::doc(text, 1, id))?;
        self.data.meta.ndocs += 1;
        self.open(pre);
        Ok(())
    }

    /// Closes the current document.
    ///
    /// # Errors
    ///
    /// Returns an error if the innermost open node is not a document.
    pub fn end_doc(&mut self) -> Result<()> {
        self.close(NodeKind::Doc)?;
        Ok(())
    }

    /// Declares a namespace on the next element.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace dictionary is full.
    pub fn start_ns(&mut self, prefix: &str, uri: &str) -> Result<()> {
        let prefix = self.data.ns.prefix_id(prefix.as_bytes())?;
        let uri = self.data.ns.uri_id(uri.as_bytes())?;
        self.pending.push((prefix, uri));
        Ok(())
    }

    /// Opens an element with its attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if a dictionary is full or a value cannot be stored.
    pub fn start_elem(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let pre = self.data.buffer.next_pre();
        let bindings = std::mem::take(&mut self.pending);
        let declares = self.data.ns.open(pre, bindings);

        let uri = self.resolve(prefix_of(name.as_bytes()));
        let name = self.data.elems.index(name.as_bytes())?;
        let dist = self.dist(pre);
        let id = self.next_id();
        self.push(&Record::elem(dist, name as u16, attrs.len() as u32, 1, uri as u8, declares, id))?;

        for (i, &(name, value)) in attrs.iter().enumerate() {
            let prefix = prefix_of(name.as_bytes());
            let uri = match prefix {
                b"" => 0,
                b"xml" => self.data.ns.uri_id(XML_URI)?,
                prefix => self.resolve(prefix),
            };
            self.push_attr(i as u32 + 1, name, value, uri)?;
        }
        self.open(pre);
        Ok(())
    }

    fn push_attr(&mut self, dist: u32, name: &str, value: &str, uri: u32) -> Result<()> {
        let name = self.data.attrs.index(name.as_bytes())?;
        let reference = self.data.values.store(value.as_bytes())?;
        let id = self.next_id();
        if self.data.meta.attr_index {
            self.updates.attr.added.push((value.as_bytes().to_vec(), id));
        }
        self.push(&Record::attr(dist, name as u16, reference, uri as u8, id))
    }

    /// Adds an element without children.
    ///
    /// # Errors
    ///
    /// See [`Builder::start_elem`].
    pub fn empty_elem(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.start_elem(name, attrs)?;
        self.end_elem()
    }

    /// Closes the current element.
    ///
    /// # Errors
    ///
    /// Returns an error if the innermost open node is not an element.
    pub fn end_elem(&mut self) -> Result<()> {
        let pre = self.close(NodeKind::Elem)?;
        self.data.ns.close(pre);
        Ok(())
    }

    fn leaf(&mut self, kind: NodeKind, value: &[u8]) -> Result<()> {
        let pre = self.data.buffer.next_pre();
        let reference = self.data.texts.store(value)?;
        let dist = self.dist(pre);
        let id = self.next_id();
        if kind == NodeKind::Text && (self.data.meta.text_index || self.data.meta.ft_index) {
            self.updates.text.added.push((value.to_vec(), id));
        }
        self.push(&Record::text(kind, reference, dist, id))
    }

    /// Adds a text node.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be stored.
    pub fn text(&mut self, value: &str) -> Result<()> {
        self.leaf(NodeKind::Text, value.as_bytes())
    }

    /// Adds a comment.
    ///
    /// # Errors
    ///
    /// Returns an error if the comment cannot be stored.
    pub fn comment(&mut self, value: &str) -> Result<()> {
        self.leaf(NodeKind::Comm, value.as_bytes())
    }

    /// Adds a processing instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction cannot be stored.
    pub fn pi(&mut self, target: &str, value: &str) -> Result<()> {
        self.leaf(NodeKind::Pi, &join_pi(target.as_bytes(), value.as_bytes()))
    }

    /// Adds a standalone attribute at the top level, as a source for
    /// [`Data::insert_attributes`].
    ///
    /// # Errors
    ///
    /// Returns an error if a document or element is open.
    pub fn attr(&mut self, name: &str, value: &str, uri: &str) -> Result<()> {
        if !self.stack.is_empty() {
            anyhow::bail!("Standalone attribute '{name}' must be added at the top level");
        }
        let pre = self.data.buffer.next_pre();
        let uri = self.data.ns.uri_id(uri.as_bytes())?;
        self.push_attr(pre + 1, name, value, uri)
    }

    /// Finishes building and returns the database. Disk-backed databases
    /// are flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if nodes are still open or flushing fails.
    pub fn finish(mut self) -> Result<Data> {
        if !self.stack.is_empty() {
            anyhow::bail!("{} documents or elements are still open", self.stack.len());
        }
        let data = &mut self.data;
        data.buffer.flush(&mut *data.table)?;
        data.meta.size = data.table.len();
        data.meta.dirty = true;
        let table = &*data.table;
        data.ids = IdMap::from_ids(data.ids.mode(), (0..table.len()).map(|pre| table.read4(pre, off::ID)));
        data.indexes.apply(&self.updates);
        log::debug!("built {} nodes into '{}'", data.meta.size, data.meta.name);
        if data.dir().is_some() {
            data.flush()?;
        }
        Ok(self.data)
    }
}
