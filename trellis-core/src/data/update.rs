//! Structural edits.
//!
//! Every edit keeps the table, the namespace tree, the id map and the
//! metadata consistent before it returns. Index batches are collected
//! while the table changes and handed to the index registry at the end.

use super::{Data, join_pi, prefix_of, size_at, split_pi};
use crate::index::Updates;
use crate::ns::NsNode;
use crate::table::record::{MAX_ATTS, MAX_NAME_ID, NS_FLAG, off};
use crate::table::{NODE_SIZE, NodeKind, Record, TableAccess};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A source copied into the table at `pre`.
struct Import<'a> {
    source: &'a Data,
    pre: u32,
    parent: Option<u32>,
    first_id: u32,
    /// Source elements that keep namespace declarations
    flagged: HashSet<u32>,
}

impl Data {
    fn tracks_text(&self) -> bool {
        self.meta.text_index || self.meta.ft_index
    }

    /// Writes the attribute count of element `pre`.
    fn set_atts(&mut self, pre: u32, atts: u32) {
        let byte = atts.min(MAX_ATTS) << 3 | NodeKind::Elem as u32;
        self.table.write1(pre, off::KIND, byte);
    }

    /// Returns true if node `pre` takes its namespace from `prefix`.
    fn uses_prefix(&self, pre: u32, prefix: &[u8]) -> bool {
        match self.kind(pre) {
            NodeKind::Elem => prefix_of(self.elems.name(self.name_id(pre))) == prefix,
            NodeKind::Attr => !prefix.is_empty() && prefix_of(self.attrs.name(self.name_id(pre))) == prefix,
            _ => false,
        }
    }

    /// Makes `prefix` resolve to `uri` at element `pre`, declaring it there
    /// if the current scope says otherwise. Returns true if a binding was
    /// added.
    ///
    /// Nodes of the subtree other than `renamed` must keep resolving to
    /// the uri they store; a binding that would change that is refused.
    fn bind(&mut self, pre: u32, prefix: &[u8], uri: u32, renamed: u32) -> Result<bool> {
        let table = &*self.table;
        let size_of = |p| size_at(table, p);
        if self.ns.lookup(prefix, pre, size_of).unwrap_or(0) == uri {
            return Ok(false);
        }
        let id = self.ns.prefix_id(prefix)?;
        let mut scoped = self.ns.clone();
        scoped.add(pre, id, uri, size_of);

        for q in pre..pre + size_of(pre) {
            if q == renamed || !self.uses_prefix(q, prefix) {
                continue;
            }
            let stored = self.uri_id(q);
            let before = self.ns.lookup(prefix, q, size_of).unwrap_or(0);
            let after = scoped.lookup(prefix, q, size_of).unwrap_or(0);
            if before == stored && after != stored {
                anyhow::bail!(
                    "Cannot bind prefix '{}' to '{}' at {}: node {} still uses '{}'",
                    String::from_utf8_lossy(prefix),
                    String::from_utf8_lossy(self.ns.uri(uri)),
                    pre,
                    q,
                    String::from_utf8_lossy(self.ns.uri(stored))
                );
            }
        }

        self.ns = scoped;
        let name = self.table.read2(pre, off::NAME);
        self.table.write2(pre, off::NAME, name | u32::from(NS_FLAG));
        Ok(true)
    }

    /// Replaces the stored content of `pre`. Returns the previous content,
    /// or `None` if nothing changed.
    fn set_text(&mut self, pre: u32, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let kind = self.kind(pre);
        let reference = self.text_ref(pre);
        let store = if kind == NodeKind::Attr { &mut self.values } else { &mut self.texts };
        let old = store.read(reference)?.into_owned();
        if old == value {
            return Ok(None);
        }
        let reference = store.replace(reference, value)?;
        self.table.write5(pre, off::TEXT, reference);
        Ok(Some(old))
    }

    /// Renames node `pre` of the given kind.
    ///
    /// Elements and attributes receive the qualified `name` and namespace
    /// `uri`; if the prefix does not already resolve to `uri`, a binding is
    /// declared on the element itself or, for attributes, on the owning
    /// element. An unprefixed element with an empty `uri` undeclares a
    /// default namespace in scope. Processing instructions change their
    /// target and documents their name. Renaming to the current name and
    /// uri changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a dictionary is full, stored text cannot be read
    /// or written, or the required binding would change the namespace of
    /// other nodes in the subtree. A refused rename changes nothing.
    pub fn rename(&mut self, pre: u32, kind: NodeKind, name: &[u8], uri: &[u8]) -> Result<()> {
        debug_assert_eq!(kind, self.kind(pre));
        let changed = match kind {
            NodeKind::Elem | NodeKind::Attr => {
                let uri_id = self.ns.uri_id(uri)?;
                let prefix = prefix_of(name);
                let scope = if kind == NodeKind::Elem { Some(pre) } else { self.parent(pre) };
                let mut changed = false;
                let binds = match kind {
                    NodeKind::Elem => uri_id != 0 || prefix.is_empty(),
                    _ => uri_id != 0 && !prefix.is_empty(),
                };
                if binds && prefix != b"xml" {
                    if let Some(scope) = scope {
                        changed |= self.bind(scope, prefix, uri_id, pre)?;
                    }
                }

                let (names, uri_off) = if kind == NodeKind::Elem {
                    (&mut self.elems, off::ELEM_URI)
                } else {
                    (&mut self.attrs, off::ATTR_URI)
                };
                let id = names.index(name)?;
                let old = self.table.read2(pre, off::NAME);
                let value = (old & u32::from(NS_FLAG)) | (id & MAX_NAME_ID);
                if old != value || self.table.read1(pre, uri_off) != uri_id {
                    self.table.write2(pre, off::NAME, value);
                    self.table.write1(pre, uri_off, uri_id);
                    changed = true;
                }
                changed
            }
            NodeKind::Pi => {
                let joined = {
                    let text = self.text(pre)?;
                    join_pi(name, split_pi(&text).1)
                };
                self.set_text(pre, &joined)?.is_some()
            }
            NodeKind::Doc => self.set_text(pre, name)?.is_some(),
            NodeKind::Text | NodeKind::Comm => false,
        };
        if changed {
            log::debug!("renamed {:?} node at {}", kind, pre);
            self.meta.dirty = true;
        }
        Ok(())
    }

    /// Replaces the value of node `pre`: the content of texts, comments
    /// and attributes, the value of processing instructions (their target
    /// is kept) or the name of documents. Elements have no value.
    ///
    /// # Errors
    ///
    /// Returns an error if stored text cannot be read or written.
    pub fn replace(&mut self, pre: u32, kind: NodeKind, value: &[u8]) -> Result<()> {
        debug_assert_eq!(kind, self.kind(pre));
        let value = match kind {
            NodeKind::Elem => return Ok(()),
            NodeKind::Pi => {
                let text = self.text(pre)?;
                join_pi(split_pi(&text).0, value)
            }
            _ => value.to_vec(),
        };
        let Some(old) = self.set_text(pre, &value)? else {
            return Ok(());
        };

        let mut updates = Updates::default();
        let id = self.id(pre);
        let pending = match kind {
            NodeKind::Text if self.tracks_text() => Some(&mut updates.text),
            NodeKind::Attr if self.meta.attr_index => Some(&mut updates.attr),
            _ => None,
        };
        if let Some(pending) = pending {
            pending.removed.push((old, id));
            pending.added.push((value, id));
        }
        self.meta.dirty = true;
        self.indexes.apply(&updates);
        Ok(())
    }

    /// Deletes node `pre` with its subtree.
    ///
    /// Deleting the last remaining node leaves an empty placeholder
    /// document behind, so the table is never empty after a delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or the text heaps cannot be updated.
    pub fn delete(&mut self, pre: u32) -> Result<()> {
        self.buffer.flush(&mut *self.table)?;
        let kind = self.kind(pre);
        let size = self.size(pre);
        let parent = self.parent(pre);

        let mut updates = Updates::default();
        self.release(pre, size, &mut updates)?;

        self.ns.delete(pre, size);
        if kind == NodeKind::Attr {
            if let Some(parent) = parent {
                let atts = self.att_size(parent);
                self.set_atts(parent, atts - 1);
            }
        }
        let mut ancestor = parent;
        while let Some(a) = ancestor {
            let s = self.size(a);
            self.table.write4(a, off::SIZE, s - size);
            ancestor = self.parent(a);
        }

        self.ids.delete(pre, size);
        self.table.delete(pre, size)?;
        self.ns.shift(pre + size, -i64::from(size));
        self.update_dist(pre, -i64::from(size));

        if self.table.is_empty() {
            let id = self.meta.next_id();
            let text = self.texts.store(b"")?;
            self.table.insert(0, &Record::doc(text, 1, id).0)?;
            self.ids.insert(0, id, 1);
            self.meta.last_id = Some(id);
            self.meta.ndocs = 1;
            self.meta.placeholder = true;
        }

        self.meta.size = self.table.len();
        self.meta.dirty = true;
        log::debug!("deleted {} nodes at {}", size, pre);
        self.indexes.apply(&updates);
        Ok(())
    }

    /// Frees the stored content of nodes `pre..pre + size` and collects the
    /// index entries to remove.
    fn release(&mut self, pre: u32, size: u32, updates: &mut Updates) -> Result<()> {
        for p in pre..pre + size {
            let reference = self.text_ref(p);
            match self.kind(p) {
                NodeKind::Elem => continue,
                NodeKind::Attr => {
                    if self.meta.attr_index {
                        let value = self.values.read(reference)?.into_owned();
                        updates.attr.removed.push((value, self.id(p)));
                    }
                    self.values.free(reference);
                    continue;
                }
                NodeKind::Doc => self.meta.ndocs = self.meta.ndocs.saturating_sub(1),
                NodeKind::Text if self.tracks_text() => {
                    let value = self.texts.read(reference)?.into_owned();
                    updates.text.removed.push((value, self.id(p)));
                }
                _ => {}
            }
            self.texts.free(reference);
        }
        Ok(())
    }

    /// Adds `delta` to the distance of every node from `pre` on whose
    /// parent lies before `pre`: the following siblings of the edited
    /// node and of each of its ancestors.
    fn update_dist(&mut self, pre: u32, delta: i64) {
        let shift = |d: u32| (i64::from(d) + delta) as u32;
        let mut p = pre;
        while p < self.len() {
            match self.kind(p) {
                NodeKind::Doc => {}
                NodeKind::Elem => {
                    let d = self.table.read4(p, off::ELEM_DIST);
                    self.table.write4(p, off::ELEM_DIST, shift(d));
                }
                NodeKind::Attr => {
                    let d = self.table.read1(p, off::KIND) >> 3;
                    let d = if d < MAX_ATTS {
                        shift(d)
                    } else if delta >= 0 {
                        MAX_ATTS
                    } else {
                        self.scan_attr_dist(p)
                    };
                    self.table.write1(p, off::KIND, d.min(MAX_ATTS) << 3 | NodeKind::Attr as u32);
                }
                NodeKind::Text | NodeKind::Comm | NodeKind::Pi => {
                    let d = self.table.read4(p, off::TEXT_DIST);
                    self.table.write4(p, off::TEXT_DIST, shift(d));
                }
            }
            p += self.size(p);
        }
    }

    /// Removes the placeholder document left by deleting everything.
    fn drop_placeholder(&mut self) -> Result<()> {
        let reference = self.text_ref(0);
        self.texts.free(reference);
        self.ids.delete(0, 1);
        self.table.delete(0, 1)?;
        self.meta.ndocs = self.meta.ndocs.saturating_sub(1);
        self.meta.placeholder = false;
        Ok(())
    }

    /// Inserts all nodes of `source` at `pre`, below `parent` or at the top
    /// level if `parent` is `None`.
    ///
    /// The inserted nodes receive fresh ids in document order. Namespace
    /// declarations of the source are kept where they are not already in
    /// scope at the insertion point. If this database only holds the
    /// placeholder document and `source` starts with a document, the
    /// placeholder is replaced and the nodes are inserted at 0. Other nodes
    /// are inserted where requested, typically below the placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error if a dictionary is full or the table or the text
    /// heaps cannot be updated.
    pub fn insert(&mut self, pre: u32, parent: Option<u32>, source: &Data) -> Result<()> {
        let count = source.len();
        if count == 0 {
            return Ok(());
        }
        self.buffer.flush(&mut *self.table)?;
        let (pre, parent) = if self.is_placeholder() && source.kind(0) == NodeKind::Doc {
            self.drop_placeholder()?;
            (0, None)
        } else {
            (pre, parent)
        };

        let table = &*self.table;
        let path = parent.map(|p| self.ns.find(p, |q| size_at(table, q))).unwrap_or_default();
        let (roots, flagged) = self.import_scopes(pre, &path, source)?;

        let import = Import { source, pre, parent, first_id: self.meta.next_id(), flagged };
        let mut updates = Updates::default();
        self.buffer.begin(pre);
        for s in 0..count {
            let record = self.import_record(&import, s, &mut updates)?;
            self.buffer.push(&mut *self.table, &record)?;
        }
        self.buffer.flush(&mut *self.table)?;

        self.ns.shift(pre, i64::from(count));
        self.ns.graft(&path, roots);
        let mut ancestor = parent;
        while let Some(a) = ancestor {
            let s = self.size(a);
            self.table.write4(a, off::SIZE, s + count);
            ancestor = self.parent(a);
        }
        self.ids.insert(pre, import.first_id, count);
        self.update_dist(pre + count, i64::from(count));

        self.imported(&import);
        log::debug!("inserted {} nodes at {}", count, pre);
        self.indexes.apply(&updates);
        Ok(())
    }

    /// Replaces node `pre` and its subtree with all nodes of `source`.
    ///
    /// Records are overwritten in place and only the difference in size is
    /// spliced in or removed, so nodes after the subtree are left untouched
    /// if both sizes agree. The new nodes receive fresh ids. An attribute
    /// can only be replaced by attributes, which then belong to the same
    /// element, and other nodes only by non-attribute nodes. Documents can
    /// only take the place of top-level nodes. An empty `source` deletes
    /// the node.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` does not fit at `pre`, a dictionary is
    /// full or the table or the text heaps cannot be updated.
    pub fn replace_subtree(&mut self, pre: u32, source: &Data) -> Result<()> {
        let dsize = source.len();
        if dsize == 0 {
            return self.delete(pre);
        }
        let rkind = self.kind(pre);
        let parent = self.parent(pre);
        let mut s = 0;
        while s < dsize {
            let kind = source.kind(s);
            let fits = match rkind {
                NodeKind::Attr => kind == NodeKind::Attr,
                _ => kind != NodeKind::Attr && (kind != NodeKind::Doc || parent.is_none()),
            };
            anyhow::ensure!(fits, "Cannot replace {:?} node at {} with {:?} node", rkind, pre, kind);
            s += source.size(s);
        }

        self.buffer.flush(&mut *self.table)?;
        let rsize = self.size(pre);
        let atts = parent.map_or(0, |p| self.att_size(p));
        let mut updates = Updates::default();
        self.release(pre, rsize, &mut updates)?;
        self.ns.delete(pre, rsize);
        self.ids.delete(pre, rsize);

        let table = &*self.table;
        let path = parent.map(|p| self.ns.find(p, |q| size_at(table, q))).unwrap_or_default();
        let (roots, flagged) = self.import_scopes(pre, &path, source)?;
        let import = Import { source, pre, parent, first_id: self.meta.next_id(), flagged };
        let mut records = Vec::with_capacity(dsize as usize * NODE_SIZE);
        for s in 0..dsize {
            records.extend_from_slice(&self.import_record(&import, s, &mut updates)?.0);
        }
        self.table.replace(pre, rsize, &records)?;

        let diff = i64::from(dsize) - i64::from(rsize);
        if diff != 0 {
            self.ns.shift(pre + rsize, diff);
        }
        self.ns.graft(&path, roots);
        if diff != 0 {
            let mut ancestor = parent;
            while let Some(a) = ancestor {
                let s = self.size(a);
                self.table.write4(a, off::SIZE, (i64::from(s) + diff) as u32);
                ancestor = self.parent(a);
            }
            self.update_dist(pre + dsize, diff);
        }
        self.ids.insert(pre, import.first_id, dsize);
        if rkind == NodeKind::Attr {
            if let Some(parent) = parent {
                self.set_atts(parent, atts + dsize - 1);
                self.declare_attributes(pre, parent, dsize)?;
            }
        }

        self.imported(&import);
        log::debug!("replaced {} nodes at {} with {}", rsize, pre, dsize);
        self.indexes.apply(&updates);
        Ok(())
    }

    /// Builds the record for source node `s` of `import`, interning its
    /// names and storing its content.
    fn import_record(&mut self, import: &Import<'_>, s: u32, updates: &mut Updates) -> Result<Record> {
        let source = import.source;
        let new = import.pre + s;
        let dist = match (source.parent(s), import.parent) {
            (Some(sp), _) => s - sp,
            (None, Some(p)) => new - p,
            (None, None) => new + 1,
        };
        let id = import.first_id + s;
        let kind = source.kind(s);
        Ok(match kind {
            NodeKind::Doc => {
                let text = self.texts.store(&source.text(s)?)?;
                Record::doc(text, source.size(s), id)
            }
            NodeKind::Elem => {
                let name = self.elems.index(source.elems.name(source.name_id(s)))?;
                let uri = self.ns.uri_id(source.uri(s))?;
                let flagged = import.flagged.contains(&s);
                Record::elem(dist, name as u16, source.att_size(s), source.size(s), uri as u8, flagged, id)
            }
            NodeKind::Attr => {
                let name = self.attrs.index(source.attrs.name(source.name_id(s)))?;
                let uri = self.ns.uri_id(source.uri(s))?;
                let value = source.text(s)?;
                let reference = self.values.store(&value)?;
                if self.meta.attr_index {
                    updates.attr.added.push((value.into_owned(), id));
                }
                Record::attr(dist, name as u16, reference, uri as u8, id)
            }
            NodeKind::Text | NodeKind::Comm | NodeKind::Pi => {
                let value = source.text(s)?;
                let reference = self.texts.store(&value)?;
                if kind == NodeKind::Text && self.tracks_text() {
                    updates.text.added.push((value.into_owned(), id));
                }
                Record::text(kind, reference, dist, id)
            }
        })
    }

    /// Updates the metadata after the nodes of `import` were copied in.
    fn imported(&mut self, import: &Import<'_>) {
        let source = import.source;
        let count = source.len();
        let ndocs = (0..count).filter(|&s| source.kind(s) == NodeKind::Doc).count() as u32;
        let base = import.parent.map_or(0, |p| self.level(p));
        self.meta.height = self.meta.height.max(base + source.meta.height);
        self.meta.ndocs += ndocs;
        self.meta.last_id = Some(import.first_id + count - 1);
        self.meta.placeholder = false;
        self.meta.size = self.table.len();
        self.meta.dirty = true;
    }

    /// Translates the namespace scopes of `source` into scope subtrees for
    /// its copy at `pre`, dropping bindings already in effect at `path`.
    /// Returns the subtrees and the source positions of the elements that
    /// still declare namespaces.
    fn import_scopes(&mut self, pre: u32, path: &[usize], source: &Data) -> Result<(Vec<NsNode>, HashSet<u32>)> {
        let visible = self.ns.visible(path);
        let default = self.ns.find_prefix(b"");
        let in_default = default.and_then(|d| visible.get(&d)).is_some_and(|&uri| uri != 0);

        // declared bindings per source element, in target ids
        let mut scopes: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
        let mut pending: Vec<&NsNode> = source.ns.roots().iter().collect();
        while let Some(node) = pending.pop() {
            let mut values = Vec::with_capacity(node.values.len());
            for &(prefix, uri) in &node.values {
                let prefix = self.ns.prefix_id(source.ns.prefix(prefix))?;
                values.push((prefix, self.ns.uri_id(source.ns.uri(uri))?));
            }
            scopes.insert(node.pre, values);
            pending.extend(node.children.iter());
        }

        // unqualified elements without namespace must not fall into the
        // default namespace of the insertion point
        if in_default {
            let default = self.ns.prefix_id(b"")?;
            let sizes = |p| size_at(&*source.table, p);
            let mut undeclared: Vec<u32> = Vec::new();
            for s in 0..source.len() {
                while undeclared.last().is_some_and(|&end| end <= s) {
                    undeclared.pop();
                }
                if source.kind(s) != NodeKind::Elem
                    || source.uri_id(s) != 0
                    || !prefix_of(source.elems.name(source.name_id(s))).is_empty()
                    || !undeclared.is_empty()
                    || source.ns.lookup(b"", s, sizes).is_some()
                {
                    continue;
                }
                scopes.entry(s).or_default().push((default, 0));
                undeclared.push(s + source.size(s));
            }
        }

        let mut roots = Vec::new();
        let mut flagged = HashSet::new();
        let mut stack: Vec<(u32, NsNode)> = Vec::new();
        let close = |stack: &mut Vec<(u32, NsNode)>, roots: &mut Vec<NsNode>| {
            if let Some((_, node)) = stack.pop() {
                match stack.last_mut() {
                    Some((_, parent)) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
        };
        for (s, values) in scopes {
            while stack.last().is_some_and(|&(end, _)| end <= s) {
                close(&mut stack, &mut roots);
            }
            let effective = |prefix: u32| {
                stack
                    .iter()
                    .rev()
                    .find_map(|(_, node)| node.binding(prefix))
                    .or_else(|| visible.get(&prefix).copied())
                    .unwrap_or(0)
            };
            let values: Vec<(u32, u32)> = values.into_iter().filter(|&(p, uri)| effective(p) != uri).collect();
            if values.is_empty() {
                continue;
            }
            flagged.insert(s);
            stack.push((s + source.size(s), NsNode::new(pre + s, values)));
        }
        while !stack.is_empty() {
            close(&mut stack, &mut roots);
        }
        Ok((roots, flagged))
    }

    /// Inserts the standalone attributes of `source` at `pre`, which must
    /// lie in the attribute range of element `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insertion fails or a namespace cannot be
    /// declared.
    pub fn insert_attributes(&mut self, pre: u32, parent: u32, source: &Data) -> Result<()> {
        let count = source.len();
        let atts = self.att_size(parent);
        self.insert(pre, Some(parent), source)?;
        self.set_atts(parent, atts + count);
        self.declare_attributes(pre, parent, count)
    }

    /// Binds the namespaces of attributes `pre..pre + count` on their
    /// element `parent`.
    fn declare_attributes(&mut self, pre: u32, parent: u32, count: u32) -> Result<()> {
        let mut declared: HashMap<Vec<u8>, u32> = HashMap::new();
        for p in pre..pre + count {
            let uri = self.uri_id(p);
            let prefix = prefix_of(self.attrs.name(self.name_id(p))).to_vec();
            if uri == 0 || prefix.is_empty() || prefix == b"xml" || declared.get(&prefix) == Some(&uri) {
                continue;
            }
            self.bind(parent, &prefix, uri, p)?;
            declared.insert(prefix, uri);
        }
        Ok(())
    }
}
