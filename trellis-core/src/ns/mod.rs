//! Namespace scopes, aligned to document order.
//!
//! Bindings are stored as deltas: a scope node records only the prefixes an
//! element declares, and a lookup walks from the innermost scope enclosing
//! a node towards the root. Scope nodes only know their own `pre`; their
//! extent is the subtree size of the declaring element, supplied by the
//! caller through a `size_of` function.
//!
//! The tree never adjusts itself for table edits. The owner calls
//! [`Namespaces::delete`] and [`Namespaces::shift`] as part of every
//! structural change.

mod node;

pub use node::NsNode;

use crate::names::Names;
use crate::num::NumReader;
use anyhow::Result;
use std::collections::HashMap;

/// Maximum number of distinct namespace uris (one byte in the record)
pub const MAX_URIS: u32 = 0xFF;

/// Maximum number of distinct prefixes
pub const MAX_PREFIXES: u32 = 0x7FFF;

/// Uri implicitly bound to the `xml` prefix
pub const XML_URI: &[u8] = b"http://www.w3.org/XML/1998/namespace";

/// Position of a scope node: child indices from the root.
pub type ScopePath = Vec<usize>;

/// Namespace tree with its prefix and uri dictionaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    prefixes: Names,
    uris: Names,
    root: NsNode,

    /// Scopes opened while building, innermost last
    build: ScopePath,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespaces {
    /// Creates an empty namespace tree.
    pub fn new() -> Self {
        Self {
            prefixes: Names::new(MAX_PREFIXES),
            uris: Names::new(MAX_URIS),
            root: NsNode::new(0, Vec::new()),
            build: Vec::new(),
        }
    }

    /// Returns true if no scope has been declared.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Number of scope nodes.
    pub fn scopes(&self) -> usize {
        self.root.count()
    }

    /// Interns a prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix dictionary is full.
    pub fn prefix_id(&mut self, prefix: &[u8]) -> Result<u32> {
        self.prefixes.index(prefix)
    }

    /// Interns a uri. The empty uri maps to 0.
    ///
    /// # Errors
    ///
    /// Returns an error if more than 255 distinct uris are used.
    pub fn uri_id(&mut self, uri: &[u8]) -> Result<u32> {
        if uri.is_empty() { Ok(0) } else { self.uris.index(uri) }
    }

    /// Id of an already known uri.
    pub fn find_uri(&self, uri: &[u8]) -> Option<u32> {
        if uri.is_empty() { Some(0) } else { self.uris.id(uri) }
    }

    /// Id of an already known prefix.
    pub fn find_prefix(&self, prefix: &[u8]) -> Option<u32> {
        self.prefixes.id(prefix)
    }

    /// Prefix for an id.
    pub fn prefix(&self, id: u32) -> &[u8] {
        self.prefixes.name(id)
    }

    /// Uri for an id; id 0 is the empty uri.
    pub fn uri(&self, id: u32) -> &[u8] {
        self.uris.name(id)
    }

    fn node(&self, path: &[usize]) -> &NsNode {
        path.iter().fold(&self.root, |node, &i| &node.children[i])
    }

    fn node_mut(&mut self, path: &[usize]) -> &mut NsNode {
        path.iter().fold(&mut self.root, |node, &i| &mut node.children[i])
    }

    /// Path to the innermost scope whose element encloses `pre`.
    pub fn find(&self, pre: u32, size_of: impl Fn(u32) -> u32) -> ScopePath {
        let mut path = Vec::new();
        let mut node = &self.root;
        loop {
            let i = node.children.partition_point(|c| c.pre <= pre);
            let Some(child) = i.checked_sub(1).map(|i| &node.children[i]) else {
                break;
            };
            if u64::from(pre) >= u64::from(child.pre) + u64::from(size_of(child.pre)) {
                break;
            }
            path.push(i - 1);
            node = child;
        }
        path
    }

    /// Resolves `prefix` along a scope path, innermost first. `Some(0)`
    /// means the prefix is explicitly undeclared.
    pub fn resolve(&self, prefix: u32, path: &[usize]) -> Option<u32> {
        let mut chain = Vec::with_capacity(path.len());
        let mut node = &self.root;
        for &i in path {
            node = &node.children[i];
            chain.push(node);
        }
        chain.iter().rev().find_map(|n| n.binding(prefix))
    }

    /// Uri id bound to `prefix` at node `pre`.
    pub fn lookup(&self, prefix: &[u8], pre: u32, size_of: impl Fn(u32) -> u32) -> Option<u32> {
        let prefix = self.prefixes.id(prefix)?;
        self.resolve(prefix, &self.find(pre, size_of))
    }

    /// All bindings visible along a scope path, outer declarations
    /// overridden by inner ones.
    pub fn visible(&self, path: &[usize]) -> HashMap<u32, u32> {
        let mut map = HashMap::new();
        let mut node = &self.root;
        for &i in path {
            node = &node.children[i];
            map.extend(node.values.iter().copied());
        }
        map
    }

    /// Bindings declared by the element at `pre`.
    pub fn declared(&self, pre: u32, size_of: impl Fn(u32) -> u32) -> &[(u32, u32)] {
        let path = self.find(pre, size_of);
        let node = self.node(&path);
        if !path.is_empty() && node.pre == pre { &node.values } else { &[] }
    }

    /// Binds `prefix` to `uri` at element `pre`, creating a scope node if
    /// the element has none. Existing scopes inside the element's subtree
    /// become children of the new node.
    pub fn add(&mut self, pre: u32, prefix: u32, uri: u32, size_of: impl Fn(u32) -> u32) {
        let size = size_of(pre);
        let path = self.find(pre, size_of);
        let existing = !path.is_empty();
        let parent = self.node_mut(&path);
        if existing && parent.pre == pre {
            parent.bind(prefix, uri);
            return;
        }

        let end = u64::from(pre) + u64::from(size);
        let start = parent.children.partition_point(|c| c.pre < pre);
        let stop = parent.children.partition_point(|c| u64::from(c.pre) < end);
        let mut scope = NsNode::new(pre, vec![(prefix, uri)]);
        scope.children = parent.children.drain(start..stop).collect();
        parent.children.insert(start, scope);
    }

    /// Removes all scopes declared inside `pre..pre + size`.
    pub fn delete(&mut self, pre: u32, size: u32) {
        self.root.delete(pre, pre + size);
    }

    /// Adds `delta` to all scopes at or after `from`.
    pub fn shift(&mut self, from: u32, delta: i64) {
        self.root.shift(from, delta);
    }

    /// Inserts complete scope subtrees below the scope at `path`. The
    /// subtrees must lie in a range no existing child of that scope covers.
    pub fn graft(&mut self, path: &[usize], scopes: Vec<NsNode>) {
        let Some(first) = scopes.first().map(|s| s.pre) else {
            return;
        };
        let parent = self.node_mut(path);
        let at = parent.children.partition_point(|c| c.pre < first);
        parent.children.splice(at..at, scopes);
    }

    /// Top-level scopes, for copying into another tree.
    pub fn roots(&self) -> &[NsNode] {
        &self.root.children
    }

    /// Opens a scope for the element being appended at `pre`. Returns false
    /// if `bindings` is empty and no scope was opened.
    pub fn open(&mut self, pre: u32, bindings: Vec<(u32, u32)>) -> bool {
        if bindings.is_empty() {
            return false;
        }
        let path = self.build.clone();
        let parent = self.node_mut(&path);
        parent.children.push(NsNode::new(pre, bindings));
        let index = parent.children.len() - 1;
        self.build.push(index);
        true
    }

    /// Closes build scopes belonging to the element at `pre` or below it.
    pub fn close(&mut self, pre: u32) {
        while !self.build.is_empty() && self.node(&self.build).pre >= pre {
            self.build.pop();
        }
    }

    /// Resolves `prefix` against the scopes currently open for building.
    pub fn resolve_open(&self, prefix: u32) -> Option<u32> {
        self.resolve(prefix, &self.build)
    }

    /// Appends the dictionaries and the scope tree to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        self.prefixes.write(out);
        self.uris.write(out);
        self.root.write(out);
    }

    /// Reads a tree written by [`Namespaces::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated.
    pub fn read(reader: &mut NumReader<'_>) -> Result<Self> {
        Ok(Self {
            prefixes: Names::read(reader, MAX_PREFIXES)?,
            uris: Names::read(reader, MAX_URIS)?,
            root: NsNode::read(reader)?,
            build: Vec::new(),
        })
    }
}
