use crate::num::{NumReader, write_num};
use anyhow::Result;

/// A scope node: the bindings that become active at element `pre`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsNode {
    /// Pre value of the declaring element
    pub pre: u32,

    /// Declared (prefix id, uri id) pairs; uri id 0 undeclares a prefix
    pub values: Vec<(u32, u32)>,

    /// Nested scopes, sorted by `pre`
    pub children: Vec<NsNode>,
}

impl NsNode {
    /// Creates a scope node without children.
    pub fn new(pre: u32, values: Vec<(u32, u32)>) -> Self {
        Self { pre, values, children: Vec::new() }
    }

    /// Uri bound to `prefix` at this node.
    pub fn binding(&self, prefix: u32) -> Option<u32> {
        self.values.iter().find(|&&(p, _)| p == prefix).map(|&(_, uri)| uri)
    }

    /// Sets or replaces the binding of `prefix`.
    pub fn bind(&mut self, prefix: u32, uri: u32) {
        match self.values.iter_mut().find(|(p, _)| *p == prefix) {
            Some(value) => value.1 = uri,
            None => self.values.push((prefix, uri)),
        }
    }

    /// Removes all descendants whose `pre` lies in `start..end`. Surviving
    /// children of a removed scope are spliced into this node.
    pub fn delete(&mut self, start: u32, end: u32) {
        let mut kept = Vec::with_capacity(self.children.len());
        for mut child in std::mem::take(&mut self.children) {
            child.delete(start, end);
            if (start..end).contains(&child.pre) {
                kept.append(&mut child.children);
            } else {
                kept.push(child);
            }
        }
        kept.sort_by_key(|c| c.pre);
        self.children = kept;
    }

    /// Adds `delta` to every descendant `pre` that is at least `from`.
    pub fn shift(&mut self, from: u32, delta: i64) {
        for child in &mut self.children {
            if child.pre >= from {
                child.pre = (i64::from(child.pre) + delta) as u32;
            }
            child.shift(from, delta);
        }
    }

    /// Number of scope nodes below this one.
    pub fn count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.count()).sum()
    }

    /// Serializes this node and its descendants.
    pub fn write(&self, out: &mut Vec<u8>) {
        write_num(out, self.pre);
        write_num(out, self.values.len() as u32);
        for &(prefix, uri) in &self.values {
            write_num(out, prefix);
            write_num(out, uri);
        }
        write_num(out, self.children.len() as u32);
        for child in &self.children {
            child.write(out);
        }
    }

    /// Reads a node written by [`NsNode::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated.
    pub fn read(reader: &mut NumReader<'_>) -> Result<Self> {
        let pre = reader.num()?;
        let count = reader.num()?;
        let values = (0..count)
            .map(|_| Ok((reader.num()?, reader.num()?)))
            .collect::<Result<Vec<_>>>()?;
        let count = reader.num()?;
        let children = (0..count).map(|_| Self::read(reader)).collect::<Result<Vec<_>>>()?;
        Ok(Self { pre, values, children })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> NsNode {
        // root
        //  +- 2 { 1 -> 1 }
        //  |   +- 4 { 2 -> 2 }
        //  |   +- 7 { 1 -> 3 }
        //  +- 10 { 3 -> 1 }
        let mut a = NsNode::new(2, vec![(1, 1)]);
        a.children.push(NsNode::new(4, vec![(2, 2)]));
        a.children.push(NsNode::new(7, vec![(1, 3)]));
        let mut root = NsNode::new(0, Vec::new());
        root.children.push(a);
        root.children.push(NsNode::new(10, vec![(3, 1)]));
        root
    }

    #[test]
    fn test_delete_removes_range() {
        let mut root = tree();
        root.delete(4, 9);
        assert_eq!(root.count(), 2);
        assert!(root.children[0].children.is_empty());
    }

    #[test]
    fn test_delete_splices_orphans() {
        let mut root = tree();
        // removing only the outer scope lifts its children
        root.delete(2, 3);
        let pres: Vec<u32> = root.children.iter().map(|c| c.pre).collect();
        assert_eq!(pres, vec![4, 7, 10]);
    }

    #[test]
    fn test_shift_moves_following_scopes() {
        let mut root = tree();
        root.shift(5, 3);
        assert_eq!(root.children[0].pre, 2);
        assert_eq!(root.children[0].children[0].pre, 4);
        assert_eq!(root.children[0].children[1].pre, 10);
        assert_eq!(root.children[1].pre, 13);
    }

    #[test]
    fn test_bind_replaces_existing_prefix() {
        let mut node = NsNode::new(1, vec![(1, 1)]);
        node.bind(1, 5);
        node.bind(2, 6);
        assert_eq!(node.values, vec![(1, 5), (2, 6)]);
        assert_eq!(node.binding(2), Some(6));
        assert_eq!(node.binding(3), None);
    }

    #[test]
    fn test_serialized_tree() {
        let root = tree();
        let mut out = Vec::new();
        root.write(&mut out);
        assert_eq!(NsNode::read(&mut NumReader::new(&out)).unwrap(), root);
    }
}
