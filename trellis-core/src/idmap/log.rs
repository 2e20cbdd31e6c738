//! Linear correction log mapping ids to positions.
//! Suited to small or rarely edited tables; lookups scan every run.

/// One correction: ids `id..id + len` currently sit at `id + addend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogNode {
    id: u32,
    len: u32,
    addend: i64,
}

impl LogNode {
    fn start(&self) -> u32 {
        (i64::from(self.id) + self.addend) as u32
    }

    fn end(&self) -> u32 {
        self.start() + self.len
    }

    fn contains(&self, id: u32) -> bool {
        id >= self.id && id - self.id < self.len
    }
}

/// Correction list over runs of consecutive ids, kept in pre order.
///
/// Every edit and lookup is a linear scan over the corrections. Ids
/// inserted inside an existing run split it, so no secondary arrays are
/// needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogList {
    nodes: Vec<LogNode>,
}

impl LogList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of corrections.
    pub fn corrections(&self) -> usize {
        self.nodes.len()
    }

    /// Pushes a node, merging it into the previous one if both runs are
    /// contiguous in ids and positions.
    fn push(out: &mut Vec<LogNode>, node: LogNode) {
        if node.len == 0 {
            return;
        }
        if let Some(last) = out.last_mut() {
            if last.id + last.len == node.id && last.addend == node.addend {
                last.len += node.len;
                return;
            }
        }
        out.push(node);
    }

    /// Registers `count` new ids starting at `first` at positions
    /// `pre..pre + count`.
    pub fn insert(&mut self, pre: u32, first: u32, count: u32) {
        let fresh = LogNode { id: first, len: count, addend: i64::from(pre) - i64::from(first) };
        let delta = i64::from(count);
        let mut out = Vec::with_capacity(self.nodes.len() + 2);
        let mut placed = false;

        for node in std::mem::take(&mut self.nodes) {
            let (start, end) = (node.start(), node.end());
            if end <= pre {
                Self::push(&mut out, node);
            } else if start >= pre {
                if !placed {
                    Self::push(&mut out, fresh);
                    placed = true;
                }
                Self::push(&mut out, LogNode { addend: node.addend + delta, ..node });
            } else {
                let cut = pre - start;
                Self::push(&mut out, LogNode { len: cut, ..node });
                Self::push(&mut out, fresh);
                placed = true;
                Self::push(&mut out, LogNode {
                    id: node.id + cut,
                    len: node.len - cut,
                    addend: node.addend + delta,
                });
            }
        }
        if !placed {
            Self::push(&mut out, fresh);
        }
        self.nodes = out;
    }

    /// Forgets the ids at positions `pre..pre + count`.
    pub fn delete(&mut self, pre: u32, count: u32) {
        let end = pre + count;
        let delta = i64::from(count);
        let mut out = Vec::with_capacity(self.nodes.len() + 1);

        for node in std::mem::take(&mut self.nodes) {
            let (start, stop) = (node.start(), node.end());
            if stop <= pre {
                Self::push(&mut out, node);
            } else if start >= end {
                Self::push(&mut out, LogNode { addend: node.addend - delta, ..node });
            } else {
                if start < pre {
                    Self::push(&mut out, LogNode { len: pre - start, ..node });
                }
                if stop > end {
                    let cut = end - start;
                    Self::push(&mut out, LogNode {
                        id: node.id + cut,
                        len: stop - end,
                        addend: node.addend - delta,
                    });
                }
            }
        }
        self.nodes = out;
    }

    /// Current position of `id`, or `None` if it was deleted or never
    /// registered.
    pub fn pre(&self, id: u32) -> Option<u32> {
        self.nodes
            .iter()
            .find(|node| node.contains(id))
            .map(|node| (i64::from(id) + node.addend) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_run() {
        let mut log = LogList::new();
        log.insert(0, 0, 10);
        assert_eq!(log.corrections(), 1);
        assert_eq!(log.pre(0), Some(0));
        assert_eq!(log.pre(9), Some(9));
        assert_eq!(log.pre(10), None);
    }

    #[test]
    fn test_insert_splits_run() {
        let mut log = LogList::new();
        log.insert(0, 0, 10);
        log.insert(4, 10, 2);

        assert_eq!(log.pre(3), Some(3));
        assert_eq!(log.pre(10), Some(4));
        assert_eq!(log.pre(11), Some(5));
        assert_eq!(log.pre(4), Some(6));
        assert_eq!(log.pre(9), Some(11));
        assert_eq!(log.corrections(), 3);
    }

    #[test]
    fn test_append_merges() {
        let mut log = LogList::new();
        log.insert(0, 0, 5);
        log.insert(5, 5, 3);
        assert_eq!(log.corrections(), 1);
        assert_eq!(log.pre(7), Some(7));
    }

    #[test]
    fn test_delete_middle() {
        let mut log = LogList::new();
        log.insert(0, 0, 10);
        log.delete(3, 4);

        assert_eq!(log.pre(2), Some(2));
        assert_eq!(log.pre(3), None);
        assert_eq!(log.pre(6), None);
        assert_eq!(log.pre(7), Some(3));
        assert_eq!(log.pre(9), Some(5));
    }

    #[test]
    fn test_delete_then_reinsert_restores_positions() {
        let mut log = LogList::new();
        log.insert(0, 0, 6);
        log.insert(2, 6, 3);
        log.delete(2, 3);
        assert_eq!(log.corrections(), 1, "runs should merge back");
        for id in 0..6 {
            assert_eq!(log.pre(id), Some(id));
        }
        assert_eq!(log.pre(7), None);
    }
}
