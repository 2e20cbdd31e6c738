//! Dual red-black tree over runs of consecutive ids.
//!
//! Every node stands for a run of ids occupying consecutive positions and
//! lives in two trees at once:
//!
//! - the *pre tree* orders live runs by position. It is an order-statistic
//!   tree: each node carries the number of positions in its subtree, so a
//!   node's position is the sum of the sizes to its left and whole subtrees
//!   shift implicitly when a run before them grows or shrinks.
//! - the *id tree* orders all runs by the interval of ids they were created
//!   with. Runs are never removed from it; an emptied run stays behind to
//!   answer lookups of its deleted ids with `None`.
//!
//! Nodes are stored in an arena and linked by index. Index 0 is the shared
//! black sentinel of both trees.

/// Sentinel index
const NIL: usize = 0;

/// Link set of the pre tree
const PRE: usize = 0;

/// Link set of the id tree
const ID: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    parent: usize,
    left: usize,
    right: usize,
    red: bool,
}

#[derive(Debug, Clone, Default)]
struct MapNode {
    /// Id interval owned by this node in the id tree (`key..key_end`)
    key: u32,
    key_end: u32,

    /// Live ids (`lo..hi`), a subrange of the key interval
    lo: u32,
    hi: u32,

    /// Positions covered by the pre subtree rooted here
    size: u32,

    links: [Links; 2],
}

impl MapNode {
    fn len(&self) -> u32 {
        self.hi - self.lo
    }
}

/// Id to position map with logarithmic edits and lookups.
#[derive(Debug, Clone)]
pub struct MapTree {
    nodes: Vec<MapNode>,
    roots: [usize; 2],
}

impl Default for MapTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MapTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self { nodes: vec![MapNode::default()], roots: [NIL; 2] }
    }

    /// Number of live runs.
    pub fn runs(&self) -> usize {
        self.count(self.roots[PRE])
    }

    /// Number of positions covered.
    pub fn len(&self) -> u32 {
        self.nodes[self.roots[PRE]].size
    }

    /// Returns true if no ids are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count(&self, n: usize) -> usize {
        if n == NIL {
            0
        } else {
            1 + self.count(self.left(PRE, n)) + self.count(self.right(PRE, n))
        }
    }

    // link accessors

    #[inline]
    fn parent(&self, t: usize, n: usize) -> usize {
        self.nodes[n].links[t].parent
    }

    #[inline]
    fn left(&self, t: usize, n: usize) -> usize {
        self.nodes[n].links[t].left
    }

    #[inline]
    fn right(&self, t: usize, n: usize) -> usize {
        self.nodes[n].links[t].right
    }

    #[inline]
    fn red(&self, t: usize, n: usize) -> bool {
        self.nodes[n].links[t].red
    }

    #[inline]
    fn links(&mut self, t: usize, n: usize) -> &mut Links {
        &mut self.nodes[n].links[t]
    }

    fn set_red(&mut self, t: usize, n: usize, red: bool) {
        if n != NIL {
            self.links(t, n).red = red;
        }
    }

    fn resize(&mut self, n: usize) {
        let size = self.nodes[self.left(PRE, n)].size
            + self.nodes[n].len()
            + self.nodes[self.right(PRE, n)].size;
        self.nodes[n].size = size;
    }

    /// Adds `delta` to the size of `n` and all its pre-tree ancestors.
    fn add_size(&mut self, mut n: usize, delta: i64) {
        while n != NIL {
            self.nodes[n].size = (i64::from(self.nodes[n].size) + delta) as u32;
            n = self.parent(PRE, n);
        }
    }

    fn minimum(&self, t: usize, mut n: usize) -> usize {
        while self.left(t, n) != NIL {
            n = self.left(t, n);
        }
        n
    }

    fn maximum(&self, t: usize, mut n: usize) -> usize {
        while self.right(t, n) != NIL {
            n = self.right(t, n);
        }
        n
    }

    fn predecessor(&self, t: usize, mut n: usize) -> usize {
        if self.left(t, n) != NIL {
            return self.maximum(t, self.left(t, n));
        }
        let mut p = self.parent(t, n);
        while p != NIL && n == self.left(t, p) {
            n = p;
            p = self.parent(t, p);
        }
        p
    }

    // rotations

    fn replace_child(&mut self, t: usize, parent: usize, old: usize, new: usize) {
        if parent == NIL {
            self.roots[t] = new;
        } else if self.left(t, parent) == old {
            self.links(t, parent).left = new;
        } else {
            self.links(t, parent).right = new;
        }
    }

    fn rotate_left(&mut self, t: usize, x: usize) {
        let y = self.right(t, x);
        let inner = self.left(t, y);
        self.links(t, x).right = inner;
        if inner != NIL {
            self.links(t, inner).parent = x;
        }
        let parent = self.parent(t, x);
        self.links(t, y).parent = parent;
        self.replace_child(t, parent, x, y);
        self.links(t, y).left = x;
        self.links(t, x).parent = y;
        if t == PRE {
            self.nodes[y].size = self.nodes[x].size;
            self.resize(x);
        }
    }

    fn rotate_right(&mut self, t: usize, x: usize) {
        let y = self.left(t, x);
        let inner = self.right(t, y);
        self.links(t, x).left = inner;
        if inner != NIL {
            self.links(t, inner).parent = x;
        }
        let parent = self.parent(t, x);
        self.links(t, y).parent = parent;
        self.replace_child(t, parent, x, y);
        self.links(t, y).right = x;
        self.links(t, x).parent = y;
        if t == PRE {
            self.nodes[y].size = self.nodes[x].size;
            self.resize(x);
        }
    }

    // insertion

    /// Links `z` below `parent` and rebalances. `parent == NIL` makes `z`
    /// the root of an empty tree.
    fn attach(&mut self, t: usize, z: usize, parent: usize, left: bool) {
        *self.links(t, z) = Links { parent, left: NIL, right: NIL, red: true };
        if parent == NIL {
            self.roots[t] = z;
        } else if left {
            self.links(t, parent).left = z;
        } else {
            self.links(t, parent).right = z;
        }
        if t == PRE {
            self.nodes[z].size = 0;
            let len = self.nodes[z].len();
            self.add_size(z, i64::from(len));
        }
        self.insert_fixup(t, z);
    }

    fn insert_fixup(&mut self, t: usize, mut z: usize) {
        while self.red(t, self.parent(t, z)) {
            let p = self.parent(t, z);
            let g = self.parent(t, p);
            if p == self.left(t, g) {
                let uncle = self.right(t, g);
                if self.red(t, uncle) {
                    self.set_red(t, p, false);
                    self.set_red(t, uncle, false);
                    self.set_red(t, g, true);
                    z = g;
                } else {
                    if z == self.right(t, p) {
                        z = p;
                        self.rotate_left(t, z);
                    }
                    let p = self.parent(t, z);
                    let g = self.parent(t, p);
                    self.set_red(t, p, false);
                    self.set_red(t, g, true);
                    self.rotate_right(t, g);
                }
            } else {
                let uncle = self.left(t, g);
                if self.red(t, uncle) {
                    self.set_red(t, p, false);
                    self.set_red(t, uncle, false);
                    self.set_red(t, g, true);
                    z = g;
                } else {
                    if z == self.left(t, p) {
                        z = p;
                        self.rotate_right(t, z);
                    }
                    let p = self.parent(t, z);
                    let g = self.parent(t, p);
                    self.set_red(t, p, false);
                    self.set_red(t, g, true);
                    self.rotate_left(t, g);
                }
            }
        }
        let root = self.roots[t];
        self.set_red(t, root, false);
    }

    /// Links `z` directly before `n` in position order.
    fn insert_before(&mut self, n: usize, z: usize) {
        if self.left(PRE, n) == NIL {
            self.attach(PRE, z, n, true);
        } else {
            let p = self.maximum(PRE, self.left(PRE, n));
            self.attach(PRE, z, p, false);
        }
    }

    /// Links `z` directly after `n` in position order.
    fn insert_after(&mut self, n: usize, z: usize) {
        if self.right(PRE, n) == NIL {
            self.attach(PRE, z, n, false);
        } else {
            let s = self.minimum(PRE, self.right(PRE, n));
            self.attach(PRE, z, s, true);
        }
    }

    /// Links `z` into the id tree by its key.
    fn insert_id(&mut self, z: usize) {
        let key = self.nodes[z].key;
        let mut parent = NIL;
        let mut n = self.roots[ID];
        let mut left = false;
        while n != NIL {
            parent = n;
            left = key < self.nodes[n].key;
            n = if left { self.left(ID, n) } else { self.right(ID, n) };
        }
        self.attach(ID, z, parent, left);
    }

    fn alloc(&mut self, key: u32, key_end: u32, lo: u32, hi: u32) -> usize {
        self.nodes.push(MapNode { key, key_end, lo, hi, size: 0, links: [Links::default(); 2] });
        self.nodes.len() - 1
    }

    // deletion from the pre tree

    fn transplant(&mut self, u: usize, v: usize) {
        let parent = self.parent(PRE, u);
        self.replace_child(PRE, parent, u, v);
        self.links(PRE, v).parent = parent;
    }

    /// Unlinks an emptied node `z` from the pre tree.
    fn remove(&mut self, z: usize) {
        debug_assert_eq!(self.nodes[z].len(), 0);
        let mut y = z;
        let mut y_red = self.red(PRE, y);
        let x;

        if self.left(PRE, z) == NIL {
            x = self.right(PRE, z);
            self.transplant(z, x);
        } else if self.right(PRE, z) == NIL {
            x = self.left(PRE, z);
            self.transplant(z, x);
        } else {
            y = self.minimum(PRE, self.right(PRE, z));
            y_red = self.red(PRE, y);
            x = self.right(PRE, y);
            if self.parent(PRE, y) == z {
                self.links(PRE, x).parent = y;
            } else {
                self.transplant(y, x);
                let right = self.right(PRE, z);
                self.links(PRE, y).right = right;
                self.links(PRE, right).parent = y;
            }
            self.transplant(z, y);
            let left = self.left(PRE, z);
            self.links(PRE, y).left = left;
            self.links(PRE, left).parent = y;
            let red = self.red(PRE, z);
            self.links(PRE, y).red = red;
        }

        let mut p = self.parent(PRE, x);
        while p != NIL {
            self.resize(p);
            p = self.parent(PRE, p);
        }
        if !y_red {
            self.delete_fixup(x);
        }
        *self.links(PRE, z) = Links::default();
        self.nodes[z].size = 0;
        self.nodes[NIL].links[PRE] = Links::default();
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.roots[PRE] && !self.red(PRE, x) {
            let p = self.parent(PRE, x);
            if x == self.left(PRE, p) {
                let mut w = self.right(PRE, p);
                if self.red(PRE, w) {
                    self.set_red(PRE, w, false);
                    self.set_red(PRE, p, true);
                    self.rotate_left(PRE, p);
                    w = self.right(PRE, self.parent(PRE, x));
                }
                if !self.red(PRE, self.left(PRE, w)) && !self.red(PRE, self.right(PRE, w)) {
                    self.set_red(PRE, w, true);
                    x = self.parent(PRE, x);
                } else {
                    if !self.red(PRE, self.right(PRE, w)) {
                        let inner = self.left(PRE, w);
                        self.set_red(PRE, inner, false);
                        self.set_red(PRE, w, true);
                        self.rotate_right(PRE, w);
                        w = self.right(PRE, self.parent(PRE, x));
                    }
                    let p = self.parent(PRE, x);
                    let red = self.red(PRE, p);
                    self.set_red(PRE, w, red);
                    self.set_red(PRE, p, false);
                    let outer = self.right(PRE, w);
                    self.set_red(PRE, outer, false);
                    self.rotate_left(PRE, p);
                    x = self.roots[PRE];
                }
            } else {
                let mut w = self.left(PRE, p);
                if self.red(PRE, w) {
                    self.set_red(PRE, w, false);
                    self.set_red(PRE, p, true);
                    self.rotate_right(PRE, p);
                    w = self.left(PRE, self.parent(PRE, x));
                }
                if !self.red(PRE, self.right(PRE, w)) && !self.red(PRE, self.left(PRE, w)) {
                    self.set_red(PRE, w, true);
                    x = self.parent(PRE, x);
                } else {
                    if !self.red(PRE, self.left(PRE, w)) {
                        let inner = self.right(PRE, w);
                        self.set_red(PRE, inner, false);
                        self.set_red(PRE, w, true);
                        self.rotate_left(PRE, w);
                        w = self.left(PRE, self.parent(PRE, x));
                    }
                    let p = self.parent(PRE, x);
                    let red = self.red(PRE, p);
                    self.set_red(PRE, w, red);
                    self.set_red(PRE, p, false);
                    let outer = self.left(PRE, w);
                    self.set_red(PRE, outer, false);
                    self.rotate_right(PRE, p);
                    x = self.roots[PRE];
                }
            }
        }
        self.set_red(PRE, x, false);
    }

    // queries

    /// Node holding position `pre` and the offset of `pre` within its run.
    fn locate(&self, mut pre: u32) -> (usize, u32) {
        let mut n = self.roots[PRE];
        while n != NIL {
            let left = self.nodes[self.left(PRE, n)].size;
            if pre < left {
                n = self.left(PRE, n);
                continue;
            }
            pre -= left;
            let len = self.nodes[n].len();
            if pre < len {
                return (n, pre);
            }
            pre -= len;
            n = self.right(PRE, n);
        }
        (NIL, 0)
    }

    /// Position of the first id of node `n`.
    fn position(&self, mut n: usize) -> u32 {
        let mut pos = self.nodes[self.left(PRE, n)].size;
        let mut p = self.parent(PRE, n);
        while p != NIL {
            if self.right(PRE, p) == n {
                pos += self.nodes[self.left(PRE, p)].size + self.nodes[p].len();
            }
            n = p;
            p = self.parent(PRE, p);
        }
        pos
    }

    /// Current position of `id`, or `None` if it was deleted or never
    /// registered.
    pub fn pre(&self, id: u32) -> Option<u32> {
        let mut n = self.roots[ID];
        while n != NIL {
            let node = &self.nodes[n];
            if id < node.key {
                n = self.left(ID, n);
            } else if id >= node.key_end {
                n = self.right(ID, n);
            } else if id >= node.lo && id < node.hi {
                return Some(self.position(n) + (id - node.lo));
            } else {
                return None;
            }
        }
        None
    }

    // edits

    /// True if ids starting at `first` continue the run of `n`.
    fn extends(&self, n: usize, first: u32) -> bool {
        n != NIL && self.nodes[n].hi == first && self.nodes[n].key_end == first
    }

    fn grow(&mut self, n: usize, count: u32) {
        self.nodes[n].hi += count;
        self.nodes[n].key_end += count;
        self.add_size(n, i64::from(count));
    }

    /// Splits the run of `n` so that its first `offset` ids stay in `n`.
    /// Returns the node holding the rest.
    fn split(&mut self, n: usize, offset: u32) -> usize {
        let MapNode { key_end, lo, hi, .. } = self.nodes[n];
        let mid = lo + offset;
        let rest = self.alloc(mid, key_end, mid, hi);
        self.nodes[n].hi = mid;
        self.nodes[n].key_end = mid;
        self.add_size(n, -i64::from(hi - mid));
        self.insert_after(n, rest);
        self.insert_id(rest);
        rest
    }

    /// Registers `count` new ids starting at `first` at positions
    /// `pre..pre + count`. The ids must never have been registered before.
    pub fn insert(&mut self, pre: u32, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        let total = self.len();
        let (before, after) = if pre >= total {
            let last = if self.roots[PRE] == NIL { NIL } else { self.maximum(PRE, self.roots[PRE]) };
            (last, NIL)
        } else {
            let (n, offset) = self.locate(pre);
            if offset == 0 {
                (self.predecessor(PRE, n), n)
            } else {
                self.split(n, offset);
                (n, NIL)
            }
        };

        if self.extends(before, first) {
            self.grow(before, count);
            return;
        }
        let z = self.alloc(first, first + count, first, first + count);
        if after != NIL {
            self.insert_before(after, z);
        } else if before != NIL {
            self.insert_after(before, z);
        } else {
            self.attach(PRE, z, NIL, false);
        }
        self.insert_id(z);
    }

    /// Forgets the ids at positions `pre..pre + count`.
    pub fn delete(&mut self, pre: u32, count: u32) {
        let mut left = count;
        while left > 0 {
            let (n, offset) = self.locate(pre);
            debug_assert!(n != NIL, "delete beyond the end");
            let len = self.nodes[n].len();
            let take = left.min(len - offset);

            if take == len {
                self.nodes[n].lo = self.nodes[n].hi;
                self.add_size(n, -i64::from(take));
                self.remove(n);
            } else if offset == 0 {
                self.nodes[n].lo += take;
                self.add_size(n, -i64::from(take));
            } else if offset + take == len {
                self.nodes[n].hi -= take;
                self.add_size(n, -i64::from(take));
            } else {
                let rest = self.split(n, offset);
                self.nodes[rest].lo += take;
                self.add_size(rest, -i64::from(take));
            }
            left -= take;
        }
    }

    /// Checks the red-black and size invariants of the pre tree. Returns the
    /// black height.
    #[cfg(test)]
    fn check(&self, n: usize) -> usize {
        if n == NIL {
            return 1;
        }
        let (l, r) = (self.left(PRE, n), self.right(PRE, n));
        assert_eq!(
            self.nodes[n].size,
            self.nodes[l].size + self.nodes[n].len() + self.nodes[r].size
        );
        if self.red(PRE, n) {
            assert!(!self.red(PRE, l) && !self.red(PRE, r), "red node with red child");
        }
        let (hl, hr) = (self.check(l), self.check(r));
        assert_eq!(hl, hr, "unbalanced black height");
        hl + usize::from(!self.red(PRE, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(tree: &MapTree, ids: std::ops::Range<u32>) -> Vec<Option<u32>> {
        ids.map(|id| tree.pre(id)).collect()
    }

    #[test]
    fn test_single_run() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 100);
        assert_eq!(tree.runs(), 1);
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.pre(42), Some(42));
        assert_eq!(tree.pre(100), None);
    }

    #[test]
    fn test_insert_in_middle_splits() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 10);
        tree.insert(4, 10, 2);

        assert_eq!(tree.runs(), 3);
        assert_eq!(tree.pre(3), Some(3));
        assert_eq!(tree.pre(10), Some(4));
        assert_eq!(tree.pre(11), Some(5));
        assert_eq!(tree.pre(4), Some(6));
        assert_eq!(tree.pre(9), Some(11));
        tree.check(tree.roots[PRE]);
    }

    #[test]
    fn test_appends_extend_last_run() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 5);
        tree.insert(5, 5, 5);
        tree.insert(10, 10, 1);
        assert_eq!(tree.runs(), 1);
        assert_eq!(tree.pre(10), Some(10));
    }

    #[test]
    fn test_delete_cases() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 20);

        tree.delete(0, 2); // prefix
        tree.delete(16, 2); // suffix
        tree.delete(5, 3); // middle
        assert_eq!(tree.len(), 13);

        let expected: Vec<Option<u32>> = (0..20)
            .map(|id| match id {
                0 | 1 | 7..=9 | 18 | 19 => None,
                2..=6 => Some(id - 2),
                _ => Some(id - 5),
            })
            .collect();
        assert_eq!(positions(&tree, 0..20), expected);
        tree.check(tree.roots[PRE]);
    }

    #[test]
    fn test_delete_spanning_runs() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 10);
        for i in 0..5 {
            tree.insert(2 * i + 1, 10 + i, 1);
        }
        assert_eq!(tree.len(), 15);
        tree.check(tree.roots[PRE]);

        tree.delete(1, 12);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.pre(0), Some(0));
        assert_eq!(tree.pre(8), Some(1));
        assert_eq!(tree.pre(9), Some(2));
        for id in (1..8).chain(10..15) {
            assert_eq!(tree.pre(id), None, "id {id}");
        }
        tree.check(tree.roots[PRE]);
    }

    #[test]
    fn test_many_singletons_stay_balanced() {
        let mut tree = MapTree::new();
        tree.insert(0, 0, 1);
        for id in 1..500 {
            // always insert at the front so no run can be extended
            tree.insert(0, id, 1);
        }
        let height = tree.check(tree.roots[PRE]);
        assert!(height <= 10, "black height {height}");
        assert_eq!(tree.pre(499), Some(0));
        assert_eq!(tree.pre(0), Some(499));

        for _ in 0..250 {
            tree.delete(0, 1);
        }
        tree.check(tree.roots[PRE]);
        assert_eq!(tree.pre(249), Some(0));
        assert_eq!(tree.pre(250), None);
    }
}
