//! Mapping from stable node ids to current `pre` positions.
//!
//! Both implementations are driven with the same two edits, expressed in
//! positions: a run of fresh ids inserted at `pre`, and a range of
//! positions deleted. They answer identical `pre(id)` queries for any
//! sequence of edits.

mod log;
mod tree;

pub use log::LogList;
pub use tree::MapTree;

/// Which id map a database maintains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityMode {
    /// Dual red-black tree: logarithmic lookups and edits
    #[default]
    MapTree,

    /// Linear correction list: small, linear lookups and edits
    LogList,

    /// No map; lookups scan the table's id column
    Scan,
}

/// An id map in one of the configured shapes.
#[derive(Debug, Clone)]
pub enum IdMap {
    /// See [`MapTree`]
    Tree(MapTree),
    /// See [`LogList`]
    Log(LogList),
    /// Lookups are answered by the table
    Scan,
}

impl IdMap {
    /// Creates an empty map for `mode`.
    pub fn new(mode: IdentityMode) -> Self {
        match mode {
            IdentityMode::MapTree => Self::Tree(MapTree::new()),
            IdentityMode::LogList => Self::Log(LogList::new()),
            IdentityMode::Scan => Self::Scan,
        }
    }

    /// Builds a map from the ids of a table in pre order. Consecutive ids
    /// are grouped into runs.
    pub fn from_ids(mode: IdentityMode, ids: impl IntoIterator<Item = u32>) -> Self {
        let mut map = Self::new(mode);
        if matches!(map, Self::Scan) {
            return map;
        }
        let mut pre = 0;
        let mut run: Option<(u32, u32)> = None;
        for id in ids {
            match run {
                Some((first, len)) if first + len == id => run = Some((first, len + 1)),
                _ => {
                    if let Some((first, len)) = run {
                        map.insert(pre, first, len);
                        pre += len;
                    }
                    run = Some((id, 1));
                }
            }
        }
        if let Some((first, len)) = run {
            map.insert(pre, first, len);
        }
        map
    }

    /// Shape of this map.
    pub fn mode(&self) -> IdentityMode {
        match self {
            Self::Tree(_) => IdentityMode::MapTree,
            Self::Log(_) => IdentityMode::LogList,
            Self::Scan => IdentityMode::Scan,
        }
    }

    /// Registers `count` fresh ids starting at `first` at `pre..pre + count`.
    pub fn insert(&mut self, pre: u32, first: u32, count: u32) {
        match self {
            Self::Tree(tree) => tree.insert(pre, first, count),
            Self::Log(log) => log.insert(pre, first, count),
            Self::Scan => {}
        }
    }

    /// Forgets the ids at positions `pre..pre + count`.
    pub fn delete(&mut self, pre: u32, count: u32) {
        match self {
            Self::Tree(tree) => tree.delete(pre, count),
            Self::Log(log) => log.delete(pre, count),
            Self::Scan => {}
        }
    }

    /// Position of `id`. `Scan` maps always answer `None`; the caller falls
    /// back to scanning.
    pub fn pre(&self, id: u32) -> Option<u32> {
        match self {
            Self::Tree(tree) => tree.pre(id),
            Self::Log(log) => log.pre(id),
            Self::Scan => None,
        }
    }
}
