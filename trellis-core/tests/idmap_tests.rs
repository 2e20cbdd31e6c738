use proptest::prelude::*;
use trellis_core::idmap::{IdMap, IdentityMode, LogList, MapTree};

/// Reference model: the ids in pre order.
#[derive(Default)]
struct Model {
    ids: Vec<u32>,
}

impl Model {
    fn insert(&mut self, pre: u32, first: u32, count: u32) {
        let at = pre as usize;
        self.ids.splice(at..at, first..first + count);
    }

    fn delete(&mut self, pre: u32, count: u32) {
        let at = pre as usize;
        self.ids.drain(at..at + count as usize);
    }

    fn pre(&self, id: u32) -> Option<u32> {
        self.ids.iter().position(|&i| i == id).map(|p| p as u32)
    }
}

#[derive(Debug, Clone)]
enum Edit {
    Insert { at: prop::sample::Index, count: u32 },
    Delete { at: prop::sample::Index, count: u32 },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<prop::sample::Index>(), 1..20u32).prop_map(|(at, count)| Edit::Insert { at, count }),
        (any::<prop::sample::Index>(), 1..10u32).prop_map(|(at, count)| Edit::Delete { at, count }),
    ]
}

#[test]
fn test_interleaved_runs() {
    let mut log = LogList::new();
    let mut tree = MapTree::new();
    let mut model = Model::default();

    // 0..10, then 10..15 in the middle, then a hole
    for (pre, first, count) in [(0, 0, 10), (5, 10, 5), (15, 15, 3)] {
        log.insert(pre, first, count);
        tree.insert(pre, first, count);
        model.insert(pre, first, count);
    }
    log.delete(3, 4);
    tree.delete(3, 4);
    model.delete(3, 4);

    for id in 0..18 {
        assert_eq!(log.pre(id), model.pre(id), "log list, id {id}");
        assert_eq!(tree.pre(id), model.pre(id), "map tree, id {id}");
    }
    assert_eq!(tree.len(), 14);
}

#[test]
fn test_rebuilt_map_matches() {
    let ids = [7, 8, 9, 0, 1, 20, 2];
    for mode in [IdentityMode::MapTree, IdentityMode::LogList] {
        let map = IdMap::from_ids(mode, ids);
        for (pre, &id) in ids.iter().enumerate() {
            assert_eq!(map.pre(id), Some(pre as u32));
        }
        assert_eq!(map.pre(3), None);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Both maps agree with the model after any sequence of edits.
    #[test]
    fn prop_maps_agree(edits in proptest::collection::vec(edit(), 1..60)) {
        let mut log = LogList::new();
        let mut tree = MapTree::new();
        let mut model = Model::default();
        let mut next = 0;

        for edit in edits {
            let len = model.ids.len();
            match edit {
                Edit::Insert { at, count } => {
                    let pre = at.index(len + 1) as u32;
                    log.insert(pre, next, count);
                    tree.insert(pre, next, count);
                    model.insert(pre, next, count);
                    next += count;
                }
                Edit::Delete { at, count } => {
                    if len == 0 {
                        continue;
                    }
                    let pre = at.index(len);
                    let count = count.min((len - pre) as u32);
                    log.delete(pre as u32, count);
                    tree.delete(pre as u32, count);
                    model.delete(pre as u32, count);
                }
            }
            prop_assert_eq!(tree.len() as usize, model.ids.len());
        }

        for id in 0..next {
            let expected = model.pre(id);
            prop_assert_eq!(log.pre(id), expected, "log list, id {}", id);
            prop_assert_eq!(tree.pre(id), expected, "map tree, id {}", id);
        }
    }
}
