use proptest::prelude::*;
use trellis_core::{Builder, Data, DataOptions, HashIndex, IdentityMode, IndexKind, IndexToken, NodeKind};

const NAMES: [&str; 3] = ["x", "y", "z"];
const ATTRS: [(&str, &str); 3] = [("a", "1"), ("b", "red"), ("c", "a somewhat longer value")];

fn options(identity: IdentityMode) -> DataOptions {
    DataOptions { identity, ..DataOptions::default() }
}

/// Builds `<doc><root>...</root></doc>` with content driven by `events`.
fn build(events: &[u8], identity: IdentityMode) -> Data {
    let mut b = Builder::memory("test", &options(identity));
    b.start_doc("doc").unwrap();
    b.start_elem("root", &[]).unwrap();
    let mut depth = 0;
    for (i, &event) in events.iter().enumerate() {
        match event % 5 {
            0 if depth < 6 => {
                b.start_elem(NAMES[i % 3], &ATTRS[..i % 2]).unwrap();
                depth += 1;
            }
            1 if depth > 0 => {
                b.end_elem().unwrap();
                depth -= 1;
            }
            2 => b.text(&format!("t{i}")).unwrap(),
            3 => b.empty_elem("e", &ATTRS[..i % 4]).unwrap(),
            _ => b.comment("c").unwrap(),
        }
    }
    for _ in 0..depth {
        b.end_elem().unwrap();
    }
    b.end_elem().unwrap();
    b.end_doc().unwrap();
    b.finish().unwrap()
}

/// A single-rooted fragment.
fn fragment(seed: u8) -> Data {
    let mut b = Builder::memory("fragment", &DataOptions::default());
    b.start_elem("f", &ATTRS[..usize::from(seed % 3)]).unwrap();
    for i in 0..seed % 4 {
        b.text(&format!("{i}")).unwrap();
        b.empty_elem("g", &[]).unwrap();
    }
    b.end_elem().unwrap();
    b.finish().unwrap()
}

/// Checks parents, sizes and attribute counts against a walk of the table.
fn check_structure(data: &Data) {
    let mut open: Vec<(u32, u32)> = Vec::new();
    for p in 0..data.len() {
        while open.last().is_some_and(|&(_, end)| end <= p) {
            open.pop();
        }
        let kind = data.kind(p);
        let expected = if kind == NodeKind::Doc { None } else { open.last().map(|&(pre, _)| pre) };
        assert_eq!(data.parent(p), expected, "parent of {p}");
        assert_eq!(data.pre(data.id(p)), Some(p), "id of {p}");

        if matches!(kind, NodeKind::Doc | NodeKind::Elem) {
            let end = p + data.size(p);
            if let Some(&(_, outer)) = open.last() {
                assert!(end <= outer, "subtree of {p} exceeds its parent");
            }
            // size is one plus the sizes of the immediate children
            let mut q = p + 1;
            while q < end {
                assert_eq!(data.parent(q), Some(p));
                q += data.size(q);
            }
            assert_eq!(q, end, "children of {p} do not add up");
            open.push((p, end));
        }
        if kind == NodeKind::Elem {
            let atts = (p + 1..data.len()).take_while(|&q| data.kind(q) == NodeKind::Attr).count();
            assert_eq!(data.att_size(p) as usize, atts, "attributes of {p}");
        }
    }
    assert_eq!(data.meta().size, data.len());
}

fn elements(data: &Data) -> Vec<u32> {
    (0..data.len()).filter(|&p| data.kind(p) == NodeKind::Elem).collect()
}

fn records(data: &Data) -> Vec<Vec<u8>> {
    (0..data.len()).map(|p| data.record(p).to_vec()).collect()
}

#[test]
fn test_small_document_scenario() {
    let mut b = Builder::memory("test", &DataOptions::default());
    b.start_doc("doc").unwrap();
    b.start_elem("a", &[]).unwrap();
    b.empty_elem("b", &[]).unwrap();
    b.empty_elem("c", &[("x", "1")]).unwrap();
    b.end_elem().unwrap();
    b.end_doc().unwrap();
    let mut data = b.finish().unwrap();

    assert_eq!(data.len(), 5);
    assert_eq!(data.size(0), 5);
    assert_eq!(data.size(1), 4);
    assert_eq!(data.dist(2), 1);
    assert_eq!(data.dist(3), 2);
    assert_eq!(data.att_size(3), 1);
    let id_b = data.id(2);

    data.delete(3).unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data.size(0), 3);
    assert_eq!(data.size(1), 2);
    assert_eq!(data.kind(0), NodeKind::Doc);
    assert_eq!(data.name(1).unwrap(), b"a");
    assert_eq!(data.name(2).unwrap(), b"b");
    assert_eq!(data.id(2), id_b);
    assert_eq!(data.pre(id_b), Some(2));
    check_structure(&data);
}

#[test]
fn test_deleted_ids_are_not_reused() {
    let mut data = build(&[0, 2, 1, 3, 3], IdentityMode::MapTree);
    let last = data.meta().last_id.unwrap();
    let victim = data.id(2);
    data.delete(2).unwrap();
    assert_eq!(data.pre(victim), None);

    data.insert(2, Some(1), &fragment(1)).unwrap();
    assert_eq!(data.id(2), last + 1);
    assert_eq!(data.pre(victim), None);
    check_structure(&data);
}

#[test]
fn test_rename_to_current_name_is_a_no_op() {
    let mut b = Builder::memory("test", &DataOptions::default());
    b.start_doc("doc").unwrap();
    b.start_ns("", "urn:default").unwrap();
    b.start_ns("p", "urn:p").unwrap();
    b.start_elem("root", &[("p:a", "1"), ("xml:lang", "en"), ("plain", "v")]).unwrap();
    b.empty_elem("p:child", &[]).unwrap();
    b.pi("target", "value").unwrap();
    b.end_elem().unwrap();
    b.end_doc().unwrap();
    let mut data = b.finish().unwrap();
    data.flush().unwrap();
    let before = records(&data);

    for p in 0..data.len() {
        let kind = data.kind(p);
        let name = data.name(p).unwrap();
        let uri = data.uri(p).to_vec();
        data.rename(p, kind, &name, &uri).unwrap();
    }
    assert_eq!(records(&data), before);
    assert!(!data.meta().dirty);
}

#[test]
fn test_value_indexes_follow_edits() {
    let options = DataOptions { attr_index: true, text_index: true, ..DataOptions::default() };
    let mut b = Builder::memory("test", &options);
    b.start_elem("root", &[]).unwrap();
    b.end_elem().unwrap();
    let mut data = b.finish().unwrap();
    data.set_index(IndexKind::Attribute, Box::new(HashIndex::new()));
    data.set_index(IndexKind::Text, Box::new(HashIndex::new()));

    let mut b = Builder::memory("source", &DataOptions::default());
    b.start_elem("item", &[("color", "red")]).unwrap();
    b.text("apple").unwrap();
    b.end_elem().unwrap();
    let source = b.finish().unwrap();
    data.insert(1, Some(0), &source).unwrap();

    let red = IndexToken::new(IndexKind::Attribute, "red");
    let apple = IndexToken::new(IndexKind::Text, "apple");
    assert_eq!(data.index_ids(&red), vec![data.id(2)]);
    assert_eq!(data.index_ids(&apple), vec![data.id(3)]);

    data.replace(2, NodeKind::Attr, b"green").unwrap();
    assert!(data.index_ids(&red).is_empty());
    assert_eq!(data.index_ids(&IndexToken::new(IndexKind::Attribute, "green")), vec![data.id(2)]);

    data.delete(1).unwrap();
    assert!(data.index_ids(&apple).is_empty());
    assert!(data.index_ids(&IndexToken::new(IndexKind::Attribute, "green")).is_empty());
}

#[test]
fn test_many_attributes_saturate_and_recover() {
    let names: Vec<String> = (0..40).map(|i| format!("a{i}")).collect();
    let attrs: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "v")).collect();
    let mut b = Builder::memory("test", &DataOptions::default());
    b.start_elem("e", &attrs).unwrap();
    b.text("t").unwrap();
    b.end_elem().unwrap();
    let mut data = b.finish().unwrap();

    assert_eq!(data.att_size(0), 40);
    assert_eq!(data.dist(35), 35);
    assert_eq!(data.dist(41), 41);

    data.delete(1).unwrap();
    data.delete(1).unwrap();
    assert_eq!(data.att_size(0), 38);
    assert_eq!(data.dist(33), 33);
    check_structure(&data);
}

#[test]
fn test_top_level_fragments() {
    let mut data = Builder::memory("test", &DataOptions::default()).finish().unwrap();
    assert!(data.is_empty());
    data.insert(0, None, &fragment(2)).unwrap();
    let len = data.len();
    data.insert(len, None, &fragment(3)).unwrap();
    assert_eq!(data.parent(0), None);
    assert_eq!(data.parent(len), None);
    check_structure(&data);

    data.delete(0).unwrap();
    assert_eq!(data.parent(0), None);
    check_structure(&data);
}

fn identity() -> impl Strategy<Value = IdentityMode> {
    prop_oneof![Just(IdentityMode::MapTree), Just(IdentityMode::LogList), Just(IdentityMode::Scan)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Sizes, distances and ids stay consistent under random edits.
    #[test]
    fn prop_structure_survives_edits(
        events in proptest::collection::vec(any::<u8>(), 0..60),
        ops in proptest::collection::vec((any::<bool>(), any::<prop::sample::Index>(), any::<u8>()), 1..20),
        mode in identity(),
    ) {
        let mut data = build(&events, mode);
        for (insert, index, seed) in ops {
            if insert {
                let elems = elements(&data);
                let e = elems[index.index(elems.len())];
                let pre = if seed % 2 == 0 { e + 1 + data.att_size(e) } else { e + data.size(e) };
                data.insert(pre, Some(e), &fragment(seed)).unwrap();
            } else {
                let candidates: Vec<u32> = (2..data.len()).collect();
                if candidates.is_empty() {
                    continue;
                }
                data.delete(candidates[index.index(candidates.len())]).unwrap();
            }
            check_structure(&data);
        }
    }

    /// Replacing a subtree in place yields the same table as deleting it
    /// and inserting the replacement.
    #[test]
    fn prop_replace_matches_delete_and_insert(
        events in proptest::collection::vec(any::<u8>(), 0..60),
        index in any::<prop::sample::Index>(),
        seed in any::<u8>(),
        mode in identity(),
    ) {
        let mut replaced = build(&events, mode);
        let mut rebuilt = build(&events, mode);
        let candidates: Vec<u32> = (2..replaced.len()).filter(|&p| replaced.kind(p) != NodeKind::Attr).collect();
        prop_assume!(!candidates.is_empty());
        let pre = candidates[index.index(candidates.len())];
        let parent = rebuilt.parent(pre);
        let source = fragment(seed);

        replaced.replace_subtree(pre, &source).unwrap();
        rebuilt.delete(pre).unwrap();
        rebuilt.insert(pre, parent, &source).unwrap();

        check_structure(&replaced);
        prop_assert_eq!(records(&replaced), records(&rebuilt));
        prop_assert_eq!(replaced.meta().last_id, rebuilt.meta().last_id);
        for p in 0..replaced.len() {
            prop_assert_eq!(replaced.pre(replaced.id(p)), Some(p));
            prop_assert_eq!(replaced.atom(p).unwrap(), rebuilt.atom(p).unwrap());
        }
    }

    /// Deleting an inserted subtree restores the table bytes.
    #[test]
    fn prop_insert_then_delete_restores_table(
        events in proptest::collection::vec(any::<u8>(), 0..60),
        index in any::<prop::sample::Index>(),
        first in any::<bool>(),
        seed in any::<u8>(),
    ) {
        let mut data = build(&events, IdentityMode::MapTree);
        let before = records(&data);
        let elems = elements(&data);
        let e = elems[index.index(elems.len())];
        let pre = if first { e + 1 + data.att_size(e) } else { e + data.size(e) };

        data.insert(pre, Some(e), &fragment(seed)).unwrap();
        check_structure(&data);
        data.delete(pre).unwrap();

        prop_assert_eq!(records(&data), before);
        for p in 0..data.len() {
            prop_assert_eq!(data.pre(data.id(p)), Some(p));
        }
    }
}
