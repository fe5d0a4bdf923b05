//! Property-based tests checking [`BTree`] against `std::collections::BTreeSet`
//! as a reference model.

use cowtree::tree::BTree;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Clone, Debug)]
enum Operation {
    Insert(i16),
    Remove(i16),
    RemoveMin,
    RemoveMax,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => any::<i16>().prop_map(Operation::Insert),
        2 => any::<i16>().prop_map(Operation::Remove),
        1 => Just(Operation::RemoveMin),
        1 => Just(Operation::RemoveMax),
    ]
}

fn degree_strategy() -> impl Strategy<Value = usize> {
    2..=8_usize
}

fn ascending_items(tree: &BTree<i16>) -> Vec<i16> {
    let mut items = Vec::new();
    tree.ascend(|item| {
        items.push(*item);
        true
    });
    items
}

fn apply(tree: &mut BTree<i16>, model: &mut BTreeSet<i16>, operation: &Operation) {
    match *operation {
        Operation::Insert(item) => {
            let fresh_tree = tree.replace_or_insert(item).is_none();
            let fresh_model = model.insert(item);
            assert_eq!(fresh_tree, fresh_model);
        }
        Operation::Remove(item) => {
            assert_eq!(tree.remove(&item), model.take(&item));
        }
        Operation::RemoveMin => {
            assert_eq!(tree.remove_min(), model.pop_first());
        }
        Operation::RemoveMax => {
            assert_eq!(tree.remove_max(), model.pop_last());
        }
    }
}

proptest! {
    /// Any operation sequence leaves the tree observably equal to the
    /// reference model.
    #[test]
    fn operations_match_reference_model(
        degree in degree_strategy(),
        operations in proptest::collection::vec(operation_strategy(), 0..400),
    ) {
        let mut tree = BTree::new(degree);
        let mut model = BTreeSet::new();
        for operation in &operations {
            apply(&mut tree, &mut model, operation);
            prop_assert_eq!(tree.len(), model.len());
            prop_assert_eq!(tree.min(), model.first());
            prop_assert_eq!(tree.max(), model.last());
        }
        let expected: Vec<i16> = model.into_iter().collect();
        prop_assert_eq!(ascending_items(&tree), expected);
    }

    /// An ascending traversal is always strictly increasing and contains
    /// every distinct inserted item.
    #[test]
    fn traversal_is_sorted_and_deduplicated(
        degree in degree_strategy(),
        items in proptest::collection::vec(any::<i16>(), 0..300),
    ) {
        let mut tree = BTree::new(degree);
        for item in &items {
            tree.replace_or_insert(*item);
        }
        let traversed = ascending_items(&tree);
        let expected: Vec<i16> = items.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        prop_assert_eq!(traversed, expected);
    }

    /// `get` answers membership for every item, present or absent.
    #[test]
    fn get_answers_membership(
        degree in degree_strategy(),
        items in proptest::collection::vec(any::<i16>(), 0..200),
        probes in proptest::collection::vec(any::<i16>(), 0..50),
    ) {
        let tree: BTree<i16> = {
            let mut tree = BTree::new(degree);
            tree.extend(items.iter().copied());
            tree
        };
        let model: BTreeSet<i16> = items.into_iter().collect();
        for probe in probes {
            prop_assert_eq!(tree.contains(&probe), model.contains(&probe));
        }
    }

    /// `range` agrees with filtering the full traversal.
    #[test]
    fn range_agrees_with_filtered_traversal(
        degree in degree_strategy(),
        items in proptest::collection::vec(any::<i16>(), 0..200),
        low in any::<i16>(),
        high in any::<i16>(),
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let mut tree = BTree::new(degree);
        tree.extend(items.iter().copied());

        let ranged: Vec<i16> = tree.range(low..high).copied().collect();
        let filtered: Vec<i16> = ascending_items(&tree)
            .into_iter()
            .filter(|item| (low..high).contains(item))
            .collect();
        prop_assert_eq!(ranged, filtered);
    }

    /// Descending traversal is the exact reverse of ascending.
    #[test]
    fn descend_reverses_ascend(
        degree in degree_strategy(),
        items in proptest::collection::vec(any::<i16>(), 0..200),
    ) {
        let mut tree = BTree::new(degree);
        tree.extend(items);
        let mut descending = Vec::new();
        tree.descend(|item| {
            descending.push(*item);
            true
        });
        descending.reverse();
        prop_assert_eq!(descending, ascending_items(&tree));
    }

    /// A snapshot's contents are frozen: mutating the original afterwards
    /// never shows through, and vice versa.
    #[test]
    fn snapshots_are_isolated(
        degree in degree_strategy(),
        initial in proptest::collection::vec(any::<i16>(), 0..150),
        later in proptest::collection::vec(operation_strategy(), 0..150),
    ) {
        let mut tree = BTree::new(degree);
        let mut model = BTreeSet::new();
        for item in initial {
            tree.replace_or_insert(item);
            model.insert(item);
        }
        let frozen = ascending_items(&tree);
        let snapshot = tree.snapshot();

        for operation in &later {
            apply(&mut tree, &mut model, operation);
        }

        prop_assert_eq!(ascending_items(&snapshot), frozen);
        let expected: Vec<i16> = model.into_iter().collect();
        prop_assert_eq!(ascending_items(&tree), expected);
    }

    /// Trees with the same contents compare equal whatever their degree or
    /// insertion order.
    #[test]
    fn equality_is_content_based(
        first_degree in degree_strategy(),
        second_degree in degree_strategy(),
        items in proptest::collection::vec(any::<i16>(), 0..150),
    ) {
        let mut forward = BTree::new(first_degree);
        forward.extend(items.iter().copied());
        let mut backward = BTree::new(second_degree);
        backward.extend(items.iter().rev().copied());
        prop_assert_eq!(forward, backward);
    }
}
