//! Integration tests for [`BTree`] through its public API.

use cowtree::tree::{BTree, DEFAULT_DEGREE, FreeList};
use rstest::rstest;
use std::collections::BTreeSet;

fn ascending_items(tree: &BTree<i32>) -> Vec<i32> {
    let mut items = Vec::new();
    tree.ascend(|item| {
        items.push(*item);
        true
    });
    items
}

// =============================================================================
// Construction and Basic Operation Tests
// =============================================================================

#[rstest]
fn test_empty_tree_has_no_items() {
    let tree: BTree<i32> = BTree::new(2);
    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert_eq!(tree.min(), None);
    assert_eq!(tree.max(), None);
    assert_eq!(ascending_items(&tree), Vec::<i32>::new());
}

#[rstest]
fn test_default_uses_default_degree() {
    let tree: BTree<i32> = BTree::default();
    assert_eq!(tree.degree(), DEFAULT_DEGREE);
}

#[rstest]
#[case::minimum_degree(2)]
#[case::mid_degree(5)]
#[case::default_degree(DEFAULT_DEGREE)]
fn test_insert_lookup_remove_cycle(#[case] degree: usize) {
    let mut tree = BTree::new(degree);
    for item in 0..1_000 {
        assert_eq!(tree.replace_or_insert(item), None);
    }
    assert_eq!(tree.len(), 1_000);
    for item in 0..1_000 {
        assert_eq!(tree.get(&item), Some(&item));
    }
    for item in 0..1_000 {
        assert_eq!(tree.remove(&item), Some(item));
    }
    assert!(tree.is_empty());
}

#[rstest]
fn test_replace_returns_previous_and_keeps_length() {
    let mut tree = BTree::new(2);
    for item in 0..10 {
        tree.replace_or_insert(item);
    }
    assert_eq!(tree.replace_or_insert(5), Some(5));
    assert_eq!(tree.len(), 10);
}

#[rstest]
fn test_remove_absent_key_returns_none() {
    let mut tree: BTree<i32> = (0..10).collect();
    assert_eq!(tree.remove(&100), None);
    assert_eq!(tree.len(), 10);
}

#[rstest]
fn test_min_max_after_mixed_operations() {
    let mut tree = BTree::new(3);
    for item in [50, 10, 90, 30, 70] {
        tree.replace_or_insert(item);
    }
    assert_eq!(tree.min(), Some(&10));
    assert_eq!(tree.max(), Some(&90));
    tree.remove(&10);
    tree.remove(&90);
    assert_eq!(tree.min(), Some(&30));
    assert_eq!(tree.max(), Some(&70));
}

// =============================================================================
// Traversal Tests
// =============================================================================

#[rstest]
fn test_ascend_and_descend_are_mirror_images() {
    let tree: BTree<i32> = [8, 3, 5, 1, 9, 2].into_iter().collect();
    let ascending = ascending_items(&tree);
    let mut descending = Vec::new();
    tree.descend(|item| {
        descending.push(*item);
        true
    });
    descending.reverse();
    assert_eq!(ascending, descending);
}

#[rstest]
fn test_ascend_early_stop() {
    let tree: BTree<i32> = (0..100).collect();
    let mut seen = Vec::new();
    tree.ascend(|item| {
        seen.push(*item);
        seen.len() < 5
    });
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[rstest]
fn test_range_bounds_with_gaps() {
    // Only even items are stored; bounds fall on absent odd keys.
    let tree: BTree<i32> = (0..20).step_by(2).collect();
    let items: Vec<i32> = tree.range(3..11).copied().collect();
    assert_eq!(items, vec![4, 6, 8, 10]);
    let items: Vec<i32> = tree.range(3..=11).copied().collect();
    assert_eq!(items, vec![4, 6, 8, 10]);
}

#[rstest]
fn test_empty_range() {
    let tree: BTree<i32> = (0..10).collect();
    assert_eq!(tree.range(5..5).count(), 0);
    assert_eq!(tree.range(20..30).count(), 0);
}

// =============================================================================
// Degree-Two Stress Test
// =============================================================================

/// Multiplicative congruential generator, good enough for a repeatable
/// operation mix.
struct Lcg(u64);

impl Lcg {
    fn next_value(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

#[rstest]
#[case::minimum_degree(2)]
#[case::default_degree(DEFAULT_DEGREE)]
fn test_random_operations_match_std_btreeset(#[case] degree: usize) {
    let mut tree = BTree::new(degree);
    let mut model = BTreeSet::new();
    let mut rng = Lcg(0x9E37_79B9);

    for _ in 0..10_000 {
        let item = (rng.next_value() % 500) as i32;
        match rng.next_value() % 4 {
            0 | 1 => {
                let inserted_tree = tree.replace_or_insert(item).is_none();
                let inserted_model = model.insert(item);
                assert_eq!(inserted_tree, inserted_model);
            }
            2 => {
                assert_eq!(tree.remove(&item), model.take(&item));
            }
            _ => {
                assert_eq!(tree.remove_min(), model.pop_first());
            }
        }
        assert_eq!(tree.len(), model.len());
    }

    let items = ascending_items(&tree);
    let expected: Vec<i32> = model.into_iter().collect();
    assert_eq!(items, expected);
}

// =============================================================================
// Clear and Freelist Tests
// =============================================================================

#[rstest]
fn test_shared_freelist_across_trees() {
    let free_list = FreeList::new(64);
    let mut first: BTree<i32> = BTree::with_free_list(2, free_list.clone());
    for item in 0..50 {
        first.replace_or_insert(item);
    }
    first.clear(true);
    let pooled = free_list.len();
    assert!(pooled > 0);

    // A second tree draws its nodes from the same pool.
    let mut second: BTree<i32> = BTree::with_free_list(2, free_list.clone());
    for item in 0..50 {
        second.replace_or_insert(item);
    }
    assert!(free_list.len() < pooled);
}

#[rstest]
fn test_clear_is_idempotent() {
    let mut tree: BTree<i32> = (0..10).collect();
    tree.clear(true);
    tree.clear(true);
    tree.clear(false);
    assert!(tree.is_empty());
    tree.replace_or_insert(1);
    assert_eq!(tree.len(), 1);
}

// =============================================================================
// Trait Implementation Tests
// =============================================================================

#[rstest]
fn test_from_iterator_deduplicates() {
    let tree: BTree<i32> = [1, 2, 2, 3, 3, 3].into_iter().collect();
    assert_eq!(tree.len(), 3);
}

#[rstest]
fn test_extend_merges_items() {
    let mut tree: BTree<i32> = (0..5).collect();
    tree.extend(3..8);
    assert_eq!(ascending_items(&tree), (0..8).collect::<Vec<_>>());
}

#[rstest]
fn test_equality_and_hash_agree() {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let first: BTree<i32> = (0..20).collect();
    let mut second = BTree::new(2);
    for item in (0..20).rev() {
        second.replace_or_insert(item);
    }
    assert_eq!(first, second);

    let hash_of = |tree: &BTree<i32>| {
        let mut hasher = DefaultHasher::new();
        tree.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash_of(&first), hash_of(&second));
}

#[rstest]
fn test_reference_into_iterator() {
    let tree: BTree<i32> = [2, 1, 3].into_iter().collect();
    let mut seen = Vec::new();
    for item in &tree {
        seen.push(*item);
    }
    assert_eq!(seen, vec![1, 2, 3]);
    // The tree is still usable afterwards.
    assert_eq!(tree.len(), 3);
}

// =============================================================================
// Serde Tests
// =============================================================================

#[cfg(feature = "serde")]
mod serde_tests {
    use super::*;

    #[rstest]
    fn test_serialize_as_sorted_sequence() {
        let tree: BTree<i32> = [3, 1, 2].into_iter().collect();
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(json, "[1,2,3]");
    }

    #[rstest]
    fn test_deserialize_round_trip() {
        let tree: BTree<i32> = (0..50).collect();
        let json = serde_json::to_string(&tree).unwrap();
        let decoded: BTree<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, decoded);
    }
}
