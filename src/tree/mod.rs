//! Copy-on-write ordered B-tree.
//!
//! This module provides [`BTree`], a mutable ordered container that
//! supports O(1) snapshots through structural sharing: a snapshot and its
//! source share every node until one of them writes, at which point only
//! the written path is copied.
//!
//! # Overview
//!
//! - O(log N) get, insert, remove, min/max
//! - O(log N + k) range traversal where k is the number of items visited
//! - O(1) len and `is_empty`
//! - O(1) snapshot
//!
//! Discarded nodes (merged away during deletion, or replaced while
//! copying on write) are recycled through a [`FreeList`], a bounded,
//! mutex-guarded pool that can be shared between trees to amortize
//! allocation across many short-lived snapshots.
//!
//! # Examples
//!
//! ```rust
//! use cowtree::tree::BTree;
//!
//! let mut tree = BTree::new(2);
//! for item in 1..=7 {
//!     tree.replace_or_insert(item);
//! }
//!
//! let mut visited = Vec::new();
//! tree.ascend_range(&3, &6, |item| {
//!     visited.push(*item);
//!     true
//! });
//! assert_eq!(visited, vec![3, 4, 5]);
//! ```
//!
//! # Snapshots
//!
//! ```rust
//! use cowtree::tree::BTree;
//!
//! let mut tree: BTree<i32> = (0..100).collect();
//! let mut snapshot = tree.snapshot();
//!
//! snapshot.remove(&50);
//! tree.replace_or_insert(1000);
//!
//! assert!(tree.contains(&50));        // original keeps 50
//! assert!(!snapshot.contains(&1000)); // snapshot never sees 1000
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type for tree nodes.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod btree;
mod freelist;

pub use btree::BTree;
pub use btree::BTreeIntoIterator;
pub use btree::BTreeIterator;
pub use btree::BTreeRangeIterator;
pub use btree::DEFAULT_DEGREE;
pub use freelist::DEFAULT_FREE_LIST_SIZE;
pub use freelist::FreeList;

// =============================================================================
// Tests
// =============================================================================
