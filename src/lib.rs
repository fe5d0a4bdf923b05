//! # cowtree
//!
//! An in-memory ordered B-tree with copy-on-write snapshots and freelist
//! node recycling.
//!
//! ## Overview
//!
//! [`tree::BTree`] is a generic ordered container over items with a total
//! order (`T: Ord`). It provides:
//!
//! - **O(log N) lookup, insert and remove** with classic B-tree balancing
//! - **O(1) snapshots**: [`tree::BTree::snapshot`] produces an independent
//!   tree that initially shares every node with the original; either side
//!   copies nodes lazily when it mutates them
//! - **Node recycling**: discarded nodes are returned to a shared
//!   [`tree::FreeList`] to reduce allocation churn
//! - **Ordered traversal**: ascending/descending visitor methods with
//!   optional range bounds and early stop, plus `Iterator` adapters
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for node references, making trees,
//!   snapshots and shared freelists `Send + Sync`
//! - `serde`: `Serialize`/`Deserialize` support for [`tree::BTree`]
//!
//! ## Example
//!
//! ```rust
//! use cowtree::tree::BTree;
//!
//! let mut tree = BTree::new(2);
//! for item in [3, 1, 4, 1, 5] {
//!     tree.replace_or_insert(item);
//! }
//! assert_eq!(tree.len(), 4); // duplicates replace
//!
//! let mut snapshot = tree.snapshot();
//! snapshot.remove(&4);
//! assert!(tree.contains(&4));      // original unaffected
//! assert!(!snapshot.contains(&4));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use cowtree::prelude::*;
/// ```
pub mod prelude {
    pub use crate::tree::*;
}

pub mod tree;
