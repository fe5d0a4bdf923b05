//! Bounded pool of recycled tree nodes.

use parking_lot::Mutex;
use std::fmt;

use super::ReferenceCounter;
use super::btree::Node;

/// Default capacity used by [`FreeList::default`].
pub const DEFAULT_FREE_LIST_SIZE: usize = 32;

/// A bounded, mutex-guarded pool of recycled B-tree nodes.
///
/// The freelist is a pure allocation-reuse optimization: when a tree
/// discards a node (merged away during deletion, or replaced while copying
/// on write) the emptied node is pushed here instead of being dropped, and
/// node allocations pop from here before falling back to a fresh
/// allocation. Emptying or ignoring the pool never affects correctness.
///
/// Cloning a `FreeList` produces a second handle to the *same* pool, which
/// is how a pool is shared between a tree and its snapshots, or between
/// independently constructed trees (see [`BTree::with_free_list`]).
///
/// A full pool silently drops the node being returned; an empty pool
/// silently falls back to fresh allocation. Neither is an error.
///
/// [`BTree::with_free_list`]: super::BTree::with_free_list
pub struct FreeList<T> {
    pool: ReferenceCounter<Mutex<Pool<T>>>,
}

/// Interior of the pool: recycled node shells plus the capacity bound.
struct Pool<T> {
    nodes: Vec<Node<T>>,
    capacity: usize,
}

impl<T> FreeList<T> {
    /// Creates a freelist that holds at most `capacity` recycled nodes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::FreeList;
    ///
    /// let free_list: FreeList<i32> = FreeList::new(64);
    /// assert_eq!(free_list.capacity(), 64);
    /// assert!(free_list.is_empty());
    /// ```
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ReferenceCounter::new(Mutex::new(Pool {
                nodes: Vec::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Returns the number of recycled nodes currently pooled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.lock().nodes.len()
    }

    /// Returns `true` if no recycled nodes are pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.lock().nodes.is_empty()
    }

    /// Returns the maximum number of nodes the pool retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.lock().capacity
    }

    /// Pops a recycled node, or `None` if the pool is empty.
    pub(crate) fn pop(&self) -> Option<Node<T>> {
        self.pool.lock().nodes.pop()
    }

    /// Returns a node shell to the pool.
    ///
    /// Returns `false` when the pool is full and the node was dropped
    /// instead.
    pub(crate) fn push(&self, node: Node<T>) -> bool {
        let mut pool = self.pool.lock();
        if pool.nodes.len() < pool.capacity {
            pool.nodes.push(node);
            true
        } else {
            false
        }
    }
}

impl<T> Clone for FreeList<T> {
    /// Returns a second handle sharing the same underlying pool.
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FREE_LIST_SIZE)
    }
}

impl<T> fmt::Debug for FreeList<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool.lock();
        formatter
            .debug_struct("FreeList")
            .field("len", &pool.nodes.len())
            .field("capacity", &pool.capacity)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
