//! Core B-tree structure: nodes, the copy-on-write context, and [`BTree`].

use smallvec::SmallVec;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::ReferenceCounter;
use super::freelist::FreeList;

/// Branching degree used by [`Default`], [`FromIterator`] and serde
/// deserialization. Explicit construction via [`BTree::new`] always takes
/// a degree.
pub const DEFAULT_DEGREE: usize = 16;

/// Inline item capacity of a node before spilling to the heap.
const INLINE_ITEMS: usize = 8;

/// Inline child capacity of a node before spilling to the heap.
const INLINE_CHILDREN: usize = INLINE_ITEMS + 1;

pub(crate) type NodeRef<T> = ReferenceCounter<Node<T>>;

type Items<T> = SmallVec<[T; INLINE_ITEMS]>;
type Children<T> = SmallVec<[NodeRef<T>; INLINE_CHILDREN]>;

// =============================================================================
// Context Identity
// =============================================================================

/// Identity stamp of a copy-on-write context.
///
/// Every context draws a process-unique id; nodes carry the id of the
/// context that created them. A tree may mutate a node in place only when
/// the node's stamp matches the tree's current context.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ContextId(u64);

impl ContextId {
    /// Stamp carried by pooled node shells that no context owns.
    const UNOWNED: Self = Self(0);

    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node of the B-tree.
///
/// `items` is strictly increasing. `children` is either empty (leaf) or
/// holds exactly `items.len() + 1` entries; `children[i]` roots the
/// subtree of items between `items[i - 1]` and `items[i]`.
pub(crate) struct Node<T> {
    items: Items<T>,
    children: Children<T>,
    owner: ContextId,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            items: SmallVec::new(),
            children: SmallVec::new(),
            owner: ContextId::UNOWNED,
        }
    }
}

/// Binary search for `key` in a strictly increasing item slice.
///
/// `Ok` holds the position of the equal item, `Err` the insertion point.
fn search<T, Q>(items: &[T], key: &Q) -> Result<usize, usize>
where
    T: Borrow<Q>,
    Q: Ord + ?Sized,
{
    items.binary_search_by(|item| item.borrow().cmp(key))
}

// =============================================================================
// Copy-on-Write Context
// =============================================================================

/// Result of handing a node back to its context.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FreeOutcome {
    /// The freelist was full; the node was dropped.
    Dropped,
    /// The node was stored in the freelist for reuse.
    Recycled,
    /// The node is still referenced elsewhere (or stamped by another
    /// context) and was left alone.
    NotOwned,
}

/// Allocation and ownership authority of one tree handle.
///
/// The context pairs an identity stamp with a freelist. Nodes it creates
/// carry its stamp; [`BTree::snapshot`] replaces the contexts of both
/// handles so that neither may keep mutating nodes the other can now see.
struct CowContext<T> {
    owner: ContextId,
    freelist: FreeList<T>,
}

impl<T> CowContext<T> {
    fn new(freelist: FreeList<T>) -> Self {
        Self {
            owner: ContextId::fresh(),
            freelist,
        }
    }

    /// Pulls a node shell from the freelist (or allocates a fresh one) and
    /// stamps it with this context.
    fn new_node(&self) -> Node<T> {
        let mut node = self.freelist.pop().unwrap_or_default();
        node.owner = self.owner;
        node
    }

    /// Clears a node shell and offers it to the freelist.
    fn recycle(&self, mut node: Node<T>) -> FreeOutcome {
        node.items.clear();
        node.children.clear();
        node.owner = ContextId::UNOWNED;
        if self.freelist.push(node) {
            FreeOutcome::Recycled
        } else {
            FreeOutcome::Dropped
        }
    }

    /// Frees a structurally discarded node.
    ///
    /// Only nodes stamped by this context and not visible to any snapshot
    /// are recycled; anything else is left to its other referents.
    fn free_node(&self, node: NodeRef<T>) -> FreeOutcome {
        if node.owner != self.owner {
            return FreeOutcome::NotOwned;
        }
        match ReferenceCounter::try_unwrap(node) {
            Ok(shell) => self.recycle(shell),
            Err(_) => FreeOutcome::NotOwned,
        }
    }

    /// Recursively returns a subtree to the freelist, children first.
    ///
    /// Returns `false` once the freelist is full, which stops the walk;
    /// recycling is best-effort. Subtrees still shared with a snapshot
    /// cannot be reclaimed and are skipped.
    fn release(&self, node: NodeRef<T>) -> bool {
        match ReferenceCounter::try_unwrap(node) {
            Ok(mut owned) => {
                let children = std::mem::take(&mut owned.children);
                for child in children {
                    if !self.release(child) {
                        return false;
                    }
                }
                self.recycle(owned) != FreeOutcome::Dropped
            }
            Err(_) => true,
        }
    }
}

impl<T: Clone> CowContext<T> {
    /// Shallow structural copy: items are cloned, child *references* are
    /// cloned (not the child subtrees). This is what makes the scheme
    /// copy-on-write rather than copy-entire-subtree.
    fn copy_node(&self, node: &Node<T>) -> Node<T> {
        let mut copy = self.new_node();
        copy.items.extend(node.items.iter().cloned());
        copy.children.extend(node.children.iter().cloned());
        copy
    }

    /// Returns a mutable reference to the node behind `link`, copying it
    /// first unless this context owns it exclusively.
    ///
    /// The parent link is re-pointed at the copy, so unmodified siblings
    /// stay shared while the written path becomes private.
    fn make_mut<'a>(&self, link: &'a mut NodeRef<T>) -> &'a mut Node<T> {
        if link.owner != self.owner || ReferenceCounter::strong_count(link) != 1 {
            *link = ReferenceCounter::new(self.copy_node(link));
        }
        match ReferenceCounter::get_mut(link) {
            Some(node) => node,
            // A node stamped here with a unique reference always yields.
            None => unreachable!("freshly copied node has a unique reference"),
        }
    }
}

// =============================================================================
// Node Algorithms
// =============================================================================

/// Which item `Node::remove` targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RemoveKind {
    /// Remove the item equal to the given key.
    Item,
    /// Remove the minimum item of the subtree.
    Min,
    /// Remove the maximum item of the subtree.
    Max,
}

/// Traversal direction for `Node::visit`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

impl<T: Clone + Ord> Node<T> {
    /// Splits this (full) node at `index`.
    ///
    /// The item at `index` is promoted to the caller; everything after it
    /// moves into a fresh right sibling pulled from the freelist.
    fn split(&mut self, index: usize, cow: &CowContext<T>) -> (T, Node<T>) {
        let item = self.items.remove(index);
        let mut next = cow.new_node();
        next.items.extend(self.items.drain(index..));
        if !self.children.is_empty() {
            next.children.extend(self.children.drain(index + 1..));
        }
        (item, next)
    }

    /// Splits `children[index]` if it is full, lifting the median into
    /// this node. Returns whether a split happened.
    fn maybe_split_child(&mut self, index: usize, max_items: usize, cow: &CowContext<T>) -> bool {
        if self.children[index].items.len() < max_items {
            return false;
        }
        let first = cow.make_mut(&mut self.children[index]);
        let (item, second) = first.split(max_items / 2, cow);
        self.items.insert(index, item);
        self.children.insert(index + 1, ReferenceCounter::new(second));
        true
    }

    /// Inserts `item` into the subtree rooted here, splitting full
    /// children preemptively on the way down so that no child chosen for
    /// descent is ever full.
    ///
    /// Returns the previous item when an equal one was replaced.
    fn insert(&mut self, item: T, max_items: usize, cow: &CowContext<T>) -> Option<T> {
        let mut index = match self.items.binary_search(&item) {
            Ok(found) => {
                return Some(std::mem::replace(&mut self.items[found], item));
            }
            Err(index) => index,
        };
        if self.children.is_empty() {
            self.items.insert(index, item);
            return None;
        }
        if self.maybe_split_child(index, max_items, cow) {
            // The promoted median shifts the descent point by one slot, or
            // is itself the item being replaced.
            match item.cmp(&self.items[index]) {
                Ordering::Less => {}
                Ordering::Greater => index += 1,
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.items[index], item));
                }
            }
        }
        cow.make_mut(&mut self.children[index]).insert(item, max_items, cow)
    }

    /// Looks up `key` in the subtree rooted here.
    fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match search(&self.items, key) {
            Ok(index) => Some(&self.items[index]),
            Err(index) => self.children.get(index).and_then(|child| child.get(key)),
        }
    }

    /// Removes an item from the subtree rooted here.
    ///
    /// `key` is consulted only for [`RemoveKind::Item`]. Any child about
    /// to be descended into is grown first when it sits at the minimum
    /// occupancy, so the recursion never enters a node it could underflow.
    fn remove<Q>(
        &mut self,
        key: Option<&Q>,
        min_items: usize,
        kind: RemoveKind,
        cow: &CowContext<T>,
    ) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let (index, found) = match kind {
            RemoveKind::Max => {
                if self.children.is_empty() {
                    return self.items.pop();
                }
                (self.items.len(), false)
            }
            RemoveKind::Min => {
                if self.children.is_empty() {
                    if self.items.is_empty() {
                        return None;
                    }
                    return Some(self.items.remove(0));
                }
                (0, false)
            }
            RemoveKind::Item => {
                let key = key?;
                match search(&self.items, key) {
                    Ok(index) => {
                        if self.children.is_empty() {
                            return Some(self.items.remove(index));
                        }
                        (index, true)
                    }
                    Err(index) => {
                        if self.children.is_empty() {
                            return None;
                        }
                        (index, false)
                    }
                }
            }
        };
        if self.children[index].items.len() <= min_items {
            return self.grow_child_and_remove(index, key, min_items, kind, cow);
        }
        let child = cow.make_mut(&mut self.children[index]);
        if found {
            // The matched item is replaced by its in-order predecessor,
            // the maximum of the left subtree.
            let predecessor = child.remove(None::<&Q>, min_items, RemoveKind::Max, cow);
            debug_assert!(
                predecessor.is_some(),
                "left subtree of a matched item is never empty"
            );
            return predecessor
                .map(|predecessor| std::mem::replace(&mut self.items[index], predecessor));
        }
        child.remove(key, min_items, kind, cow)
    }

    /// Grows `children[index]` above the minimum occupancy, then retries
    /// the removal on this node.
    ///
    /// Prefers borrowing from the left sibling, then the right; merges
    /// with the right sibling (recycling it) when neither has spare items.
    fn grow_child_and_remove<Q>(
        &mut self,
        mut index: usize,
        key: Option<&Q>,
        min_items: usize,
        kind: RemoveKind,
        cow: &CowContext<T>,
    ) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if index > 0 && self.children[index - 1].items.len() > min_items {
            // Steal the left sibling's last item (and child).
            let steal_from = cow.make_mut(&mut self.children[index - 1]);
            let stolen_item = steal_from.items.pop();
            let stolen_child = steal_from.children.pop();
            if let Some(stolen_item) = stolen_item {
                let separator = std::mem::replace(&mut self.items[index - 1], stolen_item);
                let child = cow.make_mut(&mut self.children[index]);
                child.items.insert(0, separator);
                if let Some(stolen_child) = stolen_child {
                    child.children.insert(0, stolen_child);
                }
            }
        } else if index < self.items.len() && self.children[index + 1].items.len() > min_items {
            // Steal the right sibling's first item (and child).
            let steal_from = cow.make_mut(&mut self.children[index + 1]);
            let stolen_item = steal_from.items.remove(0);
            let stolen_child =
                (!steal_from.children.is_empty()).then(|| steal_from.children.remove(0));
            let separator = std::mem::replace(&mut self.items[index], stolen_item);
            let child = cow.make_mut(&mut self.children[index]);
            child.items.push(separator);
            if let Some(stolen_child) = stolen_child {
                child.children.push(stolen_child);
            }
        } else {
            // Merge with the right sibling and the separator item; the
            // drained sibling goes back to the freelist.
            if index >= self.items.len() {
                index -= 1;
            }
            let merge_item = self.items.remove(index);
            let merge_child = self.children.remove(index + 1);
            let mut merged = match ReferenceCounter::try_unwrap(merge_child) {
                Ok(node) => node,
                Err(shared) => cow.copy_node(&shared),
            };
            let child = cow.make_mut(&mut self.children[index]);
            child.items.push(merge_item);
            child.items.extend(merged.items.drain(..));
            child.children.extend(merged.children.drain(..));
            cow.recycle(merged);
        }
        self.remove(key, min_items, kind, cow)
    }

    /// In-order (or reverse in-order) traversal with optional bounds.
    ///
    /// Ascending visits `[start, stop)`; descending visits `(stop, start]`
    /// read right to left. `include_start` controls whether an item equal
    /// to `start` is visited; `hit` tracks whether any item at or past the
    /// start bound has been seen, which disambiguates the equal-to-start
    /// item across recursion levels. Returns `false` to propagate an early
    /// stop (visitor returned `false` or a bound was crossed).
    #[allow(clippy::too_many_lines)]
    fn visit<'a, Q, F>(
        &'a self,
        direction: Direction,
        start: Option<&Q>,
        stop: Option<&Q>,
        include_start: bool,
        hit: &mut bool,
        visitor: &mut F,
    ) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        match direction {
            Direction::Ascending => {
                let first = start.map_or(0, |start| match search(&self.items, start) {
                    Ok(index) | Err(index) => index,
                });
                for index in first..self.items.len() {
                    if let Some(child) = self.children.get(index) {
                        if !child.visit(direction, start, stop, include_start, hit, visitor) {
                            return false;
                        }
                    }
                    let item = &self.items[index];
                    if !include_start
                        && !*hit
                        && start.is_some_and(|start| start >= item.borrow())
                    {
                        *hit = true;
                        continue;
                    }
                    *hit = true;
                    if stop.is_some_and(|stop| item.borrow() >= stop) {
                        return false;
                    }
                    if !visitor(item) {
                        return false;
                    }
                }
                if let Some(last) = self.children.last() {
                    if !last.visit(direction, start, stop, include_start, hit, visitor) {
                        return false;
                    }
                }
            }
            Direction::Descending => {
                let first = match start {
                    Some(start) => match search(&self.items, start) {
                        Ok(index) => Some(index),
                        Err(index) => index.checked_sub(1),
                    },
                    None => self.items.len().checked_sub(1),
                };
                if let Some(first) = first {
                    for index in (0..=first).rev() {
                        let item = &self.items[index];
                        if let Some(start) = start {
                            if item.borrow() >= start
                                && (!include_start || *hit || start < item.borrow())
                            {
                                continue;
                            }
                        }
                        if let Some(child) = self.children.get(index + 1) {
                            if !child.visit(direction, start, stop, include_start, hit, visitor) {
                                return false;
                            }
                        }
                        if stop.is_some_and(|stop| stop >= item.borrow()) {
                            return false;
                        }
                        *hit = true;
                        if !visitor(item) {
                            return false;
                        }
                    }
                }
                if let Some(child) = self.children.first() {
                    if !child.visit(direction, start, stop, include_start, hit, visitor) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Descends to the leftmost item of a subtree.
fn min_item<T>(root: Option<&NodeRef<T>>) -> Option<&T> {
    let mut node = root?;
    while let Some(child) = node.children.first() {
        node = child;
    }
    node.items.first()
}

/// Descends to the rightmost item of a subtree.
fn max_item<T>(root: Option<&NodeRef<T>>) -> Option<&T> {
    let mut node = root?;
    while let Some(child) = node.children.last() {
        node = child;
    }
    node.items.last()
}

// =============================================================================
// BTree Definition
// =============================================================================

/// An ordered B-tree with copy-on-write snapshots.
///
/// `BTree` stores unique items under their `Ord` ordering; inserting an
/// item equal to a stored one replaces it (callers wanting key/value
/// semantics embed the value in the item type and order by the key part).
///
/// Write operations take `&mut self` and mutate in place; reads never
/// copy. [`snapshot`](Self::snapshot) produces an independent tree in O(1)
/// that shares all nodes with the original until either side writes, at
/// which point only the written path is copied (structural sharing).
///
/// A single `BTree` handle is not internally synchronized and must not be
/// mutated from multiple threads; snapshots are the supported way to work
/// with one logical data set from several places.
///
/// # Time Complexity
///
/// | Operation                | Complexity   |
/// |--------------------------|--------------|
/// | `new`                    | O(1)         |
/// | `get` / `contains`       | O(log N)     |
/// | `replace_or_insert`      | O(log N)     |
/// | `remove` / `remove_min` / `remove_max` | O(log N) |
/// | `min` / `max`            | O(log N)     |
/// | `ascend*` / `descend*`   | O(log N + k) |
/// | `snapshot`               | O(1)         |
/// | `len` / `is_empty`       | O(1)         |
///
/// # Examples
///
/// ```rust
/// use cowtree::tree::BTree;
///
/// let mut tree = BTree::new(2);
/// assert_eq!(tree.replace_or_insert(1), None);
/// assert_eq!(tree.replace_or_insert(1), Some(1)); // replaced
/// assert_eq!(tree.len(), 1);
///
/// let mut snapshot = tree.snapshot();
/// snapshot.replace_or_insert(2);
/// assert_eq!(tree.len(), 1);     // original unchanged
/// assert_eq!(snapshot.len(), 2);
/// ```
pub struct BTree<T> {
    degree: usize,
    length: usize,
    root: Option<NodeRef<T>>,
    cow: CowContext<T>,
}

impl<T> BTree<T> {
    /// Creates an empty tree with the given branching degree and a private
    /// freelist of [`DEFAULT_FREE_LIST_SIZE`] nodes.
    ///
    /// `degree` is the minimum number of children of a non-root internal
    /// node; nodes hold between `degree - 1` and `2 * degree - 1` items.
    ///
    /// # Panics
    ///
    /// Panics if `degree < 2`: a smaller degree cannot maintain the
    /// minimum-occupancy invariant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = BTree::new(2);
    /// assert!(tree.is_empty());
    /// ```
    #[must_use]
    pub fn new(degree: usize) -> Self {
        Self::with_free_list(degree, FreeList::default())
    }

    /// Creates an empty tree that recycles nodes through `free_list`.
    ///
    /// Passing clones of one freelist to several trees shares the pool
    /// between them, amortizing allocation across many short-lived trees
    /// or snapshots.
    ///
    /// # Panics
    ///
    /// Panics if `degree < 2`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::{BTree, FreeList};
    ///
    /// let free_list = FreeList::new(64);
    /// let first: BTree<i32> = BTree::with_free_list(4, free_list.clone());
    /// let second: BTree<i32> = BTree::with_free_list(4, free_list);
    /// # drop((first, second));
    /// ```
    #[must_use]
    pub fn with_free_list(degree: usize, free_list: FreeList<T>) -> Self {
        assert!(degree >= 2, "bad degree: a B-tree needs degree >= 2, got {degree}");
        Self {
            degree,
            length: 0,
            root: None,
            cow: CowContext::new(free_list),
        }
    }

    /// Returns the number of items in the tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = (0..5).collect();
    /// assert_eq!(tree.len(), 5);
    /// ```
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the tree contains no items.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the branching degree fixed at construction.
    #[inline]
    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Maximum items per node: `2 * degree - 1`.
    const fn max_items(&self) -> usize {
        self.degree * 2 - 1
    }

    /// Minimum items per non-root node: `degree - 1`.
    const fn min_items(&self) -> usize {
        self.degree - 1
    }
}

impl<T: Clone + Ord> BTree<T> {
    /// Inserts `item`, or replaces and returns the stored item equal to
    /// it.
    ///
    /// Returns `None` on a fresh insert. A full root is split preemptively
    /// before descending, growing the tree by one level.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let mut tree = BTree::new(2);
    /// assert_eq!(tree.replace_or_insert(7), None);
    /// assert_eq!(tree.replace_or_insert(7), Some(7));
    /// assert_eq!(tree.len(), 1);
    /// ```
    pub fn replace_or_insert(&mut self, item: T) -> Option<T> {
        let max_items = self.max_items();
        let Some(mut root) = self.root.take() else {
            let mut node = self.cow.new_node();
            node.items.push(item);
            self.root = Some(ReferenceCounter::new(node));
            self.length += 1;
            return None;
        };
        if root.items.len() >= max_items {
            // Preemptive root split: the tree grows by one level.
            let (middle, second) = self.cow.make_mut(&mut root).split(max_items / 2, &self.cow);
            let mut new_root = self.cow.new_node();
            new_root.items.push(middle);
            new_root.children.push(root);
            new_root.children.push(ReferenceCounter::new(second));
            root = ReferenceCounter::new(new_root);
        }
        let previous = self.cow.make_mut(&mut root).insert(item, max_items, &self.cow);
        self.root = Some(root);
        if previous.is_none() {
            self.length += 1;
        }
        previous
    }

    /// Removes and returns the item equal to `key`, or `None` if absent.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let mut tree: BTree<i32> = (0..10).collect();
    /// assert_eq!(tree.remove(&3), Some(3));
    /// assert_eq!(tree.remove(&3), None);
    /// assert_eq!(tree.len(), 9);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_kind(Some(key), RemoveKind::Item)
    }

    /// Removes and returns the smallest item, or `None` on an empty tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let mut tree: BTree<i32> = [3, 1, 2].into_iter().collect();
    /// assert_eq!(tree.remove_min(), Some(1));
    /// assert_eq!(tree.remove_min(), Some(2));
    /// assert_eq!(tree.remove_min(), Some(3));
    /// assert_eq!(tree.remove_min(), None);
    /// ```
    pub fn remove_min(&mut self) -> Option<T> {
        self.remove_kind(None::<&T>, RemoveKind::Min)
    }

    /// Removes and returns the largest item, or `None` on an empty tree.
    pub fn remove_max(&mut self) -> Option<T> {
        self.remove_kind(None::<&T>, RemoveKind::Max)
    }

    fn remove_kind<Q>(&mut self, key: Option<&Q>, kind: RemoveKind) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let min_items = self.min_items();
        let Some(mut root) = self.root.take() else {
            return None;
        };
        if root.items.is_empty() {
            self.root = Some(root);
            return None;
        }
        let out = self.cow.make_mut(&mut root).remove(key, min_items, kind, &self.cow);
        if root.items.is_empty() && !root.children.is_empty() {
            // The tree shrinks by one level: promote the only child and
            // recycle the emptied root.
            let promoted = self.cow.make_mut(&mut root).children.remove(0);
            let old_root = std::mem::replace(&mut root, promoted);
            self.cow.free_node(old_root);
        }
        self.root = Some(root);
        if out.is_some() {
            self.length -= 1;
        }
        out
    }

    /// Produces an independent snapshot of this tree in O(1).
    ///
    /// Both handles initially share every node. Before either handle
    /// mutates a shared node it copies the node privately, so mutations on
    /// one side are never visible through the other. The freelist remains
    /// shared between the two.
    ///
    /// Both the snapshot *and this tree* receive fresh copy-on-write
    /// contexts, which is what forces the lazy copying on both sides.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let mut tree: BTree<i32> = (0..100).collect();
    /// let mut snapshot = tree.snapshot();
    /// snapshot.remove(&42);
    /// assert!(tree.contains(&42));
    /// assert!(!snapshot.contains(&42));
    /// ```
    #[must_use]
    pub fn snapshot(&mut self) -> Self {
        self.cow = CowContext::new(self.cow.freelist.clone());
        Self {
            degree: self.degree,
            length: self.length,
            root: self.root.clone(),
            cow: CowContext::new(self.cow.freelist.clone()),
        }
    }

    /// Resets the tree to empty.
    ///
    /// With `release_nodes` set, every node this tree exclusively owns is
    /// first returned to the freelist, children before parents; the walk
    /// stops early once the freelist is full (recycling is best-effort,
    /// never an error). Nodes shared with snapshots are skipped and simply
    /// dropped from this tree's view.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::{BTree, FreeList};
    ///
    /// let free_list = FreeList::new(64);
    /// let mut tree: BTree<i32> = BTree::with_free_list(2, free_list.clone());
    /// for item in 0..20 {
    ///     tree.replace_or_insert(item);
    /// }
    /// tree.clear(true);
    /// assert!(tree.is_empty());
    /// assert!(!free_list.is_empty());
    /// ```
    pub fn clear(&mut self, release_nodes: bool) {
        if release_nodes {
            if let Some(root) = self.root.take() {
                self.cow.release(root);
            }
        }
        self.root = None;
        self.length = 0;
    }

    /// Returns a reference to the stored item equal to `key`.
    ///
    /// The key may be any borrowed form of the item type as long as the
    /// orderings agree.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<String> = ["a", "b"].into_iter().map(String::from).collect();
    /// assert_eq!(tree.get("a"), Some(&"a".to_string()));
    /// assert_eq!(tree.get("c"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.root.as_ref().and_then(|root| root.get(key))
    }

    /// Returns `true` if an item equal to `key` is stored.
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Returns the smallest item, or `None` on an empty tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = [3, 1, 2].into_iter().collect();
    /// assert_eq!(tree.min(), Some(&1));
    /// assert_eq!(tree.max(), Some(&3));
    /// ```
    #[must_use]
    pub fn min(&self) -> Option<&T> {
        min_item(self.root.as_ref())
    }

    /// Returns the largest item, or `None` on an empty tree.
    #[must_use]
    pub fn max(&self) -> Option<&T> {
        max_item(self.root.as_ref())
    }

    // =========================================================================
    // Visitor Traversal
    // =========================================================================

    /// Visits every item in ascending order until `visitor` returns
    /// `false`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = (1..=5).collect();
    /// let mut seen = Vec::new();
    /// tree.ascend(|item| {
    ///     seen.push(*item);
    ///     *item < 3 // stop after visiting 3
    /// });
    /// assert_eq!(seen, vec![1, 2, 3]);
    /// ```
    pub fn ascend<'a, F>(&'a self, mut visitor: F)
    where
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Ascending,
                None::<&T>,
                None::<&T>,
                false,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item in `[greater_or_equal, less_than)` in ascending
    /// order until `visitor` returns `false`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = (1..=7).collect();
    /// let mut seen = Vec::new();
    /// tree.ascend_range(&3, &6, |item| {
    ///     seen.push(*item);
    ///     true
    /// });
    /// assert_eq!(seen, vec![3, 4, 5]);
    /// ```
    pub fn ascend_range<'a, Q, F>(&'a self, greater_or_equal: &Q, less_than: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Ascending,
                Some(greater_or_equal),
                Some(less_than),
                true,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item `>= pivot` in ascending order until `visitor`
    /// returns `false`.
    pub fn ascend_greater_or_equal<'a, Q, F>(&'a self, pivot: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Ascending,
                Some(pivot),
                None::<&Q>,
                true,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item `< pivot` in ascending order until `visitor`
    /// returns `false`.
    pub fn ascend_less_than<'a, Q, F>(&'a self, pivot: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Ascending,
                None::<&Q>,
                Some(pivot),
                false,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item in descending order until `visitor` returns
    /// `false`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = (1..=3).collect();
    /// let mut seen = Vec::new();
    /// tree.descend(|item| {
    ///     seen.push(*item);
    ///     true
    /// });
    /// assert_eq!(seen, vec![3, 2, 1]);
    /// ```
    pub fn descend<'a, F>(&'a self, mut visitor: F)
    where
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Descending,
                None::<&T>,
                None::<&T>,
                false,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item in `(greater_than, less_or_equal]` in descending
    /// order until `visitor` returns `false`.
    pub fn descend_range<'a, Q, F>(&'a self, less_or_equal: &Q, greater_than: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Descending,
                Some(less_or_equal),
                Some(greater_than),
                true,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item `<= pivot` in descending order until `visitor`
    /// returns `false`.
    pub fn descend_less_or_equal<'a, Q, F>(&'a self, pivot: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Descending,
                Some(pivot),
                None::<&Q>,
                true,
                &mut hit,
                &mut visitor,
            );
        }
    }

    /// Visits every item `> pivot` in descending order until `visitor`
    /// returns `false`.
    pub fn descend_greater_than<'a, Q, F>(&'a self, pivot: &Q, mut visitor: F)
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(&'a T) -> bool,
    {
        if let Some(root) = self.root.as_ref() {
            let mut hit = false;
            root.visit(
                Direction::Descending,
                None::<&Q>,
                Some(pivot),
                false,
                &mut hit,
                &mut visitor,
            );
        }
    }

    // =========================================================================
    // Iterator Adapters
    // =========================================================================

    /// Returns an iterator over the items in ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = [3, 1, 2].into_iter().collect();
    /// let items: Vec<&i32> = tree.iter().collect();
    /// assert_eq!(items, vec![&1, &2, &3]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> BTreeIterator<'_, T> {
        let mut items = Vec::with_capacity(self.length);
        self.ascend(|item| {
            items.push(item);
            true
        });
        BTreeIterator {
            items,
            current_index: 0,
        }
    }

    /// Returns an iterator over the items within `range`, in ascending
    /// order.
    ///
    /// The range is specified using Rust's range syntax: `a..b`, `a..=b`,
    /// `a..`, `..b`, `..=b` or `..`.
    ///
    /// # Complexity
    ///
    /// O(log N + k) where k is the number of items in the range
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cowtree::tree::BTree;
    ///
    /// let tree: BTree<i32> = (1..=7).collect();
    /// let items: Vec<&i32> = tree.range(3..6).collect();
    /// assert_eq!(items, vec![&3, &4, &5]);
    ///
    /// let items: Vec<&i32> = tree.range(3..=6).collect();
    /// assert_eq!(items, vec![&3, &4, &5, &6]);
    /// ```
    pub fn range<R, Q>(&self, range: R) -> BTreeRangeIterator<'_, T>
    where
        R: RangeBounds<Q>,
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut items = Vec::new();
        if let Some(root) = self.root.as_ref() {
            let (start, include_start) = match range.start_bound() {
                Bound::Included(bound) => (Some(bound), true),
                Bound::Excluded(bound) => (Some(bound), false),
                Bound::Unbounded => (None, false),
            };
            let end = range.end_bound();
            let mut hit = false;
            root.visit(
                Direction::Ascending,
                start,
                None::<&Q>,
                include_start,
                &mut hit,
                &mut |item| {
                    let keep = match end {
                        Bound::Included(bound) => item.borrow() <= bound,
                        Bound::Excluded(bound) => item.borrow() < bound,
                        Bound::Unbounded => true,
                    };
                    if keep {
                        items.push(item);
                    }
                    keep
                },
            );
        }
        BTreeRangeIterator {
            items,
            current_index: 0,
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over the items of a [`BTree`] in ascending order.
pub struct BTreeIterator<'a, T> {
    items: Vec<&'a T>,
    current_index: usize,
}

impl<'a, T> Iterator for BTreeIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.items.len() {
            None
        } else {
            let item = self.items[self.current_index];
            self.current_index += 1;
            Some(item)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for BTreeIterator<'_, T> {
    fn len(&self) -> usize {
        self.items.len().saturating_sub(self.current_index)
    }
}

/// A range iterator over the items of a [`BTree`] in ascending order.
pub struct BTreeRangeIterator<'a, T> {
    items: Vec<&'a T>,
    current_index: usize,
}

impl<'a, T> Iterator for BTreeRangeIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.items.len() {
            None
        } else {
            let item = self.items[self.current_index];
            self.current_index += 1;
            Some(item)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for BTreeRangeIterator<'_, T> {
    fn len(&self) -> usize {
        self.items.len().saturating_sub(self.current_index)
    }
}

/// An owning iterator over the items of a [`BTree`] in ascending order.
pub struct BTreeIntoIterator<T> {
    items: Vec<T>,
    current_index: usize,
}

impl<T: Clone> Iterator for BTreeIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.items.len() {
            None
        } else {
            let item = self.items[self.current_index].clone();
            self.current_index += 1;
            Some(item)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<T: Clone> ExactSizeIterator for BTreeIntoIterator<T> {
    fn len(&self) -> usize {
        self.items.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Default for BTree<T> {
    /// An empty tree with [`DEFAULT_DEGREE`].
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_DEGREE)
    }
}

impl<T: Clone + Ord> FromIterator<T> for BTree<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tree = Self::default();
        for item in iter {
            tree.replace_or_insert(item);
        }
        tree
    }
}

impl<T: Clone + Ord> Extend<T> for BTree<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.replace_or_insert(item);
        }
    }
}

impl<T: Clone + Ord> IntoIterator for BTree<T> {
    type Item = T;
    type IntoIter = BTreeIntoIterator<T>;

    /// Items are cloned out: nodes may still be shared with snapshots, so
    /// the tree cannot be dismantled in place.
    fn into_iter(self) -> Self::IntoIter {
        let items: Vec<T> = self.iter().cloned().collect();
        BTreeIntoIterator {
            items,
            current_index: 0,
        }
    }
}

impl<'a, T: Clone + Ord> IntoIterator for &'a BTree<T> {
    type Item = &'a T;
    type IntoIter = BTreeIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone + Ord> PartialEq for BTree<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        self.iter().zip(other.iter()).all(|(left, right)| left == right)
    }
}

impl<T: Clone + Ord> Eq for BTree<T> {}

/// Computes a hash value for this tree.
///
/// The length is hashed first, then every item in ascending order, so
/// equal trees hash equally regardless of insertion history, degree or
/// node layout.
impl<T: Clone + Ord + Hash> Hash for BTree<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.length.hash(state);
        self.ascend(|item| {
            item.hash(state);
            true
        });
    }
}

impl<T: Clone + Ord + fmt::Debug> fmt::Debug for BTree<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Clone + Ord + fmt::Display> fmt::Display for BTree<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for item in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{item}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T> serde::Serialize for BTree<T>
where
    T: serde::Serialize + Clone + Ord,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for item in self {
            sequence.serialize_element(item)?;
        }
        sequence.end()
    }
}

#[cfg(feature = "serde")]
struct BTreeVisitor<T> {
    item_marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<T> BTreeVisitor<T> {
    const fn new() -> Self {
        Self {
            item_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for BTreeVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Ord,
{
    type Value = BTree<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence of items")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut tree = BTree::default();
        while let Some(item) = access.next_element()? {
            tree.replace_or_insert(item);
        }
        Ok(tree)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for BTree<T>
where
    T: serde::Deserialize<'de> + Clone + Ord,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(BTreeVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================


// =============================================================================
// Send + Sync Tests (arc feature only)
// =============================================================================
