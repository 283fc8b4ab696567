//! Tree index.
//!
//! A B-tree over row slots ordered by an external comparator. Lets the
//! table iterate rows in key order and look up subranges; also usable as a
//! plain unique index. Rows are never copied: the tree stores slot numbers
//! and calls back into the comparator with rows fetched from the store.

mod btree;

use btree::{BTree, Leaf, Parent, SearchKey};

use crate::index::{Inconsistency, IndexFind, IndexOrdered, IndexRange, TableIndex};

/// Ordering and equivalence callbacks for a [`TreeIndex`] over `Row`.
///
/// `is_before` must be a strict weak order, and no two live rows may tie
/// (both `is_before` directions false): erase and renumber locate rows by
/// ordering alone, so a tie makes them find the wrong entry. `matches` is
/// typically equivalent to neither row being before the other, but may be
/// cheaper to answer directly.
pub trait TreeCallbacks<Row> {
    fn is_before(&self, a: &Row, b: &Row) -> bool;
    fn matches(&self, a: &Row, b: &Row) -> bool;
}

/// Lookup-key support for `find` and `range` with keys that are not full
/// rows. Every callbacks bundle supports `K = Row` automatically.
pub trait TreeLookup<Row, K: ?Sized>: TreeCallbacks<Row> {
    fn row_is_before(&self, row: &Row, key: &K) -> bool;
    fn key_matches(&self, row: &Row, key: &K) -> bool;
}

impl<Row, C> TreeLookup<Row, Row> for C
where
    C: TreeCallbacks<Row>,
{
    fn row_is_before(&self, row: &Row, key: &Row) -> bool {
        self.is_before(row, key)
    }

    fn key_matches(&self, row: &Row, key: &Row) -> bool {
        self.matches(row, key)
    }
}

/// Adapts a row-comparison closure to the tree's search-key interface.
struct PredicateKey<F>(F);

impl<F: Fn(u32) -> bool> SearchKey for PredicateKey<F> {
    fn search_parent(&self, parent: &Parent) -> usize {
        parent.binary_search(&mut |slot| (self.0)(slot))
    }

    fn search_leaf(&self, leaf: &Leaf) -> usize {
        leaf.binary_search(&mut |slot| (self.0)(slot))
    }

    fn is_after(&self, slot: u32) -> bool {
        (self.0)(slot)
    }
}

/// Unique ordered index over table rows.
#[derive(Default)]
pub struct TreeIndex<C> {
    cb: C,
    tree: BTree,
}

impl<C> TreeIndex<C> {
    pub fn new(cb: C) -> Self {
        Self {
            cb,
            tree: BTree::new(),
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.cb
    }
}

impl<Row, C> TableIndex<Row> for TreeIndex<C>
where
    C: TreeCallbacks<Row>,
{
    fn reserve(&mut self, size: usize) {
        self.tree.reserve(size);
    }

    fn clear(&mut self) {
        self.tree.clear();
    }

    fn insert(&mut self, rows: &[Row], pos: usize) -> Option<usize> {
        let Self { cb, tree } = self;
        let new_row = &rows[pos];
        let key = PredicateKey(|slot: u32| cb.is_before(&rows[slot as usize], new_row));
        let cursor = tree.insert(&key);
        if let Some(existing) = tree.cursor_slot(cursor).get() {
            if cb.matches(&rows[existing as usize], new_row) {
                return Some(existing as usize);
            }
        }
        tree.insert_at(cursor, pos as u32);
        None
    }

    fn erase(&mut self, rows: &[Row], pos: usize) {
        let Self { cb, tree } = self;
        let row = &rows[pos];
        let key = PredicateKey(|slot: u32| cb.is_before(&rows[slot as usize], row));
        tree.erase(pos as u32, &key);
    }

    fn move_row(&mut self, rows: &[Row], old_pos: usize, new_pos: usize) {
        let Self { cb, tree } = self;
        let row = &rows[old_pos];
        let key = PredicateKey(|slot: u32| cb.is_before(&rows[slot as usize], row));
        tree.renumber(old_pos as u32, new_pos as u32, &key);
    }

    fn verify(&self, rows: &[Row]) -> Result<(), Inconsistency> {
        let Self { cb, tree } = self;
        tree.verify(rows.len(), &mut |a, b| {
            cb.is_before(&rows[a as usize], &rows[b as usize])
        })
    }
}

impl<Row, C, K: ?Sized> IndexFind<Row, K> for TreeIndex<C>
where
    C: TreeLookup<Row, K>,
{
    fn find(&self, rows: &[Row], key: &K) -> Option<usize> {
        let search = PredicateKey(|slot: u32| self.cb.row_is_before(&rows[slot as usize], key));
        let cursor = self.tree.search(&search);
        match self.tree.cursor_slot(cursor).get() {
            Some(slot) if self.cb.key_matches(&rows[slot as usize], key) => Some(slot as usize),
            _ => None,
        }
    }
}

/// Slots of rows in key order.
pub struct TreeSlots<'a> {
    inner: btree::RawRange<'a>,
}

impl Iterator for TreeSlots<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.inner.next().map(|slot| slot as usize)
    }
}

impl<Row, C, K: ?Sized> IndexRange<Row, K> for TreeIndex<C>
where
    C: TreeLookup<Row, K>,
{
    type Iter<'a>
        = TreeSlots<'a>
    where
        Self: 'a;

    fn range<'a>(&'a self, rows: &[Row], begin: &K, end: &K) -> TreeSlots<'a> {
        let b = self
            .tree
            .search(&PredicateKey(|slot: u32| {
                self.cb.row_is_before(&rows[slot as usize], begin)
            }));
        let e = self
            .tree
            .search(&PredicateKey(|slot: u32| {
                self.cb.row_is_before(&rows[slot as usize], end)
            }));
        TreeSlots {
            inner: self.tree.iter_range(b, e),
        }
    }
}

impl<C> IndexOrdered for TreeIndex<C> {
    type Iter<'a>
        = TreeSlots<'a>
    where
        Self: 'a;

    fn ordered(&self) -> TreeSlots<'_> {
        TreeSlots {
            inner: self.tree.iter_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ByValue;

    impl TreeCallbacks<u64> for ByValue {
        fn is_before(&self, a: &u64, b: &u64) -> bool {
            a < b
        }

        fn matches(&self, a: &u64, b: &u64) -> bool {
            a == b
        }
    }

    fn filled(index: &mut TreeIndex<ByValue>, rows: &[u64]) {
        for pos in 0..rows.len() {
            assert_eq!(index.insert(rows, pos), None);
        }
    }

    #[test]
    fn ordered_yields_key_order() {
        let rows = vec![5u64, 2, 8, 1, 3, 7, 6, 4];
        let mut index = TreeIndex::<ByValue>::default();
        filled(&mut index, &rows);

        let values: Vec<u64> = index.ordered().map(|s| rows[s]).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        index.verify(&rows).unwrap();
    }

    #[test]
    fn range_is_half_open() {
        let rows = vec![5u64, 2, 8, 1, 3, 7, 6, 4];
        let mut index = TreeIndex::<ByValue>::default();
        filled(&mut index, &rows);

        let values: Vec<u64> = index.range(&rows, &3, &7).map(|s| rows[s]).collect();
        assert_eq!(values, vec![3, 4, 5, 6]);

        // Bounds that match no row still bracket correctly.
        let values: Vec<u64> = index.range(&rows, &0, &100).map(|s| rows[s]).collect();
        assert_eq!(values.len(), 8);
    }

    #[test]
    fn find_and_duplicates() {
        let mut rows = vec![10u64, 30, 20];
        let mut index = TreeIndex::<ByValue>::default();
        filled(&mut index, &rows);

        assert_eq!(index.find(&rows, &20), Some(2));
        assert_eq!(index.find(&rows, &25), None);

        rows.push(30);
        assert_eq!(index.insert(&rows, 3), Some(1));
    }

    #[test]
    fn erase_and_renumber() {
        let rows = vec![10u64, 20, 30, 40];
        let mut index = TreeIndex::<ByValue>::default();
        filled(&mut index, &rows);

        // Compaction protocol for erasing slot 1: drop it, then slot 3
        // becomes slot 1.
        index.erase(&rows, 1);
        index.move_row(&rows, 3, 1);
        let rows = vec![10u64, 40, 30];
        assert_eq!(index.find(&rows, &40), Some(1));
        let values: Vec<u64> = index.ordered().map(|s| rows[s]).collect();
        assert_eq!(values, vec![10, 30, 40]);
        index.verify(&rows).unwrap();
    }
}
