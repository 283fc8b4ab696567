//! The table orchestrator.
//!
//! [`RowTable`] binds a [`RowStore`] to a fixed list of indexes and keeps
//! them consistent through every mutation. Rows are stored once; indexes
//! hold only slot numbers. Iteration order over the store is deterministic:
//! insertion order until something is erased, after which the erase
//! protocol moves the current last row into the vacated slot.
//!
//! Insertion is transactional. The row is appended to the store, then
//! offered to each index in declaration order; the first index that reports
//! a duplicate (or panics from a user callback) causes the indexes already
//! updated to be unwound in reverse and the append undone, leaving the
//! table exactly as it was. Erasure mirrors insertion and additionally
//! notifies every index of the compaction renumbering; the index-side
//! operations on that path must not fail.
//!
//! Every mutation invalidates outstanding row references and iterators,
//! which the borrow checker enforces. Mutating key fields of a row obtained
//! through `get_mut`/`find_mut`/`iter_mut` silently corrupts the indexes
//! that key those fields; prefer erasing and re-inserting.

use std::mem;

use derive_more::{Display, Error};

use crate::in_memory::RowStore;
use crate::index::{
    Inconsistency, IndexAt, IndexFind, IndexList, IndexOrdered, IndexRange, TableIndex,
};

#[derive(Debug, Display, Error)]
pub enum TableError {
    /// An index reported an existing row matching the one being inserted.
    /// The payload is the position of the rejecting index.
    #[display("row duplicates an existing row in index {_0}")]
    DuplicateRow(#[error(not(source))] usize),

    /// An index failed its self-audit.
    #[display("index {index} is corrupted: {source}")]
    Corrupted {
        index: usize,
        source: Inconsistency,
    },
}

/// An in-memory table of `Row` kept consistent with the index list `I`.
///
/// `I` is a tuple of index values, e.g.
/// `(HashIndex<C1>, TreeIndex<C2>, InsertionOrderIndex)`. Methods that
/// address a single index take its tuple position as a const generic:
/// `table.find::<0, _>(&key)`.
///
/// Tables hold at most 2³⁰ rows; indexes pack slot numbers into 32 bits.
#[derive(Debug)]
pub struct RowTable<Row, I> {
    store: RowStore<Row>,
    indexes: I,
}

impl<Row, I: IndexList<Row> + Default> Default for RowTable<Row, I> {
    fn default() -> Self {
        Self::new(I::default())
    }
}

impl<Row, I: IndexList<Row>> RowTable<Row, I> {
    pub fn new(indexes: I) -> Self {
        Self {
            store: RowStore::new(),
            indexes,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Pre-allocates the store and every index for `size` rows in total.
    pub fn reserve(&mut self, size: usize) {
        self.store.reserve(size);
        for n in 0..I::LEN {
            self.indexes.nth_mut(n).reserve(size);
        }
    }

    pub fn clear(&mut self) {
        for n in 0..I::LEN {
            self.indexes.nth_mut(n).clear();
        }
        self.store.clear();
    }

    /// Rows in slot order.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.store.iter()
    }

    /// Mutable rows in slot order. Key fields must not be modified.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Row> {
        self.store.iter_mut()
    }

    pub fn get(&self, pos: usize) -> Option<&Row> {
        self.store.get(pos)
    }

    /// The row at `pos`. Key fields must not be modified.
    pub fn get_mut(&mut self, pos: usize) -> Option<&mut Row> {
        self.store.get_mut(pos)
    }

    /// Inserts a new row, or reports a duplicate and leaves the table
    /// unchanged.
    pub fn insert(&mut self, row: Row) -> Result<&mut Row, TableError> {
        let pos = self.store.push(row);
        match Self::offer_to_indexes(&mut self.store, &mut self.indexes, pos) {
            Ok(()) => Ok(self.store.get_mut(pos).expect("row was just appended")),
            Err((index, _existing)) => {
                self.store.remove_last();
                Err(TableError::DuplicateRow(index))
            }
        }
    }

    /// Inserts every row of a collection, stopping at the first duplicate.
    pub fn insert_all<It>(&mut self, rows: It) -> Result<(), TableError>
    where
        It: IntoIterator<Item = Row>,
    {
        let iter = rows.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len() + lower);
        for row in iter {
            self.insert(row)?;
        }
        Ok(())
    }

    /// Inserts `row`, or if some index reports a duplicate at slot `q`,
    /// calls `update(&mut table[q], row)` instead. Returns the surviving
    /// row. Never reports a duplicate.
    pub fn upsert<F>(&mut self, row: Row, update: F) -> &mut Row
    where
        F: FnOnce(&mut Row, Row),
    {
        let pos = self.store.push(row);
        match Self::offer_to_indexes(&mut self.store, &mut self.indexes, pos) {
            Ok(()) => self.store.get_mut(pos).expect("row was just appended"),
            Err((_index, existing)) => {
                // No index recorded the new row; drop it from the store
                // before touching the existing one so a panicking update
                // callback cannot leave an unindexed row behind.
                let new_row = self.store.remove_last().expect("row was just appended");
                let target = self
                    .store
                    .get_mut(existing)
                    .expect("duplicate slot is live");
                update(target, new_row);
                target
            }
        }
    }

    /// Offers the appended row at `pos` to every index in declaration
    /// order. On a duplicate, already-updated indexes are unwound in
    /// reverse and the row is left at the store's tail for the caller.
    /// If an index or a user callback panics, the unwind additionally
    /// removes the appended row, restoring the pre-call state.
    fn offer_to_indexes(
        store: &mut RowStore<Row>,
        indexes: &mut I,
        pos: usize,
    ) -> Result<(), (usize, usize)> {
        struct Unwind<'a, Row, L: IndexList<Row> + ?Sized> {
            store: &'a mut RowStore<Row>,
            indexes: &'a mut L,
            pos: usize,
            done: usize,
        }

        impl<Row, L: IndexList<Row> + ?Sized> Drop for Unwind<'_, Row, L> {
            fn drop(&mut self) {
                for n in (0..self.done).rev() {
                    self.indexes.nth_mut(n).erase(self.store.as_slice(), self.pos);
                }
                self.store.remove_last();
            }
        }

        let mut guard = Unwind {
            store,
            indexes,
            pos,
            done: 0,
        };
        while guard.done < I::LEN {
            let n = guard.done;
            if let Some(existing) = guard
                .indexes
                .nth_mut(n)
                .insert(guard.store.as_slice(), guard.pos)
            {
                for m in (0..n).rev() {
                    guard.indexes.nth_mut(m).erase(guard.store.as_slice(), guard.pos);
                }
                mem::forget(guard);
                return Err((n, existing));
            }
            guard.done = n + 1;
        }
        mem::forget(guard);
        Ok(())
    }

    /// Looks up a row through index `N`.
    pub fn find<const N: usize, K: ?Sized>(&self, key: &K) -> Option<&Row>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexFind<Row, K>,
    {
        self.find_pos::<N, K>(key).map(|pos| &self.store.as_slice()[pos])
    }

    /// Like `find`, but mutable. Key fields must not be modified.
    pub fn find_mut<const N: usize, K: ?Sized>(&mut self, key: &K) -> Option<&mut Row>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexFind<Row, K>,
    {
        let pos = self.find_pos::<N, K>(key)?;
        self.store.get_mut(pos)
    }

    /// The slot of the row matching `key` in index `N`.
    pub fn find_pos<const N: usize, K: ?Sized>(&self, key: &K) -> Option<usize>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexFind<Row, K>,
    {
        self.indexes.index_at().find(self.store.as_slice(), key)
    }

    /// Rows with keys in `[begin, end)`, in index `N`'s order.
    pub fn range<const N: usize, K: ?Sized>(
        &self,
        begin: &K,
        end: &K,
    ) -> impl Iterator<Item = &Row>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexRange<Row, K>,
    {
        let rows = self.store.as_slice();
        self.indexes
            .index_at()
            .range(rows, begin, end)
            .map(move |pos| &rows[pos])
    }

    /// Every row, in index `N`'s order.
    pub fn ordered<const N: usize>(&self) -> impl Iterator<Item = &Row>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexOrdered,
    {
        let rows = self.store.as_slice();
        self.indexes.index_at().ordered().map(move |pos| &rows[pos])
    }

    /// Erases the row at `pos` and returns it.
    ///
    /// Panics if `pos` is not an occupied slot. All outstanding slot
    /// numbers except the former last one remain valid; the former last
    /// row now lives at `pos`.
    pub fn erase(&mut self, pos: usize) -> Row {
        assert!(
            pos < self.store.len(),
            "slot {pos} is not a member of this table"
        );
        self.erase_pos(pos)
    }

    fn erase_pos(&mut self, pos: usize) -> Row {
        for n in 0..I::LEN {
            self.indexes.nth_mut(n).erase(self.store.as_slice(), pos);
        }
        let back = self.store.len() - 1;
        if pos != back {
            for n in 0..I::LEN {
                self.indexes
                    .nth_mut(n)
                    .move_row(self.store.as_slice(), back, pos);
            }
        }
        self.store.swap_remove(pos)
    }

    /// Erases the row matching `key` in index `N`, if any.
    pub fn erase_match<const N: usize, K: ?Sized>(&mut self, key: &K) -> bool
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexFind<Row, K>,
    {
        match self.find_pos::<N, K>(key) {
            Some(pos) => {
                self.erase_pos(pos);
                true
            }
            None => false,
        }
    }

    /// Erases every row with a key in `[begin, end)` per index `N`.
    /// Returns the number of rows erased.
    pub fn erase_range<const N: usize, K: ?Sized>(&mut self, begin: &K, end: &K) -> usize
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: IndexRange<Row, K>,
    {
        // The range iterator is invalidated by erasure, so the slots are
        // materialized first.
        let slots: Vec<usize> = self
            .indexes
            .index_at()
            .range(self.store.as_slice(), begin, end)
            .collect();
        self.erase_all(slots)
    }

    /// Erases the rows at the given slots, interpreted against the table
    /// state at the time of the call. Returns the number of rows erased.
    pub fn erase_all<P>(&mut self, positions: P) -> usize
    where
        P: IntoIterator<Item = usize>,
    {
        // Each erasure moves the last row into the vacated slot, so later
        // requested slots may have been displaced by earlier ones. Resolve
        // every requested slot against the erasures recorded so far before
        // executing any of them.
        let positions = positions.into_iter();
        let mut erased: Vec<usize> = Vec::with_capacity(positions.size_hint().0);
        let size = self.store.len();
        for mut pos in positions {
            while pos >= size - erased.len() {
                // The row that was at `pos` has been moved into the slot of
                // an earlier erasure; chase where it went.
                pos = erased[size - pos - 1];
            }
            erased.push(pos);
        }
        for &pos in &erased {
            self.erase_pos(pos);
        }
        erased.len()
    }

    /// Erases every row for which `predicate` returns true, scanning in
    /// slot order. Returns the number of rows erased.
    pub fn erase_all_if<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Row) -> bool,
    {
        let mut count = 0;
        let mut pos = 0;
        while pos < self.store.len() {
            if predicate(&self.store.as_slice()[pos]) {
                // The erased slot now holds the former last row; test it
                // before advancing.
                self.erase_pos(pos);
                count += 1;
            } else {
                pos += 1;
            }
        }
        count
    }

    /// Asks index `N` to audit itself against the row store.
    pub fn verify<const N: usize>(&self) -> Result<(), TableError>
    where
        I: IndexAt<N>,
        <I as IndexAt<N>>::Index: TableIndex<Row>,
    {
        self.indexes
            .index_at()
            .verify(self.store.as_slice())
            .map_err(|source| TableError::Corrupted { index: N, source })
    }

    /// Audits every index.
    pub fn verify_all(&self) -> Result<(), TableError> {
        for n in 0..I::LEN {
            self.indexes
                .nth(n)
                .verify(self.store.as_slice())
                .map_err(|source| TableError::Corrupted { index: n, source })?;
        }
        Ok(())
    }
}

impl<'a, Row, I: IndexList<Row>> IntoIterator for &'a RowTable<Row, I> {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
