mod hash_index;
mod insertion_order;
mod tree_index;

use derive_more::{Display, Error};

pub use hash_index::{HashCallbacks, HashIndex, HashLookup};
pub use insertion_order::{InsertionOrderIndex, InsertionOrderIter};
pub use tree_index::{TreeCallbacks, TreeIndex, TreeLookup, TreeSlots};

/// The capability set every table index must provide.
///
/// All operations receive the current row slice and speak in slot numbers.
/// `erase` and `move_row` run inside erase transactions and during rollback,
/// so they must not fail; a probe that cannot locate the entry it was told
/// exists reports through the inconsistency hook and returns.
pub trait TableIndex<Row> {
    /// Capacity hint: the table expects to hold `size` rows in total.
    fn reserve(&mut self, size: usize);

    /// Drops every slot reference, keeping allocations where convenient.
    fn clear(&mut self);

    /// Records the newly appended row at `pos`. If this index defines
    /// equivalence and an existing row matches, returns that row's slot
    /// without recording anything; the table will roll the insertion back.
    fn insert(&mut self, rows: &[Row], pos: usize) -> Option<usize>;

    /// Removes the reference to `pos`. Must not fail: this runs during
    /// rollback of a partially applied insertion.
    fn erase(&mut self, rows: &[Row], pos: usize);

    /// The row at `old_pos` is about to become `new_pos` (store compaction).
    /// Must not fail.
    fn move_row(&mut self, rows: &[Row], old_pos: usize, new_pos: usize);

    /// Audits this index against the row store.
    fn verify(&self, rows: &[Row]) -> Result<(), Inconsistency>;
}

/// Exact-match lookup by a key type `K`, which need not be a full row.
pub trait IndexFind<Row, K: ?Sized> {
    fn find(&self, rows: &[Row], key: &K) -> Option<usize>;
}

/// Ordered subrange lookup; yields slots of rows in `[begin, end)`.
pub trait IndexRange<Row, K: ?Sized> {
    type Iter<'a>: Iterator<Item = usize> + 'a
    where
        Self: 'a;

    fn range<'a>(&'a self, rows: &[Row], begin: &K, end: &K) -> Self::Iter<'a>;
}

/// Ordered iteration over every indexed slot.
pub trait IndexOrdered {
    type Iter<'a>: Iterator<Item = usize> + 'a
    where
        Self: 'a;

    fn ordered(&self) -> Self::Iter<'_>;
}

/// Structural corruption detected by an index self-audit.
#[derive(Debug, Display, Error)]
#[display("{_0}")]
pub struct Inconsistency(#[error(not(source))] pub(crate) String);

/// A fixed, ordered list of indexes maintained over one row store.
///
/// Implemented for tuples of [`TableIndex`] values. The transaction loops in
/// the table address members positionally through `nth`/`nth_mut`; typed
/// access for find/range/ordered goes through [`IndexAt`].
pub trait IndexList<Row> {
    const LEN: usize;

    fn nth(&self, n: usize) -> &dyn TableIndex<Row>;
    fn nth_mut(&mut self, n: usize) -> &mut dyn TableIndex<Row>;
}

/// Typed access to the `N`th member of an index list.
pub trait IndexAt<const N: usize> {
    type Index;

    fn index_at(&self) -> &Self::Index;
    fn index_at_mut(&mut self) -> &mut Self::Index;
}

impl<Row> IndexList<Row> for () {
    const LEN: usize = 0;

    fn nth(&self, n: usize) -> &dyn TableIndex<Row> {
        unreachable!("index {n} out of range for empty index list")
    }

    fn nth_mut(&mut self, n: usize) -> &mut dyn TableIndex<Row> {
        unreachable!("index {n} out of range for empty index list")
    }
}

macro_rules! index_list_impls {
    ($($len:literal => ($($t:ident $n:tt),+);)+) => {$(
        impl<Row, $($t),+> IndexList<Row> for ($($t,)+)
        where
            $($t: TableIndex<Row>,)+
        {
            const LEN: usize = $len;

            fn nth(&self, n: usize) -> &dyn TableIndex<Row> {
                match n {
                    $($n => &self.$n,)+
                    _ => unreachable!("index {n} out of range"),
                }
            }

            fn nth_mut(&mut self, n: usize) -> &mut dyn TableIndex<Row> {
                match n {
                    $($n => &mut self.$n,)+
                    _ => unreachable!("index {n} out of range"),
                }
            }
        }
    )+};
}

index_list_impls! {
    1 => (A 0);
    2 => (A 0, B 1);
    3 => (A 0, B 1, C 2);
    4 => (A 0, B 1, C 2, D 3);
}

macro_rules! index_at_impls {
    ($((($($t:ident),+) , $pos:literal , $pick:ident , $field:tt);)+) => {$(
        impl<$($t),+> IndexAt<$pos> for ($($t,)+) {
            type Index = $pick;

            fn index_at(&self) -> &$pick {
                &self.$field
            }

            fn index_at_mut(&mut self) -> &mut $pick {
                &mut self.$field
            }
        }
    )+};
}

index_at_impls! {
    ((A), 0, A, 0);
    ((A, B), 0, A, 0);
    ((A, B), 1, B, 1);
    ((A, B, C), 0, A, 0);
    ((A, B, C), 1, B, 1);
    ((A, B, C), 2, C, 2);
    ((A, B, C, D), 0, A, 0);
    ((A, B, C, D), 1, B, 1);
    ((A, B, C, D), 2, C, 2);
    ((A, B, C, D), 3, D, 3);
}
