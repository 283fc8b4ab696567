pub mod in_memory;
mod index;
mod table;
pub mod util;

pub use index::{
    HashCallbacks, HashIndex, HashLookup, Inconsistency, IndexAt, IndexFind, IndexList,
    IndexOrdered, IndexRange, InsertionOrderIndex, InsertionOrderIter, TableIndex, TreeCallbacks,
    TreeIndex, TreeLookup, TreeSlots,
};
pub use table::{RowTable, TableError};

pub mod prelude {
    pub use crate::in_memory::RowStore;
    pub use crate::util::MaybeSlot;
    pub use crate::{
        HashCallbacks, HashIndex, HashLookup, InsertionOrderIndex, RowTable, TableError,
        TableIndex, TreeCallbacks, TreeIndex, TreeLookup,
    };
}
