//! Hash index.
//!
//! An open-addressing, linear-probing table of `(hash, slot)` buckets. Each
//! bucket caches the row's 32-bit hash so rows are hashed exactly once:
//! rehashing and equality pre-filtering work from the cached value, and the
//! user's `matches` callback only runs when hashes already agree. Slot
//! numbers are biased by two inside buckets so that zero means "empty" and
//! one means "tombstone", letting a zeroed allocation start out fully empty.
//!
//! The bucket count is always a power of two, so the probe position is
//! `hash & (len - 1)` and wraparound is a mask. Use a high-quality hash
//! function; clustered hash codes degrade linear probing badly.

use crate::index::{Inconsistency, TableIndex};

/// Hashing and equivalence callbacks for a [`HashIndex`] over `Row`.
///
/// Matching rows must return equal hash codes. `hash_code` must be
/// deterministic: the index caches hash codes and probes by recomputing
/// them, so a row that hashes differently across calls silently corrupts
/// the index.
pub trait HashCallbacks<Row> {
    fn hash_code(&self, row: &Row) -> u32;
    fn matches(&self, a: &Row, b: &Row) -> bool;
}

/// Lookup-key support: lets `find` accept a key type `K` that is not a full
/// row, as long as the callbacks can hash it and compare it against rows.
/// Every callbacks bundle supports `K = Row` automatically.
pub trait HashLookup<Row, K: ?Sized>: HashCallbacks<Row> {
    fn key_hash_code(&self, key: &K) -> u32;
    fn key_matches(&self, row: &Row, key: &K) -> bool;
}

impl<Row, C> HashLookup<Row, Row> for C
where
    C: HashCallbacks<Row>,
{
    fn key_hash_code(&self, key: &Row) -> u32 {
        self.hash_code(key)
    }

    fn key_matches(&self, row: &Row, key: &Row) -> bool {
        self.matches(row, key)
    }
}

/// A bucket holds the cached hash and the slot number biased by two.
/// Value 0 is an empty bucket, 1 is a tombstone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct HashBucket {
    hash: u32,
    value: u32,
}

impl HashBucket {
    const EMPTY: HashBucket = HashBucket { hash: 0, value: 0 };

    fn occupied(hash: u32, pos: usize) -> Self {
        HashBucket {
            hash,
            value: pos as u32 + 2,
        }
    }

    fn is_empty(self) -> bool {
        self.value == 0
    }

    fn is_erased(self) -> bool {
        self.value == 1
    }

    fn is_occupied(self) -> bool {
        self.value >= 2
    }

    fn is_pos(self, pos: usize) -> bool {
        self.value == pos as u32 + 2
    }

    fn pos(self) -> usize {
        debug_assert!(self.value >= 2);
        (self.value - 2) as usize
    }

    fn set_erased(&mut self) {
        self.value = 1;
    }

    fn set_pos(&mut self, pos: usize) {
        self.value = pos as u32 + 2;
    }
}

const MIN_BUCKETS: usize = 16;

/// Unique hash index over table rows.
#[derive(Debug)]
pub struct HashIndex<C> {
    cb: C,
    erased_count: usize,
    buckets: Vec<HashBucket>,
}

impl<C: Default> Default for HashIndex<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C> HashIndex<C> {
    pub fn new(cb: C) -> Self {
        Self {
            cb,
            erased_count: 0,
            buckets: Vec::new(),
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.cb
    }

    /// Re-buckets into a fresh power-of-two array with at least
    /// `min_buckets` buckets, re-inserting occupied entries by their cached
    /// hash and dropping tombstones. User callbacks are never invoked.
    fn rehash(&mut self, min_buckets: usize) {
        let count = min_buckets.max(MIN_BUCKETS).next_power_of_two();
        let mask = count - 1;
        let mut buckets = vec![HashBucket::EMPTY; count];
        for bucket in &self.buckets {
            if bucket.is_occupied() {
                let mut i = bucket.hash as usize & mask;
                while !buckets[i].is_empty() {
                    i = (i + 1) & mask;
                }
                buckets[i] = *bucket;
            }
        }
        self.buckets = buckets;
        self.erased_count = 0;
    }
}

impl<Row, C> TableIndex<Row> for HashIndex<C>
where
    C: HashCallbacks<Row>,
{
    fn reserve(&mut self, size: usize) {
        if self.buckets.len() < size * 2 {
            self.rehash(size * 2);
        }
    }

    fn clear(&mut self) {
        self.buckets.fill(HashBucket::EMPTY);
        self.erased_count = 0;
    }

    fn insert(&mut self, rows: &[Row], pos: usize) -> Option<usize> {
        if self.buckets.len() * 2 < (rows.len() + self.erased_count) * 3 {
            // Load factor above 2/3 counting tombstones.
            self.rehash((self.buckets.len() * 2).max(rows.len() * 2));
        }

        let hash = self.cb.hash_code(&rows[pos]);
        let mask = self.buckets.len() - 1;
        let mut i = hash as usize & mask;
        let mut erased_slot = None;
        loop {
            let bucket = self.buckets[i];
            if bucket.is_empty() {
                // No duplicate anywhere in the probe run; reuse the first
                // tombstone seen, if any.
                match erased_slot {
                    Some(e) => {
                        self.erased_count -= 1;
                        self.buckets[e] = HashBucket::occupied(hash, pos);
                    }
                    None => self.buckets[i] = HashBucket::occupied(hash, pos),
                }
                return None;
            } else if bucket.is_erased() {
                if erased_slot.is_none() {
                    erased_slot = Some(i);
                }
            } else if bucket.hash == hash && self.cb.matches(&rows[bucket.pos()], &rows[pos]) {
                return Some(bucket.pos());
            }
            i = (i + 1) & mask;
        }
    }

    fn erase(&mut self, rows: &[Row], pos: usize) {
        if self.buckets.is_empty() {
            tracing::error!("hash index erase on an empty bucket array");
            return;
        }
        let hash = self.cb.hash_code(&rows[pos]);
        let mask = self.buckets.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            let bucket = &mut self.buckets[i];
            if bucket.is_pos(pos) {
                bucket.set_erased();
                self.erased_count += 1;
                return;
            } else if bucket.is_empty() {
                tracing::error!(pos, "hash index probe hit an empty bucket while erasing");
                return;
            }
            i = (i + 1) & mask;
        }
    }

    fn move_row(&mut self, rows: &[Row], old_pos: usize, new_pos: usize) {
        if self.buckets.is_empty() {
            tracing::error!("hash index move on an empty bucket array");
            return;
        }
        let hash = self.cb.hash_code(&rows[old_pos]);
        let mask = self.buckets.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            let bucket = &mut self.buckets[i];
            if bucket.is_pos(old_pos) {
                bucket.set_pos(new_pos);
                return;
            } else if bucket.is_empty() {
                tracing::error!(
                    old_pos,
                    new_pos,
                    "hash index probe hit an empty bucket while renumbering"
                );
                return;
            }
            i = (i + 1) & mask;
        }
    }

    fn verify(&self, rows: &[Row]) -> Result<(), Inconsistency> {
        let mask = match self.buckets.len() {
            0 if rows.is_empty() => return Ok(()),
            0 => return Err(Inconsistency("no buckets but table is non-empty".into())),
            n => n - 1,
        };

        let mut seen = vec![false; rows.len()];
        let mut occupied = 0usize;
        let mut erased = 0usize;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.is_erased() {
                erased += 1;
                continue;
            }
            if !bucket.is_occupied() {
                continue;
            }
            occupied += 1;
            let pos = bucket.pos();
            if pos >= rows.len() {
                return Err(Inconsistency(format!(
                    "bucket {i} references slot {pos} beyond table size {}",
                    rows.len()
                )));
            }
            if std::mem::replace(&mut seen[pos], true) {
                return Err(Inconsistency(format!("slot {pos} referenced twice")));
            }
            if bucket.hash != self.cb.hash_code(&rows[pos]) {
                return Err(Inconsistency(format!("stale cached hash for slot {pos}")));
            }
            // The probe run from the bucket's home position must reach it
            // without crossing an empty bucket, or lookups will miss it.
            let mut j = bucket.hash as usize & mask;
            while j != i {
                if self.buckets[j].is_empty() {
                    return Err(Inconsistency(format!(
                        "slot {pos} unreachable: probe run broken at bucket {j}"
                    )));
                }
                j = (j + 1) & mask;
            }
        }
        if occupied != rows.len() {
            return Err(Inconsistency(format!(
                "{occupied} occupied buckets for {} rows",
                rows.len()
            )));
        }
        if erased != self.erased_count {
            return Err(Inconsistency(format!(
                "tombstone count {erased} does not match recorded {}",
                self.erased_count
            )));
        }
        Ok(())
    }
}

impl<Row, C, K: ?Sized> crate::index::IndexFind<Row, K> for HashIndex<C>
where
    C: HashLookup<Row, K>,
{
    fn find(&self, rows: &[Row], key: &K) -> Option<usize> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.cb.key_hash_code(key);
        let mask = self.buckets.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            let bucket = self.buckets[i];
            if bucket.is_empty() {
                return None;
            } else if bucket.is_occupied()
                && bucket.hash == hash
                && self.cb.key_matches(&rows[bucket.pos()], key)
            {
                return Some(bucket.pos());
            }
            // Tombstones are skipped; they must not terminate the probe.
            i = (i + 1) & mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexFind;

    fn fnv1a(bytes: &[u8]) -> u32 {
        let mut hash = 0x811c_9dc5u32;
        for &b in bytes {
            hash ^= b as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        hash
    }

    #[derive(Default)]
    struct StrCallbacks;

    impl HashCallbacks<String> for StrCallbacks {
        fn hash_code(&self, row: &String) -> u32 {
            fnv1a(row.as_bytes())
        }

        fn matches(&self, a: &String, b: &String) -> bool {
            a == b
        }
    }

    impl HashLookup<String, str> for StrCallbacks {
        fn key_hash_code(&self, key: &str) -> u32 {
            fnv1a(key.as_bytes())
        }

        fn key_matches(&self, row: &String, key: &str) -> bool {
            row == key
        }
    }

    /// All rows collide on purpose so probe runs get exercised.
    #[derive(Default)]
    struct CollidingCallbacks;

    impl HashCallbacks<u64> for CollidingCallbacks {
        fn hash_code(&self, _row: &u64) -> u32 {
            7
        }

        fn matches(&self, a: &u64, b: &u64) -> bool {
            a == b
        }
    }

    fn store(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn insert_all(index: &mut HashIndex<StrCallbacks>, rows: &[String]) {
        for pos in 0..rows.len() {
            assert_eq!(index.insert(rows, pos), None);
        }
    }

    #[test]
    fn insert_and_find() {
        let rows = store(&["ab", "cd", "ef"]);
        let mut index = HashIndex::<StrCallbacks>::default();
        insert_all(&mut index, &rows);

        assert_eq!(index.find(&rows, "cd"), Some(1));
        assert_eq!(index.find(&rows, &"ef".to_string()), Some(2));
        assert_eq!(index.find(&rows, "zz"), None);
        index.verify(&rows).unwrap();
    }

    #[test]
    fn duplicate_reports_existing_slot() {
        let mut rows = store(&["ab", "cd"]);
        let mut index = HashIndex::<StrCallbacks>::default();
        insert_all(&mut index, &rows);

        rows.push("cd".to_string());
        assert_eq!(index.insert(&rows, 2), Some(1));
    }

    #[test]
    fn find_on_empty_index() {
        let rows: Vec<String> = Vec::new();
        let index = HashIndex::<StrCallbacks>::default();
        assert_eq!(index.find(&rows, "ab"), None);
        index.verify(&rows).unwrap();
    }

    #[test]
    fn erase_leaves_tombstone_probe_runs_intact() {
        let rows: Vec<u64> = (0..8).collect();
        let mut index = HashIndex::<CollidingCallbacks>::default();
        for pos in 0..rows.len() {
            assert_eq!(index.insert(&rows, pos), None);
        }

        // Erase from the middle of the probe run; later entries must stay
        // reachable through the tombstone.
        index.erase(&rows, 3);
        for pos in [0, 1, 2, 4, 5, 6, 7] {
            assert_eq!(index.find(&rows, &rows[pos]), Some(pos));
        }
        assert_eq!(index.find(&rows, &3), None);
    }

    #[test]
    fn tombstone_is_reused_without_breaking_probes() {
        let mut rows: Vec<u64> = (0..6).collect();
        let mut index = HashIndex::<CollidingCallbacks>::default();
        for pos in 0..rows.len() {
            assert_eq!(index.insert(&rows, pos), None);
        }

        index.erase(&rows, 2);
        rows[2] = 100;
        assert_eq!(index.insert(&rows, 2), None);
        for pos in 0..rows.len() {
            assert_eq!(index.find(&rows, &rows[pos]), Some(pos));
        }
        index.verify(&rows).unwrap();
    }

    #[test]
    fn move_row_renumbers_reference() {
        let rows = store(&["ab", "cd", "ef"]);
        let mut index = HashIndex::<StrCallbacks>::default();
        insert_all(&mut index, &rows);

        // Pretend "ef" moved from slot 2 to slot 1 (compaction after
        // erasing "cd").
        index.erase(&rows, 1);
        index.move_row(&rows, 2, 1);
        let rows = store(&["ab", "ef"]);
        assert_eq!(index.find(&rows, "ef"), Some(1));
        assert_eq!(index.find(&rows, "ab"), Some(0));
        index.verify(&rows).unwrap();
    }

    #[test]
    fn grows_past_load_factor() {
        let rows: Vec<String> = (0..200).map(|i| format!("row-{i}")).collect();
        let mut index = HashIndex::<StrCallbacks>::default();
        insert_all(&mut index, &rows);

        for (pos, row) in rows.iter().enumerate() {
            assert_eq!(index.find(&rows, row), Some(pos));
        }
        index.verify(&rows).unwrap();
        // Load factor stays at or below 2/3.
        assert!(index.buckets.len() * 2 >= rows.len() * 3);
    }

    #[test]
    fn reserve_sizes_buckets_up_front() {
        let mut index = HashIndex::<StrCallbacks>::default();
        TableIndex::<String>::reserve(&mut index, 100);
        let buckets = index.buckets.len();
        assert!(buckets >= 200);

        let rows: Vec<String> = (0..100).map(|i| format!("row-{i}")).collect();
        insert_all(&mut index, &rows);
        assert_eq!(index.buckets.len(), buckets);
    }

    #[test]
    fn clear_keeps_allocation() {
        let rows = store(&["ab", "cd"]);
        let mut index = HashIndex::<StrCallbacks>::default();
        insert_all(&mut index, &rows);

        let buckets = index.buckets.len();
        TableIndex::<String>::clear(&mut index);
        assert_eq!(index.buckets.len(), buckets);
        assert_eq!(index.find(&rows, "ab"), None);
        index.verify(&[]).unwrap();
    }
}
