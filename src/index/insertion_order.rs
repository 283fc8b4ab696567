//! Insertion-order index.
//!
//! A doubly linked list threaded over row slots. Link position 0 is a
//! sentinel whose `next` points at the first live slot and whose `prev`
//! points at the last; a live row at slot `p` occupies link position
//! `p + 1`. The index defines no equivalence, so it never rejects an
//! insertion; it exists to give `ordered()` a deterministic
//! order-of-insertion traversal that survives store compaction.

use crate::index::{Inconsistency, IndexOrdered, TableIndex};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Link {
    next: u32,
    prev: u32,
}

/// Index that records the order rows were inserted in.
#[derive(Debug, Default)]
pub struct InsertionOrderIndex {
    links: Vec<Link>,
}

impl InsertionOrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure link position `l` exists. Slots vacated by erasure leave
    /// stale link entries behind; they are overwritten on reuse.
    fn ensure(&mut self, l: usize) {
        if self.links.is_empty() {
            self.links.push(Link::default());
        }
        if self.links.len() <= l {
            self.links.resize(l + 1, Link::default());
        }
    }
}

impl<Row> TableIndex<Row> for InsertionOrderIndex {
    fn reserve(&mut self, size: usize) {
        let target = size + 1;
        self.links
            .reserve(target.saturating_sub(self.links.len()));
    }

    fn clear(&mut self) {
        self.links.clear();
    }

    fn insert(&mut self, _rows: &[Row], pos: usize) -> Option<usize> {
        let l = pos + 1;
        self.ensure(l);
        let tail = self.links[0].prev;
        self.links[l] = Link { next: 0, prev: tail };
        self.links[tail as usize].next = l as u32;
        self.links[0].prev = l as u32;
        None
    }

    fn erase(&mut self, _rows: &[Row], pos: usize) {
        let l = pos + 1;
        if self.links.len() <= l {
            tracing::error!(pos, "insertion-order index erase of an unlinked slot");
            return;
        }
        let Link { next, prev } = self.links[l];
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.links[l] = Link::default();
    }

    fn move_row(&mut self, _rows: &[Row], old_pos: usize, new_pos: usize) {
        let lo = old_pos + 1;
        let ln = new_pos + 1;
        if self.links.len() <= lo {
            tracing::error!(old_pos, new_pos, "insertion-order index move of an unlinked slot");
            return;
        }
        self.ensure(ln);
        // Splice the new link position into the old one's place so the row
        // keeps its original position in insertion order.
        let Link { next, prev } = self.links[lo];
        self.links[ln] = Link { next, prev };
        self.links[prev as usize].next = ln as u32;
        self.links[next as usize].prev = ln as u32;
        self.links[lo] = Link::default();
    }

    fn verify(&self, rows: &[Row]) -> Result<(), Inconsistency> {
        if self.links.is_empty() {
            return if rows.is_empty() {
                Ok(())
            } else {
                Err(Inconsistency("no links but table is non-empty".into()))
            };
        }
        let mut seen = vec![false; rows.len()];
        let mut count = 0usize;
        let mut pos = self.links[0].next;
        while pos != 0 {
            if count >= rows.len() {
                return Err(Inconsistency("link cycle longer than table size".into()));
            }
            let slot = pos as usize - 1;
            if slot >= rows.len() {
                return Err(Inconsistency(format!(
                    "link references slot {slot} beyond table size {}",
                    rows.len()
                )));
            }
            if std::mem::replace(&mut seen[slot], true) {
                return Err(Inconsistency(format!("slot {slot} linked twice")));
            }
            let link = self.links[pos as usize];
            if self.links[link.next as usize].prev != pos {
                return Err(Inconsistency(format!(
                    "asymmetric links around position {pos}"
                )));
            }
            pos = link.next;
            count += 1;
        }
        if count != rows.len() {
            return Err(Inconsistency(format!(
                "traversal visited {count} slots of {}",
                rows.len()
            )));
        }
        Ok(())
    }
}

/// Forward traversal in insertion order, yielding slot numbers.
pub struct InsertionOrderIter<'a> {
    links: &'a [Link],
    pos: u32,
}

impl Iterator for InsertionOrderIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.pos == 0 {
            return None;
        }
        let slot = self.pos as usize - 1;
        self.pos = self.links[self.pos as usize].next;
        Some(slot)
    }
}

impl IndexOrdered for InsertionOrderIndex {
    type Iter<'a> = InsertionOrderIter<'a>;

    fn ordered(&self) -> InsertionOrderIter<'_> {
        InsertionOrderIter {
            links: &self.links,
            pos: self.links.first().map(|l| l.next).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ROWS: &[(); 0] = &[];

    fn rows(n: usize) -> Vec<()> {
        vec![(); n]
    }

    fn order(index: &InsertionOrderIndex) -> Vec<usize> {
        index.ordered().collect()
    }

    #[test]
    fn tracks_insertion_order() {
        let rows = rows(3);
        let mut index = InsertionOrderIndex::new();
        for pos in 0..3 {
            assert_eq!(index.insert(&rows[..], pos), None);
        }
        assert_eq!(order(&index), vec![0, 1, 2]);
        index.verify(&rows[..]).unwrap();
    }

    #[test]
    fn empty_iteration() {
        let index = InsertionOrderIndex::new();
        assert_eq!(order(&index), Vec::<usize>::new());
        index.verify(NO_ROWS).unwrap();
    }

    #[test]
    fn erase_unlinks() {
        let rows = rows(3);
        let mut index = InsertionOrderIndex::new();
        for pos in 0..3 {
            index.insert(&rows[..], pos);
        }
        index.erase(&rows[..], 1);
        assert_eq!(order(&index), vec![0, 2]);

        index.erase(&rows[..], 0);
        index.erase(&rows[..], 2);
        assert_eq!(order(&index), Vec::<usize>::new());
        index.verify(NO_ROWS).unwrap();
    }

    #[test]
    fn move_preserves_original_position() {
        // Simulate the compaction protocol: erase slot 0 of four rows, then
        // the last row (slot 3) is renumbered to slot 0. Insertion order
        // must stay 1, 2, 3-now-at-0.
        let r = rows(4);
        let mut index = InsertionOrderIndex::new();
        for pos in 0..4 {
            index.insert(&r[..], pos);
        }
        index.erase(&r[..], 0);
        index.move_row(&r[..], 3, 0);
        assert_eq!(order(&index), vec![1, 2, 0]);
        index.verify(&rows(3)[..]).unwrap();
    }

    #[test]
    fn reinsertion_at_reused_slot_appends() {
        let r = rows(2);
        let mut index = InsertionOrderIndex::new();
        index.insert(&r[..], 0);
        index.insert(&r[..], 1);
        index.erase(&r[..], 0);
        index.move_row(&r[..], 1, 0);
        // Slot 1 is vacated; a fresh row reusing it goes to the tail.
        index.insert(&r[..], 1);
        assert_eq!(order(&index), vec![0, 1]);
        index.verify(&r[..]).unwrap();
    }
}
