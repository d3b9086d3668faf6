//! Sparse, page-structured address -> label-set map (component B).
//!
//! Keys are partitioned into three fixed-width slices (`(l0, l1, l2)` bits,
//! most-significant first); each slice indexes one level of the tree.
//! Unwritten subtrees are simply absent `None` entries, so a directory over
//! a 64-bit space costs nothing until something is actually tainted.

use crate::label::LabelSet;

/// A three-level sparse directory keyed on `l0 + l1 + l2` address bits.
pub struct ShadowDirectory {
    l1_bits: u32,
    l2_bits: u32,
    root: Vec<Option<Box<L1Table>>>,
    occupancy: usize,
}

type L1Table = Vec<Option<Box<Page>>>;
type Page = Vec<Option<LabelSet>>;

impl ShadowDirectory {
    /// `l0`, `l1`, `l2` are the bit widths of each partition,
    /// most-significant first; together they must not exceed 64.
    pub fn new(l0: u32, l1: u32, l2: u32) -> Self {
        assert!(l0 + l1 + l2 <= 64, "directory address space exceeds 64 bits");
        Self {
            l1_bits: l1,
            l2_bits: l2,
            root: (0..(1u64 << l0)).map(|_| None).collect(),
            occupancy: 0,
        }
    }

    fn split(&self, addr: u64) -> (usize, usize, usize) {
        let i2 = (addr & ((1u64 << self.l2_bits) - 1)) as usize;
        let rest = addr >> self.l2_bits;
        let i1 = (rest & ((1u64 << self.l1_bits) - 1)) as usize;
        let i0 = (rest >> self.l1_bits) as usize;
        (i0, i1, i2)
    }

    /// Returns a shared handle to the label set at `addr`, or `None` if
    /// the byte is untainted.
    pub fn find(&self, addr: u64) -> Option<LabelSet> {
        let (i0, i1, i2) = self.split(addr);
        self.root
            .get(i0)?
            .as_ref()?
            .get(i1)?
            .as_ref()?
            .get(i2)?
            .clone()
    }

    /// Stores a shared reference at `addr`, releasing any prior occupant.
    pub fn add(&mut self, addr: u64, ls: LabelSet) {
        let (i0, i1, i2) = self.split(addr);
        let l1 = self.root[i0].get_or_insert_with(|| {
            Box::new((0..(1u64 << self.l1_bits)).map(|_| None).collect())
        });
        let page = l1[i1].get_or_insert_with(|| {
            Box::new((0..(1u64 << self.l2_bits)).map(|_| None).collect())
        });
        if page[i2].is_none() {
            self.occupancy += 1;
        }
        page[i2] = Some(ls);
    }

    /// Releases any occupant at `addr`. A no-op if the byte was already
    /// untainted.
    pub fn remove(&mut self, addr: u64) {
        let (i0, i1, i2) = self.split(addr);
        if let Some(Some(l1)) = self.root.get_mut(i0) {
            if let Some(Some(page)) = l1.get_mut(i1) {
                if page[i2].take().is_some() {
                    self.occupancy -= 1;
                }
            }
        }
    }

    /// Number of occupied bytes, maintained incrementally on every
    /// `add`/`remove` so this is O(1).
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }
}
