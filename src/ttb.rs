//! Taint translation block: one entry basic block plus its successors
//! (component F).
//!
//! `CALL` operations hold an `Rc<TaintTranslationBlock>` pointing at a
//! callee, so TTBs form a DAG rather than a tree — never a cycle, since the
//! lifter is block-local and a TTB never calls itself.

use crate::op::TaintOpBuffer;

/// One basic block: its IR label (matched against `taken_branch` during
/// successor selection) and its own op buffer.
pub struct BasicBlock {
    pub label: i64,
    pub ops: TaintOpBuffer,
}

impl BasicBlock {
    pub fn new(label: i64, op_capacity: usize) -> Self {
        Self {
            label,
            ops: TaintOpBuffer::new(op_capacity),
        }
    }
}

/// A named unit of execution: one entry block plus zero or more successors.
pub struct TaintTranslationBlock {
    pub name: String,
    pub entry: BasicBlock,
    successors: Vec<BasicBlock>,
    successor_capacity: usize,
}

impl TaintTranslationBlock {
    /// `num_bbs` is the entry block plus its successors (`taint_tb_new`).
    /// `op_capacity` bounds each block's own op buffer.
    pub fn new(name: impl Into<String>, num_bbs: usize, op_capacity: usize) -> Self {
        assert!(num_bbs >= 1, "a TTB needs at least an entry block");
        Self {
            name: name.into(),
            entry: BasicBlock::new(0, op_capacity),
            successors: Vec::with_capacity(num_bbs - 1),
            successor_capacity: num_bbs - 1,
        }
    }

    pub fn set_entry_label(&mut self, label: i64) {
        self.entry.label = label;
    }

    /// Appends a successor block. Panics if this would exceed the count
    /// declared via `num_bbs` at construction.
    pub fn push_successor(&mut self, bb: BasicBlock) {
        assert!(
            self.successors.len() < self.successor_capacity,
            "TTB `{}`: successor count exceeds numBBs",
            self.name
        );
        self.successors.push(bb);
    }

    /// Finds the successor whose label matches `taken_branch`. Exactly one
    /// match is expected by the interpreter when one exists at all.
    pub fn find_successor(&self, label: i64) -> Option<&BasicBlock> {
        self.successors.iter().find(|bb| bb.label == label)
    }

    pub fn successors(&self) -> &[BasicBlock] {
        &self.successors
    }

    /// Explicit teardown, mirroring `taint_tb_cleanup`. Dropping `self`
    /// already releases every buffer and (through `Rc`) every callee TTB
    /// reachable via a `CALL`; this exists so call sites that mirror the
    /// reference's explicit free have something to call.
    pub fn cleanup(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_lookup_by_label() {
        let mut ttb = TaintTranslationBlock::new("blk", 3, 8);
        ttb.push_successor(BasicBlock::new(11, 8));
        ttb.push_successor(BasicBlock::new(22, 8));

        assert!(ttb.find_successor(11).is_some());
        assert!(ttb.find_successor(22).is_some());
        assert!(ttb.find_successor(99).is_none());
    }

    #[test]
    #[should_panic(expected = "successor count exceeds")]
    fn pushing_past_declared_count_panics() {
        let mut ttb = TaintTranslationBlock::new("blk", 1, 8);
        ttb.push_successor(BasicBlock::new(1, 8));
    }
}
