//! Taint operations and the fixed-size-record buffer that holds them
//! (component E).
//!
//! The reference implementation writes `TaintOp` records into a raw byte
//! buffer and re-reads them with a matching fixed-size decode; every record
//! is the same width regardless of kind. In Rust, an `enum` already gives us
//! that "fixed-size tagged record" for free, so [`TaintOp`] is the decoded
//! form directly — there is no separate wire encoding to round-trip through.
//! What the original buffer gives us beyond that is (a) a bounded capacity
//! the lifter can query via `full_frac` and (b) the *peek-and-patch* API the
//! fixup protocol needs to rewrite not-yet-read records in place without
//! moving the read cursor. [`TaintOpBuffer`] preserves both.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::addr::Addr;
use crate::label::Label;
use crate::ttb::TaintTranslationBlock;

/// Upper bound on non-default switch arms an `INSN_START` can carry.
pub const MAX_SWITCH_ARMS: usize = 16;
/// Upper bound on phi-node predecessor arms an `INSN_START` can carry.
pub const MAX_PHI_ARMS: usize = 16;

/// Which dynamic-log-resolved instruction shape an `INSN_START` introduces.
///
/// The reference implementation matches this against the log by string
/// equality (`strcmp(name, "load")`, ...); per the Open Question in
/// DESIGN.md we normalize that to an enum while preserving the exact set of
/// handled names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InsnKind {
    Load = 0,
    Store = 1,
    CondBranch = 2,
    Switch = 3,
    Select = 4,
    Phi = 5,
}

impl InsnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsnKind::Load => "load",
            InsnKind::Store => "store",
            InsnKind::CondBranch => "condbranch",
            InsnKind::Switch => "switch",
            InsnKind::Select => "select",
            InsnKind::Phi => "phi",
        }
    }
}

impl fmt::Display for InsnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static metadata accompanying an `INSN_START` record: which dynamic-log
/// record to expect, how many of the following ops the fixup patches, and
/// the branch/switch/phi tables the lifter baked in at lift time.
#[derive(Debug, Clone)]
pub struct InsnStart {
    pub name: InsnKind,
    /// Count of ops immediately following that fixup patches in place.
    pub num_ops: usize,
    /// Opaque passthrough from the lifter; the interpreter never reads it.
    pub flag: u32,
    /// `condbranch`: block labels `[not_taken, taken]`.
    /// `select`: the IR register number backing `[not_taken, taken]`, or
    /// `-1` on either side to mean "constant operand."
    pub branch_labels: [i64; 2],
    pub switch_conds: [i64; MAX_SWITCH_ARMS],
    pub switch_conds_len: usize,
    /// One element longer than `switch_conds`: `switch_labels[0]` is the
    /// default arm, `switch_labels[i + 1]` is taken when `switch_conds[i]`
    /// matches.
    pub switch_labels: [i64; MAX_SWITCH_ARMS + 1],
    pub phi_blocks: [i64; MAX_PHI_ARMS],
    pub phi_vals: [i64; MAX_PHI_ARMS],
    pub phi_len: usize,
}

impl InsnStart {
    pub fn new(name: InsnKind, num_ops: usize) -> Self {
        Self {
            name,
            num_ops,
            flag: 0,
            branch_labels: [0; 2],
            switch_conds: [0; MAX_SWITCH_ARMS],
            switch_conds_len: 0,
            switch_labels: [0; MAX_SWITCH_ARMS + 1],
            phi_blocks: [0; MAX_PHI_ARMS],
            phi_vals: [0; MAX_PHI_ARMS],
            phi_len: 0,
        }
    }

    pub fn with_branch_labels(mut self, not_taken: i64, taken: i64) -> Self {
        self.branch_labels = [not_taken, taken];
        self
    }

    /// `default_label` is `switch_labels[0]`; `arms` are `(cond, label)`
    /// pairs filling `switch_conds`/`switch_labels[1..]`.
    pub fn with_switch(mut self, default_label: i64, arms: &[(i64, i64)]) -> Self {
        assert!(arms.len() <= MAX_SWITCH_ARMS, "too many switch arms");
        self.switch_labels[0] = default_label;
        for (i, (cond, label)) in arms.iter().enumerate() {
            self.switch_conds[i] = *cond;
            self.switch_labels[i + 1] = *label;
        }
        self.switch_conds_len = arms.len();
        self
    }

    /// `arms` are `(predecessor_block_label, source_register)` pairs.
    pub fn with_phi(mut self, arms: &[(i64, i64)]) -> Self {
        assert!(arms.len() <= MAX_PHI_ARMS, "too many phi arms");
        for (i, (block, val)) in arms.iter().enumerate() {
            self.phi_blocks[i] = *block;
            self.phi_vals[i] = *val;
        }
        self.phi_len = arms.len();
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LabelOp {
    pub a: Addr,
    pub label: Label,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOp {
    pub a: Addr,
}

#[derive(Debug, Clone, Copy)]
pub struct CopyOp {
    pub a: Addr,
    pub b: Addr,
}

#[derive(Debug, Clone, Copy)]
pub struct ComputeOp {
    pub a: Addr,
    pub b: Addr,
    pub c: Addr,
}

/// A `CALL` names its callee by the lifter-assigned symbol and holds a
/// shared reference to the already-built callee TTB (`CALL`s form a DAG,
/// never a cycle, so `Rc` sharing without a back-reference is safe).
#[derive(Debug, Clone)]
pub struct CallOp {
    pub name: String,
    pub ttb: Rc<TaintTranslationBlock>,
}

#[derive(Debug, Clone)]
pub enum TaintOp {
    Label(LabelOp),
    Delete(DeleteOp),
    Copy(CopyOp),
    Compute(ComputeOp),
    InsnStart(InsnStart),
    Call(CallOp),
    Ret,
}

struct TobInner {
    ops: Vec<TaintOp>,
    max_size: usize,
    cursor: usize,
}

/// Append-only op buffer with a read/write cursor (component E).
///
/// Backed by `RefCell` rather than requiring `&mut` access: a basic block's
/// buffer is reachable through an `Rc<TaintTranslationBlock>` once a `CALL`
/// shares it with a caller's cache, but `rewind`/`read`/`patch` still need
/// to mutate the cursor and (during fixup) the not-yet-read records.
pub struct TaintOpBuffer(RefCell<TobInner>);

impl TaintOpBuffer {
    /// `max_size` bounds the number of records this buffer will ever hold,
    /// standing in for the original's byte capacity.
    pub fn new(max_size: usize) -> Self {
        Self(RefCell::new(TobInner {
            ops: Vec::new(),
            max_size,
            cursor: 0,
        }))
    }

    pub fn write(&self, op: TaintOp) {
        let mut inner = self.0.borrow_mut();
        assert!(
            inner.ops.len() < inner.max_size,
            "taint op buffer overflow: capacity {} exceeded",
            inner.max_size
        );
        inner.ops.push(op);
    }

    /// Reads the record at the cursor and advances it, or `None` at `end`.
    pub fn read(&self) -> Option<TaintOp> {
        let mut inner = self.0.borrow_mut();
        let op = inner.ops.get(inner.cursor).cloned();
        if op.is_some() {
            inner.cursor += 1;
        }
        op
    }

    pub fn rewind(&self) {
        self.0.borrow_mut().cursor = 0;
    }

    pub fn clear(&self) {
        let mut inner = self.0.borrow_mut();
        inner.ops.clear();
        inner.cursor = 0;
    }

    pub fn end(&self) -> bool {
        let inner = self.0.borrow();
        inner.cursor >= inner.ops.len()
    }

    pub fn full_frac(&self) -> f64 {
        let inner = self.0.borrow();
        inner.ops.len() as f64 / inner.max_size as f64
    }

    pub fn len(&self) -> usize {
        self.0.borrow().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Patches the `idx`-th not-yet-read record (`idx == 0` is the record
    /// `read` would return next) in place, without moving the cursor. This
    /// is the fixup protocol's peek-and-patch: separating it from `read`
    /// makes the "must not advance the outer cursor" rule a type-level fact
    /// instead of a convention callers have to remember.
    pub fn patch(&self, idx: usize, f: impl FnOnce(&mut TaintOp)) {
        let mut inner = self.0.borrow_mut();
        let pos = inner.cursor + idx;
        let slot = inner
            .ops
            .get_mut(pos)
            .expect("patch index out of range for this buffer");
        f(slot);
    }
}
