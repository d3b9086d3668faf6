//! The op interpreter (component H): walks a TTB's basic blocks, resolves
//! `INSN_START` fixups against the dynamic log, dispatches label/delete/
//! copy/compute, descends into `CALL`s, and honors branch/switch/phi
//! redirection.

use anyhow::Result;

use crate::addr::{Addr, AddrFlag, AddrKind};
use crate::dynlog::{DynLogEntry, DynamicLog, MemOp};
use crate::error::TaintError;
use crate::op::{DeleteOp, InsnKind, InsnStart, TaintOp};
use crate::shadow::ShadowMemory;
use crate::ttb::{BasicBlock, TaintTranslationBlock};

/// Loop-control state for `execute`. The reference keeps `next_step` and
/// `taken_branch` as module-level globals; we bundle them into a struct
/// (per DESIGN NOTES) so nothing stops a host from running several
/// independent shadows, each driven by its own `Executor`.
///
/// Four states, not the three spec.md's prose collapses `BRANCH`/
/// `SWITCHSTEP` into: the reference's loop condition is
/// `next_step != RETURN && next_step != EXCEPT`, so both are "keep going"
/// at the `execute` level, but fixup sets them from different arms and it's
/// worth keeping that distinction for diagnostics (see SPEC_FULL.md §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Return,
    Branch,
    SwitchStep,
    Except,
}

/// Drives one TTB to completion against a shadow memory and dynamic log.
pub struct Executor {
    next_step: NextStep,
    taken_branch: i64,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            next_step: NextStep::Return,
            taken_branch: 0,
        }
    }

    /// Top-level entry point: rewinds `log`, runs `ttb` to completion (or an
    /// exception), and — on normal completion — asserts the log was exactly
    /// consumed (spec §4.F). An exception is a normal early return; the log
    /// may legitimately have unread entries in that case.
    pub fn execute(
        &mut self,
        ttb: &TaintTranslationBlock,
        shadow: &mut ShadowMemory,
        log: &mut DynamicLog,
    ) -> Result<()> {
        log.rewind();
        self.run(ttb, shadow, log)?;
        if self.next_step != NextStep::Except && !log.is_fully_consumed() {
            return Err(TaintError::LogNotFullyConsumed {
                remaining: log.remaining(),
            }
            .into());
        }
        Ok(())
    }

    /// The recursive core shared between the top-level call and `CALL`
    /// descent. Does not rewind or check exhaustion of `log`: those belong
    /// to the single top-level pass, not to every nested call.
    fn run(
        &mut self,
        ttb: &TaintTranslationBlock,
        shadow: &mut ShadowMemory,
        log: &mut DynamicLog,
    ) -> Result<()> {
        self.next_step = NextStep::Return;
        self.process(&ttb.entry, shadow, log)?;
        while !matches!(self.next_step, NextStep::Return | NextStep::Except) {
            self.next_step = NextStep::Return;
            let Some(bb) = ttb.find_successor(self.taken_branch) else {
                break;
            };
            self.process(bb, shadow, log)?;
        }
        #[cfg(feature = "stats")]
        log::trace!("execute: stats-mode pass over `{}` complete", ttb.name);
        Ok(())
    }

    fn process(
        &mut self,
        bb: &BasicBlock,
        shadow: &mut ShadowMemory,
        log: &mut DynamicLog,
    ) -> Result<()> {
        bb.ops.rewind();
        while !bb.ops.end() {
            let op = bb
                .ops
                .read()
                .expect("end() is false: a record must be readable");
            log::trace!("process: {op:?}");
            match op {
                TaintOp::Label(l) => shadow.label(&l.a, l.label),
                // `delete`/`copy`/`compute` on shadow memory already honor
                // the IRRELEVANT read/write rules (they no-op through
                // `ShadowMemory::put`'s destination guard); the only
                // dispatch-level policy left here is tainted-pointer mode's
                // register suppression, which isn't a property of any one
                // address and has to live at this layer.
                TaintOp::Delete(d) => shadow.delete(&d.a),
                TaintOp::Copy(c) => shadow.copy(&c.a, &c.b),
                TaintOp::Compute(c) => {
                    let suppress = cfg!(feature = "tainted_pointer")
                        && matches!(c.c.kind, AddrKind::GuestReg(_) | AddrKind::GuestSpec(_));
                    if !suppress {
                        shadow.compute(&c.a, &c.b, &c.c);
                    }
                }
                TaintOp::InsnStart(insn) => {
                    if self.fixup(&insn, &bb.ops, log)? {
                        // EXCEPTIONENTRY: graceful early return, no rollback.
                        return Ok(());
                    }
                }
                TaintOp::Call(call) => {
                    shadow.push_frame();
                    self.run(&call.ttb, shadow, log)?;
                }
                TaintOp::Ret => shadow.pop_frame(),
            }
        }
        bb.ops.rewind();
        Ok(())
    }

    /// Runs the fixup protocol for one `INSN_START`. Returns `Ok(true)` iff
    /// the dynamic log signaled an exception at this point.
    fn fixup(
        &mut self,
        insn: &InsnStart,
        buf: &crate::op::TaintOpBuffer,
        log: &mut DynamicLog,
    ) -> Result<bool> {
        // `phi` consumes no log record: it resolves purely from the last
        // `taken_branch`, so there's no dynamic-log position at which an
        // exception could interrupt it.
        if matches!(insn.name, InsnKind::Phi) {
            self.fixup_phi(insn, buf);
            return Ok(false);
        }

        let entry = log
            .next()
            .ok_or(TaintError::LogExhausted(insn.name.as_str()))?
            .clone();
        if matches!(entry, DynLogEntry::Exception) {
            self.next_step = NextStep::Except;
            return Ok(true);
        }

        match insn.name {
            InsnKind::Load => self.fixup_load(insn, buf, &entry)?,
            InsnKind::Store => self.fixup_store(insn, buf, &entry)?,
            InsnKind::CondBranch => self.fixup_condbranch(insn, &entry)?,
            InsnKind::Switch => self.fixup_switch(insn, &entry)?,
            InsnKind::Select => self.fixup_select(insn, buf, &entry)?,
            InsnKind::Phi => unreachable!("handled above"),
        }
        Ok(false)
    }

    fn fixup_load(
        &self,
        insn: &InsnStart,
        buf: &crate::op::TaintOpBuffer,
        entry: &DynLogEntry,
    ) -> Result<()> {
        let DynLogEntry::Addr {
            op: MemOp::Load,
            addr: logged,
        } = entry
        else {
            return Err(TaintError::LogMisaligned {
                insn: "load",
                found: entry.kind_name(),
            }
            .into());
        };
        for i in 0..insn.num_ops {
            buf.patch(i, |op| {
                let TaintOp::Copy(c) = op else {
                    panic!("load fixup expected COPY, found {op:?}")
                };
                patch_from_log(&mut c.a, logged);
            });
        }
        Ok(())
    }

    fn fixup_store(
        &self,
        insn: &InsnStart,
        buf: &crate::op::TaintOpBuffer,
        entry: &DynLogEntry,
    ) -> Result<()> {
        let DynLogEntry::Addr {
            op: MemOp::Store,
            addr: logged,
        } = entry
        else {
            return Err(TaintError::LogMisaligned {
                insn: "store",
                found: entry.kind_name(),
            }
            .into());
        };
        for i in 0..insn.num_ops {
            buf.patch(i, |op| match op {
                TaintOp::Copy(c) => patch_from_log(&mut c.b, logged),
                TaintOp::Delete(d) => patch_from_log(&mut d.a, logged),
                #[cfg(feature = "tainted_pointer")]
                TaintOp::Compute(c) => {
                    let both_resolved = !matches!(c.b.kind, AddrKind::Unknown)
                        && !matches!(c.c.kind, AddrKind::Unknown);
                    if !both_resolved {
                        patch_from_log(&mut c.b, logged);
                        patch_from_log(&mut c.c, logged);
                    }
                }
                other => panic!("store fixup: unexpected op kind {other:?}"),
            });
        }
        Ok(())
    }

    fn fixup_condbranch(&mut self, insn: &InsnStart, entry: &DynLogEntry) -> Result<()> {
        let DynLogEntry::Branch { taken } = entry else {
            return Err(TaintError::LogMisaligned {
                insn: "condbranch",
                found: entry.kind_name(),
            }
            .into());
        };
        self.taken_branch = insn.branch_labels[if *taken { 1 } else { 0 }];
        self.next_step = NextStep::Branch;
        Ok(())
    }

    fn fixup_switch(&mut self, insn: &InsnStart, entry: &DynLogEntry) -> Result<()> {
        let DynLogEntry::Switch { cond } = entry else {
            return Err(TaintError::LogMisaligned {
                insn: "switch",
                found: entry.kind_name(),
            }
            .into());
        };
        let arm = insn.switch_conds[..insn.switch_conds_len]
            .iter()
            .position(|c| c == cond);
        self.taken_branch = match arm {
            Some(i) => insn.switch_labels[i + 1],
            None => insn.switch_labels[0],
        };
        self.next_step = NextStep::SwitchStep;
        Ok(())
    }

    fn fixup_select(
        &self,
        insn: &InsnStart,
        buf: &crate::op::TaintOpBuffer,
        entry: &DynLogEntry,
    ) -> Result<()> {
        let DynLogEntry::Select { taken } = entry else {
            return Err(TaintError::LogMisaligned {
                insn: "select",
                found: entry.kind_name(),
            }
            .into());
        };
        let label = insn.branch_labels[if *taken { 1 } else { 0 }];
        for i in 0..insn.num_ops {
            buf.patch(i, |op| {
                let TaintOp::Copy(c) = op else {
                    panic!("select fixup expected COPY, found {op:?}")
                };
                if label == -1 {
                    // Constant operand selected: nothing to copy from.
                    let dst = c.b;
                    *op = TaintOp::Delete(DeleteOp { a: dst });
                } else {
                    c.a.kind = AddrKind::Local(label as u64);
                    c.a.flag = AddrFlag::None;
                }
            });
        }
        Ok(())
    }

    fn fixup_phi(&self, insn: &InsnStart, buf: &crate::op::TaintOpBuffer) {
        let arm = insn.phi_blocks[..insn.phi_len]
            .iter()
            .position(|b| *b == self.taken_branch)
            .unwrap_or_else(|| {
                panic!(
                    "phi fixup: no arm for predecessor block {}",
                    self.taken_branch
                )
            });
        let val = insn.phi_vals[arm];
        for i in 0..insn.num_ops {
            buf.patch(i, |op| {
                let TaintOp::Copy(c) = op else {
                    panic!("phi fixup expected COPY, found {op:?}")
                };
                c.a.kind = AddrKind::Local(val as u64);
                c.a.flag = AddrFlag::None;
            });
        }
    }
}

/// Patches a fixup target from a dynamic-log-resolved address: copies the
/// logged kind, and carries `IRRELEVANT` through (the only flag the log can
/// legitimately report) while clearing any other flag. The target's own
/// per-byte `offset` is left untouched — it's the lifter's byte index within
/// a multi-byte load/store (`base+i -> reg[i]`), not a property of the
/// logged base address.
fn patch_from_log(target: &mut Addr, logged: &Addr) {
    target.kind = logged.kind;
    target.flag = if logged.flag == AddrFlag::Irrelevant {
        AddrFlag::Irrelevant
    } else {
        AddrFlag::None
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{CopyOp, LabelOp};
    use crate::ttb::BasicBlock;

    fn shadow() -> ShadowMemory {
        ShadowMemory::new(1 << 16, 1 << 16, 1 << 12, 32)
    }

    /// S2: label a guest register, copy it into RAM, execute with an empty
    /// log, and see the taint land.
    #[test]
    fn copy_within_a_block() {
        let mut shad = shadow();
        let greg = Addr::new(AddrKind::GuestReg(2));
        shad.label(&greg, 1);

        let mut ttb = TaintTranslationBlock::new("copy_tb", 1, 8);
        ttb.entry.ops.write(TaintOp::Copy(CopyOp {
            a: greg,
            b: Addr::new(AddrKind::Ram(0x2000)),
        }));

        let mut log = DynamicLog::new(vec![]);
        let mut exec = Executor::new();
        exec.execute(&ttb, &mut shad, &mut log).unwrap();

        assert!(shad.query(&Addr::new(AddrKind::Ram(0x2000))));
    }

    /// S3: an `INSN_START("load")` patches a `COPY`'s source from the
    /// dynamic log before it runs.
    #[test]
    fn load_fixup_resolves_source() {
        let mut shad = shadow();
        let loaded = Addr::new(AddrKind::Ram(0x3000));
        shad.label(&loaded, 9);

        let mut ttb = TaintTranslationBlock::new("load_tb", 1, 8);
        ttb.entry
            .ops
            .write(TaintOp::InsnStart(InsnStart::new(InsnKind::Load, 1)));
        ttb.entry.ops.write(TaintOp::Copy(CopyOp {
            a: Addr::unknown(),
            b: Addr::new(AddrKind::Local(5)),
        }));

        let mut log = DynamicLog::new(vec![DynLogEntry::Addr {
            op: MemOp::Load,
            addr: loaded,
        }]);
        let mut exec = Executor::new();
        exec.execute(&ttb, &mut shad, &mut log).unwrap();

        assert!(shad.query(&Addr::new(AddrKind::Local(5))));
    }

    /// S4: a condbranch fixup redirects execution to the taken successor.
    #[test]
    fn condbranch_selects_successor() {
        let mut shad = shadow();
        let mut ttb = TaintTranslationBlock::new("branch_tb", 3, 8);
        ttb.entry.ops.write(TaintOp::InsnStart(
            InsnStart::new(InsnKind::CondBranch, 0).with_branch_labels(11, 22),
        ));
        let mut not_taken = BasicBlock::new(11, 8);
        not_taken.ops.write(TaintOp::Label(LabelOp {
            a: Addr::new(AddrKind::Ram(1)),
            label: 1,
        }));
        let mut taken = BasicBlock::new(22, 8);
        taken.ops.write(TaintOp::Label(LabelOp {
            a: Addr::new(AddrKind::Ram(2)),
            label: 2,
        }));
        ttb.push_successor(not_taken);
        ttb.push_successor(taken);

        let mut log = DynamicLog::new(vec![DynLogEntry::Branch { taken: true }]);
        let mut exec = Executor::new();
        exec.execute(&ttb, &mut shad, &mut log).unwrap();

        assert!(!shad.query(&Addr::new(AddrKind::Ram(1))));
        assert!(shad.query(&Addr::new(AddrKind::Ram(2))));
    }

    /// S5: an unmatched switch condition falls through to the default arm.
    #[test]
    fn switch_falls_through_to_default() {
        let mut shad = shadow();
        let mut ttb = TaintTranslationBlock::new("switch_tb", 4, 8);
        ttb.entry.ops.write(TaintOp::InsnStart(
            InsnStart::new(InsnKind::Switch, 0)
                .with_switch(100, &[(3, 103), (5, 105), (7, 107)]),
        ));
        for label in [100, 103, 105, 107] {
            let mut bb = BasicBlock::new(label, 8);
            bb.ops.write(TaintOp::Label(LabelOp {
                a: Addr::new(AddrKind::Ram(label as u64)),
                label: label as u32,
            }));
            ttb.push_successor(bb);
        }

        let mut log = DynamicLog::new(vec![DynLogEntry::Switch { cond: 9 }]);
        let mut exec = Executor::new();
        exec.execute(&ttb, &mut shad, &mut log).unwrap();

        assert!(shad.query(&Addr::new(AddrKind::Ram(100))));
        assert!(!shad.query(&Addr::new(AddrKind::Ram(103))));
    }

    /// S6: an exception interrupts a load fixup; execute returns cleanly
    /// and nothing past the already-processed ops is mutated.
    #[test]
    fn exception_terminates_cleanly() {
        let mut shad = shadow();
        let mut ttb = TaintTranslationBlock::new("except_tb", 1, 8);
        ttb.entry.ops.write(TaintOp::Label(LabelOp {
            a: Addr::new(AddrKind::Ram(1)),
            label: 1,
        }));
        ttb.entry
            .ops
            .write(TaintOp::InsnStart(InsnStart::new(InsnKind::Load, 1)));
        ttb.entry.ops.write(TaintOp::Copy(CopyOp {
            a: Addr::unknown(),
            b: Addr::new(AddrKind::Ram(2)),
        }));

        let mut log = DynamicLog::new(vec![DynLogEntry::Exception]);
        let mut exec = Executor::new();
        exec.execute(&ttb, &mut shad, &mut log).unwrap();

        assert!(shad.query(&Addr::new(AddrKind::Ram(1))));
        assert!(!shad.query(&Addr::new(AddrKind::Ram(2))));

        // A subsequent pass with a fresh log operates normally.
        let mut log2 = DynamicLog::new(vec![DynLogEntry::Addr {
            op: MemOp::Load,
            addr: Addr::new(AddrKind::Ram(3)),
        }]);
        shad.label(&Addr::new(AddrKind::Ram(3)), 7);
        exec.execute(&ttb, &mut shad, &mut log2).unwrap();
        assert!(shad.query(&Addr::new(AddrKind::Ram(2))));
    }

    /// CALL enters the callee's frame; RET leaves it.
    #[test]
    fn call_and_ret_bracket_a_frame() {
        let mut shad = shadow();
        let mut callee = TaintTranslationBlock::new("callee", 1, 8);
        callee.entry.ops.write(TaintOp::Label(LabelOp {
            a: Addr::new(AddrKind::Local(0)),
            label: 42,
        }));
        callee.entry.ops.write(TaintOp::Ret);
        let callee = std::rc::Rc::new(callee);

        let mut caller = TaintTranslationBlock::new("caller", 1, 8);
        caller.entry.ops.write(TaintOp::Call(crate::op::CallOp {
            name: "callee".into(),
            ttb: callee,
        }));

        let mut log = DynamicLog::new(vec![]);
        let mut exec = Executor::new();
        exec.execute(&caller, &mut shad, &mut log).unwrap();

        assert_eq!(shad.current_frame(), 0);
    }
}
