use anyhow::Result;

use taint_core::op::{InsnKind, InsnStart, LabelOp, TaintOp};
use taint_core::ttb::{BasicBlock, TaintTranslationBlock};
use taint_core::{Addr, AddrKind, DynLogEntry, DynamicLog, Executor, ShadowMemory};

use crate::BranchArgs;

/// Builds a two-way-branching TTB, feeds it a single `BRANCHENTRY`, and
/// reports which successor ran. Demonstrates how a host wires a lifted
/// block's op buffers and a captured dynamic-log entry into `execute`.
pub fn demo_branch(args: &BranchArgs) -> Result<()> {
    let mut shad = ShadowMemory::new(1 << 16, 1 << 16, 1 << 12, 32);

    const NOT_TAKEN_LABEL: i64 = 11;
    const TAKEN_LABEL: i64 = 22;

    let mut ttb = TaintTranslationBlock::new("cli-demo-branch", 3, 8);
    ttb.entry.ops.write(TaintOp::InsnStart(
        InsnStart::new(InsnKind::CondBranch, 0)
            .with_branch_labels(NOT_TAKEN_LABEL, TAKEN_LABEL),
    ));
    for (label, addr) in [(NOT_TAKEN_LABEL, 0x100u64), (TAKEN_LABEL, 0x200)] {
        let mut bb = BasicBlock::new(label, 8);
        bb.ops.write(TaintOp::Label(LabelOp {
            a: Addr::new(AddrKind::Ram(addr)),
            label: 1,
        }));
        ttb.push_successor(bb);
    }

    let mut log = DynamicLog::new(vec![DynLogEntry::Branch {
        taken: args.taken,
    }]);
    Executor::new().execute(&ttb, &mut shad, &mut log)?;

    println!("branch taken: {}", args.taken);
    println!(
        "not-taken block side effect (ram[0x100]) tainted: {}",
        shad.query(&Addr::new(AddrKind::Ram(0x100)))
    );
    println!(
        "taken block side effect (ram[0x200]) tainted: {}",
        shad.query(&Addr::new(AddrKind::Ram(0x200)))
    );
    Ok(())
}
