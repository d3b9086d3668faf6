use anyhow::Result;

use taint_core::op::{CopyOp, InsnKind, InsnStart, TaintOp};
use taint_core::ttb::TaintTranslationBlock;
use taint_core::{Addr, AddrKind, DynLogEntry, DynamicLog, Executor, MemOp, ShadowMemory};

use crate::LoadArgs;

/// Prelabels a RAM byte, then runs a one-op TTB whose `COPY` source is
/// `UNK` until an `INSN_START("load")` fixup resolves it from a captured
/// `ADDRENTRY`. Demonstrates the dynamic-log resolution path (component H)
/// a lifter can't avoid for any address it doesn't know until runtime.
pub fn demo_load(args: &LoadArgs) -> Result<()> {
    let mut shad = ShadowMemory::new(1 << 20, 1 << 20, 1 << 16, 64);
    let loaded_addr = Addr::new(AddrKind::Ram(args.address));
    shad.label(&loaded_addr, args.label);

    let mut ttb = TaintTranslationBlock::new("cli-demo-load", 1, 8);
    ttb.entry
        .ops
        .write(TaintOp::InsnStart(InsnStart::new(InsnKind::Load, 1)));
    ttb.entry.ops.write(TaintOp::Copy(CopyOp {
        a: Addr::unknown(),
        b: Addr::new(AddrKind::Local(0)),
    }));

    let mut log = DynamicLog::new(vec![DynLogEntry::Addr {
        op: MemOp::Load,
        addr: loaded_addr,
    }]);
    Executor::new().execute(&ttb, &mut shad, &mut log)?;

    println!(
        "IR register l0 tainted after load from 0x{:x}: {}",
        args.address,
        shad.query(&Addr::new(AddrKind::Local(0)))
    );
    Ok(())
}
