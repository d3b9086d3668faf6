use anyhow::Result;

use taint_core::{Addr, AddrKind, ShadowMemory};

use crate::LabelArgs;

/// Labels one byte and reports whether it and its neighbor read as tainted.
/// Demonstrates the query/label surface (component I) a host emulator would
/// call directly when it first observes tainted input.
pub fn demo_label(args: &LabelArgs) -> Result<()> {
    let mut shad = ShadowMemory::new(1 << 20, 1 << 20, 1 << 16, 64);
    let addr = Addr::new(AddrKind::Ram(args.address));

    shad.label(&addr, args.label);
    println!(
        "ram[0x{:x}] tainted: {}",
        args.address,
        shad.query(&addr)
    );
    println!(
        "ram[0x{:x}] tainted: {}",
        args.address + 1,
        shad.query(&Addr::new(AddrKind::Ram(args.address + 1)))
    );
    println!("directory occupancy: {}", shad.occupancy());
    Ok(())
}
