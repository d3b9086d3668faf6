//! Shadow memory (component C) plus the thin query/label surface that's the
//! outside world's only way to seed and inspect taint (component I).

use log::trace;

use crate::addr::{Addr, AddrFlag, AddrKind};
use crate::directory::ShadowDirectory;
use crate::label::{Label, LabelSet, LabelSetType};

/// Call frames the IR virtual-register file keeps distinct slices for.
/// Hard-coded at two, mirroring the reference implementation's
/// `FUNCTIONFRAMES` — a known limitation, not a bug (see DESIGN.md).
pub const FRAMES: usize = 2;
/// Widest IR/guest register this shadow memory tracks, in bytes.
pub const MAX_REG_BYTES: usize = 16;

/// Guest register file shape. Fixed here for the reference guest profile
/// the way the original ties itself to a single `guestarch.h` at compile
/// time; a multi-target build would make these constructor parameters.
pub const NUM_GREGS: usize = 16;
pub const WORD_SIZE: usize = 8;
pub const NUM_SPEC: usize = 32;

fn ram_bit_index(addr: u64) -> (usize, u8) {
    ((addr >> 3) as usize, (addr & 7) as u8)
}

/// Fast-reject presence bitmap for 32-bit RAM, one bit per guest byte.
/// Invariant 2: a bit is set iff the corresponding directory entry exists.
struct RamBitmap {
    bits: Vec<u8>,
}

impl RamBitmap {
    fn new(mem_size: u32) -> Self {
        Self {
            bits: vec![0u8; (mem_size as usize).div_ceil(8)],
        }
    }

    fn get(&self, addr: u64) -> bool {
        let (byte, bit) = ram_bit_index(addr);
        self.bits[byte] & (1 << bit) != 0
    }

    fn set(&mut self, addr: u64) {
        let (byte, bit) = ram_bit_index(addr);
        self.bits[byte] |= 1 << bit;
    }

    fn clear(&mut self, addr: u64) {
        let (byte, bit) = ram_bit_index(addr);
        self.bits[byte] &= !(1 << bit);
    }
}

/// Parallel data structure mirroring everything the guest exposes: RAM,
/// hard disk, I/O buffers, guest registers, and the IR virtual-register
/// file (itself sliced per call frame).
pub struct ShadowMemory {
    hd: ShadowDirectory,
    ram: ShadowDirectory,
    io: ShadowDirectory,
    ram_bitmap: Option<RamBitmap>,
    llv: Vec<Option<LabelSet>>,
    ret: Vec<Option<LabelSet>>,
    grv: Vec<Option<LabelSet>>,
    gsv: Vec<Option<LabelSet>>,
    num_vals: u32,
    current_frame: usize,
}

impl ShadowMemory {
    /// `hd_size`/`mem_size`/`io_size` bound the respective address spaces;
    /// `max_vals` is the widest IR virtual-register number the lifter will
    /// emit for any single translation block.
    pub fn new(hd_size: u64, mem_size: u32, io_size: u64, max_vals: u32) -> Self {
        let _ = hd_size;
        let _ = io_size;
        #[cfg(feature = "x86_64_ram")]
        let (ram, ram_bitmap) = (ShadowDirectory::new(12, 12, 16), None);
        #[cfg(not(feature = "x86_64_ram"))]
        let (ram, ram_bitmap) = (
            ShadowDirectory::new(10, 10, 12),
            Some(RamBitmap::new(mem_size)),
        );

        Self {
            hd: ShadowDirectory::new(12, 12, 16),
            ram,
            io: ShadowDirectory::new(12, 12, 16),
            ram_bitmap,
            llv: (0..(max_vals as usize * FRAMES * MAX_REG_BYTES))
                .map(|_| None)
                .collect(),
            ret: (0..MAX_REG_BYTES).map(|_| None).collect(),
            grv: (0..(NUM_GREGS * WORD_SIZE)).map(|_| None).collect(),
            gsv: (0..NUM_SPEC).map(|_| None).collect(),
            num_vals: max_vals,
            current_frame: 0,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Enters a new call frame (`CALL`). Panics if the two-frame budget is
    /// exhausted — a contract violation, not a recoverable condition.
    pub fn push_frame(&mut self) {
        assert!(
            self.current_frame + 1 < FRAMES,
            "call frame overflow: only {FRAMES} frames are supported"
        );
        self.current_frame += 1;
    }

    /// Leaves the current call frame (`RET`). Panics on underflow.
    pub fn pop_frame(&mut self) {
        assert!(self.current_frame > 0, "call frame underflow");
        self.current_frame -= 1;
    }

    fn llv_index(&self, frame: usize, reg: u64, offset: u8) -> usize {
        self.num_vals as usize * frame + reg as usize * MAX_REG_BYTES + offset as usize
    }

    fn frame_for(&self, flag: AddrFlag) -> usize {
        if flag == AddrFlag::FuncArg {
            assert!(
                self.current_frame + 1 < FRAMES,
                "FUNCARG write requires a free callee frame"
            );
            self.current_frame + 1
        } else {
            self.current_frame
        }
    }

    /// Returns a shared handle to the label set at `a`, or `None` if `a` is
    /// untainted. `CONST` and `Irrelevant` sources always read empty;
    /// `Unknown` addresses are a contract violation at this point — fixup
    /// should have resolved them already.
    fn get(&self, a: &Addr) -> Option<LabelSet> {
        if a.is_irrelevant() {
            return None;
        }
        match a.kind {
            AddrKind::Const(_) => None,
            AddrKind::HostDisk(v) => self.hd.find(v + a.offset as u64),
            AddrKind::Ram(v) => {
                let addr = v + a.offset as u64;
                match &self.ram_bitmap {
                    Some(bitmap) => {
                        if bitmap.get(addr) {
                            self.ram.find(addr)
                        } else {
                            None
                        }
                    }
                    None => self.ram.find(addr),
                }
            }
            AddrKind::Io(v) => self.io.find(v + a.offset as u64),
            AddrKind::Local(reg) => {
                let frame = self.frame_for(a.flag);
                self.llv[self.llv_index(frame, reg, a.offset)].clone()
            }
            AddrKind::GuestReg(reg) => self.grv[reg as usize * WORD_SIZE + a.offset as usize].clone(),
            AddrKind::GuestSpec(val) => {
                let idx = val
                    .checked_sub(NUM_GREGS as u64)
                    .expect("GSPEC value must be >= NUM_GREGS");
                self.gsv[idx as usize + a.offset as usize].clone()
            }
            AddrKind::Ret => self.ret[a.offset as usize].clone(),
            AddrKind::Unknown => panic!("unresolved address reached shadow memory dispatch"),
        }
    }

    /// Releases any occupant at `a`. A no-op if `a` is irrelevant or
    /// already untainted.
    pub fn delete(&mut self, a: &Addr) {
        if a.is_irrelevant() {
            return;
        }
        match a.kind {
            AddrKind::Const(_) => panic!("CONST may never be a destination"),
            AddrKind::HostDisk(v) => self.hd.remove(v + a.offset as u64),
            AddrKind::Ram(v) => {
                let addr = v + a.offset as u64;
                self.ram.remove(addr);
                if let Some(bitmap) = &mut self.ram_bitmap {
                    bitmap.clear(addr);
                }
            }
            AddrKind::Io(v) => self.io.remove(v + a.offset as u64),
            AddrKind::Local(reg) => {
                let frame = self.frame_for(a.flag);
                self.llv[self.llv_index(frame, reg, a.offset)] = None;
            }
            AddrKind::GuestReg(reg) => {
                self.grv[reg as usize * WORD_SIZE + a.offset as usize] = None;
            }
            AddrKind::GuestSpec(val) => {
                let idx = val
                    .checked_sub(NUM_GREGS as u64)
                    .expect("GSPEC value must be >= NUM_GREGS");
                self.gsv[idx as usize + a.offset as usize] = None;
            }
            AddrKind::Ret => self.ret[a.offset as usize] = None,
            AddrKind::Unknown => panic!("unresolved address reached shadow memory dispatch"),
        }
    }

    /// Stores a shared reference at `a`, first releasing any prior
    /// occupant (invariant 4). Passing `None` is equivalent to `delete`.
    fn put(&mut self, a: &Addr, ls: Option<LabelSet>) {
        self.delete(a);
        let Some(ls) = ls else { return };
        if a.is_irrelevant() {
            return;
        }
        match a.kind {
            AddrKind::Const(_) => panic!("CONST may never be a destination"),
            AddrKind::HostDisk(v) => self.hd.add(v + a.offset as u64, ls),
            AddrKind::Ram(v) => {
                let addr = v + a.offset as u64;
                self.ram.add(addr, ls);
                if let Some(bitmap) = &mut self.ram_bitmap {
                    bitmap.set(addr);
                }
            }
            AddrKind::Io(v) => self.io.add(v + a.offset as u64, ls),
            AddrKind::Local(reg) => {
                let frame = self.frame_for(a.flag);
                let idx = self.llv_index(frame, reg, a.offset);
                self.llv[idx] = Some(ls.copy());
            }
            AddrKind::GuestReg(reg) => {
                self.grv[reg as usize * WORD_SIZE + a.offset as usize] = Some(ls.copy());
            }
            AddrKind::GuestSpec(val) => {
                let idx = val
                    .checked_sub(NUM_GREGS as u64)
                    .expect("GSPEC value must be >= NUM_GREGS");
                self.gsv[idx as usize + a.offset as usize] = Some(ls.copy());
            }
            AddrKind::Ret => self.ret[a.offset as usize] = Some(ls.copy()),
            AddrKind::Unknown => panic!("unresolved address reached shadow memory dispatch"),
        }
    }

    /// Returns `true` iff the byte named by `a` carries a non-empty label
    /// set.
    pub fn query(&self, a: &Addr) -> bool {
        self.get(a).map(|ls| !ls.is_empty()).unwrap_or(false)
    }

    /// Unions `label` into `a`'s set, creating one with type
    /// [`LabelSetType::Copy`] if `a` was previously untainted.
    pub fn label(&mut self, a: &Addr, label: Label) {
        let ls = self.get(a).unwrap_or_else(|| {
            let ls = LabelSet::new();
            ls.set_type(LabelSetType::Copy);
            ls
        });
        ls.add(label);
        trace!("label {a} += {label}");
        self.put(a, Some(ls));
    }

    /// `b` gets whatever `a` currently carries. If `a` is untainted, `b`
    /// becomes untainted too, regardless of its prior state. `a` and `b`
    /// must not name the same byte.
    pub fn copy(&mut self, a: &Addr, b: &Addr) {
        debug_assert_ne!(a, b, "copy source and destination must differ");
        let ls_a = self.get(a);
        trace!("copy {a} -> {b}");
        self.put(b, ls_a);
    }

    /// `c` gets the union of `a`'s and `b`'s sets (either may equal `c`).
    /// The result is always typed [`LabelSetType::Compute`], even when one
    /// side is empty; if both are empty `c` becomes untainted.
    pub fn compute(&mut self, a: &Addr, b: &Addr, c: &Addr) {
        let ls_a = self.get(a);
        let ls_b = self.get(b);
        trace!("compute {a}, {b} -> {c}");
        if ls_a.is_none() && ls_b.is_none() {
            self.delete(c);
            return;
        }
        let result = LabelSet::new();
        if let Some(ls_a) = &ls_a {
            result.union_into(ls_a);
        }
        if let Some(ls_b) = &ls_b {
            result.union_into(ls_b);
        }
        result.set_type(LabelSetType::Compute);
        self.put(c, Some(result));
    }

    /// Total occupied bytes across the hard-disk, RAM, and I/O directories.
    /// Exposed for diagnostics; not part of the core dispatch surface.
    pub fn occupancy(&self) -> usize {
        self.hd.occupancy() + self.ram.occupancy() + self.io.occupancy()
    }

    /// Explicit teardown, mirroring `tp_free`. `Drop` already releases every
    /// directory and register slot (and, transitively, every `LabelSet`
    /// with no other owner); this exists so a host that mirrors the
    /// reference's explicit `init`/`free` pairing has something to call.
    pub fn free(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddrKind;

    fn shadow() -> ShadowMemory {
        ShadowMemory::new(1 << 20, 1 << 20, 1 << 16, 64)
    }

    #[test]
    fn label_creates_taint() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x1000));
        shad.label(&a, 7);
        assert!(shad.query(&a));
        let ls = shad.get(&a).unwrap();
        assert!(ls.iter().collect::<Vec<_>>().contains(&7));
    }

    #[test]
    fn delete_untaints() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x1000));
        shad.label(&a, 7);
        shad.delete(&a);
        assert!(!shad.query(&a));
    }

    #[test]
    fn copy_semantics() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x1000));
        let b = Addr::new(AddrKind::Ram(0x2000));
        shad.label(&a, 5);
        shad.copy(&a, &b);
        assert!(shad.query(&b));

        let c = Addr::new(AddrKind::Ram(0x3000));
        let d = Addr::new(AddrKind::Ram(0x4000));
        shad.label(&d, 99);
        shad.copy(&c, &d); // c untainted -> d becomes untainted
        assert!(!shad.query(&d));
    }

    #[test]
    fn compute_is_union() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x1000));
        let b = Addr::new(AddrKind::Ram(0x2000));
        let c = Addr::new(AddrKind::Ram(0x3000));
        shad.label(&a, 1);
        shad.label(&b, 2);
        shad.compute(&a, &b, &c);
        let ls = shad.get(&c).unwrap();
        let mut members: Vec<_> = ls.iter().collect();
        members.sort();
        assert_eq!(members, vec![1, 2]);
        assert_eq!(ls.get_type(), LabelSetType::Compute);
    }

    #[test]
    fn label_is_idempotent() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x1000));
        shad.label(&a, 1);
        shad.label(&a, 1);
        let ls = shad.get(&a).unwrap();
        assert_eq!(ls.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn frame_isolation_for_funcarg() {
        let mut shad = shadow();
        let callee_arg = Addr::new(AddrKind::Local(2)).with_flag(AddrFlag::FuncArg);
        shad.label(&callee_arg, 11);

        let same_frame = Addr::new(AddrKind::Local(2));
        assert!(!shad.query(&same_frame));

        shad.push_frame();
        assert!(shad.query(&same_frame));
    }

    #[test]
    fn ram_bitmap_tracks_directory_presence() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::Ram(0x55));
        shad.label(&a, 1);
        assert!(shad.ram_bitmap.as_ref().unwrap().get(0x55));
        shad.delete(&a);
        assert!(!shad.ram_bitmap.as_ref().unwrap().get(0x55));
    }

    #[test]
    fn irrelevant_reads_as_untainted_and_writes_are_noop() {
        let mut shad = shadow();
        let a = Addr::new(AddrKind::GuestReg(0)).with_flag(AddrFlag::Irrelevant);
        assert!(!shad.query(&a));
        shad.label(&a, 3);
        assert!(!shad.query(&a));
    }

    #[test]
    fn const_never_carries_taint() {
        let shad = shadow();
        let a = Addr::new(AddrKind::Const(42));
        assert!(!shad.query(&a));
    }
}
