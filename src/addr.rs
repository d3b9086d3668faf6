//! The tagged address form used uniformly by every taint operation
//! (component D).
//!
//! The reference implementation represents this as a C tagged union where
//! every payload happens to share the same width, which lets a fixup
//! rewrite an address's type in place without touching its storage layout.
//! We have no need for that trick in Rust: [`AddrKind`] is a genuine sum
//! type, and fixup simply assigns a new `AddrKind` value.

/// Discriminates what kind of location an [`Addr`] names, carrying its
/// 64-bit payload. `Const` and `Ret` carry no addressable value beyond
/// what `offset` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    /// Hard-disk / host byte address.
    HostDisk(u64),
    /// Guest physical RAM byte address.
    Ram(u64),
    /// I/O buffer byte address (network, disk DMA, ...).
    Io(u64),
    /// IR virtual register number, indexed by the interpreter's current
    /// frame (see [`AddrFlag::FuncArg`]).
    Local(u64),
    /// Guest general-purpose register number.
    GuestReg(u64),
    /// Guest special register "address," offset by the guest register
    /// count (floating point, CPU state fragments, ...).
    GuestSpec(u64),
    /// Not yet resolved; must be patched by the fixup protocol before any
    /// label/delete/copy/compute dispatch reaches it.
    Unknown,
    /// A compile-time constant. Always reads as untainted; illegal as a
    /// destination.
    Const(u64),
    /// The LLVM-style return/temp register.
    Ret,
}

impl AddrKind {
    /// A short tag name, used in logging and the `Display` impl below —
    /// stands in for the reference implementation's `print_addr`.
    fn tag(&self) -> &'static str {
        match self {
            AddrKind::HostDisk(_) => "h",
            AddrKind::Ram(_) => "m",
            AddrKind::Io(_) => "i",
            AddrKind::Local(_) => "l",
            AddrKind::GuestReg(_) => "greg",
            AddrKind::GuestSpec(_) => "gspec",
            AddrKind::Unknown => "unknown",
            AddrKind::Const(_) => "constant",
            AddrKind::Ret => "ret",
        }
    }
}

/// Orthogonal annotation riding alongside an [`AddrKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFlag {
    #[default]
    None,
    /// Access to untracked CPU state: reads as untainted, writes are a
    /// no-op (for `delete`/`copy` destinations) or skipped entirely (for
    /// `compute` destinations).
    Irrelevant,
    /// Sentinel used by the dynamic log to mark a captured exception
    /// (`0xDEADBEEF`). Never appears on an `Addr` produced by fixup; it's
    /// a property of the log entry that triggers fixup's early return.
    Exception,
    /// This address still needs to be resolved against the dynamic log.
    ReadLog,
    /// This write targets the callee's frame (current_frame + 1), used to
    /// pass arguments into a call.
    FuncArg,
}

/// A fully-formed address: what kind of location, which byte offset within
/// a multi-byte register or address (0..15), and any flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub kind: AddrKind,
    pub offset: u8,
    pub flag: AddrFlag,
}

impl Addr {
    pub fn new(kind: AddrKind) -> Self {
        Self {
            kind,
            offset: 0,
            flag: AddrFlag::None,
        }
    }

    pub fn with_offset(mut self, offset: u8) -> Self {
        debug_assert!(offset < 16, "offset must be within a 16-byte register");
        self.offset = offset;
        self
    }

    pub fn with_flag(mut self, flag: AddrFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn unknown() -> Self {
        Self::new(AddrKind::Unknown)
    }

    pub fn is_irrelevant(&self) -> bool {
        self.flag == AddrFlag::Irrelevant
    }

    /// `true` iff this address still needs a fixup resolution.
    pub fn is_unresolved(&self) -> bool {
        matches!(self.kind, AddrKind::Unknown) || self.flag == AddrFlag::ReadLog
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AddrKind::HostDisk(v) | AddrKind::Ram(v) | AddrKind::Io(v) => {
                write!(f, "{}0x{:x}", self.kind.tag(), v + self.offset as u64)
            }
            AddrKind::Local(v) => write!(f, "l{v}[{}]", self.offset),
            AddrKind::GuestReg(v) => write!(f, "greg{v}[{}]", self.offset),
            AddrKind::GuestSpec(v) => write!(f, "gspec{v}[{}]", self.offset),
            AddrKind::Unknown if self.flag == AddrFlag::Irrelevant => write!(f, "irrelevant"),
            AddrKind::Unknown => write!(f, "unknown"),
            AddrKind::Const(v) => write!(f, "const({v})"),
            AddrKind::Ret => write!(f, "ret[{}]", self.offset),
        }
    }
}
