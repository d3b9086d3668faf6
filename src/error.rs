//! Error taxonomy for the interpreter (see spec §7).
//!
//! Contract violations (frame under/overflow, a `CONST` destination, an
//! unresolved address reaching a dispatch site, an unexpected op kind under
//! fixup) are programmer/collaborator bugs with no recovery path; those are
//! expressed as panics at their call sites, not as this type. `TaintError`
//! covers the one fatal-but-reportable category the spec calls out
//! separately: the dynamic log disagreeing with what the op buffer expects
//! to find there.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaintError {
    #[error("dynamic log misaligned: `{insn}` expected a matching log entry, found {found}")]
    LogMisaligned {
        insn: &'static str,
        found: &'static str,
    },

    #[error("dynamic log exhausted while resolving `{0}`")]
    LogExhausted(&'static str),

    #[error("dynamic log was not fully consumed: {remaining} entries left unread")]
    LogNotFullyConsumed { remaining: usize },
}
