//! A byte-granularity dynamic taint-propagation engine.
//!
//! This crate is the taint processor described in the project's
//! specification: shadow memory ([`shadow`]), the label-set algebra
//! ([`label`]), the sparse page-tree directory backing shadow memory
//! ([`directory`]), the tagged address form every operation is expressed
//! over ([`addr`]), the taint-op encoding and its fixed-size-record buffer
//! ([`op`]), the taint translation block a lifter hands us ([`ttb`]), the
//! in-order dynamic-value log that resolves what the lifter couldn't know
//! statically ([`dynlog`]), and the interpreter that ties all of that
//! together ([`executor`]).
//!
//! What this crate does *not* do: lift guest code into taint ops, emit the
//! dynamic-value log during guest execution, load plugins, hook syscalls,
//! or dump statistics/CSV reports. Those are host-emulator concerns that
//! sit outside the core.

#![forbid(unsafe_code)]

pub mod addr;
pub mod directory;
pub mod dynlog;
pub mod error;
pub mod executor;
pub mod label;
pub mod op;
pub mod shadow;
pub mod ttb;

pub use addr::{Addr, AddrFlag, AddrKind};
pub use dynlog::{DynLogEntry, DynamicLog, MemOp};
pub use error::TaintError;
pub use executor::Executor;
pub use label::{Label, LabelSet, LabelSetType};
pub use op::{CallOp, ComputeOp, CopyOp, DeleteOp, InsnKind, InsnStart, LabelOp, TaintOp, TaintOpBuffer};
pub use shadow::ShadowMemory;
pub use ttb::{BasicBlock, TaintTranslationBlock};

#[cfg(test)]
mod tests;
