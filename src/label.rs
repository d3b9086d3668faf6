//! Label-set algebra (component A).
//!
//! A [`LabelSet`] is the set of labels attached to one byte. Sets are
//! shared-owned: `clone` (the `copy` primitive from the spec) is a cheap
//! `Rc` bump, and the underlying storage is released when the last handle
//! drops. An absent label set and an empty one are the same thing to every
//! caller outside this module — `Option<LabelSet>` is how the rest of the
//! crate represents "untainted," never a present-but-empty `LabelSet`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An opaque, caller-assigned identifier for the provenance of a byte.
pub type Label = u32;

/// Tag describing how a label set came to exist.
///
/// `Copy` sets are created by [`crate::shadow::ShadowMemory::label`] the
/// first time a byte is tainted; `Compute` sets are the result of unioning
/// two sources together. The tag carries no other behavior — unioning two
/// sets always yields `Compute`, per the reference implementation's
/// hard-coded result type (see the Open Questions in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelSetType {
    #[default]
    Copy,
    Compute,
}

#[derive(Debug, Default)]
struct LabelSetInner {
    // Sorted, deduplicated. Real per-byte label counts are small, so a flat
    // Vec with binary-search insertion beats a BTreeSet on cache locality.
    members: Vec<Label>,
    ty: LabelSetType,
}

impl LabelSetInner {
    fn add(&mut self, label: Label) {
        if let Err(idx) = self.members.binary_search(&label) {
            self.members.insert(idx, label);
        }
    }
}

/// A shared handle to a label set.
///
/// Cloning is the `copy` primitive from the spec: it shares the underlying
/// storage rather than duplicating members. Dropping the last clone is the
/// `free` primitive.
#[derive(Debug, Clone)]
pub struct LabelSet(Rc<RefCell<LabelSetInner>>);

impl LabelSet {
    /// Creates a new, empty set of type [`LabelSetType::Copy`].
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(LabelSetInner::default())))
    }

    pub fn add(&self, label: Label) {
        self.0.borrow_mut().add(label);
    }

    /// Inserts every member of `src` into `self`. Commutative and
    /// idempotent at the level of membership, though the caller (see
    /// [`crate::shadow::ShadowMemory::compute`]) is responsible for setting
    /// the result's type afterward.
    pub fn union_into(&self, src: &LabelSet) {
        if Rc::ptr_eq(&self.0, &src.0) {
            return;
        }
        let members = src.0.borrow().members.clone();
        let mut this = self.0.borrow_mut();
        for label in members {
            this.add(label);
        }
    }

    /// Shares this set's storage with a new handle. Does not duplicate
    /// members.
    pub fn copy(&self) -> LabelSet {
        self.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().members.is_empty()
    }

    pub fn set_type(&self, ty: LabelSetType) {
        self.0.borrow_mut().ty = ty;
    }

    pub fn get_type(&self) -> LabelSetType {
        self.0.borrow().ty
    }

    /// Returns a snapshot of the current membership.
    pub fn iter(&self) -> impl Iterator<Item = Label> {
        self.0.borrow().members.clone().into_iter()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.borrow().members.len()
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "}}")
    }
}

/// Returns `true` iff `ls` is present and non-empty. Mirrors the spec's
/// rule that absence and emptiness are indistinguishable to callers.
pub fn is_tainted(ls: &Option<LabelSet>) -> bool {
    ls.as_ref().map(|ls| !ls.is_empty()).unwrap_or(false)
}
