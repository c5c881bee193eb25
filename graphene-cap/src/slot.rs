//! Capability slot storage
//!
//! A slot is the unit of capability storage: one object reference, one
//! rights mask, and the generation at which the capability was minted.
//! Slots are 16 bytes so four fit in a cache line.

use core::fmt;

use crate::object::{ObjRef, ObjectType};
use crate::rights::Rights;

/// A single capability slot.
///
/// # Invariants
///
/// - If `otype` is `ObjectType::None`, the slot is empty and every
///   other field is zero.
/// - `obj` is null if and only if the slot is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct CapSlot {
    /// Referenced object.
    obj: ObjRef,
    /// Generation at mint time; compared against the object on lookup.
    generation: u32,
    /// Object type tag (cached from the object for fast checks).
    otype: ObjectType,
    /// Access rights.
    rights: Rights,
    _pad: [u8; 6],
}

const _: () = assert!(core::mem::size_of::<CapSlot>() == 16);

impl CapSlot {
    /// Create an empty slot.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            obj: ObjRef::NULL,
            generation: 0,
            otype: ObjectType::None,
            rights: Rights::NONE,
            _pad: [0; 6],
        }
    }

    /// Create a populated slot.
    #[inline]
    #[must_use]
    pub const fn new(obj: ObjRef, otype: ObjectType, rights: Rights, generation: u32) -> Self {
        Self {
            obj,
            generation,
            otype,
            rights,
            _pad: [0; 6],
        }
    }

    /// Check if the slot is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.otype.is_none()
    }

    /// Referenced object.
    #[inline]
    #[must_use]
    pub const fn obj(&self) -> ObjRef {
        self.obj
    }

    /// Cached object type.
    #[inline]
    #[must_use]
    pub const fn otype(&self) -> ObjectType {
        self.otype
    }

    /// Access rights.
    #[inline]
    #[must_use]
    pub const fn rights(&self) -> Rights {
        self.rights
    }

    /// Mint-time generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Check a right.
    #[inline]
    #[must_use]
    pub const fn has_rights(&self, required: Rights) -> bool {
        self.rights.contains(required)
    }

    /// A copy of this slot with rights reduced by `mask`.
    ///
    /// The result's rights are always a subset of this slot's; this is
    /// the only way a capability is duplicated.
    #[inline]
    #[must_use]
    pub const fn attenuated(&self, mask: Rights) -> Self {
        Self {
            obj: self.obj,
            generation: self.generation,
            otype: self.otype,
            rights: self.rights.attenuate(mask),
            _pad: [0; 6],
        }
    }

    /// Clear the slot.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::empty();
    }
}

impl Default for CapSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for CapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{} {} [{}] gen={}", self.otype, self.obj, self.rights, self.generation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_size() {
        assert_eq!(core::mem::size_of::<CapSlot>(), 16);
    }

    #[test]
    fn test_empty_slot() {
        let slot = CapSlot::empty();
        assert!(slot.is_empty());
        assert!(slot.obj().is_null());
        assert_eq!(slot.rights(), Rights::NONE);
    }

    #[test]
    fn test_attenuated_copy() {
        let slot = CapSlot::new(ObjRef::from_index(3), ObjectType::IpcEndpoint, Rights::ALL, 1);
        let copy = slot.attenuated(Rights::SEND);
        assert_eq!(copy.rights(), Rights::SEND);
        assert_eq!(copy.obj(), slot.obj());
        assert_eq!(copy.generation(), slot.generation());
        assert!(copy.rights().is_subset_of(slot.rights()));
    }
}
