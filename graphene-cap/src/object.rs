//! Kernel object references and headers
//!
//! Objects live in the kernel's arena and are named by [`ObjRef`], an
//! index rather than a pointer: references can be bounds-checked, and a
//! bumped generation invalidates every stale reference at once.

use core::fmt;

/// Kernel object type discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ObjectType {
    /// Empty slot / no object.
    #[default]
    None = 0,
    /// Physical memory range.
    Memory = 1,
    /// Thread of execution.
    Thread = 2,
    /// Process (address space + capability table + threads).
    Process = 3,
    /// IPC rendezvous endpoint.
    IpcEndpoint = 4,
    /// Pair of cross-referenced endpoints.
    IpcChannel = 5,
    /// Hardware interrupt line.
    Irq = 6,
    /// I/O-port range.
    IoPort = 7,
    /// Device MMIO window.
    DeviceMmio = 8,
}

impl ObjectType {
    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Memory => "memory",
            Self::Thread => "thread",
            Self::Process => "process",
            Self::IpcEndpoint => "ipc_endpoint",
            Self::IpcChannel => "ipc_channel",
            Self::Irq => "irq",
            Self::IoPort => "ioport",
            Self::DeviceMmio => "device_mmio",
        }
    }

    /// Decode a raw tag.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Memory,
            2 => Self::Thread,
            3 => Self::Process,
            4 => Self::IpcEndpoint,
            5 => Self::IpcChannel,
            6 => Self::Irq,
            7 => Self::IoPort,
            8 => Self::DeviceMmio,
            _ => return None,
        })
    }

    /// Check if this is the empty tag.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Index into the kernel object arena. Zero is the null reference.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Null reference (no object).
    pub const NULL: Self = Self(0);

    /// Create a reference from a raw arena index (index 0 is null).
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Raw arena index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check if this is the null reference.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a non-null reference.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjRef::NULL")
        } else {
            write!(f, "ObjRef({})", self.0)
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Header present at the front of every kernel object.
///
/// # Invariants
///
/// - A capability referencing the object is live iff `!destroyed` and
///   the capability's generation equals `generation`.
/// - `refcount` counts capability-table entries referencing the object;
///   reaching zero is the only path to reclaiming the arena slot.
#[derive(Clone, Copy, Debug)]
pub struct ObjectHeader {
    /// Type tag.
    pub otype: ObjectType,
    /// Number of capability slots referencing this object.
    pub refcount: u32,
    /// Bumped on every invalidation; stale capabilities fail to match.
    pub generation: u32,
    /// Set on invalidation; the object is dead regardless of refcount.
    pub destroyed: bool,
}

impl ObjectHeader {
    /// Header for a freshly allocated object of the given type,
    /// continuing the slot's generation sequence.
    #[must_use]
    pub const fn new(otype: ObjectType, generation: u32) -> Self {
        Self {
            otype,
            refcount: 0,
            generation,
            destroyed: false,
        }
    }

    /// Invalidate the object: bump the generation (wrapping) and mark
    /// it destroyed. Every outstanding capability is now stale.
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.destroyed = true;
    }

    /// Check whether a capability minted at `cap_generation` is live
    /// against this header.
    #[inline]
    #[must_use]
    pub const fn is_live_for(&self, cap_generation: u32) -> bool {
        !self.destroyed && self.generation == cap_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_roundtrip() {
        for raw in 0..=8u8 {
            let t = ObjectType::from_raw(raw).expect("valid tag");
            assert_eq!(t as u8, raw);
        }
        assert_eq!(ObjectType::from_raw(9), None);
    }

    #[test]
    fn test_invalidation() {
        let mut h = ObjectHeader::new(ObjectType::IpcEndpoint, 7);
        assert!(h.is_live_for(7));
        assert!(!h.is_live_for(6));

        h.invalidate();
        assert!(h.destroyed);
        assert_eq!(h.generation, 8);
        assert!(!h.is_live_for(7));
        assert!(!h.is_live_for(8)); // destroyed beats a matching generation
    }

    #[test]
    fn test_generation_wraps() {
        let mut h = ObjectHeader::new(ObjectType::Memory, u32::MAX);
        h.invalidate();
        assert_eq!(h.generation, 0);
    }
}
