//! Page-table entry encoding
//!
//! x86-64 entry bits plus [`PageFlags`], the portable permission set the
//! rest of the kernel speaks. Execute permission is expressed through
//! the NX bit, so a mapping without `EXECUTE` gets NX set.

use core::fmt;

/// Portable page permission/attribute flags.
///
/// These are what the VMM and the loader pass around; the entry encoder
/// turns them into hardware bits.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct PageFlags(u8);

impl PageFlags {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Readable (present).
    pub const READ: Self = Self(1 << 0);
    /// Writable.
    pub const WRITE: Self = Self(1 << 1);
    /// Executable (clears NX).
    pub const EXECUTE: Self = Self(1 << 2);
    /// Accessible from ring 3.
    pub const USER: Self = Self(1 << 3);
    /// Global mapping (survives CR3 reload).
    pub const GLOBAL: Self = Self(1 << 4);
    /// Uncached (device memory).
    pub const NO_CACHE: Self = Self(1 << 5);

    /// Kernel read-write data.
    pub const KERNEL_RW: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// Create from raw bits (unknown bits masked off).
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3F)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[inline]
    #[must_use]
    pub const fn is_executable(self) -> bool {
        self.contains(Self::EXECUTE)
    }

    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}",
            if self.contains(Self::READ) { "r" } else { "-" },
            if self.contains(Self::WRITE) { "w" } else { "-" },
            if self.contains(Self::EXECUTE) { "x" } else { "-" },
            if self.contains(Self::USER) { "u" } else { "-" },
            if self.contains(Self::GLOBAL) { "g" } else { "-" },
            if self.contains(Self::NO_CACHE) { "c" } else { "-" },
        )
    }
}

/// A raw x86-64 page-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// Entry is valid.
    pub const PRESENT: u64 = 1 << 0;
    /// Writes allowed.
    pub const WRITABLE: u64 = 1 << 1;
    /// Ring-3 accesses allowed.
    pub const USER: u64 = 1 << 2;
    /// Write-through caching.
    pub const WRITE_THROUGH: u64 = 1 << 3;
    /// Caching disabled.
    pub const NO_CACHE: u64 = 1 << 4;
    /// Set by hardware on access.
    pub const ACCESSED: u64 = 1 << 5;
    /// Set by hardware on write.
    pub const DIRTY: u64 = 1 << 6;
    /// 2 MiB / 1 GiB leaf at a non-terminal level.
    pub const HUGE: u64 = 1 << 7;
    /// Not flushed on CR3 reload.
    pub const GLOBAL: u64 = 1 << 8;
    /// Instruction fetch forbidden (requires EFER.NXE).
    pub const NO_EXECUTE: u64 = 1 << 63;

    /// Physical-address field mask (bits 12..52).
    pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    /// An empty (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Encode a leaf entry from a frame address and portable flags.
    #[must_use]
    pub const fn leaf(frame: u64, flags: PageFlags) -> Self {
        let mut bits = (frame & Self::ADDR_MASK) | Self::PRESENT;
        if flags.contains(PageFlags::WRITE) {
            bits |= Self::WRITABLE;
        }
        if flags.contains(PageFlags::USER) {
            bits |= Self::USER;
        }
        if flags.contains(PageFlags::GLOBAL) {
            bits |= Self::GLOBAL;
        }
        if flags.contains(PageFlags::NO_CACHE) {
            bits |= Self::NO_CACHE;
        }
        if !flags.contains(PageFlags::EXECUTE) {
            bits |= Self::NO_EXECUTE;
        }
        Self(bits)
    }

    /// Encode an intermediate-table entry. Intermediate levels are
    /// present, writable, and user-traversable; the leaf decides the
    /// final access.
    #[inline]
    #[must_use]
    pub const fn table(frame: u64) -> Self {
        Self((frame & Self::ADDR_MASK) | Self::PRESENT | Self::WRITABLE | Self::USER)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Create from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_huge(self) -> bool {
        self.0 & Self::HUGE != 0
    }

    /// Physical address this entry points at.
    #[inline]
    #[must_use]
    pub const fn addr(self) -> u64 {
        self.0 & Self::ADDR_MASK
    }

    /// Decode the hardware bits back into portable flags.
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        let mut flags = PageFlags::NONE;
        if self.is_present() {
            flags = flags.with(PageFlags::READ);
        }
        if self.0 & Self::WRITABLE != 0 {
            flags = flags.with(PageFlags::WRITE);
        }
        if self.0 & Self::USER != 0 {
            flags = flags.with(PageFlags::USER);
        }
        if self.0 & Self::GLOBAL != 0 {
            flags = flags.with(PageFlags::GLOBAL);
        }
        if self.0 & Self::NO_CACHE != 0 {
            flags = flags.with(PageFlags::NO_CACHE);
        }
        if self.0 & Self::NO_EXECUTE == 0 && self.is_present() {
            flags = flags.with(PageFlags::EXECUTE);
        }
        flags
    }

    /// Clear the entry.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_present() {
            write!(f, "PTE(<absent>)")
        } else {
            write!(f, "PTE({:#x}, {:?})", self.addr(), self.flags())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let flags = PageFlags::READ
            .with(PageFlags::WRITE)
            .with(PageFlags::USER);
        let e = PageTableEntry::leaf(0x1234_5000, flags);
        assert!(e.is_present());
        assert_eq!(e.addr(), 0x1234_5000);
        assert_eq!(e.flags(), flags);
    }

    #[test]
    fn test_nx_tracks_execute() {
        let rx = PageTableEntry::leaf(0x1000, PageFlags::READ.with(PageFlags::EXECUTE));
        assert_eq!(rx.bits() & PageTableEntry::NO_EXECUTE, 0);
        assert!(rx.flags().is_executable());

        let ro = PageTableEntry::leaf(0x1000, PageFlags::READ);
        assert_ne!(ro.bits() & PageTableEntry::NO_EXECUTE, 0);
        assert!(!ro.flags().is_executable());
    }

    #[test]
    fn test_table_entry_traversable() {
        let t = PageTableEntry::table(0x9000);
        assert!(t.is_present());
        assert!(!t.is_huge());
        assert_ne!(t.bits() & PageTableEntry::WRITABLE, 0);
        assert_ne!(t.bits() & PageTableEntry::USER, 0);
    }

    #[test]
    fn test_addr_mask_strips_offset() {
        let e = PageTableEntry::leaf(0x1234_5678, PageFlags::READ);
        assert_eq!(e.addr(), 0x1234_5000);
    }
}
