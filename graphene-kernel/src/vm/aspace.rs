//! Address spaces
//!
//! An [`AddressSpace`] owns a page-table root plus the set of tracked
//! regions. Regions never overlap; user regions stay inside
//! `[USER_BASE, USER_TOP]`; and `write ∧ execute` is rejected with a
//! dedicated error at region-add time, before any page is touched.
//!
//! Destroying a space frees every non-shared user frame and the root.
//! Intermediate page tables are not walked and freed: a bounded leak
//! proportional to region count, reclaimed nowhere earlier than process
//! destruction.

use alloc::vec::Vec;
use core::fmt;

use graphene_common::addr::{PAGE_SIZE, PhysAddr, VirtAddr};
use graphene_paging::{self as paging, MapError, PageFlags};

use crate::memory::frame::{alloc_frame_zeroed, free_frame};
use crate::memory::layout::user_range_ok;
use crate::memory::{kernel_root, KernelFrames};

/// Region permission and attribute flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct RegionFlags(u8);

impl RegionFlags {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Readable.
    pub const READ: Self = Self(1 << 0);
    /// Writable.
    pub const WRITE: Self = Self(1 << 1);
    /// Executable.
    pub const EXECUTE: Self = Self(1 << 2);
    /// User-accessible.
    pub const USER: Self = Self(1 << 3);
    /// Guard region: tracked but never mapped; any access faults.
    pub const GUARD: Self = Self(1 << 4);
    /// Backing frames are shared (not freed on unmap).
    pub const SHARED: Self = Self(1 << 5);

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

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Translate to page-table flags.
    #[must_use]
    pub const fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::NONE;
        if self.contains(Self::READ) {
            flags = flags.with(PageFlags::READ);
        }
        if self.contains(Self::WRITE) {
            flags = flags.with(PageFlags::WRITE);
        }
        if self.contains(Self::EXECUTE) {
            flags = flags.with(PageFlags::EXECUTE);
        }
        if self.contains(Self::USER) {
            flags = flags.with(PageFlags::USER);
        }
        flags
    }
}

impl fmt::Debug for RegionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}",
            if self.contains(Self::READ) { "r" } else { "-" },
            if self.contains(Self::WRITE) { "w" } else { "-" },
            if self.contains(Self::EXECUTE) { "x" } else { "-" },
            if self.contains(Self::USER) { "u" } else { "-" },
            if self.contains(Self::GUARD) { "G" } else { "-" },
            if self.contains(Self::SHARED) { "S" } else { "-" },
        )
    }
}

/// A tracked `[start, start + size)` window.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    /// Page-aligned start.
    pub start: u64,
    /// Page-aligned size in bytes.
    pub size: u64,
    /// Permission set.
    pub flags: RegionFlags,
}

impl Region {
    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }

    /// Whether `addr` falls inside.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Whether this region overlaps `[start, start + size)`.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, start: u64, size: u64) -> bool {
        start < self.end() && self.start < start + size
    }
}

/// Address-space errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmError {
    /// `write ∧ execute` requested.
    WxViolation,
    /// The range overlaps an existing region.
    Overlap,
    /// Range outside the legal window (or zero-sized / wrapping).
    BadRange,
    /// Address or size not page-aligned.
    BadAlignment,
    /// Frame allocation failed.
    NoMemory,
    /// No region at the given address.
    NotFound,
    /// The page-table engine refused a mapping.
    MapFailed(MapError),
}

/// A page-table root plus its tracked regions.
pub struct AddressSpace {
    root: PhysAddr,
    regions: Vec<Region>,
    /// Kernel spaces skip the user-range checks and are never destroyed
    /// through [`destroy`](Self::destroy).
    kernel: bool,
}

impl AddressSpace {
    /// Create a fresh user address space: new zeroed root with the
    /// kernel upper half copied in.
    pub fn create() -> Result<Self, VmError> {
        let root = alloc_frame_zeroed().ok_or(VmError::NoMemory)?;
        paging::copy_kernel_mappings(&mut KernelFrames, root, kernel_root());
        Ok(Self {
            root,
            regions: Vec::new(),
            kernel: false,
        })
    }

    /// Wrap the bootloader-provided kernel tables. Never destroyed.
    #[must_use]
    pub fn kernel_space() -> Self {
        Self {
            root: kernel_root(),
            regions: Vec::new(),
            kernel: true,
        }
    }

    /// Physical address of the PML4 root.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    /// The tracked regions.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Find the region containing `vaddr`.
    #[must_use]
    pub fn region_at(&self, vaddr: u64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(vaddr))
    }

    /// Validate and record a region without touching page tables.
    fn add_region(&mut self, start: u64, size: u64, flags: RegionFlags) -> Result<(), VmError> {
        if flags.contains(RegionFlags::WRITE) && flags.contains(RegionFlags::EXECUTE) {
            return Err(VmError::WxViolation);
        }
        if start % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
            return Err(VmError::BadAlignment);
        }
        if size == 0 || start.checked_add(size).is_none() {
            return Err(VmError::BadRange);
        }
        if flags.contains(RegionFlags::USER) && !user_range_ok(start, size) {
            return Err(VmError::BadRange);
        }
        if !flags.contains(RegionFlags::USER) && VirtAddr::new(start).is_lower_half() {
            return Err(VmError::BadRange);
        }
        if self.regions.iter().any(|r| r.overlaps(start, size)) {
            return Err(VmError::Overlap);
        }
        self.regions.push(Region { start, size, flags });
        Ok(())
    }

    fn drop_region(&mut self, start: u64) {
        self.regions.retain(|r| r.start != start);
    }

    /// Map existing physical memory as a region. Rolls the region back
    /// if any page fails to map.
    pub fn map_region(
        &mut self,
        vaddr: u64,
        paddr: PhysAddr,
        size: u64,
        flags: RegionFlags,
    ) -> Result<(), VmError> {
        self.add_region(vaddr, size, flags)?;
        if flags.contains(RegionFlags::GUARD) {
            // Guard regions are tracked, never mapped.
            return Ok(());
        }

        if let Err(e) = paging::map_range(
            &mut KernelFrames,
            self.root,
            VirtAddr::new(vaddr),
            paddr,
            size,
            flags.page_flags(),
        ) {
            self.drop_region(vaddr);
            return Err(VmError::MapFailed(e));
        }
        Ok(())
    }

    /// Allocate and map zeroed frames for a region. On any per-page
    /// failure every page and frame this call produced is rolled back.
    pub fn map_region_alloc(
        &mut self,
        vaddr: u64,
        size: u64,
        flags: RegionFlags,
    ) -> Result<(), VmError> {
        self.add_region(vaddr, size, flags)?;
        if flags.contains(RegionFlags::GUARD) {
            return Ok(());
        }

        let pages = size / PAGE_SIZE;
        for i in 0..pages {
            let va = VirtAddr::new(vaddr + i * PAGE_SIZE);
            let frame = match alloc_frame_zeroed() {
                Some(f) => f,
                None => {
                    self.rollback_alloc(vaddr, i);
                    return Err(VmError::NoMemory);
                }
            };
            if let Err(e) =
                paging::map(&mut KernelFrames, self.root, va, frame, flags.page_flags())
            {
                free_frame(frame);
                self.rollback_alloc(vaddr, i);
                return Err(VmError::MapFailed(e));
            }
        }
        Ok(())
    }

    fn rollback_alloc(&mut self, vaddr: u64, mapped_pages: u64) {
        for j in 0..mapped_pages {
            let va = VirtAddr::new(vaddr + j * PAGE_SIZE);
            if let Some(frame) = paging::unmap(&mut KernelFrames, self.root, va) {
                free_frame(frame);
            }
        }
        self.drop_region(vaddr);
    }

    /// Unmap the region starting at `vaddr`, freeing backing frames
    /// unless the region is shared or a guard.
    pub fn unmap_region(&mut self, vaddr: u64) -> Result<(), VmError> {
        let region = *self
            .regions
            .iter()
            .find(|r| r.start == vaddr)
            .ok_or(VmError::NotFound)?;

        if !region.flags.contains(RegionFlags::GUARD) {
            let pages = region.size / PAGE_SIZE;
            let free_backing = !region.flags.contains(RegionFlags::SHARED);
            for i in 0..pages {
                let va = VirtAddr::new(region.start + i * PAGE_SIZE);
                if let Some(frame) = paging::unmap(&mut KernelFrames, self.root, va) {
                    if free_backing {
                        free_frame(frame);
                    }
                }
            }
        }
        self.drop_region(vaddr);
        Ok(())
    }

    /// Translate a virtual address through this space's tables.
    #[must_use]
    pub fn translate(&self, vaddr: u64) -> Option<PhysAddr> {
        paging::translate(&KernelFrames, self.root, VirtAddr::new(vaddr))
    }

    /// Leaf flags for a mapped address.
    #[must_use]
    pub fn page_flags_at(&self, vaddr: u64) -> Option<PageFlags> {
        paging::get_flags(&KernelFrames, self.root, VirtAddr::new(vaddr))
    }

    /// Tear the space down: every region unmapped (frames freed per the
    /// unmap rules) and the root frame released.
    ///
    /// The caller must ensure this root is not loaded in CR3.
    pub fn destroy(&mut self) {
        if self.kernel {
            return;
        }
        let starts: Vec<u64> = self.regions.iter().map(|r| r.start).collect();
        for start in starts {
            let _ = self.unmap_region(start);
        }
        if !self.root.is_null() {
            free_frame(self.root);
            self.root = PhysAddr::new(0);
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layout::{USER_BASE, USER_TOP};

    // Region bookkeeping is testable without a frame allocator: guard
    // regions never touch the page tables, and the W^X / overlap /
    // range checks all run before any mapping.

    fn space() -> AddressSpace {
        AddressSpace::kernel_space()
    }

    const GUARD_USER: RegionFlags = RegionFlags::from_bits(
        RegionFlags::GUARD.bits() | RegionFlags::USER.bits() | RegionFlags::READ.bits(),
    );

    #[test]
    fn test_wx_rejected_before_any_mapping() {
        let mut s = space();
        let wx = RegionFlags::READ
            .with(RegionFlags::WRITE)
            .with(RegionFlags::EXECUTE)
            .with(RegionFlags::USER);
        assert_eq!(
            s.map_region(USER_BASE + 0x1000, PhysAddr::new(0x5000), 0x1000, wx),
            Err(VmError::WxViolation)
        );
        assert!(s.regions().is_empty(), "no region may survive the W^X check");
    }

    #[test]
    fn test_overlap_rejected() {
        let mut s = space();
        s.map_region(USER_BASE, PhysAddr::new(0), 0x3000, GUARD_USER)
            .expect("first region");
        assert_eq!(
            s.map_region(USER_BASE + 0x1000, PhysAddr::new(0), 0x1000, GUARD_USER),
            Err(VmError::Overlap)
        );
        // Adjacent (non-overlapping) is fine.
        s.map_region(USER_BASE + 0x3000, PhysAddr::new(0), 0x1000, GUARD_USER)
            .expect("adjacent region");
        assert_eq!(s.regions().len(), 2);
    }

    #[test]
    fn test_user_range_enforced() {
        let mut s = space();
        assert_eq!(
            s.map_region(0x1000, PhysAddr::new(0), 0x1000, GUARD_USER),
            Err(VmError::BadRange)
        );
        assert_eq!(
            s.map_region(USER_TOP & !0xFFF, PhysAddr::new(0), 0x2000, GUARD_USER),
            Err(VmError::BadRange)
        );
    }

    #[test]
    fn test_alignment_enforced() {
        let mut s = space();
        assert_eq!(
            s.map_region(USER_BASE + 0x123, PhysAddr::new(0), 0x1000, GUARD_USER),
            Err(VmError::BadAlignment)
        );
        assert_eq!(
            s.map_region(USER_BASE, PhysAddr::new(0), 0x123, GUARD_USER),
            Err(VmError::BadAlignment)
        );
    }

    #[test]
    fn test_map_unmap_roundtrip_restores_regions() {
        let mut s = space();
        s.map_region(USER_BASE, PhysAddr::new(0), 0x2000, GUARD_USER)
            .expect("region");
        let before = s.regions().len();

        s.map_region(USER_BASE + 0x10_0000, PhysAddr::new(0), 0x4000, GUARD_USER)
            .expect("second region");
        s.unmap_region(USER_BASE + 0x10_0000).expect("unmap");

        assert_eq!(s.regions().len(), before);
        assert!(s.region_at(USER_BASE + 0x10_0000).is_none());
        assert!(s.region_at(USER_BASE + 0x1000).is_some());
    }

    #[test]
    fn test_unmap_missing_region() {
        let mut s = space();
        assert_eq!(s.unmap_region(USER_BASE), Err(VmError::NotFound));
    }
}
