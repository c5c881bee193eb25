//! Table walking and mapping operations
//!
//! All operations take the physical address of a PML4 root and a
//! [`FrameSource`]. Missing intermediate tables are allocated, zeroed,
//! and stamped present/writable/user-traversable; the leaf entry alone
//! decides the final access. Every successful leaf change invalidates
//! the TLB entry for that one address.
//!
//! Full unmaps do not free intermediate tables; they are reclaimed when
//! the owning address space is destroyed (a bounded leak proportional to
//! region count).

use graphene_arch::mmu;
use graphene_common::{PhysAddr, VirtAddr, addr::PAGE_SIZE};

use crate::entry::{PageFlags, PageTableEntry};
use crate::table::{table_index, huge_offset, page_offset, PageTable, ENTRIES_PER_TABLE, KERNEL_PML4_START};
use crate::traits::FrameSource;

/// Errors from mapping operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// The leaf entry is already present.
    AlreadyMapped,
    /// No frame available for an intermediate table.
    NoMemory,
    /// No leaf entry present at this address.
    NotMapped,
    /// The walk hit a huge-page leaf above the 4 KiB level.
    HugePage,
}

/// Access a table through the frame source.
///
/// # Safety
///
/// `frame` must be a page-table frame owned by the walk rooted at a
/// valid PML4; `FrameSource::frame_virt` must return a mapping valid for
/// reads and writes of 4 KiB.
unsafe fn table_at<'a, S: FrameSource>(src: &S, frame: PhysAddr) -> &'a mut PageTable {
    // SAFETY: Contract forwarded to the caller.
    unsafe { &mut *src.frame_virt(frame).as_mut_ptr::<PageTable>() }
}

/// Walk down to the level-1 table, optionally creating missing levels.
///
/// Returns the level-1 table and the final index, or an error.
fn walk<'a, S: FrameSource>(
    src: &mut S,
    root: PhysAddr,
    vaddr: VirtAddr,
    create: bool,
) -> Result<(&'a mut PageTable, usize), MapError> {
    let mut frame = root;

    for level in (2..=4u8).rev() {
        // SAFETY: `frame` is the root or a table entry discovered below it.
        let table = unsafe { table_at(src, frame) };
        let idx = table_index(vaddr, level);
        let entry = table.entry(idx);

        if entry.is_present() {
            if entry.is_huge() {
                return Err(MapError::HugePage);
            }
            frame = PhysAddr::new(entry.addr());
        } else if create {
            let new_frame = src.alloc_table().ok_or(MapError::NoMemory)?;
            table.set_entry(idx, PageTableEntry::table(new_frame.as_u64()));
            frame = new_frame;
        } else {
            return Err(MapError::NotMapped);
        }
    }

    // SAFETY: `frame` now names the level-1 table.
    let table = unsafe { table_at(src, frame) };
    Ok((table, table_index(vaddr, 1)))
}

/// Map one 4 KiB page. Fails with [`MapError::AlreadyMapped`] if the
/// leaf is present.
pub fn map<S: FrameSource>(
    src: &mut S,
    root: PhysAddr,
    vaddr: VirtAddr,
    paddr: PhysAddr,
    flags: PageFlags,
) -> Result<(), MapError> {
    let (table, idx) = walk(src, root, vaddr, true)?;
    if table.entry(idx).is_present() {
        return Err(MapError::AlreadyMapped);
    }
    table.set_entry(idx, PageTableEntry::leaf(paddr.as_u64(), flags));
    mmu::invlpg(vaddr.as_u64());
    Ok(())
}

/// Map one 4 KiB page, overwriting any existing leaf.
pub fn map_force<S: FrameSource>(
    src: &mut S,
    root: PhysAddr,
    vaddr: VirtAddr,
    paddr: PhysAddr,
    flags: PageFlags,
) -> Result<(), MapError> {
    let (table, idx) = walk(src, root, vaddr, true)?;
    table.set_entry(idx, PageTableEntry::leaf(paddr.as_u64(), flags));
    mmu::invlpg(vaddr.as_u64());
    Ok(())
}

/// Unmap one page. A no-op (returning `None`) when nothing is mapped.
///
/// Returns the physical frame that was mapped, so the caller can free
/// it if it owned the backing memory.
pub fn unmap<S: FrameSource>(src: &mut S, root: PhysAddr, vaddr: VirtAddr) -> Option<PhysAddr> {
    let (table, idx) = walk(src, root, vaddr, false).ok()?;
    let entry = table.entry(idx);
    if !entry.is_present() {
        return None;
    }
    table.set_entry(idx, PageTableEntry::empty());
    mmu::invlpg(vaddr.as_u64());
    Some(PhysAddr::new(entry.addr()))
}

/// Translate a virtual address. Returns `None` when unmapped.
///
/// Huge-page entries short-circuit the walk and return the leaf
/// directly.
pub fn translate<S: FrameSource>(src: &S, root: PhysAddr, vaddr: VirtAddr) -> Option<PhysAddr> {
    let mut frame = root;

    for level in (2..=4u8).rev() {
        // SAFETY: `frame` descends from the caller's root.
        let table = unsafe { table_at(src, frame) };
        let entry = table.entry(table_index(vaddr, level));
        if !entry.is_present() {
            return None;
        }
        if entry.is_huge() {
            return Some(PhysAddr::new(entry.addr() + huge_offset(vaddr, level)));
        }
        frame = PhysAddr::new(entry.addr());
    }

    // SAFETY: `frame` names the level-1 table.
    let table = unsafe { table_at(src, frame) };
    let entry = table.entry(table_index(vaddr, 1));
    if !entry.is_present() {
        return None;
    }
    Some(PhysAddr::new(entry.addr() + page_offset(vaddr)))
}

/// Read the portable flags of the leaf mapping `vaddr`, if any.
pub fn get_flags<S: FrameSource>(src: &S, root: PhysAddr, vaddr: VirtAddr) -> Option<PageFlags> {
    let mut frame = root;

    for level in (2..=4u8).rev() {
        // SAFETY: `frame` descends from the caller's root.
        let table = unsafe { table_at(src, frame) };
        let entry = table.entry(table_index(vaddr, level));
        if !entry.is_present() {
            return None;
        }
        if entry.is_huge() {
            return Some(entry.flags());
        }
        frame = PhysAddr::new(entry.addr());
    }

    // SAFETY: `frame` names the level-1 table.
    let table = unsafe { table_at(src, frame) };
    let entry = table.entry(table_index(vaddr, 1));
    entry.is_present().then(|| entry.flags())
}

/// Rewrite the flags of an existing leaf, keeping its frame.
pub fn update_flags<S: FrameSource>(
    src: &mut S,
    root: PhysAddr,
    vaddr: VirtAddr,
    flags: PageFlags,
) -> Result<(), MapError> {
    let (table, idx) = walk(src, root, vaddr, false)?;
    let entry = table.entry(idx);
    if !entry.is_present() {
        return Err(MapError::NotMapped);
    }
    table.set_entry(idx, PageTableEntry::leaf(entry.addr(), flags));
    mmu::invlpg(vaddr.as_u64());
    Ok(())
}

/// Map a contiguous range of pages.
///
/// On any per-page failure the pages this call already mapped are
/// unmapped again before the error is returned.
pub fn map_range<S: FrameSource>(
    src: &mut S,
    root: PhysAddr,
    vaddr: VirtAddr,
    paddr: PhysAddr,
    size: u64,
    flags: PageFlags,
) -> Result<(), MapError> {
    let pages = size.div_ceil(PAGE_SIZE);

    for i in 0..pages {
        let va = vaddr.offset(i * PAGE_SIZE);
        let pa = paddr.offset(i * PAGE_SIZE);
        if let Err(e) = map(src, root, va, pa, flags) {
            for j in 0..i {
                unmap(src, root, vaddr.offset(j * PAGE_SIZE));
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Unmap a contiguous range of pages. Absent pages are skipped.
pub fn unmap_range<S: FrameSource>(src: &mut S, root: PhysAddr, vaddr: VirtAddr, size: u64) {
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        unmap(src, root, vaddr.offset(i * PAGE_SIZE));
    }
}

/// Copy the kernel (upper) half of the PML4 (entries 256..512)
/// verbatim from `src_root` into `dst_root`, so every address space
/// shares the kernel mappings.
pub fn copy_kernel_mappings<S: FrameSource>(src: &mut S, dst_root: PhysAddr, src_root: PhysAddr) {
    // SAFETY: Both roots are PML4 frames owned by the caller.
    let dst = unsafe { table_at(src, dst_root) };
    // SAFETY: As above.
    let src_table = unsafe { table_at(src, src_root) };

    for idx in KERNEL_PML4_START..ENTRIES_PER_TABLE {
        dst.set_entry(idx, src_table.entry(idx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec::Vec;

    /// Frame source backed by leaked host allocations; the "physical"
    /// address of a table is its host address.
    struct TestFrames {
        allocated: Vec<PhysAddr>,
    }

    impl TestFrames {
        fn new() -> Self {
            Self { allocated: Vec::new() }
        }

        fn alloc_root(&mut self) -> PhysAddr {
            self.alloc_table().expect("host allocation")
        }
    }

    impl FrameSource for TestFrames {
        fn alloc_table(&mut self) -> Option<PhysAddr> {
            let table: Box<PageTable> = Box::new(PageTable::new());
            let addr = PhysAddr::new(Box::into_raw(table) as u64);
            self.allocated.push(addr);
            Some(addr)
        }

        fn free_table(&mut self, frame: PhysAddr) {
            self.allocated.retain(|f| *f != frame);
            // SAFETY: Only addresses produced by alloc_table get here.
            drop(unsafe { Box::from_raw(frame.as_u64() as *mut PageTable) });
        }

        fn frame_virt(&self, frame: PhysAddr) -> VirtAddr {
            VirtAddr::new(frame.as_u64())
        }
    }

    impl Drop for TestFrames {
        fn drop(&mut self) {
            for frame in core::mem::take(&mut self.allocated) {
                // SAFETY: Produced by alloc_table and not yet freed.
                drop(unsafe { Box::from_raw(frame.as_u64() as *mut PageTable) });
            }
        }
    }

    const USER_RW: PageFlags = PageFlags::from_bits(
        PageFlags::READ.bits() | PageFlags::WRITE.bits() | PageFlags::USER.bits(),
    );

    #[test]
    fn test_map_translate_unmap() {
        let mut src = TestFrames::new();
        let root = src.alloc_root();
        let va = VirtAddr::new(0x40_0000);
        let pa = PhysAddr::new(0x5000);

        map(&mut src, root, va, pa, USER_RW).expect("map");
        assert_eq!(translate(&src, root, va), Some(pa));
        assert_eq!(
            translate(&src, root, VirtAddr::new(0x40_0123)),
            Some(PhysAddr::new(0x5123))
        );

        assert_eq!(unmap(&mut src, root, va), Some(pa));
        assert_eq!(translate(&src, root, va), None);
        // Second unmap is a no-op.
        assert_eq!(unmap(&mut src, root, va), None);
    }

    #[test]
    fn test_double_map_fails() {
        let mut src = TestFrames::new();
        let root = src.alloc_root();
        let va = VirtAddr::new(0x40_0000);

        map(&mut src, root, va, PhysAddr::new(0x5000), USER_RW).expect("map");
        assert_eq!(
            map(&mut src, root, va, PhysAddr::new(0x6000), USER_RW),
            Err(MapError::AlreadyMapped)
        );
        // map_force overwrites.
        map_force(&mut src, root, va, PhysAddr::new(0x6000), USER_RW).expect("force");
        assert_eq!(translate(&src, root, va), Some(PhysAddr::new(0x6000)));
    }

    #[test]
    fn test_update_flags() {
        let mut src = TestFrames::new();
        let root = src.alloc_root();
        let va = VirtAddr::new(0x40_0000);

        map(&mut src, root, va, PhysAddr::new(0x5000), USER_RW).expect("map");
        let rx = PageFlags::READ.with(PageFlags::EXECUTE).with(PageFlags::USER);
        update_flags(&mut src, root, va, rx).expect("update");
        let flags = get_flags(&src, root, va).expect("flags");
        assert!(flags.is_executable());
        assert!(!flags.is_writable());

        assert_eq!(
            update_flags(&mut src, root, VirtAddr::new(0x80_0000), rx),
            Err(MapError::NotMapped)
        );
    }

    #[test]
    fn test_map_range_rollback() {
        let mut src = TestFrames::new();
        let root = src.alloc_root();
        let base = VirtAddr::new(0x40_0000);

        // Occupy the third page so a 4-page range map fails part-way.
        map(&mut src, root, base.offset(2 * 0x1000), PhysAddr::new(0x9000), USER_RW)
            .expect("pre-map");

        let err = map_range(&mut src, root, base, PhysAddr::new(0x10_0000), 4 * 0x1000, USER_RW);
        assert_eq!(err, Err(MapError::AlreadyMapped));

        // The first two pages were rolled back; the pre-existing page survives.
        assert_eq!(translate(&src, root, base), None);
        assert_eq!(translate(&src, root, base.offset(0x1000)), None);
        assert_eq!(
            translate(&src, root, base.offset(2 * 0x1000)),
            Some(PhysAddr::new(0x9000))
        );
    }

    #[test]
    fn test_copy_kernel_mappings() {
        let mut src = TestFrames::new();
        let kernel_root = src.alloc_root();
        let kva = VirtAddr::new(0xFFFF_FFFF_8000_0000);

        map(
            &mut src,
            kernel_root,
            kva,
            PhysAddr::new(0x7000),
            PageFlags::KERNEL_RW.with(PageFlags::EXECUTE),
        )
        .expect("map kernel");

        let user_root = src.alloc_root();
        copy_kernel_mappings(&mut src, user_root, kernel_root);

        // The kernel half is shared; the user half is untouched.
        assert_eq!(translate(&src, user_root, kva), Some(PhysAddr::new(0x7000)));
        assert_eq!(translate(&src, user_root, VirtAddr::new(0x40_0000)), None);
    }
}
