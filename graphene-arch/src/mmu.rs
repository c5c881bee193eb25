//! CR3 and TLB control
//!
//! Address-space switches write CR3 (implicit full TLB flush); single
//! leaf changes use `invlpg`.

#[cfg(target_os = "none")]
use x86_64::registers::control::{Cr3, Cr3Flags};
#[cfg(target_os = "none")]
use x86_64::structures::paging::PhysFrame;

/// Read the physical address of the active top-level page table.
#[cfg(target_os = "none")]
#[inline]
#[must_use]
pub fn current_root() -> u64 {
    Cr3::read().0.start_address().as_u64()
}

/// Install a new top-level page table.
///
/// Writing CR3 flushes the entire (non-global) TLB.
///
/// # Safety
///
/// `root` must be the page-aligned physical address of a valid PML4
/// whose kernel half maps the currently executing code and stack.
#[cfg(target_os = "none")]
#[inline]
pub unsafe fn load_root(root: u64) {
    let frame = PhysFrame::containing_address(x86_64::PhysAddr::new(root));
    // SAFETY: Contract forwarded to the caller.
    unsafe { Cr3::write(frame, Cr3Flags::empty()) };
}

/// Invalidate the TLB entry for one virtual address.
#[cfg(target_os = "none")]
#[inline]
pub fn invlpg(vaddr: u64) {
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(vaddr));
}

/// Flush the entire TLB by reloading CR3.
#[cfg(target_os = "none")]
#[inline]
pub fn flush_all() {
    x86_64::instructions::tlb::flush_all();
}

/// Read the faulting address after a page fault (CR2).
#[cfg(target_os = "none")]
#[inline]
#[must_use]
pub fn fault_address() -> u64 {
    x86_64::registers::control::Cr2::read_raw()
}

// -- Hosted stand-ins

#[cfg(not(target_os = "none"))]
#[inline]
#[must_use]
pub fn current_root() -> u64 {
    0
}

#[cfg(not(target_os = "none"))]
#[inline]
pub unsafe fn load_root(_root: u64) {}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn invlpg(_vaddr: u64) {}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn flush_all() {}

#[cfg(not(target_os = "none"))]
#[inline]
#[must_use]
pub fn fault_address() -> u64 {
    0
}
