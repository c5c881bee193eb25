//! Memory management
//!
//! Initialisation order: record the direct-map offset, build the frame
//! allocator over the boot memory map, bring up the kernel heap, record
//! the bootloader's page-table root (whose kernel half every address
//! space copies).

pub mod frame;
pub mod heap;
pub mod layout;
pub mod translate;

use core::sync::atomic::{AtomicU64, Ordering};

use graphene_common::{BootInfo, PhysAddr, VirtAddr};
use graphene_paging::FrameSource;

/// Physical root of the bootloader-provided kernel page tables.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

/// Initialise all of memory management from the boot info.
///
/// # Safety
///
/// Must be called exactly once, before anything allocates. The boot
/// info must be valid and the direct map active.
pub unsafe fn init(boot_info: &BootInfo) {
    translate::set_hhdm_offset(boot_info.hhdm_offset);
    // SAFETY: Called once, direct map just recorded.
    unsafe { frame::init(&boot_info.memory_map) };
    heap::init();
    KERNEL_ROOT.store(boot_info.page_table_root.as_u64(), Ordering::Release);

    let (free, total) = frame::memory_stats();
    log::info!(
        "memory initialised: {} / {} MiB free, kernel root {:#x}",
        free / (1024 * 1024),
        total / (1024 * 1024),
        boot_info.page_table_root.as_u64(),
    );
}

/// The kernel page-table root (source of the shared upper half).
#[must_use]
pub fn kernel_root() -> PhysAddr {
    PhysAddr::new(KERNEL_ROOT.load(Ordering::Acquire))
}

/// [`FrameSource`] over the frame allocator and the direct map, used by
/// the page-table engine for intermediate tables.
pub struct KernelFrames;

impl FrameSource for KernelFrames {
    fn alloc_table(&mut self) -> Option<PhysAddr> {
        frame::alloc_frame_zeroed()
    }

    fn free_table(&mut self, frame: PhysAddr) {
        frame::free_frame(frame);
    }

    fn frame_virt(&self, frame: PhysAddr) -> VirtAddr {
        translate::phys_to_virt(frame)
    }
}
