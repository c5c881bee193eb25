//! Kernel Heap Glue
//!
//! Wires the slab/free-list heap from `graphene-alloc` to the physical
//! frame allocator and exposes it as the global allocator. The heap
//! claims contiguous frames and reaches them through the direct map.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use graphene_alloc::{FramePool, HeapStats, KernelHeap};
use graphene_arch::IrqSpinMutex;

use super::frame::{alloc_frames, free_frames};
use super::translate::{phys_to_virt, virt_to_phys};
use graphene_common::VirtAddr;

/// Frame pool backed by the physical frame allocator.
pub struct PfaPool;

impl FramePool for PfaPool {
    fn alloc_pages(&mut self, count: usize) -> Option<NonNull<u8>> {
        let phys = alloc_frames(count)?;
        NonNull::new(phys_to_virt(phys).as_mut_ptr::<u8>())
    }
}

static KERNEL_HEAP: IrqSpinMutex<Option<KernelHeap<PfaPool>>> = IrqSpinMutex::new(None);

/// Initialise the kernel heap.
///
/// # Panics
///
/// Panics on double initialisation.
pub fn init() {
    let mut guard = KERNEL_HEAP.lock();
    assert!(guard.is_none(), "heap initialised twice");
    *guard = Some(KernelHeap::new(PfaPool));
    log::info!("kernel heap initialised (slab classes 16..2048 + large free list)");
}

/// Allocate from the kernel heap. `None` on exhaustion.
#[must_use]
pub fn kalloc(size: usize, align: usize) -> Option<NonNull<u8>> {
    KERNEL_HEAP.lock().as_mut()?.alloc(size, align)
}

/// Free a kernel heap pointer.
///
/// # Safety
///
/// `ptr` must have come from [`kalloc`] and not been freed since.
pub unsafe fn kfree(ptr: NonNull<u8>) {
    if let Some(heap) = KERNEL_HEAP.lock().as_mut() {
        // SAFETY: Contract forwarded to the caller.
        unsafe { heap.free(ptr) };
    }
}

/// Snapshot heap statistics.
#[must_use]
pub fn heap_stats() -> HeapStats {
    KERNEL_HEAP
        .lock()
        .as_ref()
        .map(KernelHeap::stats)
        .unwrap_or_default()
}

/// Release one heap-claimed page range back to the frame allocator.
///
/// Only used on teardown paths that know the range is unused.
#[allow(dead_code)]
pub(super) fn release_pages(virt: VirtAddr, count: usize) {
    if let Some(phys) = virt_to_phys(virt) {
        free_frames(phys, count);
    }
}

// -- Global allocator

/// `GlobalAlloc` adapter over the locked heap.
pub struct GlobalHeap;

unsafe impl GlobalAlloc for GlobalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        match kalloc(layout.size(), layout.align()) {
            Some(p) => p.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if let Some(p) = NonNull::new(ptr) {
            // SAFETY: Caller guarantees this came from alloc().
            unsafe { kfree(p) };
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(p) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };
        let mut guard = KERNEL_HEAP.lock();
        let Some(heap) = guard.as_mut() else {
            return ptr::null_mut();
        };
        // SAFETY: Caller guarantees ptr/layout validity.
        match unsafe { heap.realloc(p, layout.size(), new_size, layout.align()) } {
            Some(q) => q.as_ptr(),
            None => ptr::null_mut(),
        }
    }
}

#[cfg(target_os = "none")]
#[global_allocator]
static GLOBAL_HEAP: GlobalHeap = GlobalHeap;

#[cfg(target_os = "none")]
#[alloc_error_handler]
fn oom_handler(layout: Layout) -> ! {
    panic!(
        "kernel heap exhausted: alloc of {} bytes (align {}) failed",
        layout.size(),
        layout.align()
    );
}
