//! Frame-source seam
//!
//! The engine never allocates or touches physical memory directly; the
//! kernel supplies a [`FrameSource`] backed by the physical frame
//! allocator and the higher-half direct map, and host tests supply one
//! backed by plain buffers.

use graphene_common::{PhysAddr, VirtAddr};

/// Provider of intermediate-table frames and physical-memory access.
pub trait FrameSource {
    /// Allocate a zeroed 4 KiB frame for a new intermediate table.
    fn alloc_table(&mut self) -> Option<PhysAddr>;

    /// Release a frame previously returned by [`alloc_table`].
    ///
    /// [`alloc_table`]: Self::alloc_table
    fn free_table(&mut self, frame: PhysAddr);

    /// Virtual address through which `frame` can be read and written.
    fn frame_virt(&self, frame: PhysAddr) -> VirtAddr;
}
