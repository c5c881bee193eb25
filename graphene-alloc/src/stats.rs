//! Heap statistics

use crate::config::NUM_SIZE_CLASSES;

/// Point-in-time heap statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStats {
    /// Pages claimed by the slab classes.
    pub slab_pages: usize,
    /// Free slots per size class.
    pub slab_free_slots: [usize; NUM_SIZE_CLASSES],
    /// Pages claimed by the large heap.
    pub large_pages: usize,
    /// Usable bytes free on the large free list.
    pub large_free_bytes: usize,
    /// Live large blocks.
    pub large_live_blocks: usize,
}

impl HeapStats {
    /// Total pages claimed from the frame pool.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.slab_pages + self.large_pages
    }
}
