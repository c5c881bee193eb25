//! Physical Frame Allocator
//!
//! Bitmap-tracked 4 KiB frames over the boot memory map. One bit per
//! frame up to the highest physical address observed (1 = used).
//! Initialisation marks the whole bitmap used, then frees every
//! `usable` / `bootloader-reclaimable` frame except the pages the
//! bitmap itself occupies.
//!
//! Single-frame allocation scans from a rolling hint; contiguous
//! allocation uses a sliding window. `free` is idempotent: it only
//! toggles a bit that was set. Exhaustion returns `None`, never panics.

use graphene_arch::IrqSpinMutex;
use graphene_common::addr::{PAGE_SIZE, PhysAddr};
use graphene_common::MemoryMap;

use super::translate::phys_to_virt;

// -- Alignment helpers

#[inline]
const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[inline]
const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

// -- Frame allocator

/// Bitmap frame allocator.
///
/// # Invariants
///
/// - `free_frames` equals the number of zero bits in the bitmap
/// - `free_frames + used_frames() == total_frames`
pub struct FrameAllocator {
    /// One bit per frame; 1 = used.
    bitmap: &'static mut [u64],
    /// Frames tracked (frame 0 up to the highest mapped address).
    total_frames: usize,
    /// Current number of free frames.
    free_frames: usize,
    /// Rolling scan hint. Not reset on free, so a freed frame is not
    /// handed straight back while earlier-wrapped frames remain.
    search_hint: usize,
}

impl FrameAllocator {
    const BITS_PER_ENTRY: usize = 64;

    /// Build an allocator over a caller-supplied bitmap with every
    /// frame marked used.
    ///
    /// # Safety
    ///
    /// The bitmap slice must stay exclusively owned by this allocator
    /// and must hold at least `total_frames.div_ceil(64)` entries.
    pub unsafe fn new(bitmap: &'static mut [u64], total_frames: usize) -> Self {
        assert!(
            bitmap.len() >= total_frames.div_ceil(Self::BITS_PER_ENTRY),
            "bitmap too small: {} entries for {} frames",
            bitmap.len(),
            total_frames,
        );

        for entry in bitmap.iter_mut() {
            *entry = !0;
        }

        Self {
            bitmap,
            total_frames,
            free_frames: 0,
            search_hint: 0,
        }
    }

    #[inline]
    fn bitmap_pos(frame: usize) -> (usize, usize) {
        (frame / Self::BITS_PER_ENTRY, frame % Self::BITS_PER_ENTRY)
    }

    #[inline]
    fn is_free(&self, frame: usize) -> bool {
        let (entry, bit) = Self::bitmap_pos(frame);
        (self.bitmap[entry] >> bit) & 1 == 0
    }

    /// Mark `count` frames starting at `start` free. Idempotent: bits
    /// already free are skipped. Out-of-range frames are ignored.
    ///
    /// Returns the number of frames actually freed.
    pub fn free_range(&mut self, start: usize, count: usize) -> usize {
        let end = (start + count).min(self.total_frames);
        let mut freed = 0;

        for frame in start..end {
            let (entry, bit) = Self::bitmap_pos(frame);
            if (self.bitmap[entry] >> bit) & 1 == 1 {
                self.bitmap[entry] &= !(1 << bit);
                freed += 1;
            }
        }

        self.free_frames += freed;
        freed
    }

    /// Mark `count` frames starting at `start` used.
    ///
    /// Returns the number of frames actually transitioned.
    pub fn mark_used(&mut self, start: usize, count: usize) -> usize {
        let end = (start + count).min(self.total_frames);
        let mut marked = 0;

        for frame in start..end {
            let (entry, bit) = Self::bitmap_pos(frame);
            if (self.bitmap[entry] >> bit) & 1 == 0 {
                self.bitmap[entry] |= 1 << bit;
                marked += 1;
            }
        }

        debug_assert!(self.free_frames >= marked);
        self.free_frames -= marked;
        marked
    }

    /// Allocate one frame.
    #[must_use]
    pub fn alloc(&mut self) -> Option<usize> {
        if self.free_frames == 0 {
            return None;
        }

        let found = self
            .find_run(self.search_hint, self.total_frames, 1)
            .or_else(|| self.find_run(0, self.search_hint, 1))?;

        self.mark_used(found, 1);
        self.search_hint = found + 1;
        if self.search_hint >= self.total_frames {
            self.search_hint = 0;
        }
        Some(found)
    }

    /// Allocate `count` contiguous frames with a sliding window.
    #[must_use]
    pub fn alloc_contiguous(&mut self, count: usize) -> Option<usize> {
        if count == 0 || self.free_frames < count {
            return None;
        }

        let found = self
            .find_run(self.search_hint, self.total_frames, count)
            .or_else(|| self.find_run(0, self.total_frames, count))?;

        self.mark_used(found, count);
        self.search_hint = found + count;
        if self.search_hint >= self.total_frames {
            self.search_hint = 0;
        }
        Some(found)
    }

    /// Find a run of `count` free frames in `[start, end)`.
    fn find_run(&self, start: usize, end: usize, count: usize) -> Option<usize> {
        if start >= end || count == 0 {
            return None;
        }

        let mut run_start = start;
        let mut run_len = 0;
        let mut frame = start;

        while frame < end {
            let (entry, _) = Self::bitmap_pos(frame);
            // Skip fully-used words.
            if self.bitmap[entry] == !0 {
                frame = ((entry + 1) * Self::BITS_PER_ENTRY).min(end);
                run_len = 0;
                continue;
            }

            if self.is_free(frame) {
                if run_len == 0 {
                    run_start = frame;
                }
                run_len += 1;
                if run_len >= count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
            frame += 1;
        }
        None
    }

    /// Free one frame (idempotent).
    pub fn free(&mut self, frame: usize) {
        self.free_range(frame, 1);
    }

    /// Free frames.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_frames
    }

    /// Total frames tracked.
    #[inline]
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.total_frames
    }

    /// Used frames.
    #[inline]
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.total_frames - self.free_frames
    }

    /// Recount free bits and compare with the running counter. O(n);
    /// debug builds only.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn verify_invariants(&self) -> bool {
        let actual = (0..self.total_frames).filter(|&f| self.is_free(f)).count();
        actual == self.free_frames
    }
}

// -- Global allocator instance

static FRAME_ALLOCATOR: IrqSpinMutex<Option<FrameAllocator>> = IrqSpinMutex::new(None);

/// Initialise the global frame allocator from the boot memory map.
///
/// The bitmap is carved from the start of the first usable region large
/// enough to hold it, reached through the direct map.
///
/// # Safety
///
/// Must be called exactly once, after the direct-map offset is set and
/// before any frame allocation. The memory map must describe RAM
/// covered by the direct map.
pub unsafe fn init(memory_map: &MemoryMap) {
    let max_phys = memory_map.max_phys_addr();
    let total_frames = (align_up(max_phys, PAGE_SIZE) / PAGE_SIZE) as usize;
    let bitmap_entries = total_frames.div_ceil(64);
    let bitmap_bytes = align_up((bitmap_entries * 8) as u64, PAGE_SIZE);

    // Home for the bitmap: first usable region that can hold it.
    let home = memory_map
        .iter()
        .find(|r| {
            r.kind.is_usable() && align_up(r.base, PAGE_SIZE) + bitmap_bytes <= r.end()
        })
        .expect("no usable region can hold the frame bitmap");
    let bitmap_phys = align_up(home.base, PAGE_SIZE);

    // SAFETY: The region is RAM under the direct map; we claim these
    // pages for the bitmap before anything else allocates.
    let bitmap = unsafe {
        core::slice::from_raw_parts_mut(
            phys_to_virt(PhysAddr::new(bitmap_phys)).as_mut_ptr::<u64>(),
            bitmap_entries,
        )
    };

    // SAFETY: Exclusive ownership established above.
    let mut allocator = unsafe { FrameAllocator::new(bitmap, total_frames) };

    // Free usable regions, aligned inward so partial frames stay used.
    for region in memory_map.iter() {
        if !region.kind.is_usable() {
            continue;
        }
        let start = align_up(region.base, PAGE_SIZE);
        let end = align_down(region.end(), PAGE_SIZE);
        if end > start {
            allocator.free_range(
                (start / PAGE_SIZE) as usize,
                ((end - start) / PAGE_SIZE) as usize,
            );
        }
    }

    // The bitmap's own pages stay used.
    allocator.mark_used(
        (bitmap_phys / PAGE_SIZE) as usize,
        (bitmap_bytes / PAGE_SIZE) as usize,
    );

    log::info!(
        "frame allocator: {} MiB free / {} MiB tracked, bitmap {} KiB at {:#x}",
        allocator.free_count() * PAGE_SIZE as usize / (1024 * 1024),
        allocator.total_count() * PAGE_SIZE as usize / (1024 * 1024),
        bitmap_bytes / 1024,
        bitmap_phys,
    );

    #[cfg(debug_assertions)]
    debug_assert!(allocator.verify_invariants());

    *FRAME_ALLOCATOR.lock() = Some(allocator);
}

/// Allocate one frame. Contents are stale; see [`alloc_frame_zeroed`].
#[must_use]
pub fn alloc_frame() -> Option<PhysAddr> {
    FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .and_then(FrameAllocator::alloc)
        .map(|frame| PhysAddr::new(frame as u64 * PAGE_SIZE))
}

/// Allocate one frame and zero it through the direct map.
///
/// Use this for anything exposed to user space: fresh pages crossing
/// the capability boundary must not leak prior contents.
#[must_use]
pub fn alloc_frame_zeroed() -> Option<PhysAddr> {
    let phys = alloc_frame()?;
    // SAFETY: Just allocated; exclusively ours; RAM under the direct map.
    unsafe {
        core::ptr::write_bytes(
            phys_to_virt(phys).as_mut_ptr::<u8>(),
            0,
            PAGE_SIZE as usize,
        );
    }
    Some(phys)
}

/// Allocate `count` contiguous frames.
#[must_use]
pub fn alloc_frames(count: usize) -> Option<PhysAddr> {
    FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .and_then(|a| a.alloc_contiguous(count))
        .map(|frame| PhysAddr::new(frame as u64 * PAGE_SIZE))
}

/// Allocate `count` contiguous frames, zeroed.
#[must_use]
pub fn alloc_frames_zeroed(count: usize) -> Option<PhysAddr> {
    let phys = alloc_frames(count)?;
    // SAFETY: Just allocated; exclusively ours.
    unsafe {
        core::ptr::write_bytes(
            phys_to_virt(phys).as_mut_ptr::<u8>(),
            0,
            count * PAGE_SIZE as usize,
        );
    }
    Some(phys)
}

/// Free one frame.
pub fn free_frame(phys: PhysAddr) {
    if let Some(a) = FRAME_ALLOCATOR.lock().as_mut() {
        a.free(phys.frame_index());
    }
}

/// Free `count` frames starting at `phys`.
pub fn free_frames(phys: PhysAddr, count: usize) {
    if let Some(a) = FRAME_ALLOCATOR.lock().as_mut() {
        a.free_range(phys.frame_index(), count);
    }
}

/// `(free_bytes, total_bytes)`.
#[must_use]
pub fn memory_stats() -> (usize, usize) {
    let guard = FRAME_ALLOCATOR.lock();
    guard.as_ref().map_or((0, 0), |a| {
        (
            a.free_count() * PAGE_SIZE as usize,
            a.total_count() * PAGE_SIZE as usize,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_bitmap(frames: usize) -> &'static mut [u64] {
        std::vec![0u64; frames.div_ceil(64)].leak()
    }

    /// Build an allocator modelling a boot map with one usable region
    /// [0x10_0000, 0x2000_0000), bitmap carved from its start.
    fn scenario_allocator() -> FrameAllocator {
        let total = 0x2000_0000u64 / PAGE_SIZE; // 0x20000 frames
        // SAFETY: Leaked slice is exclusively ours.
        let mut a = unsafe { FrameAllocator::new(boxed_bitmap(total as usize), total as usize) };
        let usable_start = 0x10_0000 / PAGE_SIZE;
        let usable_frames = (0x2000_0000 - 0x10_0000) / PAGE_SIZE;
        a.free_range(usable_start as usize, usable_frames as usize);
        // Bitmap: 0x20000 bits = 16 KiB = 4 pages at the region start.
        a.mark_used(usable_start as usize, 4);
        a
    }

    #[test]
    fn test_boot_scenario_accounting() {
        let mut a = scenario_allocator();
        assert_eq!(a.total_count(), 0x20000);
        // All usable frames minus the bitmap's own pages.
        assert_eq!(a.free_count(), 0x1FF00 - 4);

        let before = a.free_count();
        let frame = a.alloc().expect("frame available");
        let addr = frame as u64 * PAGE_SIZE;
        assert!((0x10_0000..0x2000_0000).contains(&addr));
        assert_eq!(a.free_count(), before - 1);
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut a = scenario_allocator();
        let frame = a.alloc().expect("frame");
        let free_after_alloc = a.free_count();

        a.free(frame);
        assert_eq!(a.free_count(), free_after_alloc + 1);
        a.free(frame); // second free: no double count
        assert_eq!(a.free_count(), free_after_alloc + 1);
    }

    #[test]
    fn test_hint_does_not_immediately_reuse() {
        let mut a = scenario_allocator();
        let first = a.alloc().expect("first");
        a.free(first);
        // The rolling hint has moved past `first`; the next alloc picks
        // a different frame while free frames remain ahead.
        let second = a.alloc().expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn test_contiguous_window() {
        let total = 256;
        // SAFETY: Leaked slice is exclusively ours.
        let mut a = unsafe { FrameAllocator::new(boxed_bitmap(total), total) };
        a.free_range(0, total);

        let run = a.alloc_contiguous(32).expect("run of 32");
        for f in run..run + 32 {
            assert!(!a.is_free(f));
        }

        // Fragment: free a 10-frame hole, ask for 16.
        a.mark_used(0, total); // everything used
        a.free_range(100, 10);
        assert_eq!(a.alloc_contiguous(16), None);
        assert_eq!(a.alloc_contiguous(10), Some(100));
    }

    #[test]
    fn test_alloc_frames_one_equals_alloc_frame() {
        let total = 128;
        // SAFETY: Leaked slice is exclusively ours.
        let mut a = unsafe { FrameAllocator::new(boxed_bitmap(total), total) };
        a.free_range(0, total);

        let single = a.alloc().expect("single");
        a.free(single);
        let mut b_hint_match = a.alloc_contiguous(1).expect("contig 1");
        // Both paths allocate from the same rolling hint sequence.
        assert!(b_hint_match < total);
        a.free(b_hint_match);
        b_hint_match = a.alloc().expect("single again");
        assert!(b_hint_match < total);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let total = 8;
        // SAFETY: Leaked slice is exclusively ours.
        let mut a = unsafe { FrameAllocator::new(boxed_bitmap(total), total) };
        a.free_range(0, total);
        for _ in 0..total {
            assert!(a.alloc().is_some());
        }
        assert_eq!(a.alloc(), None);
        assert_eq!(a.free_count(), 0);
    }

    #[test]
    fn test_invariant_holds() {
        let mut a = scenario_allocator();
        for _ in 0..100 {
            let _ = a.alloc();
        }
        assert!(a.verify_invariants());
        assert_eq!(a.free_count() + a.used_count(), a.total_count());
    }
}
