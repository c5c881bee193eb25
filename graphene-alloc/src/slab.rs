//! Segregated slab classes
//!
//! Each class keeps an intrusive singly-linked free list: a free slot's
//! first 8 bytes hold the pointer to the next free slot. On exhaustion
//! the class claims one page from the frame pool, carves it into
//! `PAGE_SIZE / slot_size` slots, and threads them onto the list.
//!
//! Claimed pages are recorded in a span registry mapping page base →
//! class, so `free(ptr)` can recover the class without a layout.

use core::ptr::NonNull;

use crate::config::{MAX_SLAB_SPANS, NUM_SIZE_CLASSES, PAGE_SIZE};
use crate::error::AllocError;
use crate::size_class::{slot_size, slots_per_page};
use crate::traits::FramePool;

/// One claimed slab page.
#[derive(Clone, Copy)]
struct SlabSpan {
    /// Page base address (0 = empty entry).
    base: usize,
    /// Owning size class.
    class: u8,
}

impl SlabSpan {
    const EMPTY: Self = Self { base: 0, class: 0 };
}

/// Per-class state.
struct SizeClassState {
    /// Head of the intrusive free list.
    free_head: Option<NonNull<u8>>,
    /// Free slots currently on the list.
    free_slots: usize,
    /// Pages claimed by this class.
    pages: usize,
}

impl SizeClassState {
    const fn new() -> Self {
        Self {
            free_head: None,
            free_slots: 0,
            pages: 0,
        }
    }
}

/// All slab classes plus the span registry.
pub struct Slabs {
    classes: [SizeClassState; NUM_SIZE_CLASSES],
    spans: [SlabSpan; MAX_SLAB_SPANS],
    span_count: usize,
}

// SAFETY: The heap wraps Slabs in a lock; the raw pointers are only
// touched under it.
unsafe impl Send for Slabs {}

impl Slabs {
    /// Create empty slab state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            classes: [const { SizeClassState::new() }; NUM_SIZE_CLASSES],
            spans: [SlabSpan::EMPTY; MAX_SLAB_SPANS],
            span_count: 0,
        }
    }

    /// Pop a slot from a class, growing it if necessary.
    pub fn alloc<P: FramePool>(
        &mut self,
        pool: &mut P,
        class: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if self.classes[class].free_head.is_none() {
            self.grow(pool, class)?;
        }

        let state = &mut self.classes[class];
        let slot = state.free_head.expect("grow() left the list non-empty");
        // SAFETY: Free slots store the next-free pointer in their first
        // 8 bytes; the slot came off our own list.
        let next = unsafe { slot.as_ptr().cast::<*mut u8>().read() };
        state.free_head = NonNull::new(next);
        state.free_slots -= 1;
        Ok(slot)
    }

    /// Push a slot back onto its class list.
    ///
    /// # Safety
    ///
    /// `ptr` must be a slot previously returned by [`alloc`] for
    /// `class` and not currently on the list.
    ///
    /// [`alloc`]: Self::alloc
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, class: usize) {
        let state = &mut self.classes[class];
        let old_head = state
            .free_head
            .map_or(core::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: The slot is unused; its first 8 bytes become the link.
        unsafe { ptr.as_ptr().cast::<*mut u8>().write(old_head) };
        state.free_head = Some(ptr);
        state.free_slots += 1;
    }

    /// Find the class owning `ptr`, if it lies in a claimed slab page.
    #[must_use]
    pub fn class_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let page = (ptr.as_ptr() as usize) & !(PAGE_SIZE - 1);
        self.spans[..self.span_count]
            .iter()
            .find(|s| s.base == page)
            .map(|s| s.class as usize)
    }

    /// Free slots currently available in a class.
    #[must_use]
    pub fn free_slots(&self, class: usize) -> usize {
        self.classes[class].free_slots
    }

    /// Pages claimed by a class.
    #[must_use]
    pub fn pages(&self, class: usize) -> usize {
        self.classes[class].pages
    }

    /// Claim one page and carve it into slots for `class`.
    fn grow<P: FramePool>(&mut self, pool: &mut P, class: usize) -> Result<(), AllocError> {
        if self.span_count >= MAX_SLAB_SPANS {
            return Err(AllocError::SpanRegistryFull);
        }

        let page = pool.alloc_pages(1).ok_or(AllocError::OutOfFrames)?;
        let base = page.as_ptr() as usize;
        debug_assert_eq!(base % PAGE_SIZE, 0);

        self.spans[self.span_count] = SlabSpan {
            base,
            class: class as u8,
        };
        self.span_count += 1;

        let size = slot_size(class);
        let count = slots_per_page(class);
        for i in (0..count).rev() {
            let slot = NonNull::new((base + i * size) as *mut u8)
                .expect("slot address derived from a non-null page");
            // SAFETY: Fresh page; every slot is unused.
            unsafe { self.free(slot, class) };
        }
        self.classes[class].pages += 1;
        Ok(())
    }
}

impl Default for Slabs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::find_size_class;
    use crate::tests_support::TestPool;

    #[test]
    fn test_alloc_free_cycle() {
        let mut pool = TestPool::new(8);
        let mut slabs = Slabs::new();
        let class = find_size_class(64).expect("class");

        let a = slabs.alloc(&mut pool, class).expect("a");
        let b = slabs.alloc(&mut pool, class).expect("b");
        assert_ne!(a, b);
        assert_eq!(slabs.pages(class), 1);

        // SAFETY: Both slots came from alloc().
        unsafe {
            slabs.free(a, class);
            slabs.free(b, class);
        }
        assert_eq!(slabs.free_slots(class), slots_per_page(class));
    }

    #[test]
    fn test_natural_alignment() {
        let mut pool = TestPool::new(8);
        let mut slabs = Slabs::new();
        for (class, &size) in crate::config::SIZE_CLASSES.iter().enumerate() {
            let p = slabs.alloc(&mut pool, class).expect("slot");
            assert_eq!(p.as_ptr() as usize % size, 0, "class {size} misaligned");
        }
    }

    #[test]
    fn test_span_lookup() {
        let mut pool = TestPool::new(8);
        let mut slabs = Slabs::new();
        let class = find_size_class(128).expect("class");
        let p = slabs.alloc(&mut pool, class).expect("slot");
        assert_eq!(slabs.class_of(p), Some(class));

        let unrelated = NonNull::new(0xDEAD_0000 as *mut u8).expect("nonnull");
        assert_eq!(slabs.class_of(unrelated), None);
    }

    #[test]
    fn test_exhausted_pool() {
        let mut pool = TestPool::new(0);
        let mut slabs = Slabs::new();
        assert_eq!(
            slabs.alloc(&mut pool, 0).unwrap_err(),
            AllocError::OutOfFrames
        );
    }
}
