//! Allocator configuration and size classes

/// Frame/page size backing the heap.
pub const PAGE_SIZE: usize = 4096;

/// Slab slot sizes. Every class divides the page evenly and every slot
/// is naturally aligned to the class size (pages are carved from a
/// page-aligned base).
pub const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// Number of size classes.
pub const NUM_SIZE_CLASSES: usize = SIZE_CLASSES.len();

/// Largest slab-served allocation; anything bigger takes the large path.
pub const MAX_SMALL_SIZE: usize = 2048;

/// In-band header size on large blocks.
pub const LARGE_HEADER_SIZE: usize = 16;

/// Header magic for a live large block.
pub const MAGIC_ALLOC: u64 = 0x414C_4C4F_43_u64; // "ALLOC"

/// Header magic for a free large block.
pub const MAGIC_FREE: u64 = 0x4652_4545_u64; // "FREE"

/// Smallest carve-off worth keeping as its own free block: a header
/// plus one slot of usable space.
pub const MIN_LARGE_BLOCK: usize = LARGE_HEADER_SIZE + 16;

/// Maximum slab pages tracked in the span registry. Each entry maps a
/// claimed page to its size class so `free(ptr)` without a layout can
/// find the owning class.
pub const MAX_SLAB_SPANS: usize = 1024;

const _: () = {
    // Every class must divide the page evenly.
    let mut i = 0;
    while i < NUM_SIZE_CLASSES {
        assert!(PAGE_SIZE % SIZE_CLASSES[i] == 0);
        i += 1;
    }
    assert!(SIZE_CLASSES[NUM_SIZE_CLASSES - 1] == MAX_SMALL_SIZE);
};
