//! Physical/Virtual Translation via the Direct Map
//!
//! The bootloader supplies a higher-half direct-map (HHDM) offset:
//! adding it to any physical address yields a kernel-reachable virtual
//! address. The offset is recorded once during memory init.

use core::sync::atomic::{AtomicU64, Ordering};

use graphene_common::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the direct-map offset. Called once from memory init.
pub(super) fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

/// The direct-map offset.
#[inline]
#[must_use]
pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// Convert a physical address to its direct-map virtual address.
#[inline]
#[must_use]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u64() + hhdm_offset())
}

/// Convert a direct-map virtual address back to physical.
///
/// Returns `None` for addresses below the direct map.
#[inline]
#[must_use]
pub fn virt_to_phys(virt: VirtAddr) -> Option<PhysAddr> {
    virt.as_u64()
        .checked_sub(hhdm_offset())
        .map(PhysAddr::new)
}

/// Pointer to a physical address through the direct map.
///
/// # Safety
///
/// The physical address must be valid RAM (or device memory the caller
/// may touch), properly aligned for `T`, and not concurrently mutated.
#[inline]
#[must_use]
pub unsafe fn phys_to_ptr<T>(phys: PhysAddr) -> *mut T {
    phys_to_virt(phys).as_mut_ptr::<T>()
}
