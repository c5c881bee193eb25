//! Page-fault policy
//!
//! There is no demand paging in this kernel, so a fault is remediable
//! only if it is spurious; an otherwise-legal access to a tracked,
//! mapped region still returns "not handled" and the faulting process
//! is terminated (user) or the kernel panics (kernel mode).

use super::aspace::{AddressSpace, RegionFlags};

/// Decoded page-fault error bits (x86 error code).
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultInfo {
    /// The fault was a protection violation (page present).
    pub present: bool,
    /// The access was a write.
    pub write: bool,
    /// The access came from ring 3.
    pub user: bool,
    /// The access was an instruction fetch.
    pub instruction_fetch: bool,
}

impl FaultInfo {
    /// Decode the hardware error code.
    #[must_use]
    pub const fn from_error_code(code: u64) -> Self {
        Self {
            present: code & 1 != 0,
            write: code & 2 != 0,
            user: code & 4 != 0,
            instruction_fetch: code & 16 != 0,
        }
    }
}

/// Decide whether a fault at `vaddr` is remediable.
///
/// Returns `true` only when the fault can be fixed up and the faulting
/// instruction retried. The decision table:
///
/// - no region contains `vaddr` → not handled
/// - user access to a non-user region → not handled
/// - write to a non-writable region → not handled
/// - instruction fetch from a non-executable region → not handled
/// - guard region → not handled
/// - anything else → the fault is real (no demand paging): not handled
#[must_use]
pub fn handle_page_fault(space: &AddressSpace, vaddr: u64, info: FaultInfo) -> bool {
    let Some(region) = space.region_at(vaddr) else {
        return false;
    };

    if info.user && !region.flags.contains(RegionFlags::USER) {
        return false;
    }
    if info.write && !region.flags.contains(RegionFlags::WRITE) {
        return false;
    }
    if info.instruction_fetch && !region.flags.contains(RegionFlags::EXECUTE) {
        return false;
    }
    if region.flags.contains(RegionFlags::GUARD) {
        return false;
    }

    // The access was legal for the region, yet it faulted, and this
    // kernel has no demand paging to satisfy it.
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_decoding() {
        let info = FaultInfo::from_error_code(0b10111);
        assert!(info.present);
        assert!(info.write);
        assert!(info.user);
        assert!(info.instruction_fetch);

        let info = FaultInfo::from_error_code(0);
        assert!(!info.present);
        assert!(!info.write);
        assert!(!info.user);
        assert!(!info.instruction_fetch);
    }
}
