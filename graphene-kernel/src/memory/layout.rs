//! Virtual Address Space Layout
//!
//! Fixed addresses for 48-bit x86-64 virtual addressing.
//!
//! ```text
//! 0x0000_0000_0040_0000 - 0x0000_7FFF_FFFF_FFFF : User space
//! 0x0000_8000_0000_0000 - 0xFFFF_7FFF_FFFF_FFFF : Non-canonical hole
//! HHDM base (boot info)  ..                      : Direct physical map
//! 0xFFFF_FFFF_8000_0000 - ..                     : Kernel image
//! ```

/// Lowest user virtual address (4 MiB; keeps the null page and the
/// low megabytes unmapped).
pub const USER_BASE: u64 = 0x0000_0000_0040_0000;

/// Highest user virtual address (end of the lower canonical half).
pub const USER_TOP: u64 = 0x0000_7FFF_FFFF_FFFF;

/// Default top of a new user stack; the stack grows down from here.
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFF0_0000;

/// Default user stack size.
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Kernel image base (upper half).
pub const KERNEL_BASE: u64 = 0xFFFF_FFFF_8000_0000;

/// Kernel thread stack size.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Check that `[start, start + size)` lies inside user space.
#[must_use]
pub const fn user_range_ok(start: u64, size: u64) -> bool {
    if size == 0 {
        return start >= USER_BASE && start <= USER_TOP;
    }
    let Some(end) = start.checked_add(size) else {
        return false;
    };
    start >= USER_BASE && end - 1 <= USER_TOP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_range() {
        assert!(user_range_ok(USER_BASE, 0x1000));
        assert!(user_range_ok(USER_TOP - 0xFFF, 0x1000));
        assert!(!user_range_ok(USER_BASE - 0x1000, 0x1000));
        assert!(!user_range_ok(USER_TOP, 0x1000));
        assert!(!user_range_ok(u64::MAX - 10, 100)); // wrap-around
        assert!(!user_range_ok(0, 0x1000)); // null page
    }

    #[test]
    fn test_stack_inside_user_space() {
        assert!(user_range_ok(USER_STACK_TOP - USER_STACK_SIZE, USER_STACK_SIZE));
    }
}
