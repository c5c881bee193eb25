//! CPU control
//!
//! Interrupt flag save/restore (used by [`IrqSpinMutex`]), halting, and
//! the idle wait. On hosted builds these are inert so kernel logic can
//! run under the test harness.
//!
//! [`IrqSpinMutex`]: crate::sync::IrqSpinMutex

/// RFLAGS interrupt-enable bit.
const RFLAGS_IF: u64 = 1 << 9;

/// Save RFLAGS and disable interrupts.
///
/// Returns the previous RFLAGS value for [`restore_interrupts`].
#[cfg(target_os = "none")]
#[inline]
#[must_use]
pub fn disable_interrupts() -> u64 {
    let flags = x86_64::registers::rflags::read_raw();
    x86_64::instructions::interrupts::disable();
    flags
}

/// Restore the interrupt flag from a saved RFLAGS value.
#[cfg(target_os = "none")]
#[inline]
pub fn restore_interrupts(flags: u64) {
    if flags & RFLAGS_IF != 0 {
        x86_64::instructions::interrupts::enable();
    }
}

/// Check whether interrupts are currently enabled.
#[cfg(target_os = "none")]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

/// Halt the CPU forever with interrupts disabled.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

/// Sleep until the next interrupt.
///
/// Enables interrupts and halts in one step so a wakeup between the two
/// instructions cannot be lost (`sti` takes effect after the following
/// instruction).
#[cfg(target_os = "none")]
#[inline]
pub fn wait_for_interrupt() {
    x86_64::instructions::interrupts::enable_and_hlt();
}

// -- Hosted stand-ins (unit tests run in user mode; cli/hlt would fault)

#[cfg(not(target_os = "none"))]
#[inline]
#[must_use]
pub fn disable_interrupts() -> u64 {
    RFLAGS_IF
}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn restore_interrupts(_flags: u64) {}

#[cfg(not(target_os = "none"))]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(target_os = "none"))]
pub fn halt() -> ! {
    panic!("halt() on a hosted build");
}

#[cfg(not(target_os = "none"))]
#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
