//! Trap frames and the syscall entry stub
//!
//! Every entry from user mode is normalised into a [`TrapFrame`]: the
//! general-purpose registers pushed by the stub, the vector number, the
//! error code (0 when the vector has none), and the five words the CPU
//! pushed at the ring transition.
//!
//! The syscall stub for `int 0x80` lives here as naked assembly. It
//! builds the frame, calls the handler the kernel registered with
//! [`set_syscall_handler`], restores the registers (including the result
//! the handler wrote into `rax`), and returns with `iretq`.

use core::sync::atomic::{AtomicUsize, Ordering};

/// The uniform trap frame.
///
/// Layout matches the push order of the entry stubs; the struct sits
/// directly on the interrupted thread's kernel stack.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    /// Vector number pushed by the stub.
    pub vector: u64,
    /// Hardware error code, or 0 for vectors without one.
    pub error_code: u64,
    // Pushed by the CPU at the ring transition:
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Syscall request number (return-value register).
    #[inline]
    #[must_use]
    pub const fn syscall_number(&self) -> u64 {
        self.rax
    }

    /// Syscall arguments in ABI order: rdi, rsi, rdx, r10, r8, r9.
    #[inline]
    #[must_use]
    pub const fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    /// Write the syscall result into the return-value slot.
    #[inline]
    pub fn set_result(&mut self, result: i64) {
        self.rax = result as u64;
    }

    /// Whether the trap came from ring 3.
    #[inline]
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 0x3 == 0x3
    }
}

/// Registered syscall handler, called with the trap frame.
pub type SyscallHandler = fn(&mut TrapFrame);

static SYSCALL_HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Register the kernel's syscall dispatcher.
pub fn set_syscall_handler(handler: SyscallHandler) {
    SYSCALL_HANDLER.store(handler as usize, Ordering::Release);
}

/// Rust-side landing pad called by the naked stub.
extern "C" fn syscall_trampoline(frame: &mut TrapFrame) {
    let raw = SYSCALL_HANDLER.load(Ordering::Acquire);
    if raw == 0 {
        frame.set_result(-1); // invalid_syscall: dispatcher not installed
        return;
    }
    // SAFETY: Only set_syscall_handler stores here, always a SyscallHandler.
    let handler: SyscallHandler = unsafe { core::mem::transmute(raw) };
    handler(frame);
}

/// `int 0x80` entry stub.
///
/// Pushes a zero error code, the vector, and all GPRs to form a
/// [`TrapFrame`], hands it to the dispatcher, then unwinds and `iretq`s
/// back to the caller with the result in `rax`.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "push 0",          // error_code
        "push 0x80",       // vector
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {trampoline}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16",     // vector + error_code
        "iretq",
        trampoline = sym syscall_trampoline,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_register_mapping() {
        let frame = TrapFrame {
            rax: 2,
            rdi: 10,
            rsi: 11,
            rdx: 12,
            r10: 13,
            r8: 14,
            r9: 15,
            ..Default::default()
        };
        assert_eq!(frame.syscall_number(), 2);
        assert_eq!(frame.syscall_args(), [10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_from_user() {
        let mut frame = TrapFrame::default();
        frame.cs = 0x08;
        assert!(!frame.from_user());
        frame.cs = 0x2B;
        assert!(frame.from_user());
    }

    #[test]
    fn test_set_result() {
        let mut frame = TrapFrame::default();
        frame.set_result(-3);
        assert_eq!(frame.rax as i64, -3);
    }
}
