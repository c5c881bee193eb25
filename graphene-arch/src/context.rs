//! Context switch and ring-3 entry
//!
//! A context switch saves the callee-saved registers on the outgoing
//! thread's kernel stack, stores the stack pointer in the outgoing
//! thread's control block, loads the incoming thread's saved stack
//! pointer, and pops its callee-saved registers. A thread's "saved
//! context" is therefore just a stack pointer.
//!
//! A freshly created thread gets a hand-built frame at the top of its
//! kernel stack: six callee-saved slots plus a return address pointing
//! at the thread trampoline, so the first switch "returns" into it.

/// Callee-saved register frame as laid out on the stack by
/// [`switch_context`], followed by the return address.
///
/// Kept in sync with the push/pop order in the assembly below.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SwitchFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    /// Return address popped by `ret`.
    pub rip: u64,
}

/// Switch from the current thread to another.
///
/// Saves the callee-saved registers, writes the resulting stack pointer
/// to `*old_sp`, then installs `new_sp` and resumes whatever that stack
/// holds. Returns when something later switches back to `*old_sp`.
///
/// # Safety
///
/// `old_sp` must be a valid slot for the outgoing thread's saved stack
/// pointer, and `new_sp` must point at a frame previously produced by
/// this function (or built by thread creation).
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old_sp: *mut u64, new_sp: u64) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// One-way context load for the very first dispatch.
///
/// # Safety
///
/// `new_sp` must point at a valid switch frame. The current stack is
/// abandoned; this never returns.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub unsafe extern "C" fn load_context(new_sp: u64) -> ! {
    core::arch::naked_asm!(
        "mov rsp, rdi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Enter ring 3 for the first time.
///
/// Builds an interrupt-return frame {user SS, user RSP, RFLAGS with
/// interrupts enabled, user CS, entry RIP}, loads the user data
/// segments, places `arg` in `rdi`, and executes `iretq`.
///
/// # Safety
///
/// The caller must have validated `entry` and `user_sp` against the user
/// address range, switched to the target address space, and pointed the
/// TSS ring-0 stack at this thread's kernel stack.
#[cfg(target_os = "none")]
pub unsafe fn enter_user(entry: u64, user_sp: u64, arg: u64) -> ! {
    let user_cs = crate::gdt::user_code_selector().0 as u64;
    let user_ds = crate::gdt::user_data_selector().0 as u64;

    // RFLAGS: IF set, reserved bit 1 set, everything else clear.
    let rflags: u64 = 0x202;

    unsafe {
        core::arch::asm!(
            "mov ds, {ds:x}",
            "mov es, {ds:x}",
            "push {ss}",
            "push {sp}",
            "push {rflags}",
            "push {cs}",
            "push {rip}",
            "mov rdi, {arg}",
            "xor rsi, rsi",
            "xor rdx, rdx",
            "xor rcx, rcx",
            "xor r8, r8",
            "xor r9, r9",
            "xor r10, r10",
            "xor r11, r11",
            "xor rbx, rbx",
            "xor rbp, rbp",
            "xor r12, r12",
            "xor r13, r13",
            "xor r14, r14",
            "xor r15, r15",
            "xor rax, rax",
            "iretq",
            ds = in(reg) user_ds,
            ss = in(reg) user_ds,
            sp = in(reg) user_sp,
            rflags = in(reg) rflags,
            cs = in(reg) user_cs,
            rip = in(reg) entry,
            arg = in(reg) arg,
            options(noreturn),
        )
    }
}

#[cfg(not(target_os = "none"))]
pub unsafe fn enter_user(_entry: u64, _user_sp: u64, _arg: u64) -> ! {
    panic!("enter_user() on a hosted build");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_frame_layout() {
        // Six callee-saved registers plus the return address.
        assert_eq!(core::mem::size_of::<SwitchFrame>(), 7 * 8);
    }
}
