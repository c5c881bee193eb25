//! Thread control blocks
//!
//! A thread owns a 16 KiB kernel stack and carries a weak back-reference
//! to its process. The saved context is just the kernel stack pointer at
//! the moment the thread was switched out; a freshly created thread gets
//! a hand-built switch frame whose return address is the thread
//! trampoline.

use alloc::boxed::Box;
use core::alloc::Layout;

use graphene_arch::context::SwitchFrame;
use graphene_cap::ObjRef;
use graphene_syscall::Message;

use crate::memory::layout::KERNEL_STACK_SIZE;
use crate::sched::weights::DEFAULT_QUANTUM_TICKS;

/// Thread lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// On the run queue, waiting for the CPU.
    Ready,
    /// Currently executing.
    Running,
    /// On a wait queue (IPC, IRQ).
    Blocked,
    /// Terminated; never scheduled again.
    Zombie,
}

impl ThreadState {
    /// Whether the scheduler may pick this thread.
    #[inline]
    #[must_use]
    pub const fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// Thread flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ThreadFlags(u8);

impl ThreadFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Runs in ring 0 and never enters user mode.
    pub const KERNEL: Self = Self(1 << 0);
    /// The idle thread.
    pub const IDLE: Self = Self(1 << 1);
    /// Preempt at the next opportunity.
    pub const NEEDS_RESCHED: Self = Self(1 << 2);
    /// Currently inside a syscall.
    pub const IN_SYSCALL: Self = Self(1 << 3);

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn set(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn clear(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Why a blocked thread was woken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WakeReason {
    /// Not woken yet / no result recorded.
    #[default]
    None,
    /// A message (of the given payload length) was delivered.
    Delivered(usize),
    /// The endpoint was closed while the thread was queued.
    EndpointClosed,
    /// An IRQ event arrived.
    IrqFired,
}

/// A 16 KiB kernel stack, page-aligned.
#[repr(C, align(4096))]
pub struct KernelStack([u8; KERNEL_STACK_SIZE]);

impl KernelStack {
    /// Allocate a zeroed stack directly on the heap.
    #[must_use]
    pub fn new_boxed() -> Option<Box<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: Non-zero layout; the pointer type matches the layout.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if raw.is_null() {
            return None;
        }
        // SAFETY: Freshly allocated with this exact layout.
        Some(unsafe { Box::from_raw(raw.cast::<Self>()) })
    }

    /// Highest address of the stack (stacks grow down).
    #[inline]
    #[must_use]
    pub fn top(&self) -> u64 {
        core::ptr::from_ref(self) as u64 + KERNEL_STACK_SIZE as u64
    }
}

/// Thread control block.
pub struct Thread {
    /// Thread id.
    pub tid: u32,
    /// Debug name.
    pub name: [u8; 16],
    /// Lifecycle state.
    pub state: ThreadState,
    /// Owning process (weak: validated on use, never outlived logically).
    pub process: ObjRef,
    /// Owned kernel stack.
    pub kernel_stack: Option<Box<KernelStack>>,
    /// Saved kernel stack pointer while switched out.
    pub saved_sp: u64,
    /// Entry address (kernel function or user RIP).
    pub entry: u64,
    /// Initial argument passed to the entry.
    pub entry_arg: u64,
    /// Initial user stack pointer (user threads).
    pub user_stack: u64,
    /// Flag bits.
    pub flags: ThreadFlags,

    // Scheduler fields
    /// Weighted virtual runtime (ns-scaled).
    pub vruntime: u64,
    /// Niceness in [-20, +19].
    pub nice: i8,
    /// Ticks left in the current slice.
    pub slice_remaining: u32,
    /// Slice length in ticks.
    pub quantum: u32,
    /// Run-queue links.
    pub sched_next: ObjRef,
    #[allow(missing_docs)]
    pub sched_prev: ObjRef,
    /// Whether the thread sits on the run queue.
    pub in_run_queue: bool,

    // Wait-queue links
    #[allow(missing_docs)]
    pub wait_next: ObjRef,
    #[allow(missing_docs)]
    pub wait_prev: ObjRef,
    /// Whether the thread sits on a wait queue.
    pub in_wait_queue: bool,

    // IPC rendezvous state
    /// Staging/receive buffer while blocked on IPC. Points into this
    /// thread's own kernel stack and is only dereferenced while the
    /// thread is blocked on the corresponding queue.
    pub ipc_slot: *mut Message,
    /// Outcome recorded by whoever woke the thread.
    pub wake_reason: WakeReason,
    /// Caller to wake when this thread sends a reply.
    pub reply_to: ObjRef,
    /// Object whose wait queue this thread is blocked on (endpoint or
    /// IRQ), for cancellation at process destruction.
    pub blocked_on: ObjRef,
}

// SAFETY: Threads are only touched under the kernel's single-CPU
// critical-section discipline; the raw pointer is a staging slot, not
// shared state.
unsafe impl Send for Thread {}

impl Thread {
    /// Create a control block. The caller allocates the kernel stack
    /// and prepares the initial frame via [`prepare_initial_frame`].
    ///
    /// [`prepare_initial_frame`]: Self::prepare_initial_frame
    #[must_use]
    pub fn new(tid: u32, name: &str, process: ObjRef, flags: ThreadFlags) -> Self {
        let mut name_buf = [0u8; 16];
        let len = name.len().min(16);
        name_buf[..len].copy_from_slice(&name.as_bytes()[..len]);

        Self {
            tid,
            name: name_buf,
            state: ThreadState::Ready,
            process,
            kernel_stack: None,
            saved_sp: 0,
            entry: 0,
            entry_arg: 0,
            user_stack: 0,
            flags,
            vruntime: 0,
            nice: 0,
            slice_remaining: DEFAULT_QUANTUM_TICKS,
            quantum: DEFAULT_QUANTUM_TICKS,
            sched_next: ObjRef::NULL,
            sched_prev: ObjRef::NULL,
            in_run_queue: false,
            wait_next: ObjRef::NULL,
            wait_prev: ObjRef::NULL,
            in_wait_queue: false,
            ipc_slot: core::ptr::null_mut(),
            wake_reason: WakeReason::None,
            reply_to: ObjRef::NULL,
            blocked_on: ObjRef::NULL,
        }
    }

    /// Debug name as a str.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(16);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<thread>")
    }

    /// Top of the kernel stack.
    #[must_use]
    pub fn kernel_stack_top(&self) -> u64 {
        self.kernel_stack.as_ref().map_or(0, |s| s.top())
    }

    /// Lay out the initial switch frame so the first context switch
    /// "returns" into `trampoline`.
    ///
    /// The frame sits below one padding word so the trampoline starts
    /// with the stack alignment the ABI expects after a call.
    pub fn prepare_initial_frame(&mut self, trampoline: extern "C" fn() -> !) {
        let top = self.kernel_stack_top();
        debug_assert_ne!(top, 0, "prepare_initial_frame before stack allocation");
        let sp = top - 8 - core::mem::size_of::<SwitchFrame>() as u64;

        let frame = SwitchFrame {
            rip: trampoline as usize as u64,
            ..SwitchFrame::default()
        };
        // SAFETY: The frame lies inside this thread's own stack.
        unsafe { core::ptr::write(sp as *mut SwitchFrame, frame) };
        self.saved_sp = sp;
    }

    /// Whether this is the idle thread.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_schedulability() {
        assert!(ThreadState::Ready.is_schedulable());
        assert!(ThreadState::Running.is_schedulable());
        assert!(!ThreadState::Blocked.is_schedulable());
        assert!(!ThreadState::Zombie.is_schedulable());
    }

    #[test]
    fn test_name_truncation() {
        let t = Thread::new(1, "a-very-long-thread-name", ObjRef::NULL, ThreadFlags::NONE);
        assert_eq!(t.name_str().len(), 16);
    }

    #[test]
    fn test_flags() {
        let mut f = ThreadFlags::KERNEL;
        assert!(f.contains(ThreadFlags::KERNEL));
        f.set(ThreadFlags::NEEDS_RESCHED);
        assert!(f.contains(ThreadFlags::NEEDS_RESCHED));
        f.clear(ThreadFlags::NEEDS_RESCHED);
        assert!(!f.contains(ThreadFlags::NEEDS_RESCHED));
    }
}
