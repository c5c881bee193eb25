//! The idle thread
//!
//! Runs only when the run queue is empty. Its vruntime is pinned at the
//! maximum so it can never win against a real thread, and it is never
//! placed on the run queue: the scheduler falls back to it explicitly.

use graphene_cap::ObjRef;

use crate::objects::{self, ObjectData};
use crate::task::thread::{KernelStack, Thread, ThreadFlags, ThreadState};
use crate::task;

/// Halt until the next interrupt, forever.
extern "C" fn idle_loop(_arg: u64) {
    loop {
        graphene_arch::cpu::wait_for_interrupt();
    }
}

/// Build the idle thread inside the kernel process.
pub fn create_idle_thread() -> Option<ObjRef> {
    let mut t = Thread::new(
        0,
        "idle",
        task::kernel_process(),
        ThreadFlags::KERNEL.with(ThreadFlags::IDLE),
    );
    t.state = ThreadState::Ready;
    t.vruntime = u64::MAX;
    t.entry = idle_loop as usize as u64;
    t.kernel_stack = Some(KernelStack::new_boxed()?);
    t.prepare_initial_frame(task::thread_trampoline);

    let r = objects::alloc(ObjectData::Thread(alloc::boxed::Box::new(t)))?;
    objects::inc_ref(r); // held by the scheduler forever
    Some(r)
}
