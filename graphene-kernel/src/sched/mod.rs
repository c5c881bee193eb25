//! Weighted-fair scheduler
//!
//! Single CPU, fully preemptive, tick-driven. The run queue is sorted
//! by vruntime; each tick advances the running thread's vruntime by
//! `tick_ns · W0 / weight(nice)` and preemption fires when the slice is
//! exhausted, the queue head has undercut the running thread, or a
//! reschedule was requested.
//!
//! A newly-ready thread's vruntime is clamped up to `min_vruntime`
//! (which never decreases), so a long-blocked thread cannot monopolise
//! the CPU on wake. The idle thread has vruntime ∞, is never enqueued,
//! and halts until the next interrupt.

pub mod idle;
pub mod run_queue;
pub mod weights;

use graphene_arch::{cpu, gdt, mmu, IrqSpinMutex};
use graphene_cap::ObjRef;
use graphene_pal::timer::NS_PER_TICK;

use crate::objects;
use crate::task::thread::{ThreadFlags, ThreadState};
use crate::task;

use run_queue::RunQueue;
use weights::vruntime_delta;

/// Scheduler state.
struct Scheduler {
    run_queue: RunQueue,
    current: ObjRef,
    idle: ObjRef,
    /// Smallest vruntime ever tracked; monotonically non-decreasing.
    min_vruntime: u64,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            run_queue: RunQueue::new(),
            current: ObjRef::NULL,
            idle: ObjRef::NULL,
            min_vruntime: 0,
        }
    }

    fn update_min_vruntime(&mut self) {
        let mut candidate = u64::MAX;
        if self.current.is_valid() && self.current != self.idle {
            if let Some(vr) = objects::with_thread(self.current, |t| t.vruntime) {
                candidate = candidate.min(vr);
            }
        }
        if let Some(head_vr) = self.run_queue.head_vruntime() {
            candidate = candidate.min(head_vr);
        }
        if candidate != u64::MAX && candidate > self.min_vruntime {
            self.min_vruntime = candidate;
        }
    }
}

static SCHEDULER: IrqSpinMutex<Scheduler> = IrqSpinMutex::new(Scheduler::new());

/// Create the idle thread and prime the scheduler. Requires the kernel
/// process (PID 0) to exist.
pub fn init() {
    let idle = idle::create_idle_thread().expect("cannot create the idle thread");
    let mut s = SCHEDULER.lock();
    s.idle = idle;
    s.current = ObjRef::NULL;
    log::info!("scheduler initialised, idle thread {:?}", idle);
}

/// The running thread.
#[must_use]
pub fn current_thread() -> ObjRef {
    SCHEDULER.lock().current
}

/// The running thread's process.
#[must_use]
pub fn current_process() -> ObjRef {
    let current = current_thread();
    objects::with_thread(current, |t| t.process).unwrap_or(ObjRef::NULL)
}

/// Make a thread ready: clamp its vruntime to `min_vruntime` and put it
/// on the run queue.
pub fn enqueue(thread: ObjRef) {
    let mut s = SCHEDULER.lock();
    let min_vr = s.min_vruntime;
    let is_idle = objects::with_thread(thread, |t| {
        t.vruntime = t.vruntime.max(min_vr);
        t.state = ThreadState::Ready;
        t.slice_remaining = t.quantum;
        t.is_idle()
    });
    if is_idle != Some(false) {
        // The idle thread never enters the run queue.
        return;
    }
    s.run_queue.insert(thread);
    s.update_min_vruntime();
}

/// Wake a blocked thread: detach its wait bookkeeping and enqueue it.
pub fn wake(thread: ObjRef) {
    let alive = objects::with_thread(thread, |t| {
        if t.state == ThreadState::Zombie {
            return false;
        }
        t.state = ThreadState::Ready;
        t.blocked_on = ObjRef::NULL;
        true
    });
    if alive == Some(true) {
        enqueue(thread);
    }
}

/// Drop a thread from the run queue (blocking or termination paths).
pub fn remove_from_run_queue(thread: ObjRef) {
    SCHEDULER.lock().run_queue.remove(thread);
}

/// Request a reschedule at the next opportunity.
pub fn set_need_resched() {
    let current = current_thread();
    objects::with_thread(current, |t| t.flags.set(ThreadFlags::NEEDS_RESCHED));
}

/// Account one timer tick against the running thread.
///
/// Returns `true` when the caller (the timer interrupt handler) should
/// invoke [`schedule`] on its way out.
pub fn tick() -> bool {
    let mut s = SCHEDULER.lock();
    let current = s.current;
    if !current.is_valid() {
        return false;
    }

    let idle = s.idle;
    if current == idle {
        // The idle thread yields to anything runnable.
        return !s.run_queue.is_empty();
    }

    let (slice_done, needs, cur_vr) = objects::with_thread(current, |t| {
        t.vruntime = t
            .vruntime
            .saturating_add(vruntime_delta(NS_PER_TICK, t.nice));
        t.slice_remaining = t.slice_remaining.saturating_sub(1);
        (
            t.slice_remaining == 0,
            t.flags.contains(ThreadFlags::NEEDS_RESCHED),
            t.vruntime,
        )
    })
    .unwrap_or((false, false, 0));

    s.update_min_vruntime();

    let head_undercuts = s
        .run_queue
        .head_vruntime()
        .is_some_and(|head_vr| head_vr < cur_vr);

    slice_done || head_undercuts || needs
}

/// Voluntarily give up the CPU.
pub fn yield_now() {
    {
        let s = SCHEDULER.lock();
        let current = s.current;
        objects::with_thread(current, |t| t.slice_remaining = 0);
    }
    schedule();
}

/// Pick the next thread and switch to it.
///
/// The outgoing thread is re-queued unless it blocked or died. The
/// switch itself runs with interrupts disabled; the scheduler lock is
/// dropped before the stack switch so the incoming thread can take it.
pub fn schedule() {
    let flags = cpu::disable_interrupts();

    // Reap terminated threads/processes (never the one running here).
    let reap_current = SCHEDULER.lock().current;
    task::reap(reap_current);

    let switch = {
        let mut s = SCHEDULER.lock();
        let prev = s.current;
        let idle = s.idle;

        // Re-queue the outgoing thread if it is still runnable.
        if prev.is_valid() && prev != idle {
            let runnable = objects::with_thread(prev, |t| {
                t.flags.clear(ThreadFlags::NEEDS_RESCHED);
                t.state.is_schedulable()
            })
            .unwrap_or(false);
            if runnable {
                let min_vr = s.min_vruntime;
                objects::with_thread(prev, |t| {
                    t.state = ThreadState::Ready;
                    t.vruntime = t.vruntime.max(min_vr);
                    t.slice_remaining = t.quantum;
                });
                s.run_queue.insert(prev);
            }
        }

        let next = s.run_queue.pop().unwrap_or(idle);
        s.update_min_vruntime();

        if next == prev {
            objects::with_thread(next, |t| t.state = ThreadState::Running);
            None
        } else {
            objects::with_thread(next, |t| t.state = ThreadState::Running);
            s.current = next;
            prepare_switch(prev, next)
        }
    };

    if let Some((prev_sp, next_sp)) = switch {
        // SAFETY: Both stack-pointer slots belong to live threads; the
        // frames were produced by switch_context / thread creation.
        unsafe { graphene_arch::context::switch_context(prev_sp, next_sp) };
    }

    cpu::restore_interrupts(flags);
}

/// Load address space, kernel stack, and stack-pointer slots for a
/// switch from `prev` to `next`.
fn prepare_switch(prev: ObjRef, next: ObjRef) -> Option<(*mut u64, u64)> {
    let (next_sp, next_stack_top, next_proc) =
        objects::with_thread(next, |t| (t.saved_sp, t.kernel_stack_top(), t.process))?;

    // Switch CR3 only when the address space actually changes.
    let next_root = objects::with_process(next_proc, |p| p.aspace.root())?;
    let prev_proc = objects::with_thread(prev, |t| t.process).unwrap_or(ObjRef::NULL);
    let prev_root = objects::with_process(prev_proc, |p| p.aspace.root());
    if prev_root != Some(next_root) {
        // SAFETY: Every address space shares the kernel upper half.
        unsafe { mmu::load_root(next_root.as_u64()) };
    }

    // Ring-3 entries land on the incoming thread's kernel stack.
    gdt::set_kernel_stack(next_stack_top);

    let prev_sp = objects::with_thread(prev, |t| core::ptr::addr_of_mut!(t.saved_sp))?;
    Some((prev_sp, next_sp))
}

/// First dispatch: load the first thread's context and never return.
pub fn start() -> ! {
    let _ = cpu::disable_interrupts();

    let next_sp = {
        let mut s = SCHEDULER.lock();
        let next = s.run_queue.pop().unwrap_or(s.idle);
        objects::with_thread(next, |t| t.state = ThreadState::Running);
        s.current = next;

        let (sp, stack_top, proc) = objects::with_thread(next, |t| {
            (t.saved_sp, t.kernel_stack_top(), t.process)
        })
        .expect("no thread to start");

        if let Some(root) = objects::with_process(proc, |p| p.aspace.root()) {
            // SAFETY: The root shares the kernel upper half.
            unsafe { mmu::load_root(root.as_u64()) };
        }
        gdt::set_kernel_stack(stack_top);
        sp
    };

    log::info!("scheduler starting");
    // SAFETY: next_sp carries a valid initial switch frame.
    unsafe { graphene_arch::context::load_context(next_sp) }
}
