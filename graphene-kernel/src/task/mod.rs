//! Thread and process lifecycle
//!
//! Creation wires a control block into the object arena, the owning
//! process, and the scheduler. Termination is two-phase: the dying
//! thread (or process) is zombified and detached immediately, but its
//! kernel stack and control blocks are reclaimed later by the reaper,
//! from another thread's context: a thread can never free the stack it
//! is running on.

pub mod process;
pub mod thread;
pub mod wait_queue;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use graphene_arch::IrqSpinMutex;
use graphene_cap::{ObjectType, ObjRef};

use crate::objects::{self, ObjectData};
use crate::sched;
use crate::vm::AddressSpace;

use process::{Process, ProcessFlags, ProcessState};
use thread::{KernelStack, Thread, ThreadFlags, ThreadState};

/// Task-layer errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskError {
    /// Arena, frame, or heap exhaustion.
    OutOfMemory,
    /// The process already has its maximum number of threads.
    ThreadLimit,
    /// The named process does not exist or is dead.
    NoSuchProcess,
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// The kernel process object (PID 0).
static KERNEL_PROCESS: AtomicU32 = AtomicU32::new(0);

/// Threads and processes waiting for their final unref.
static REAP_LIST: IrqSpinMutex<Vec<ObjRef>> = IrqSpinMutex::new(Vec::new());

/// Create the kernel process (PID 0) around the bootloader's page
/// tables. Called once during kernel initialisation.
pub fn init() {
    let proc = Process::new(
        0,
        "kernel",
        AddressSpace::kernel_space(),
        ObjRef::NULL,
        ProcessFlags::KERNEL,
    );
    let r = objects::alloc(ObjectData::Process(alloc::boxed::Box::new(proc)))
        .expect("object arena empty at boot");
    objects::inc_ref(r); // held by this static forever
    KERNEL_PROCESS.store(r.index(), Ordering::Release);
    log::info!("kernel process created (pid 0, {:?})", r);
}

/// The kernel process reference.
#[must_use]
pub fn kernel_process() -> ObjRef {
    ObjRef::from_index(KERNEL_PROCESS.load(Ordering::Acquire))
}

/// Create a process with a fresh address space and empty capability
/// table, linked under `parent` (the kernel process when null).
pub fn create_process(
    name: &str,
    parent: ObjRef,
    flags: ProcessFlags,
) -> Result<ObjRef, TaskError> {
    let parent = if parent.is_valid() {
        parent
    } else {
        kernel_process()
    };

    let aspace = AddressSpace::create().map_err(|_| TaskError::OutOfMemory)?;
    let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    let proc = Process::new(pid, name, aspace, parent, flags);

    let r = objects::alloc(ObjectData::Process(alloc::boxed::Box::new(proc)))
        .ok_or(TaskError::OutOfMemory)?;

    // The parent's children list holds one reference.
    objects::inc_ref(r);
    objects::with_process(parent, |p| p.children.push(r));

    log::debug!("process {} created (pid {})", name, pid);
    Ok(r)
}

/// Create a thread inside `proc`.
///
/// For user threads `entry`/`user_stack` are ring-3 addresses (already
/// validated by the caller); for kernel threads `entry` is an
/// `extern "C" fn(u64)`.
pub fn create_thread(
    proc: ObjRef,
    name: &str,
    entry: u64,
    entry_arg: u64,
    user_stack: u64,
    flags: ThreadFlags,
) -> Result<ObjRef, TaskError> {
    let can_add = objects::with_process(proc, |p| p.can_add_thread())
        .ok_or(TaskError::NoSuchProcess)?;
    if !can_add {
        return Err(TaskError::ThreadLimit);
    }

    let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    let mut t = Thread::new(tid, name, proc, flags);
    t.entry = entry;
    t.entry_arg = entry_arg;
    t.user_stack = user_stack;
    t.kernel_stack = Some(KernelStack::new_boxed().ok_or(TaskError::OutOfMemory)?);
    t.prepare_initial_frame(thread_trampoline);

    let r = objects::alloc(ObjectData::Thread(alloc::boxed::Box::new(t)))
        .ok_or(TaskError::OutOfMemory)?;

    // The process's thread list holds one reference.
    objects::inc_ref(r);
    objects::with_process(proc, |p| p.threads.push(r));

    sched::enqueue(r);
    Ok(r)
}

/// Create a kernel thread in the kernel process.
pub fn create_kernel_thread(
    name: &str,
    entry: extern "C" fn(u64),
    arg: u64,
) -> Result<ObjRef, TaskError> {
    create_thread(
        kernel_process(),
        name,
        entry as usize as u64,
        arg,
        0,
        ThreadFlags::KERNEL,
    )
}

/// First instruction of every thread: the switch that activated us ran
/// with interrupts disabled, so re-enable, then run the entry.
pub extern "C" fn thread_trampoline() -> ! {
    graphene_arch::cpu::restore_interrupts(1 << 9);

    let current = sched::current_thread();
    let (is_kernel, entry, arg) = objects::with_thread(current, |t| {
        (t.flags.contains(ThreadFlags::KERNEL), t.entry, t.entry_arg)
    })
    .expect("trampoline on a dead thread");

    if is_kernel {
        // SAFETY: Kernel threads are created from extern "C" fn(u64)
        // only (create_kernel_thread).
        let f: extern "C" fn(u64) = unsafe { core::mem::transmute(entry as usize) };
        f(arg);
        exit_current_thread(0);
    }

    crate::user::enter_current()
}

/// Terminate the calling thread. Never returns.
pub fn exit_current_thread(code: i64) -> ! {
    let current = sched::current_thread();
    log::debug!("thread {:?} exiting with code {}", current, code);

    let proc = objects::with_thread(current, |t| {
        t.state = ThreadState::Zombie;
        t.process
    })
    .expect("exiting thread not in arena");

    objects::with_process(proc, |p| p.threads.retain(|&t| t != current));
    REAP_LIST.lock().push(current);

    sched::schedule();
    unreachable!("zombie thread rescheduled");
}

/// Terminate the calling process. Never returns.
pub fn exit_current_process(code: i64) -> ! {
    let proc = sched::current_process();
    destroy_process(proc, code);
    sched::schedule();
    unreachable!("thread of a destroyed process rescheduled");
}

/// Tear a process down: zombify its threads, reparent its children to
/// the kernel process, release the capability table's references,
/// destroy the address space, and queue everything for the reaper.
///
/// Safe to call on the current process; the final context switch away
/// happens in the caller.
pub fn destroy_process(proc: ObjRef, exit_code: i64) {
    let Some((threads, children)) = objects::with_process(proc, |p| {
        p.state = ProcessState::Zombie;
        p.exit_code = exit_code;
        (
            core::mem::take(&mut p.threads),
            core::mem::take(&mut p.children),
        )
    }) else {
        return;
    };

    // Zombify and detach every thread.
    for t in &threads {
        let blocked_on = objects::with_thread(*t, |th| {
            th.state = ThreadState::Zombie;
            core::mem::replace(&mut th.blocked_on, ObjRef::NULL)
        })
        .unwrap_or(ObjRef::NULL);

        sched::remove_from_run_queue(*t);
        if blocked_on.is_valid() {
            cancel_wait(*t, blocked_on);
        }
    }

    // Children are reparented to the kernel process.
    let kproc = kernel_process();
    for child in children {
        objects::with_process(child, |c| c.parent = kproc);
        objects::with_process(kproc, |k| k.children.push(child));
    }

    // Drop every capability the table holds.
    objects::with_process(proc, |p| {
        let mut dropped: Vec<ObjRef> = Vec::new();
        p.cap_table.clear_all(|slot| dropped.push(slot.obj()));
        dropped
    })
    .into_iter()
    .flatten()
    .for_each(|obj| {
        objects::unref(obj);
    });

    // The address space dies now. If it is the live one, step off it
    // first: the kernel half of the boot tables maps everything the
    // kernel needs.
    if proc == sched::current_process() {
        // SAFETY: The kernel root maps the executing kernel.
        unsafe { graphene_arch::mmu::load_root(crate::memory::kernel_root().as_u64()) };
    }
    objects::with_process(proc, |p| p.aspace.destroy());

    // Remove from the parent's children list.
    let parent = objects::with_process(proc, |p| p.parent).unwrap_or(ObjRef::NULL);
    if parent.is_valid() {
        objects::with_process(parent, |p| p.children.retain(|&c| c != proc));
    }

    // Everything (including the caller's own thread: its stack is
    // still in use) goes to the reaper; reap() skips the thread that is
    // currently executing.
    let mut reap = REAP_LIST.lock();
    reap.extend(threads);
    reap.push(proc);
}

/// Cancel a thread's membership in whatever wait queue it sits on.
fn cancel_wait(t: ObjRef, blocked_on: ObjRef) {
    match objects::otype(blocked_on) {
        Some(ObjectType::IpcEndpoint) => {
            objects::with_endpoint(blocked_on, |ep| {
                ep.recv_queue.remove(t);
                ep.send_queue.remove(t);
            });
        }
        Some(ObjectType::Irq) => {
            objects::with_irq(blocked_on, |irq| irq.waiters.remove(t));
        }
        _ => {}
    }
}

/// Release reap-listed objects. Called by the scheduler from a context
/// guaranteed not to be running on any listed thread's stack.
pub fn reap(current: ObjRef) {
    let mut list = REAP_LIST.lock();
    let mut i = 0;
    while i < list.len() {
        let r = list[i];
        if r == current {
            i += 1;
            continue;
        }
        list.swap_remove(i);
        objects::unref(r);
    }
}
